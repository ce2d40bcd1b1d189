use cranelift_module::Module;
use tracing::trace;

use super::expr::ValueCodegen;
use crate::ast::{Block, Stmt};
use crate::diagnostics::TranslateError;
use crate::span::Spanned;
use crate::translator::FunctionTranslator;
use crate::types::Type;

/// Lowers statements into the function being generated.
pub struct StatementCodegen<'a, 't, M: Module> {
    func: &'a mut FunctionTranslator<'t, M>,
}

impl<'a, 't, M: Module> StatementCodegen<'a, 't, M> {
    pub fn new(func: &'a mut FunctionTranslator<'t, M>) -> Self {
        Self { func }
    }

    /// Lower every statement of `block` in order. The caller owns the scope.
    pub fn block(&mut self, block: &Block) -> Result<(), TranslateError> {
        for stmt in &block.stmts {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    pub fn stmt(&mut self, stmt: &Spanned<Stmt>) -> Result<(), TranslateError> {
        let span = stmt.span;
        match &stmt.node {
            Stmt::Expression(expr) => {
                ValueCodegen::new(self.func).maybe_value(expr, None)?;
            }
            Stmt::VoidReturn => self.func.return_void(span)?,
            Stmt::Return(expr) => {
                let ret = self.func.return_type().clone();
                let value = ValueCodegen::new(self.func).value(expr, Some(&ret))?;
                self.func.return_(value, expr.span)?;
            }
            Stmt::Assignment { lhs, rhs } => {
                let mut values = ValueCodegen::new(self.func);
                let addr = values.address(lhs)?;
                let hint = addr.ty.pointee().cloned();
                let value = values.value(rhs, hint.as_ref())?;
                self.func.add_store(addr, value, span)?;
            }
            Stmt::Declaration { ty, name } => {
                let ty = self.func.resolve_type(ty)?;
                self.func.declare(&name.node, &ty, name.span)?;
            }
            Stmt::CompoundDeclaration { ty, name, value } => {
                let ty = self.func.resolve_type(ty)?;
                // The initializer cannot see the name it initializes.
                let value = ValueCodegen::new(self.func).value(value, Some(&ty))?;
                self.func.declare(&name.node, &ty, name.span)?;
                self.func.assign(&name.node, value, span)?;
            }
            Stmt::If { condition, then_block, else_block } => {
                let cond = ValueCodegen::new(self.func).value(condition, Some(&Type::bool()))?;
                let mut ite = self.func.create_ifthenelse(cond, condition.span)?;
                self.block(then_block)?;
                if let Some(else_block) = else_block {
                    self.func.point_to_else(&mut ite)?;
                    self.block(else_block)?;
                }
                self.func.end_ifthenelse(ite)?;
            }
        }
        trace!(unreachable = self.func.is_unreachable(), "lowered statement");
        Ok(())
    }
}

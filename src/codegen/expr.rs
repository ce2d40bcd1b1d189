use cranelift_module::Module;

use crate::ast::{BinOp, Expr, UnaryOp};
use crate::diagnostics::TranslateError;
use crate::span::{Span, Spanned};
use crate::translator::{FunctionTranslator, TypedValue};
use crate::types::{Primitive, Type};

/// Lowers expressions to values.
///
/// `hint` is the type the surrounding construct expects. It only decides the
/// type of numeric literals (the other operand, the declared type, the
/// parameter or return type); no value is ever converted to match it.
pub struct ValueCodegen<'a, 't, M: Module> {
    func: &'a mut FunctionTranslator<'t, M>,
}

impl<'a, 't, M: Module> ValueCodegen<'a, 't, M> {
    pub fn new(func: &'a mut FunctionTranslator<'t, M>) -> Self {
        Self { func }
    }

    /// Lower an expression that must produce a value.
    pub fn value(&mut self, expr: &Spanned<Expr>, hint: Option<&Type>) -> Result<TypedValue, TranslateError> {
        match self.maybe_value(expr, hint)? {
            Some(v) => Ok(v),
            None => Err(TranslateError::void_mismatch("a value", "void", self.func.pos(expr.span))),
        }
    }

    /// Lower an expression; `None` for calls to void functions.
    pub fn maybe_value(&mut self, expr: &Spanned<Expr>, hint: Option<&Type>) -> Result<Option<TypedValue>, TranslateError> {
        let span = expr.span;
        let value = match &expr.node {
            Expr::IntLiteral(n) => match hint {
                Some(ty) if ty.is_integer() => self.func.int_const(*n, ty, span)?,
                Some(ty) if ty.is_float() => self.func.float_const(*n as f64, ty, span)?,
                _ => self.func.int_const(*n, &Type::int(64), span)?,
            },
            Expr::UIntLiteral(n) => match hint {
                Some(ty) if ty.is_integer() => self.func.uint_const(*n, ty, span)?,
                Some(ty) if ty.is_float() => self.func.float_const(*n as f64, ty, span)?,
                _ => self.func.uint_const(*n, &Type::uint(64), span)?,
            },
            Expr::FloatLiteral(x) => match hint {
                Some(ty) if ty.is_float() => self.func.float_const(*x, ty, span)?,
                _ => self.func.float_const(*x, &Type::float(64), span)?,
            },
            Expr::BoolLiteral(b) => self.func.bool_const(*b)?,
            Expr::StringLiteral(s) => self.func.string_literal(s, span)?,
            Expr::Variable(name) => self.func.get_identifier_value(name, span)?,
            Expr::Reference(inner) => self.address(inner)?,
            Expr::Dereference(inner) => {
                let ptr = self.value(inner, None)?;
                self.func.add_load(ptr, span)?
            }
            Expr::FieldAccess { object, field } => {
                if is_place(&object.node) {
                    let base = self.address(object)?;
                    let addr = self.func.field_address(base, &field.node, field.span)?;
                    self.func.add_load(addr, span)?
                } else {
                    let strukt = self.value(object, None)?;
                    self.func.field_access(strukt, &field.node, field.span)?
                }
            }
            Expr::Binop { op, lhs, rhs } => self.binop(*op, lhs, rhs, hint, span)?,
            Expr::Unop { op, operand } => match op {
                UnaryOp::Neg => match (&operand.node, hint) {
                    // A negated literal is one constant, so `i8 x = -128` fits.
                    (Expr::IntLiteral(n), Some(ty)) if ty.primitive().is_some_and(Primitive::is_signed) => {
                        self.func.int_const(n.wrapping_neg(), ty, span)?
                    }
                    _ => {
                        let v = self.value(operand, hint)?;
                        self.func.neg(v, span)?
                    }
                },
                UnaryOp::Not => {
                    let v = self.value(operand, Some(&Type::bool()))?;
                    self.func.bool_not(v, span)?
                }
                UnaryOp::BitNot => {
                    let v = self.value(operand, hint)?;
                    self.func.bit_not(v, span)?
                }
            },
            Expr::Call { name, template_args, args } => {
                if template_args.is_empty() {
                    let params = self.func.translator().callee_params(&name.node);
                    let values = self.args(args, params.as_deref())?;
                    return self.func.call(&name.node, values, span);
                }
                let mut type_args = Vec::with_capacity(template_args.len());
                for arg in template_args {
                    type_args.push(self.func.resolve_type(arg)?);
                }
                let sym = self.func.translator_mut().specialize_function(&name.node, &type_args, name.span)?;
                let values = self.args(args, Some(sym.ty.params.as_slice()))?;
                return self.func.call_template(&name.node, &type_args, values, span);
            }
            Expr::Cast { expr: inner, ty } => {
                let to = self.func.resolve_type(ty)?;
                let v = self.value(inner, None)?;
                self.func.cast(v, &to, span)?
            }
        };
        Ok(Some(value))
    }

    /// Lower an expression to the address of the storage it names.
    pub fn address(&mut self, expr: &Spanned<Expr>) -> Result<TypedValue, TranslateError> {
        match &expr.node {
            Expr::Variable(name) => self.func.get_identifier_addr(name, expr.span),
            Expr::Dereference(inner) => {
                let ptr = self.value(inner, None)?;
                if !ptr.ty.is_pointer() {
                    return Err(TranslateError::mismatch("a pointer", &ptr.ty, self.func.pos(inner.span)));
                }
                Ok(ptr)
            }
            Expr::FieldAccess { object, field } => {
                let base = if is_place(&object.node) {
                    self.address(object)?
                } else {
                    let strukt = self.value(object, None)?;
                    if !strukt.ty.is_struct() {
                        return Err(TranslateError::mismatch("a struct", &strukt.ty, self.func.pos(object.span)));
                    }
                    TypedValue::new(strukt.value, Type::pointer_to(strukt.ty))
                };
                self.func.field_address(base, &field.node, field.span)
            }
            _ => Err(TranslateError::mismatch(
                "an addressable expression",
                "a temporary value",
                self.func.pos(expr.span),
            )),
        }
    }

    fn binop(
        &mut self,
        op: BinOp,
        lhs: &Spanned<Expr>,
        rhs: &Spanned<Expr>,
        hint: Option<&Type>,
        span: Span,
    ) -> Result<TypedValue, TranslateError> {
        let operand_hint = match op {
            BinOp::And | BinOp::Or => Some(Type::bool()),
            BinOp::Eq | BinOp::Neq | BinOp::Lt | BinOp::LtEq | BinOp::Gt | BinOp::GtEq => None,
            _ => hint.cloned(),
        };
        let shift = matches!(op, BinOp::Shl | BinOp::Shr);

        // A literal on the left takes its type from the right operand.
        let (l, r) = if !shift && is_literal(&lhs.node) && !is_literal(&rhs.node) {
            let r = self.value(rhs, operand_hint.as_ref())?;
            let l = self.value(lhs, Some(&r.ty))?;
            (l, r)
        } else {
            let l = self.value(lhs, operand_hint.as_ref())?;
            let r = self.value(rhs, Some(&l.ty))?;
            (l, r)
        };
        self.func.binop(op, l, r, span)
    }

    fn args(&mut self, args: &[Spanned<Expr>], params: Option<&[Type]>) -> Result<Vec<TypedValue>, TranslateError> {
        let mut values = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            let hint = params.and_then(|p| p.get(i));
            values.push(self.value(arg, hint)?);
        }
        Ok(values)
    }
}

fn is_literal(expr: &Expr) -> bool {
    match expr {
        Expr::IntLiteral(_) | Expr::UIntLiteral(_) | Expr::FloatLiteral(_) => true,
        Expr::Unop { op: UnaryOp::Neg, operand } => is_literal(&operand.node),
        _ => false,
    }
}

/// Expressions that name storage and can be addressed without a temporary.
fn is_place(expr: &Expr) -> bool {
    match expr {
        Expr::Variable(_) | Expr::Dereference(_) => true,
        Expr::FieldAccess { object, .. } => is_place(&object.node),
        _ => false,
    }
}

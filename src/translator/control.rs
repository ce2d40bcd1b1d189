//! Structured if/then/else.
//!
//! `create_ifthenelse` branches on a `bool`, opens a scope and positions the
//! builder in the then block. `point_to_else` is optional; when it is never
//! called the false edge of the branch targets the merge block directly. A
//! branch that already ended in a terminator contributes no edge to merge, and
//! a merge block without predecessors is unreachable.
//!
//! Branch scopes are released when the branch closes. A failure inside a
//! branch leaves its scope open until the enclosing function is abandoned,
//! which releases everything down to the function's own mark.

use cranelift_codegen::ir::{Block, Inst, InstBuilder};
use cranelift_module::Module;
use tracing::trace;

use super::{FunctionTranslator, TypedValue};
use crate::diagnostics::TranslateError;
use crate::env::ScopeMark;
use crate::span::Span;
use crate::types::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenBranch {
    Then,
    Else,
}

/// Handle for one if/then/else under construction. Consumed by `end_ifthenelse`.
#[derive(Debug)]
pub struct IfThenElse {
    then_block: Block,
    else_block: Block,
    merge: Block,
    branch: Inst,
    open: OpenBranch,
    mark: ScopeMark,
    entry_unreachable: bool,
    /// Edges into merge from branches that fell through.
    merge_edges: usize,
}

impl IfThenElse {
    pub fn then_block(&self) -> Block {
        self.then_block
    }

    pub fn else_block(&self) -> Block {
        self.else_block
    }

    pub fn merge_block(&self) -> Block {
        self.merge
    }

    pub fn open_branch(&self) -> OpenBranch {
        self.open
    }
}

impl<M: Module> FunctionTranslator<'_, M> {
    pub fn create_ifthenelse(&mut self, cond: TypedValue, span: Span) -> Result<IfThenElse, TranslateError> {
        if !cond.ty.is_bool() {
            return Err(TranslateError::mismatch(Type::bool(), &cond.ty, self.pos(span)));
        }
        let entry_unreachable = self.is_unreachable();
        let then_block = self.builder.create_block();
        let else_block = self.builder.create_block();
        let merge = self.builder.create_block();
        let branch = self.ins().brif(cond.value, then_block, &[], else_block, &[]);

        let mark = self.tr.env.mark();
        self.tr.env.push_scope();
        self.enter(then_block, entry_unreachable);
        trace!(?then_block, ?else_block, ?merge, "if/then/else opened");
        Ok(IfThenElse {
            then_block,
            else_block,
            merge,
            branch,
            open: OpenBranch::Then,
            mark,
            entry_unreachable,
            merge_edges: 0,
        })
    }

    /// Close the then branch and open the else branch.
    pub fn point_to_else(&mut self, ite: &mut IfThenElse) -> Result<(), TranslateError> {
        if ite.open != OpenBranch::Then {
            return Err(TranslateError::internal("point_to_else called twice for one if/then/else"));
        }
        self.close_branch(ite);
        self.tr.env.push_scope();
        self.enter(ite.else_block, ite.entry_unreachable);
        ite.open = OpenBranch::Else;
        Ok(())
    }

    /// Close the open branch and position the builder at merge.
    pub fn end_ifthenelse(&mut self, mut ite: IfThenElse) -> Result<(), TranslateError> {
        let had_else = ite.open == OpenBranch::Else;
        self.close_branch(&mut ite);
        if !had_else {
            // The else block was never entered, so it never reaches the layout.
            self.builder.change_jump_destination(ite.branch, ite.else_block, ite.merge);
            if !ite.entry_unreachable {
                ite.merge_edges += 1;
            }
        }
        let unreachable = ite.entry_unreachable || ite.merge_edges == 0;
        self.enter(ite.merge, unreachable);
        trace!(merge = ?ite.merge, edges = ite.merge_edges, unreachable, "if/then/else closed");
        Ok(())
    }

    /// Jump from the open branch to merge unless it already terminated, then
    /// release the branch scope.
    fn close_branch(&mut self, ite: &mut IfThenElse) {
        if self.jump_if_open(ite.merge) {
            ite.merge_edges += 1;
        }
        self.tr.env.release(ite.mark);
    }

    /// Every predecessor of `block` exists by the time it is entered.
    fn enter(&mut self, block: Block, dead: bool) {
        self.builder.switch_to_block(block);
        self.builder.seal_block(block);
        self.dead = dead;
    }
}

use std::collections::HashMap;

use cranelift_codegen::ir::{Block, FuncRef, GlobalValue, InstBuilder, StackSlot, StackSlotData, StackSlotKind, TrapCode, Value};
use cranelift_frontend::{FuncInstBuilder, FunctionBuilder};
use cranelift_module::{DataId, FuncId, Module};
use tracing::{debug, trace};

use super::{Translator, TypedValue};
use crate::ast::TypeExpr;
use crate::diagnostics::TranslateError;
use crate::env::{Binding, DetachedScopes, FunctionSymbol, ScopeMark, Variable};
use crate::span::{SourcePos, Span, Spanned};
use crate::types::Type;

/// Builds the body of one function. Handed to the closure passed to
/// [`Translator::create_and_start_function`]; module-level state stays
/// reachable through [`FunctionTranslator::translator_mut`].
pub struct FunctionTranslator<'t, M: Module> {
    pub(super) tr: &'t mut Translator<M>,
    pub(super) builder: FunctionBuilder<'t>,
    symbol: FunctionSymbol,
    /// Hidden out-pointer for struct returns.
    sret: Option<Value>,
    mark: ScopeMark,
    detached: Option<DetachedScopes>,
    /// Set while emitting into a region that cannot be reached from the
    /// entry block, even through blocks the builder considers reachable.
    pub(super) dead: bool,
    func_refs: HashMap<FuncId, FuncRef>,
    data_refs: HashMap<DataId, GlobalValue>,
}

impl<'t, M: Module> FunctionTranslator<'t, M> {
    pub(super) fn new(
        tr: &'t mut Translator<M>,
        mut builder: FunctionBuilder<'t>,
        symbol: FunctionSymbol,
        mark: ScopeMark,
        detached: Option<DetachedScopes>,
    ) -> Self {
        let entry = builder.create_block();
        builder.append_block_params_for_function_params(entry);
        builder.switch_to_block(entry);
        builder.seal_block(entry);
        builder.ensure_inserted_block();
        let sret = if symbol.ty.ret.is_struct() { builder.block_params(entry).first().copied() } else { None };
        Self {
            tr,
            builder,
            symbol,
            sret,
            mark,
            detached,
            dead: false,
            func_refs: HashMap::new(),
            data_refs: HashMap::new(),
        }
    }

    pub fn translator(&self) -> &Translator<M> {
        &*self.tr
    }

    pub fn translator_mut(&mut self) -> &mut Translator<M> {
        &mut *self.tr
    }

    pub fn pos(&self, span: Span) -> SourcePos {
        self.tr.pos(span)
    }

    pub fn name(&self) -> &str {
        &self.symbol.symbol
    }

    /// The declared return type of this function.
    pub fn return_type(&self) -> &Type {
        &self.symbol.ty.ret
    }

    /// True when code emitted now could never execute.
    pub fn is_unreachable(&self) -> bool {
        self.dead || self.is_filled() || self.builder.is_unreachable()
    }

    pub fn resolve_type(&mut self, te: &Spanned<TypeExpr>) -> Result<Type, TranslateError> {
        self.tr.resolve_type(te)
    }

    // ---- Scopes and identifiers ----

    pub fn push_scope(&mut self) {
        self.tr.env.push_scope();
    }

    pub fn pop_scope(&mut self) {
        self.tr.env.pop_scope();
    }

    pub fn lookup_identifier(&self, name: &str) -> Option<&Binding> {
        self.tr.env.lookup(name)
    }

    /// Allocate storage for `name` in the innermost scope.
    pub fn declare(&mut self, name: &str, ty: &Type, span: Span) -> Result<Variable, TranslateError> {
        let ty = self.tr.complete(ty);
        self.tr.check_value_type(&ty, span)?;
        let slot = self.create_slot(&ty, span)?;
        let var = Variable::new(name, ty, slot);
        if !self.tr.env.declare(name, Binding::Variable(var.clone())) {
            return Err(TranslateError::duplicate(name, self.pos(span)));
        }
        trace!(name, ty = %var.ty, "declared variable");
        Ok(var)
    }

    pub fn assign(&mut self, name: &str, value: TypedValue, span: Span) -> Result<(), TranslateError> {
        let addr = self.get_identifier_addr(name, span)?;
        self.add_store(addr, value, span)
    }

    pub fn get_identifier_addr(&mut self, name: &str, span: Span) -> Result<TypedValue, TranslateError> {
        let var = match self.tr.env.lookup(name) {
            Some(Binding::Variable(var)) => var.clone(),
            Some(Binding::Function(_)) | Some(Binding::Template) => {
                return Err(TranslateError::mismatch("a variable", format!("function '{name}'"), self.pos(span)));
            }
            None => return Err(TranslateError::unknown_identifier(name, self.pos(span))),
        };
        let ptr = self.tr.ptr;
        let addr = self.ins().stack_addr(ptr, var.slot, 0);
        Ok(TypedValue::new(addr, Type::pointer_to(var.ty)))
    }

    pub fn get_identifier_value(&mut self, name: &str, span: Span) -> Result<TypedValue, TranslateError> {
        let addr = self.get_identifier_addr(name, span)?;
        self.add_load(addr, span)
    }

    // ---- Lifecycle ----

    /// Open the parameter scope and copy every incoming argument into its
    /// own slot.
    pub(super) fn bind_params(&mut self, arg_names: &[Spanned<String>]) -> Result<(), TranslateError> {
        self.tr.env.push_scope();
        let entry = self
            .builder
            .current_block()
            .ok_or_else(|| TranslateError::internal("function has no entry block"))?;
        let skip = usize::from(self.sret.is_some());
        let values: Vec<Value> = self.builder.block_params(entry)[skip..].to_vec();
        let params = self.symbol.ty.params.clone();
        for ((name, ty), value) in arg_names.iter().zip(&params).zip(values) {
            let var = self.declare(&name.node, ty, name.span)?;
            let ptr = self.tr.ptr;
            let addr = self.ins().stack_addr(ptr, var.slot, 0);
            self.store_value(addr, value, ty)?;
        }
        Ok(())
    }

    /// Terminate the open block, seal every block and release the function's
    /// scopes. Returns whether a non-void function can fall off its end.
    pub(super) fn end_function(mut self) -> bool {
        let mut falls_through = false;
        if !self.is_filled() {
            if self.symbol.ty.ret.is_void() {
                self.builder.ins().return_(&[]);
            } else {
                falls_through = !self.is_unreachable();
                self.builder.ins().trap(TrapCode::unwrap_user(1));
            }
        }
        let FunctionTranslator { tr, mut builder, mark, detached, .. } = self;
        builder.seal_all_blocks();
        builder.finalize();
        tr.restore_scopes(mark, detached);
        falls_through
    }

    /// Discard the partial body. Scopes are released to the function's mark,
    /// so branch scopes left open by the failure go with it.
    pub(super) fn abandon_function(self) {
        debug!(function = %self.symbol.symbol, "abandoning function");
        let FunctionTranslator { tr, mark, detached, .. } = self;
        tr.restore_scopes(mark, detached);
    }

    // ---- Returns and calls ----

    pub fn return_(&mut self, value: TypedValue, span: Span) -> Result<(), TranslateError> {
        let ret = self.symbol.ty.ret.clone();
        if ret.is_void() {
            return Err(TranslateError::void_mismatch("void", &value.ty, self.pos(span)));
        }
        if value.ty != ret {
            return Err(TranslateError::mismatch(&ret, &value.ty, self.pos(span)));
        }
        match self.sret {
            Some(out) => {
                self.store_value(out, value.value, &ret)?;
                self.ins().return_(&[]);
            }
            None => {
                self.ins().return_(&[value.value]);
            }
        }
        Ok(())
    }

    pub fn return_void(&mut self, span: Span) -> Result<(), TranslateError> {
        let ret = &self.symbol.ty.ret;
        if !ret.is_void() {
            return Err(TranslateError::void_mismatch(ret, "void", self.pos(span)));
        }
        self.ins().return_(&[]);
        Ok(())
    }

    /// Call `name`. A template is specialized first, with its arguments
    /// inferred from the argument types. Returns `None` for void calls.
    pub fn call(&mut self, name: &str, args: Vec<TypedValue>, span: Span) -> Result<Option<TypedValue>, TranslateError> {
        match self.tr.env.lookup(name).cloned() {
            Some(Binding::Function(sym)) => self.call_symbol(&sym, name, args, span),
            Some(Binding::Template) => {
                let type_args = self.tr.infer_template_args(name, &args, span)?;
                let sym = self.tr.specialize_function(name, &type_args, span)?;
                self.call_symbol(&sym, name, args, span)
            }
            Some(Binding::Variable(var)) => Err(TranslateError::mismatch(
                "a function",
                format!("variable '{name}' of type {}", var.ty),
                self.pos(span),
            )),
            None => Err(TranslateError::unknown_identifier(name, self.pos(span))),
        }
    }

    /// Call a function template with explicit template arguments.
    pub fn call_template(
        &mut self,
        name: &str,
        type_args: &[Type],
        args: Vec<TypedValue>,
        span: Span,
    ) -> Result<Option<TypedValue>, TranslateError> {
        let sym = self.tr.specialize_function(name, type_args, span)?;
        self.call_symbol(&sym, name, args, span)
    }

    fn call_symbol(
        &mut self,
        sym: &FunctionSymbol,
        name: &str,
        args: Vec<TypedValue>,
        span: Span,
    ) -> Result<Option<TypedValue>, TranslateError> {
        if args.len() != sym.ty.params.len() {
            return Err(TranslateError::arity(name, sym.ty.params.len(), args.len(), self.pos(span)));
        }
        for (param, arg) in sym.ty.params.iter().zip(&args) {
            if *param != arg.ty {
                return Err(TranslateError::mismatch(param, &arg.ty, self.pos(span)));
            }
        }

        let ret = sym.ty.ret.clone();
        let mut values = Vec::with_capacity(args.len() + 1);
        let out = if ret.is_struct() {
            let slot = self.create_slot(&ret, span)?;
            let ptr = self.tr.ptr;
            let addr = self.ins().stack_addr(ptr, slot, 0);
            values.push(addr);
            Some(addr)
        } else {
            None
        };
        values.extend(args.iter().map(|a| a.value));

        let fref = self.func_ref(sym.id);
        let inst = self.ins().call(fref, &values);
        trace!(callee = %sym.symbol, "emitted call");

        if let Some(addr) = out {
            return Ok(Some(TypedValue::new(addr, ret)));
        }
        if ret.is_void() {
            return Ok(None);
        }
        let result = self.builder.inst_results(inst)[0];
        Ok(Some(TypedValue::new(result, ret)))
    }

    // ---- Builder plumbing ----

    /// Whether the current block already ends in a terminator.
    fn is_filled(&self) -> bool {
        let func = &*self.builder.func;
        self.builder
            .current_block()
            .and_then(|block| func.layout.last_inst(block))
            .is_some_and(|inst| func.dfg.insts[inst].opcode().is_terminator())
    }

    /// The instruction builder. Emitting after a terminator opens a fresh,
    /// unreachable block.
    pub(super) fn ins(&mut self) -> FuncInstBuilder<'_, 't> {
        if self.is_filled() {
            let block = self.builder.create_block();
            self.builder.switch_to_block(block);
            self.builder.seal_block(block);
            self.dead = true;
        }
        self.builder.ins()
    }

    /// Jump to `block` unless the open block already ended. Returns whether
    /// the jump is a live edge.
    pub(super) fn jump_if_open(&mut self, block: Block) -> bool {
        if self.is_filled() {
            return false;
        }
        let live = !self.is_unreachable();
        self.builder.ins().jump(block, &[]);
        live
    }

    pub(super) fn create_slot(&mut self, ty: &Type, span: Span) -> Result<StackSlot, TranslateError> {
        let ty = self.tr.complete(ty);
        let Some((size, align)) = ty.size_align(self.tr.pointer_bytes()) else {
            return Err(TranslateError::mismatch("a sized type", &ty, self.pos(span)));
        };
        let data = StackSlotData::new(StackSlotKind::ExplicitSlot, size, align.trailing_zeros() as u8);
        Ok(self.builder.create_sized_stack_slot(data))
    }

    fn func_ref(&mut self, id: FuncId) -> FuncRef {
        if let Some(fref) = self.func_refs.get(&id) {
            return *fref;
        }
        let fref = self.tr.module.declare_func_in_func(id, self.builder.func);
        self.func_refs.insert(id, fref);
        fref
    }

    pub(super) fn data_ref(&mut self, id: DataId) -> GlobalValue {
        if let Some(gv) = self.data_refs.get(&id) {
            return *gv;
        }
        let gv = self.tr.module.declare_data_in_func(id, self.builder.func);
        self.data_refs.insert(id, gv);
        gv
    }
}

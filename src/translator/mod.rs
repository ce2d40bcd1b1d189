//! The translation façade.
//!
//! A `Translator` owns the Cranelift module, the environment, the template
//! engine and every finished function body. Function bodies are built by a
//! [`FunctionTranslator`], which wraps a `cranelift_frontend::FunctionBuilder`
//! for the duration of one function: instruction-level operations live in
//! `ops`, structured control flow in `control`, and template handling in
//! `templates`.
//!
//! Every variable lives in a stack slot. Struct values are carried as the
//! address of their storage and copied on load, store and parameter entry,
//! so a struct behaves as a value even though only its address moves.

pub mod control;
mod function;
mod ops;
mod templates;

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::rc::Rc;
use std::sync::Arc;

use cranelift_codegen::control::ControlPlane;
use cranelift_codegen::ir::{self, AbiParam, Signature, UserFuncName, Value};
use cranelift_codegen::Context;
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_module::{DataId, FuncId, Linkage, Module};
use cranelift_object::{ObjectBuilder, ObjectModule};
use tracing::debug;

use crate::ast::FunctionDeclaration;
use crate::config::TranslatorConfig;
use crate::diagnostics::TranslateError;
use crate::emit::Artifact;
use crate::env::{Binding, DetachedScopes, Environment, FunctionSymbol, ScopeMark};
use crate::span::{SourcePos, Span, Spanned};
use crate::template::{DeferredSpecialization, TemplateEngine};
use crate::types::{FunctionType, StructType, Type};

pub use control::IfThenElse;
pub use function::FunctionTranslator;

/// A Cranelift value paired with the source type it carries.
#[derive(Debug, Clone)]
pub struct TypedValue {
    pub value: Value,
    pub ty: Type,
}

impl TypedValue {
    pub fn new(value: Value, ty: Type) -> Self {
        Self { value, ty }
    }
}

struct FinishedBody {
    id: FuncId,
    name: String,
    ctx: Context,
    /// A non-void function whose end is reachable without a `return`.
    falls_through: bool,
}

pub struct Translator<M: Module> {
    module: M,
    file: Arc<str>,
    ptr: ir::Type,
    env: Environment,
    templates: TemplateEngine,
    structs: HashMap<String, Rc<StructType>>,
    /// Every function symbol declared in the module.
    symbols: HashMap<String, FuncId>,
    defined: HashSet<FuncId>,
    bodies: Vec<FinishedBody>,
    strings: HashMap<String, DataId>,
    /// Template instantiation nesting of the body being generated.
    nesting: usize,
    /// Struct specializations currently resolving their fields.
    struct_nesting: usize,
    validated: bool,
}

impl Translator<ObjectModule> {
    /// Translator emitting a relocatable object for the configured target.
    pub fn new(config: &TranslatorConfig, name: &str, file: impl Into<Arc<str>>) -> Result<Self, TranslateError> {
        let isa = config.build_isa()?;
        let builder = ObjectBuilder::new(isa, name, cranelift_module::default_libcall_names())
            .map_err(|e| TranslateError::backend(format!("object builder error: {e}")))?;
        Ok(Self::with_module(ObjectModule::new(builder), file))
    }

    /// Define every body and serialize the object, capturing IR text and
    /// disassembly along the way.
    pub fn finish(self) -> Result<Artifact, TranslateError> {
        let (module, ir, asm, _) = self.define_all()?;
        let product = module.finish();
        let object = product.emit().map_err(|e| TranslateError::backend(format!("emit error: {e}")))?;
        Ok(Artifact::new(ir, asm, object))
    }
}

impl<M: Module> Translator<M> {
    pub fn with_module(module: M, file: impl Into<Arc<str>>) -> Self {
        let ptr = module.target_config().pointer_type();
        Self {
            module,
            file: file.into(),
            ptr,
            env: Environment::new(),
            templates: TemplateEngine::new(),
            structs: HashMap::new(),
            symbols: HashMap::new(),
            defined: HashSet::new(),
            bodies: Vec::new(),
            strings: HashMap::new(),
            nesting: 0,
            struct_nesting: 0,
            validated: false,
        }
    }

    pub fn pos(&self, span: Span) -> SourcePos {
        SourcePos::new(self.file.clone(), span)
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn templates(&self) -> &TemplateEngine {
        &self.templates
    }

    pub fn pointer_type(&self) -> ir::Type {
        self.ptr
    }

    pub(crate) fn pointer_bytes(&self) -> u32 {
        self.ptr.bytes()
    }

    /// A finished function body, by symbol name.
    pub fn body(&self, name: &str) -> Option<&ir::Function> {
        self.bodies.iter().find(|b| b.name == name).map(|b| &b.ctx.func)
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    // ---- Types and identifiers ----

    pub fn lookup_type(&self, name: &str, span: Span) -> Result<Type, TranslateError> {
        match self.env.lookup_type(name) {
            Some(ty) => Ok(self.complete(ty)),
            None => Err(TranslateError::unknown_type(name, self.pos(span))),
        }
    }

    pub fn bind_type(&mut self, name: &str, ty: Type, span: Span) -> Result<(), TranslateError> {
        if self.env.bind_type(name, ty) {
            Ok(())
        } else {
            Err(TranslateError::duplicate(name, self.pos(span)))
        }
    }

    pub fn lookup_identifier(&self, name: &str) -> Option<&Binding> {
        self.env.lookup(name)
    }

    /// Parameter types of the callee `name`, when it is an ordinary function.
    pub fn callee_params(&self, name: &str) -> Option<Vec<Type>> {
        match self.env.lookup(name) {
            Some(Binding::Function(sym)) => Some(sym.ty.params.clone()),
            _ => None,
        }
    }

    // ---- Functions ----

    /// Resolve a declaration's parameter and return types.
    pub fn signature(&mut self, decl: &FunctionDeclaration) -> Result<FunctionType, TranslateError> {
        let mut params = Vec::with_capacity(decl.params.len());
        for param in &decl.params {
            let ty = self.resolve_type(&param.ty)?;
            self.check_value_type(&ty, param.ty.span)?;
            params.push(ty);
        }
        let ret = self.resolve_type(&decl.return_type)?;
        if !ret.is_void() {
            self.check_value_type(&ret, decl.return_type.span)?;
        }
        Ok(FunctionType::new(params, ret))
    }

    /// Declare a callable signature without a body.
    pub fn create_function_prototype(
        &mut self,
        ty: FunctionType,
        name: &str,
        span: Span,
    ) -> Result<FunctionSymbol, TranslateError> {
        if let Some(Binding::Function(existing)) = self.env.lookup_global(name) {
            if existing.ty == ty {
                return Ok(existing.clone());
            }
        }
        self.declare_function(name, ty, Linkage::Import, span)
    }

    /// Declare (or complete) `name` and generate its body with `body`.
    ///
    /// The parameters are bound in a fresh scope before `body` runs. When
    /// `body` fails the partial function is abandoned: every scope opened
    /// since the start is released, branch scopes included, and the
    /// declaration stays so a later attempt can complete it. Returns the
    /// template specializations whose bodies were deferred meanwhile.
    pub fn create_and_start_function<F>(
        &mut self,
        ty: FunctionType,
        arg_names: &[Spanned<String>],
        name: &str,
        span: Span,
        body: F,
    ) -> Result<Vec<DeferredSpecialization>, TranslateError>
    where
        F: FnOnce(&mut FunctionTranslator<'_, M>) -> Result<(), TranslateError>,
    {
        if arg_names.len() != ty.params.len() {
            return Err(TranslateError::arity(name, ty.params.len(), arg_names.len(), self.pos(span)));
        }
        let sym = self.declare_function(name, ty, Linkage::Export, span)?;
        let mark = self.env.mark();
        self.build_body(sym, arg_names, mark, None, body)
    }

    fn declare_function(
        &mut self,
        name: &str,
        ty: FunctionType,
        linkage: Linkage,
        span: Span,
    ) -> Result<FunctionSymbol, TranslateError> {
        match self.env.lookup_global(name) {
            // A specialization already owns this symbol.
            None if self.symbols.contains_key(name) => return Err(TranslateError::duplicate(name, self.pos(span))),
            None => {}
            Some(Binding::Function(existing)) if existing.ty == ty && !self.defined.contains(&existing.id) => {}
            Some(_) => return Err(TranslateError::duplicate(name, self.pos(span))),
        }
        if self.templates.is_defined(name) {
            return Err(TranslateError::duplicate(name, self.pos(span)));
        }
        let sig = self.make_signature(&ty)?;
        let id = self
            .module
            .declare_function(name, linkage, &sig)
            .map_err(|e| TranslateError::backend(format!("declare function '{name}' error: {e}")))?;
        let sym = FunctionSymbol { symbol: name.to_string(), id, ty };
        self.env.set_global(name, Binding::Function(sym.clone()));
        self.symbols.insert(name.to_string(), id);
        Ok(sym)
    }

    /// Run `body` against a fresh function for `sym`, then seal and store
    /// the result. `mark` and `detached` are restored whatever the outcome.
    fn build_body<F>(
        &mut self,
        sym: FunctionSymbol,
        arg_names: &[Spanned<String>],
        mark: ScopeMark,
        detached: Option<DetachedScopes>,
        body: F,
    ) -> Result<Vec<DeferredSpecialization>, TranslateError>
    where
        F: FnOnce(&mut FunctionTranslator<'_, M>) -> Result<(), TranslateError>,
    {
        let sig = match self.make_signature(&sym.ty) {
            Ok(sig) => sig,
            Err(e) => {
                self.restore_scopes(mark, detached);
                return Err(e);
            }
        };
        let mut func = ir::Function::with_name_signature(UserFuncName::testcase(&sym.symbol), sig);
        let mut builder_ctx = FunctionBuilderContext::new();
        debug!(function = %sym.symbol, ty = %sym.ty, "starting function");

        let outcome = {
            let builder = FunctionBuilder::new(&mut func, &mut builder_ctx);
            let mut f = FunctionTranslator::new(self, builder, sym.clone(), mark, detached);
            match f.bind_params(arg_names).and_then(|()| body(&mut f)) {
                Ok(()) => Ok(f.end_function()),
                Err(e) => {
                    f.abandon_function();
                    Err(e)
                }
            }
        };
        let falls_through = outcome?;

        self.defined.insert(sym.id);
        debug!(function = %sym.symbol, "finished function");
        self.bodies.push(FinishedBody {
            id: sym.id,
            name: sym.symbol,
            ctx: Context::for_function(func),
            falls_through,
        });
        Ok(self.templates.take_deferred())
    }

    fn restore_scopes(&mut self, mark: ScopeMark, detached: Option<DetachedScopes>) {
        self.env.release(mark);
        if let Some(detached) = detached {
            self.env.reattach(detached);
        }
    }

    // ---- Structs ----

    /// Bind `name` as an opaque struct to be completed by `create_struct`.
    pub fn declare_opaque(&mut self, name: &str, span: Span) -> Result<(), TranslateError> {
        if self.templates.is_defined(name) {
            return Err(TranslateError::duplicate(name, self.pos(span)));
        }
        match self.env.lookup_type(name) {
            Some(Type::Opaque(_)) => Ok(()),
            Some(_) => Err(TranslateError::duplicate(name, self.pos(span))),
            None => self.bind_type(name, Type::Opaque(name.to_string()), span),
        }
    }

    /// Register a struct's field order and layout and bind its name.
    pub fn create_struct(
        &mut self,
        name: &str,
        fields: Vec<(String, Type)>,
        span: Span,
    ) -> Result<Type, TranslateError> {
        if self.templates.is_defined(name) {
            return Err(TranslateError::duplicate(name, self.pos(span)));
        }
        match self.env.lookup_type(name) {
            None | Some(Type::Opaque(_)) => {}
            Some(_) => return Err(TranslateError::duplicate(name, self.pos(span))),
        }
        let ty = self.define_struct(name.to_string(), fields, None, span)?;
        if !self.env.complete_type(name, ty.clone()) {
            self.bind_type(name, ty.clone(), span)?;
        }
        Ok(ty)
    }

    fn define_struct(
        &mut self,
        name: String,
        fields: Vec<(String, Type)>,
        origin: Option<(String, Vec<Type>)>,
        span: Span,
    ) -> Result<Type, TranslateError> {
        let mut seen = HashSet::new();
        let mut resolved = Vec::with_capacity(fields.len());
        for (field, ty) in fields {
            if !seen.insert(field.clone()) {
                return Err(TranslateError::duplicate(format!("{name}.{field}"), self.pos(span)));
            }
            let ty = self.complete(&ty);
            self.check_value_type(&ty, span)?;
            resolved.push((field, ty));
        }
        let strukt = Rc::new(StructType { name: name.clone(), fields: resolved, origin });
        if strukt.layout(self.pointer_bytes()).is_none() {
            return Err(TranslateError::mismatch("a sized struct", &name, self.pos(span)));
        }
        debug!(name = %name, fields = strukt.fields.len(), "created struct");
        self.structs.insert(name, strukt.clone());
        Ok(Type::Struct(strukt))
    }

    /// Replace an opaque struct with its definition, when one exists.
    pub(crate) fn complete(&self, ty: &Type) -> Type {
        match ty {
            Type::Opaque(name) => match self.structs.get(name) {
                Some(strukt) => Type::Struct(strukt.clone()),
                None => ty.clone(),
            },
            _ => ty.clone(),
        }
    }

    /// Values, fields and parameters must be concrete, sized types.
    fn check_value_type(&self, ty: &Type, span: Span) -> Result<(), TranslateError> {
        if ty.is_void() {
            return Err(TranslateError::void_mismatch("a value type", "void", self.pos(span)));
        }
        if !ty.is_concrete() || self.complete(ty).size_align(self.pointer_bytes()).is_none() {
            return Err(TranslateError::mismatch("a concrete sized type", ty, self.pos(span)));
        }
        Ok(())
    }

    // ---- Module-level passes ----

    /// Run the verifier over every finished body and check that every
    /// declared specialization received one. Reports go to `sink`.
    pub fn validate(&mut self, sink: &mut impl Write) -> Result<(), TranslateError> {
        let mut failing = Vec::new();
        for body in &self.bodies {
            if body.falls_through {
                writeln!(sink, "function {} can reach its end without returning a value", body.name)?;
                failing.push(body.name.clone());
            } else if let Err(errors) = cranelift_codegen::verify_function(&body.ctx.func, self.module.isa()) {
                writeln!(sink, "function {}:\n{errors}", body.name)?;
                failing.push(body.name.clone());
            }
        }
        let mut missing: Vec<String> = self
            .templates
            .function_symbols()
            .filter(|sym| !self.defined.contains(&sym.id))
            .map(|sym| sym.symbol.clone())
            .collect();
        missing.sort();
        for name in missing {
            writeln!(sink, "specialization {name} has no body")?;
            failing.push(name);
        }

        if failing.is_empty() {
            debug!(functions = self.bodies.len(), "module validated");
            self.validated = true;
            Ok(())
        } else {
            Err(TranslateError::ModuleValidation { functions: failing })
        }
    }

    /// 0 runs nothing; 1 removes unreachable blocks, then runs the e-graph
    /// pass, which drops dead instructions and folds constants; 2 also
    /// removes constant block parameters first.
    pub fn optimize(&mut self, level: u8) -> Result<(), TranslateError> {
        if !self.validated {
            return Err(TranslateError::internal("optimize requires a validated module"));
        }
        if level == 0 {
            return Ok(());
        }
        let isa = self.module.isa();
        for body in &mut self.bodies {
            let ctx = &mut body.ctx;
            let name = &body.name;
            let failed = |e| TranslateError::backend(format!("optimizing '{name}': {e}"));
            ctx.flowgraph();
            ctx.eliminate_unreachable_code(isa).map_err(failed)?;
            if level >= 2 {
                ctx.remove_constant_phis(isa).map_err(failed)?;
            }
            ctx.flowgraph();
            ctx.compute_domtree();
            ctx.egraph_pass(isa, &mut ControlPlane::default()).map_err(failed)?;
        }
        debug!(level, "module optimized");
        Ok(())
    }

    /// Define every body in the module and hand it back, together with the
    /// ids of every declared function symbol.
    pub fn into_module(self) -> Result<(M, HashMap<String, FuncId>), TranslateError> {
        let (module, _, _, symbols) = self.define_all()?;
        Ok((module, symbols))
    }

    fn define_all(mut self) -> Result<(M, String, String, HashMap<String, FuncId>), TranslateError> {
        if self.templates.has_pending() {
            return Err(TranslateError::UnresolvedTemplate { uses: self.templates.take_unresolved() });
        }
        if !self.validated {
            return Err(TranslateError::internal("the module must be validated before it is finished"));
        }

        let mut ir = String::new();
        let mut asm = String::new();
        for mut body in std::mem::take(&mut self.bodies) {
            ir.push_str(&body.ctx.func.display().to_string());
            ir.push('\n');
            body.ctx.set_disasm(true);
            self.module
                .define_function(body.id, &mut body.ctx)
                .map_err(|e| TranslateError::backend(format!("define function '{}' error: {e}", body.name)))?;
            if let Some(vcode) = body.ctx.compiled_code().and_then(|code| code.vcode.as_ref()) {
                asm.push_str(&format!("{}:\n{vcode}\n", body.name));
            }
        }
        Ok((self.module, ir, asm, self.symbols))
    }

    fn make_signature(&self, ty: &FunctionType) -> Result<Signature, TranslateError> {
        let mut sig = self.module.make_signature();
        if ty.ret.is_struct() {
            sig.params.push(AbiParam::new(self.ptr));
        }
        for param in &ty.params {
            let clif = param
                .clif(self.ptr)
                .ok_or_else(|| TranslateError::internal(format!("parameter type {param} has no machine type")))?;
            sig.params.push(AbiParam::new(clif));
        }
        if !ty.ret.is_void() && !ty.ret.is_struct() {
            let clif = ty
                .ret
                .clif(self.ptr)
                .ok_or_else(|| TranslateError::internal(format!("return type {} has no machine type", ty.ret)))?;
            sig.returns.push(AbiParam::new(clif));
        }
        Ok(sig)
    }
}

use std::collections::HashMap;
use std::rc::Rc;

use cranelift_module::{Linkage, Module};
use tracing::debug;

use super::{FunctionTranslator, Translator, TypedValue};
use crate::ast::{FunctionDeclaration, TemplateFunctionDefinition, TemplateStructDeclaration, TypeExpr};
use crate::diagnostics::TranslateError;
use crate::env::{Binding, FunctionSymbol};
use crate::span::{Span, Spanned};
use crate::template::{
    DeferredSpecialization, PendingUse, Specialization, SpecializationKey, TemplateBody, TemplateDefinition,
    MAX_SPECIALIZATION_DEPTH,
};
use crate::types::{canonical_name, mangle_name, unify, FunctionType, TemplateType, Type};

impl<M: Module> Translator<M> {
    // ---- Type expressions ----

    /// Resolve a type expression to a concrete type, specializing any
    /// template struct it names.
    pub fn resolve_type(&mut self, te: &Spanned<TypeExpr>) -> Result<Type, TranslateError> {
        self.resolve(te, false)
    }

    /// Resolve a type expression inside a template signature, where formals
    /// are bound to `Type::Param` and template structs stay unspecialized.
    pub fn resolve_generic_type(&mut self, te: &Spanned<TypeExpr>) -> Result<Type, TranslateError> {
        self.resolve(te, true)
    }

    fn resolve(&mut self, te: &Spanned<TypeExpr>, generic: bool) -> Result<Type, TranslateError> {
        match &te.node {
            TypeExpr::Named(name) => self.lookup_type(name, te.span),
            TypeExpr::Void => Ok(Type::Void),
            TypeExpr::Pointer(inner) => {
                let pointee = self.resolve(inner, generic)?;
                if pointee.is_void() {
                    return Err(TranslateError::void_mismatch("a pointee type", "void", self.pos(inner.span)));
                }
                Ok(Type::pointer_to(pointee))
            }
            TypeExpr::Templated { name, args } => {
                let mut resolved = Vec::with_capacity(args.len());
                for arg in args {
                    let ty = self.resolve(arg, generic)?;
                    if ty.is_void() {
                        return Err(TranslateError::void_mismatch("a type argument", "void", self.pos(arg.span)));
                    }
                    resolved.push(ty);
                }
                if generic || resolved.iter().any(|t| !t.is_concrete()) {
                    self.respecialize_template(name, resolved, te.span)
                } else {
                    self.specialize_struct(name, &resolved, te.span)
                }
            }
        }
    }

    // ---- Registration ----

    /// Register a function template. Returns the uses that were waiting for it.
    pub fn register_function_template(
        &mut self,
        def: &TemplateFunctionDefinition,
    ) -> Result<Vec<PendingUse>, TranslateError> {
        let decl = &def.def.decl;
        let name = decl.name.node.clone();
        if self.templates.is_defined(&name) || self.env.lookup_global(&name).is_some() {
            return Err(TranslateError::duplicate(&name, self.pos(decl.name.span)));
        }
        let formals = self.formals(&def.type_params)?;

        self.env.push_scope();
        for formal in &formals {
            self.env.bind_type(formal, Type::Param(formal.clone()));
        }
        let signature = self.generic_signature(decl);
        self.env.pop_scope();
        let signature = signature?;

        let definition = TemplateDefinition {
            name: name.clone(),
            formals,
            body: TemplateBody::Function(Rc::new(def.def.clone())),
            depth: self.env.depth(),
            span: decl.name.span,
            signature: Some(signature),
        };
        self.env.set_global(&name, Binding::Template);
        let waiting = self.templates.register(definition);
        debug!(template = %name, waiting = waiting.len(), "registered function template");
        Ok(waiting)
    }

    /// Register a struct template. Returns the uses that were waiting for it.
    pub fn register_struct_template(
        &mut self,
        decl: &TemplateStructDeclaration,
    ) -> Result<Vec<PendingUse>, TranslateError> {
        let name = decl.decl.name.node.clone();
        if self.templates.is_defined(&name) || self.env.lookup_type(&name).is_some() {
            return Err(TranslateError::duplicate(&name, self.pos(decl.decl.name.span)));
        }
        let formals = self.formals(&decl.type_params)?;
        let definition = TemplateDefinition {
            name: name.clone(),
            formals,
            body: TemplateBody::Struct(Rc::new(decl.decl.clone())),
            depth: self.env.depth(),
            span: decl.decl.name.span,
            signature: None,
        };
        let waiting = self.templates.register(definition);
        debug!(template = %name, waiting = waiting.len(), "registered struct template");
        Ok(waiting)
    }

    fn formals(&self, params: &[Spanned<String>]) -> Result<Vec<String>, TranslateError> {
        let mut formals: Vec<String> = Vec::with_capacity(params.len());
        for param in params {
            if formals.contains(&param.node) {
                return Err(TranslateError::duplicate(&param.node, self.pos(param.span)));
            }
            formals.push(param.node.clone());
        }
        Ok(formals)
    }

    fn generic_signature(&mut self, decl: &FunctionDeclaration) -> Result<FunctionType, TranslateError> {
        let mut params = Vec::with_capacity(decl.params.len());
        for param in &decl.params {
            let ty = self.resolve_generic_type(&param.ty)?;
            if ty.is_void() {
                return Err(TranslateError::void_mismatch("a parameter type", "void", self.pos(param.ty.span)));
            }
            params.push(ty);
        }
        let ret = self.resolve_generic_type(&decl.return_type)?;
        Ok(FunctionType::new(params, ret))
    }

    // ---- Specialization ----

    /// Specialize `name` for concrete `args`. Cached results are returned
    /// unchanged; a template that is not defined yet yields
    /// `TranslateError::Deferred` and records the use as pending.
    pub fn specialize_template(
        &mut self,
        name: &str,
        args: &[Type],
        span: Span,
    ) -> Result<Specialization, TranslateError> {
        let key = SpecializationKey::new(name, args.to_vec());
        if let Some(spec) = self.templates.cached(&key) {
            return Ok(spec.clone());
        }
        match self.templates.definition(name).map(TemplateDefinition::is_function) {
            Some(true) => self.specialize_function(name, args, span).map(Specialization::Function),
            Some(false) => self.specialize_struct(name, args, span).map(Specialization::Struct),
            None => Err(self.defer_use(name, args, span)),
        }
    }

    /// A template struct applied to arguments that are not all concrete.
    /// Re-resolving the enclosing template body with concrete formals turns
    /// it into a specialization.
    pub fn respecialize_template(&mut self, name: &str, args: Vec<Type>, span: Span) -> Result<Type, TranslateError> {
        if let Some(def) = self.templates.definition(name) {
            if def.is_function() {
                return Err(TranslateError::mismatch(
                    "a struct template",
                    format!("function template '{name}'"),
                    self.pos(span),
                ));
            }
            if def.formals.len() != args.len() {
                return Err(TranslateError::arity(name, def.formals.len(), args.len(), self.pos(span)));
            }
        }
        Ok(Type::Template(TemplateType { name: name.to_string(), args }))
    }

    pub fn specialize_struct(&mut self, name: &str, args: &[Type], span: Span) -> Result<Type, TranslateError> {
        let key = SpecializationKey::new(name, args.to_vec());
        match self.templates.cached(&key) {
            Some(Specialization::Struct(ty)) => return Ok(self.complete(ty)),
            Some(Specialization::Function(_)) => {
                return Err(TranslateError::mismatch("a struct template", format!("function template '{name}'"), self.pos(span)));
            }
            None => {}
        }
        let Some(def) = self.templates.definition(name).cloned() else {
            return Err(self.defer_use(name, args, span));
        };
        let decl = match &def.body {
            TemplateBody::Struct(decl) => decl.clone(),
            TemplateBody::Function(_) => {
                return Err(TranslateError::mismatch("a struct template", format!("function template '{name}'"), self.pos(span)));
            }
        };
        if def.formals.len() != args.len() {
            return Err(TranslateError::arity(name, def.formals.len(), args.len(), self.pos(span)));
        }

        let canonical = canonical_name(name, args);
        if self.struct_nesting >= MAX_SPECIALIZATION_DEPTH {
            return Err(TranslateError::specialization_depth(canonical, MAX_SPECIALIZATION_DEPTH, self.pos(span)));
        }
        // The placeholder lets fields refer to this specialization through pointers.
        self.templates.insert(key.clone(), Specialization::Struct(Type::Opaque(canonical.clone())));
        self.struct_nesting += 1;
        let fields = self.at_definition_site(&def, args, |tr| {
            decl.members
                .iter()
                .map(|member| Ok((member.name.node.clone(), tr.resolve_type(&member.ty)?)))
                .collect::<Result<Vec<_>, TranslateError>>()
        });
        self.struct_nesting -= 1;
        let result = fields.and_then(|fields| {
            self.define_struct(canonical, fields, Some((name.to_string(), args.to_vec())), span)
        });
        match result {
            Ok(ty) => {
                debug!(template = %name, specialization = %ty, "specialized struct template");
                self.templates.insert(key, Specialization::Struct(ty.clone()));
                Ok(ty)
            }
            Err(e) => {
                self.templates.evict(&key);
                Err(e)
            }
        }
    }

    /// Declare the specialized symbol now; its body is generated after the
    /// current function ends.
    pub fn specialize_function(
        &mut self,
        name: &str,
        args: &[Type],
        span: Span,
    ) -> Result<FunctionSymbol, TranslateError> {
        let key = SpecializationKey::new(name, args.to_vec());
        match self.templates.cached(&key) {
            Some(Specialization::Function(sym)) => return Ok(sym.clone()),
            Some(Specialization::Struct(_)) => {
                return Err(TranslateError::mismatch("a function template", format!("struct template '{name}'"), self.pos(span)));
            }
            None => {}
        }
        let Some(def) = self.templates.definition(name).cloned() else {
            return Err(self.defer_use(name, args, span));
        };
        let (definition, generic) = match (&def.body, &def.signature) {
            (TemplateBody::Function(definition), Some(generic)) => (definition.clone(), generic.clone()),
            _ => {
                return Err(TranslateError::mismatch("a function template", format!("struct template '{name}'"), self.pos(span)));
            }
        };
        if def.formals.len() != args.len() {
            return Err(TranslateError::arity(name, def.formals.len(), args.len(), self.pos(span)));
        }
        let nesting = self.nesting + 1;
        if nesting > MAX_SPECIALIZATION_DEPTH {
            return Err(TranslateError::specialization_depth(
                canonical_name(name, args),
                MAX_SPECIALIZATION_DEPTH,
                self.pos(span),
            ));
        }

        let symbol = mangle_name(name, args);
        if self.symbols.contains_key(&symbol) {
            return Err(TranslateError::duplicate(&symbol, self.pos(span)));
        }
        let bindings: HashMap<String, Type> = def.formals.iter().cloned().zip(args.iter().cloned()).collect();
        let ty = self.instantiate_signature(&generic.substitute(&bindings), &definition.decl)?;
        let sig = self.make_signature(&ty)?;
        let id = self
            .module
            .declare_function(&symbol, Linkage::Local, &sig)
            .map_err(|e| TranslateError::backend(format!("declare function '{symbol}' error: {e}")))?;
        self.symbols.insert(symbol.clone(), id);

        let sym = FunctionSymbol { symbol, id, ty };
        self.templates.insert(key.clone(), Specialization::Function(sym.clone()));
        self.templates.defer(DeferredSpecialization {
            key,
            symbol: sym.clone(),
            definition,
            bindings: def.formals.iter().cloned().zip(args.iter().cloned()).collect(),
            depth: def.depth,
            nesting,
        });
        debug!(template = %name, symbol = %sym.symbol, nesting, "specialized function template");
        Ok(sym)
    }

    /// Turn a substituted template signature into a concrete one: template
    /// structs whose arguments are now concrete become specializations.
    fn instantiate_signature(
        &mut self,
        ty: &FunctionType,
        decl: &FunctionDeclaration,
    ) -> Result<FunctionType, TranslateError> {
        let mut params = Vec::with_capacity(ty.params.len());
        for (param, written) in ty.params.iter().zip(&decl.params) {
            let param = self.instantiate(param, written.ty.span)?;
            self.check_value_type(&param, written.ty.span)?;
            params.push(param);
        }
        let span = decl.return_type.span;
        let ret = self.instantiate(&ty.ret, span)?;
        if !ret.is_void() {
            self.check_value_type(&ret, span)?;
        }
        Ok(FunctionType::new(params, ret))
    }

    fn instantiate(&mut self, ty: &Type, span: Span) -> Result<Type, TranslateError> {
        match ty {
            Type::Pointer(inner) => Ok(Type::pointer_to(self.instantiate(inner, span)?)),
            Type::Template(t) => {
                let mut args = Vec::with_capacity(t.args.len());
                for arg in &t.args {
                    args.push(self.instantiate(arg, span)?);
                }
                if args.iter().all(Type::is_concrete) {
                    self.specialize_struct(&t.name, &args, span)
                } else {
                    Ok(Type::Template(TemplateType { name: t.name.clone(), args }))
                }
            }
            other => Ok(self.complete(other)),
        }
    }

    /// Infer template arguments by unifying the generic signature with the
    /// argument types.
    pub(super) fn infer_template_args(
        &mut self,
        name: &str,
        args: &[TypedValue],
        span: Span,
    ) -> Result<Vec<Type>, TranslateError> {
        let Some(def) = self.templates.definition(name) else {
            return Err(TranslateError::unknown_identifier(name, self.pos(span)));
        };
        let Some(signature) = &def.signature else {
            return Err(TranslateError::mismatch("a function", format!("struct template '{name}'"), self.pos(span)));
        };
        if signature.params.len() != args.len() {
            return Err(TranslateError::arity(name, signature.params.len(), args.len(), self.pos(span)));
        }
        let mut bindings = HashMap::new();
        for (formal, arg) in signature.params.iter().zip(args) {
            if !unify(formal, &arg.ty, &mut bindings) {
                return Err(TranslateError::mismatch(formal, &arg.ty, self.pos(span)));
            }
        }
        def.formals
            .iter()
            .map(|formal| {
                bindings.get(formal).cloned().ok_or_else(|| {
                    TranslateError::mismatch(
                        format!("an argument determining '{formal}'"),
                        format!("no use of '{formal}' in the arguments of '{name}'"),
                        self.pos(span),
                    )
                })
            })
            .collect()
    }

    /// Generate the body of a deferred function specialization with `body`.
    /// Names resolve against the template's definition site with the
    /// formals bound.
    pub fn generate_specialization<F>(
        &mut self,
        job: &DeferredSpecialization,
        body: F,
    ) -> Result<Vec<DeferredSpecialization>, TranslateError>
    where
        F: FnOnce(&mut FunctionTranslator<'_, M>) -> Result<(), TranslateError>,
    {
        let detached = self.env.detach(job.depth);
        let mark = self.env.mark();
        self.env.push_scope();
        for (formal, ty) in &job.bindings {
            self.env.bind_type(formal, ty.clone());
        }
        let names: Vec<Spanned<String>> = job.definition.decl.params.iter().map(|p| p.name.clone()).collect();
        debug!(specialization = %job.key, nesting = job.nesting, "generating specialization body");
        let outer = std::mem::replace(&mut self.nesting, job.nesting);
        let result = self.build_body(job.symbol.clone(), &names, mark, Some(detached), body);
        self.nesting = outer;
        result
    }

    /// Deferred specializations not yet handed out by a finished function.
    pub fn take_deferred(&mut self) -> Vec<DeferredSpecialization> {
        self.templates.take_deferred()
    }

    /// Every use still waiting on a template that was never defined.
    pub fn take_unresolved(&mut self) -> Vec<PendingUse> {
        self.templates.take_unresolved()
    }

    fn defer_use(&mut self, name: &str, args: &[Type], span: Span) -> TranslateError {
        let pending = PendingUse { name: name.to_string(), args: args.to_vec(), pos: self.pos(span) };
        debug!(use_ = %pending, "template used before its definition");
        self.templates.record_pending(pending.clone());
        TranslateError::Deferred { pending }
    }

    /// Run `f` with the environment cut back to the template's definition
    /// site and the formals bound to `args`.
    fn at_definition_site<T>(
        &mut self,
        def: &TemplateDefinition,
        args: &[Type],
        f: impl FnOnce(&mut Self) -> Result<T, TranslateError>,
    ) -> Result<T, TranslateError> {
        let detached = self.env.detach(def.depth);
        self.env.push_scope();
        for (formal, arg) in def.formals.iter().zip(args) {
            self.env.bind_type(formal, arg.clone());
        }
        let result = f(self);
        self.env.pop_scope();
        self.env.reattach(detached);
        result
    }
}

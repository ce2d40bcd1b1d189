//! Template definitions, memoized specializations and forward-reference bookkeeping.
//!
//! The engine itself generates nothing. The translator asks it whether a
//! specialization already exists, stores what it generated, and records uses
//! of templates that are not defined yet so the module codegen can retry them
//! once the definition registers.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use crate::ast::{FunctionDefinition, StructDeclaration};
use crate::env::FunctionSymbol;
use crate::span::{SourcePos, Span};
use crate::types::{canonical_name, FunctionType, Type};

/// Deepest chain of specializations requesting specializations, for
/// functions and struct fields alike. Polymorphic recursion such as
/// `grow<T>` calling `grow<*T>` stops here instead of running forever.
pub const MAX_SPECIALIZATION_DEPTH: usize = 64;

#[derive(Debug, Clone)]
pub enum TemplateBody {
    Function(Rc<FunctionDefinition>),
    Struct(Rc<StructDeclaration>),
}

#[derive(Debug, Clone)]
pub struct TemplateDefinition {
    pub name: String,
    pub formals: Vec<String>,
    pub body: TemplateBody,
    /// Environment depth at the definition site. Specializations resolve
    /// free names against the scopes up to this depth.
    pub depth: usize,
    pub span: Span,
    /// Signature with every formal bound to `Type::Param`; used to infer
    /// template arguments at call sites. `None` for struct templates.
    pub signature: Option<FunctionType>,
}

impl TemplateDefinition {
    pub fn is_function(&self) -> bool {
        matches!(self.body, TemplateBody::Function(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpecializationKey {
    pub name: String,
    pub args: Vec<Type>,
}

impl SpecializationKey {
    pub fn new(name: impl Into<String>, args: Vec<Type>) -> Self {
        Self { name: name.into(), args }
    }
}

impl fmt::Display for SpecializationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", canonical_name(&self.name, &self.args))
    }
}

#[derive(Debug, Clone)]
pub enum Specialization {
    Function(FunctionSymbol),
    /// The concrete struct type, or an `Opaque` placeholder while its fields
    /// are still being resolved.
    Struct(Type),
}

/// A use of a template that preceded its definition.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingUse {
    pub name: String,
    pub args: Vec<Type>,
    pub pos: SourcePos,
}

impl PendingUse {
    pub fn key(&self) -> SpecializationKey {
        SpecializationKey::new(self.name.clone(), self.args.clone())
    }
}

impl fmt::Display for PendingUse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.args.is_empty() {
            write!(f, "{} at {}", self.name, self.pos)
        } else {
            write!(f, "{} at {}", canonical_name(&self.name, &self.args), self.pos)
        }
    }
}

/// A function specialization whose symbol is declared but whose body has not
/// been generated yet. Bodies are generated after the current function ends.
#[derive(Debug, Clone)]
pub struct DeferredSpecialization {
    pub key: SpecializationKey,
    pub symbol: FunctionSymbol,
    pub definition: Rc<FunctionDefinition>,
    pub bindings: Vec<(String, Type)>,
    /// Definition-site environment depth, copied from the template.
    pub depth: usize,
    /// How many specialization bodies led to this one; 1 when requested
    /// from an ordinary function.
    pub nesting: usize,
}

#[derive(Debug, Default)]
pub struct TemplateEngine {
    definitions: HashMap<String, TemplateDefinition>,
    cache: HashMap<SpecializationKey, Specialization>,
    pending: BTreeMap<String, Vec<PendingUse>>,
    deferred: Vec<DeferredSpecialization>,
}

impl TemplateEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    pub fn definition(&self, name: &str) -> Option<&TemplateDefinition> {
        self.definitions.get(name)
    }

    /// Store a definition and hand back every use that was waiting for it.
    pub fn register(&mut self, def: TemplateDefinition) -> Vec<PendingUse> {
        let name = def.name.clone();
        self.definitions.insert(name.clone(), def);
        self.pending.remove(&name).unwrap_or_default()
    }

    pub fn cached(&self, key: &SpecializationKey) -> Option<&Specialization> {
        self.cache.get(key)
    }

    pub fn insert(&mut self, key: SpecializationKey, spec: Specialization) {
        self.cache.insert(key, spec);
    }

    /// Drop a placeholder whose generation failed.
    pub fn evict(&mut self, key: &SpecializationKey) {
        self.cache.remove(key);
    }

    pub fn record_pending(&mut self, use_: PendingUse) {
        let uses = self.pending.entry(use_.name.clone()).or_default();
        if !uses.contains(&use_) {
            uses.push(use_);
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Every use still waiting on an undefined template, ordered by template name.
    pub fn take_unresolved(&mut self) -> Vec<PendingUse> {
        std::mem::take(&mut self.pending).into_values().flatten().collect()
    }

    pub fn defer(&mut self, job: DeferredSpecialization) {
        self.deferred.push(job);
    }

    pub fn take_deferred(&mut self) -> Vec<DeferredSpecialization> {
        std::mem::take(&mut self.deferred)
    }

    /// Number of cached specializations of `name`.
    pub fn specialization_count(&self, name: &str) -> usize {
        self.cache.keys().filter(|k| k.name == name).count()
    }

    /// Symbols of every function specialization declared so far.
    pub fn function_symbols(&self) -> impl Iterator<Item = &FunctionSymbol> {
        self.cache.values().filter_map(|spec| match spec {
            Specialization::Function(sym) => Some(sym),
            Specialization::Struct(_) => None,
        })
    }
}

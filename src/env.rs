//! Lexical scopes for identifiers and type names.
//!
//! The environment is a stack of scopes; lookups search innermost-first and
//! the first match wins, so inner declarations shadow outer ones. The root
//! scope holds the built-in types and every top-level function and template.
//!
//! ```rust
//! use craeft::env::Environment;
//! use craeft::types::Type;
//!
//! let mut env = Environment::new();
//! let mark = env.mark();
//! env.push_scope();
//! assert!(env.bind_type("Meters", Type::int(64)));
//! assert_eq!(env.lookup_type("Meters"), Some(&Type::int(64)));
//! env.release(mark);
//! assert_eq!(env.lookup_type("Meters"), None);
//! ```

use std::collections::HashMap;

use cranelift_codegen::ir::StackSlot;
use cranelift_module::FuncId;

use crate::types::{builtin_types, FunctionType, Type};

/// A named, addressable storage location.
#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub ty: Type,
    pub(crate) slot: StackSlot,
}

impl Variable {
    pub(crate) fn new(name: impl Into<String>, ty: Type, slot: StackSlot) -> Self {
        Self { name: name.into(), ty, slot }
    }
}

#[derive(Debug, Clone)]
pub struct FunctionSymbol {
    /// Symbol name in the module; the mangled name for specializations.
    pub symbol: String,
    pub id: FuncId,
    pub ty: FunctionType,
}

#[derive(Debug, Clone)]
pub enum Binding {
    Variable(Variable),
    Function(FunctionSymbol),
    /// The name refers to a template registered with the template engine.
    Template,
}

#[derive(Debug, Default)]
struct Scope {
    identifiers: HashMap<String, Binding>,
    types: HashMap<String, Type>,
}

/// A scope depth to release back to. Releasing pops every scope opened after the mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeMark(usize);

/// Scopes split off the stack while a template is generated against its definition site.
#[derive(Debug)]
pub struct DetachedScopes(Vec<Scope>);

#[derive(Debug)]
pub struct Environment {
    scopes: Vec<Scope>,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    pub fn new() -> Self {
        let mut root = Scope::default();
        for (name, ty) in builtin_types() {
            root.types.insert(name.to_string(), ty);
        }
        Self { scopes: vec![root] }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    pub fn pop_scope(&mut self) {
        debug_assert!(self.scopes.len() > 1, "attempted to pop the root scope");
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    /// Number of open scopes, including the root.
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn mark(&self) -> ScopeMark {
        ScopeMark(self.scopes.len())
    }

    pub fn release(&mut self, mark: ScopeMark) {
        self.scopes.truncate(mark.0.max(1));
    }

    /// Split off every scope above `depth`, leaving the definition-site view.
    pub fn detach(&mut self, depth: usize) -> DetachedScopes {
        let depth = depth.clamp(1, self.scopes.len());
        DetachedScopes(self.scopes.split_off(depth))
    }

    pub fn reattach(&mut self, detached: DetachedScopes) {
        self.scopes.extend(detached.0);
    }

    /// Insert into the innermost scope. Returns false if the name is already
    /// declared in that same scope.
    pub fn declare(&mut self, name: &str, binding: Binding) -> bool {
        let scope = self.innermost();
        if scope.identifiers.contains_key(name) {
            return false;
        }
        scope.identifiers.insert(name.to_string(), binding);
        true
    }

    pub fn lookup(&self, name: &str) -> Option<&Binding> {
        self.scopes.iter().rev().find_map(|scope| scope.identifiers.get(name))
    }

    pub fn lookup_global(&self, name: &str) -> Option<&Binding> {
        self.scopes[0].identifiers.get(name)
    }

    pub fn set_global(&mut self, name: &str, binding: Binding) {
        self.scopes[0].identifiers.insert(name.to_string(), binding);
    }

    /// Bind a type name in the innermost scope. Returns false on a same-scope redefinition.
    pub fn bind_type(&mut self, name: &str, ty: Type) -> bool {
        let scope = self.innermost();
        if scope.types.contains_key(name) {
            return false;
        }
        scope.types.insert(name.to_string(), ty);
        true
    }

    /// Complete an opaque struct binding in place, wherever it is visible.
    pub fn complete_type(&mut self, name: &str, ty: Type) -> bool {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(existing) = scope.types.get_mut(name) {
                if matches!(existing, Type::Opaque(_)) {
                    *existing = ty;
                    return true;
                }
                return false;
            }
        }
        false
    }

    pub fn lookup_type(&self, name: &str) -> Option<&Type> {
        self.scopes.iter().rev().find_map(|scope| scope.types.get(name))
    }

    fn innermost(&mut self) -> &mut Scope {
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }
}

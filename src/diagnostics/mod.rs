use std::fmt;

use thiserror::Error;

use crate::span::SourcePos;
use crate::template::PendingUse;

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("{pos}: unknown identifier '{name}'")]
    UnknownIdentifier { name: String, pos: SourcePos },

    #[error("{pos}: unknown type '{name}'")]
    UnknownType { name: String, pos: SourcePos },

    #[error("{pos}: struct '{strukt}' has no field '{field}'")]
    UnknownField { strukt: String, field: String, pos: SourcePos },

    #[error("{pos}: '{name}' is already declared in this scope")]
    DuplicateDeclaration { name: String, pos: SourcePos },

    #[error("{pos}: type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String, pos: SourcePos },

    #[error("{pos}: void mismatch: expected {expected}, found {found}")]
    VoidMismatch { expected: String, found: String, pos: SourcePos },

    #[error("{pos}: '{name}' expects {expected} argument(s), found {found}")]
    Arity { name: String, expected: usize, found: usize, pos: SourcePos },

    #[error("{pos}: cannot cast {from} to {to}")]
    Cast { from: String, to: String, pos: SourcePos },

    #[error("{pos}: specializing '{name}' exceeds the nesting limit of {limit}")]
    SpecializationDepth { name: String, limit: usize, pos: SourcePos },

    #[error("unresolved template specialization(s): {}", DisplayUses(.uses))]
    UnresolvedTemplate { uses: Vec<PendingUse> },

    #[error("module failed validation in: {}", .functions.join(", "))]
    ModuleValidation { functions: Vec<String> },

    /// A template was used before its definition. Never escapes the module
    /// codegen: the caller is parked and retried once the template registers.
    #[error("{}: template '{}' used before its definition", .pending.pos, .pending.name)]
    Deferred { pending: PendingUse },

    #[error("Codegen error: {msg}")]
    Backend { msg: String },

    #[error("Config error: {msg}")]
    Config { msg: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {msg}")]
    Internal { msg: String },
}

impl TranslateError {
    pub fn unknown_identifier(name: impl Into<String>, pos: SourcePos) -> Self {
        Self::UnknownIdentifier { name: name.into(), pos }
    }

    pub fn unknown_type(name: impl Into<String>, pos: SourcePos) -> Self {
        Self::UnknownType { name: name.into(), pos }
    }

    pub fn unknown_field(strukt: impl Into<String>, field: impl Into<String>, pos: SourcePos) -> Self {
        Self::UnknownField { strukt: strukt.into(), field: field.into(), pos }
    }

    pub fn duplicate(name: impl Into<String>, pos: SourcePos) -> Self {
        Self::DuplicateDeclaration { name: name.into(), pos }
    }

    pub fn mismatch(expected: impl fmt::Display, found: impl fmt::Display, pos: SourcePos) -> Self {
        Self::TypeMismatch { expected: expected.to_string(), found: found.to_string(), pos }
    }

    pub fn void_mismatch(expected: impl fmt::Display, found: impl fmt::Display, pos: SourcePos) -> Self {
        Self::VoidMismatch { expected: expected.to_string(), found: found.to_string(), pos }
    }

    pub fn arity(name: impl Into<String>, expected: usize, found: usize, pos: SourcePos) -> Self {
        Self::Arity { name: name.into(), expected, found, pos }
    }

    pub fn cast(from: impl fmt::Display, to: impl fmt::Display, pos: SourcePos) -> Self {
        Self::Cast { from: from.to_string(), to: to.to_string(), pos }
    }

    pub fn specialization_depth(name: impl Into<String>, limit: usize, pos: SourcePos) -> Self {
        Self::SpecializationDepth { name: name.into(), limit, pos }
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend { msg: msg.into() }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config { msg: msg.into() }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal { msg: msg.into() }
    }

    /// The position of the offending construct, when the error has one.
    pub fn pos(&self) -> Option<&SourcePos> {
        match self {
            Self::UnknownIdentifier { pos, .. }
            | Self::UnknownType { pos, .. }
            | Self::UnknownField { pos, .. }
            | Self::DuplicateDeclaration { pos, .. }
            | Self::TypeMismatch { pos, .. }
            | Self::VoidMismatch { pos, .. }
            | Self::Arity { pos, .. }
            | Self::Cast { pos, .. }
            | Self::SpecializationDepth { pos, .. } => Some(pos),
            Self::Deferred { pending } => Some(&pending.pos),
            Self::UnresolvedTemplate { uses } => uses.first().map(|u| &u.pos),
            Self::ModuleValidation { .. }
            | Self::Backend { .. }
            | Self::Config { .. }
            | Self::Io(_)
            | Self::Internal { .. } => None,
        }
    }
}

struct DisplayUses<'a>(&'a [PendingUse]);

impl fmt::Display for DisplayUses<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, use_) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{use_}")?;
        }
        Ok(())
    }
}

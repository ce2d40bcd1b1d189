//! The closed node-kind sets produced by the parser and consumed by codegen.
//!
//! Every dispatch over these enums is an exhaustive `match`; adding a kind
//! forces each codegen site to handle it.

use crate::span::Spanned;

#[derive(Debug, Clone, PartialEq)]
pub enum TypeExpr {
    Named(String),
    Void,
    Pointer(Box<Spanned<TypeExpr>>),
    Templated {
        name: String,
        args: Vec<Spanned<TypeExpr>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Neq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    IntLiteral(i64),
    UIntLiteral(u64),
    FloatLiteral(f64),
    BoolLiteral(bool),
    StringLiteral(String),
    Variable(String),
    /// `&expr`
    Reference(Box<Spanned<Expr>>),
    /// `*expr`
    Dereference(Box<Spanned<Expr>>),
    FieldAccess {
        object: Box<Spanned<Expr>>,
        field: Spanned<String>,
    },
    Binop {
        op: BinOp,
        lhs: Box<Spanned<Expr>>,
        rhs: Box<Spanned<Expr>>,
    },
    Unop {
        op: UnaryOp,
        operand: Box<Spanned<Expr>>,
    },
    /// `name(args)` or `name<T, ...>(args)`; `template_args` is empty for plain calls.
    Call {
        name: Spanned<String>,
        template_args: Vec<Spanned<TypeExpr>>,
        args: Vec<Spanned<Expr>>,
    },
    Cast {
        expr: Box<Spanned<Expr>>,
        ty: Spanned<TypeExpr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub stmts: Vec<Spanned<Stmt>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expression(Spanned<Expr>),
    VoidReturn,
    Return(Spanned<Expr>),
    Assignment {
        lhs: Spanned<Expr>,
        rhs: Spanned<Expr>,
    },
    Declaration {
        ty: Spanned<TypeExpr>,
        name: Spanned<String>,
    },
    CompoundDeclaration {
        ty: Spanned<TypeExpr>,
        name: Spanned<String>,
        value: Spanned<Expr>,
    },
    If {
        condition: Spanned<Expr>,
        then_block: Block,
        else_block: Option<Block>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: Spanned<String>,
    pub ty: Spanned<TypeExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDeclaration {
    pub name: Spanned<String>,
    pub params: Vec<Param>,
    pub return_type: Spanned<TypeExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDefinition {
    pub decl: FunctionDeclaration,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub name: Spanned<String>,
    pub ty: Spanned<TypeExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructDeclaration {
    pub name: Spanned<String>,
    pub members: Vec<Member>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateStructDeclaration {
    pub type_params: Vec<Spanned<String>>,
    pub decl: StructDeclaration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateFunctionDefinition {
    pub type_params: Vec<Spanned<String>>,
    pub def: FunctionDefinition,
}

/// `type Name;` declares an opaque struct to be completed by a later struct declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDeclaration {
    pub name: Spanned<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Toplevel {
    TypeDeclaration(TypeDeclaration),
    StructDeclaration(StructDeclaration),
    TemplateStructDeclaration(TemplateStructDeclaration),
    FunctionDeclaration(FunctionDeclaration),
    FunctionDefinition(FunctionDefinition),
    TemplateFunctionDefinition(TemplateFunctionDefinition),
}

impl Toplevel {
    /// The declared name, for logging and diagnostics.
    pub fn name(&self) -> &str {
        match self {
            Toplevel::TypeDeclaration(t) => &t.name.node,
            Toplevel::StructDeclaration(s) => &s.name.node,
            Toplevel::TemplateStructDeclaration(t) => &t.decl.name.node,
            Toplevel::FunctionDeclaration(f) => &f.name.node,
            Toplevel::FunctionDefinition(f) => &f.decl.name.node,
            Toplevel::TemplateFunctionDefinition(t) => &t.def.decl.name.node,
        }
    }
}

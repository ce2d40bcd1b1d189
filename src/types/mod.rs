pub mod cast;

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use cranelift_codegen::ir::{self, types};

pub use cast::{classify_cast, CastKind};

/// A scalar machine type of the source language. `bool` is a one-bit unsigned integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Signed(u16),
    Unsigned(u16),
    Float(u16),
}

impl Primitive {
    pub const BOOL: Primitive = Primitive::Unsigned(1);

    pub fn bits(self) -> u16 {
        match self {
            Primitive::Signed(b) | Primitive::Unsigned(b) | Primitive::Float(b) => b,
        }
    }

    /// Width of the machine representation; `bool` is carried in a byte.
    pub fn repr_bits(self) -> u16 {
        self.bits().max(8)
    }

    pub fn bytes(self) -> u32 {
        u32::from(self.repr_bits() / 8)
    }

    pub fn is_float(self) -> bool {
        matches!(self, Primitive::Float(_))
    }

    pub fn is_signed(self) -> bool {
        matches!(self, Primitive::Signed(_))
    }

    pub fn is_bool(self) -> bool {
        self == Primitive::BOOL
    }

    pub fn clif(self) -> ir::Type {
        match self {
            Primitive::Float(32) => types::F32,
            Primitive::Float(_) => types::F64,
            p => match p.repr_bits() {
                8 => types::I8,
                16 => types::I16,
                32 => types::I32,
                _ => types::I64,
            },
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            p if p.is_bool() => write!(f, "bool"),
            Primitive::Signed(b) => write!(f, "i{b}"),
            Primitive::Unsigned(b) => write!(f, "u{b}"),
            Primitive::Float(b) => write!(f, "f{b}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StructType {
    /// Canonical name: the declared name, or `Name<A, B>` for a specialization.
    pub name: String,
    /// Fields in declaration order, which is also their physical order.
    pub fields: Vec<(String, Type)>,
    /// The template and concrete arguments this struct was specialized from.
    pub origin: Option<(String, Vec<Type>)>,
}

impl StructType {
    pub fn field(&self, name: &str) -> Option<(usize, &Type)> {
        self.fields.iter().enumerate().find(|(_, (n, _))| n == name).map(|(i, (_, t))| (i, t))
    }

    pub fn layout(&self, pointer_bytes: u32) -> Option<StructLayout> {
        let mut offsets = Vec::with_capacity(self.fields.len());
        let mut offset = 0u32;
        let mut align = 1u32;
        for (_, ty) in &self.fields {
            let (size, field_align) = ty.size_align(pointer_bytes)?;
            offset = align_to(offset, field_align);
            offsets.push(offset);
            offset += size;
            align = align.max(field_align);
        }
        Some(StructLayout { offsets, size: align_to(offset, align), align })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructLayout {
    pub offsets: Vec<u32>,
    pub size: u32,
    pub align: u32,
}

fn align_to(offset: u32, align: u32) -> u32 {
    (offset + align - 1) / align * align
}

/// A template struct applied to arguments of which at least one is not concrete.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TemplateType {
    pub name: String,
    pub args: Vec<Type>,
}

#[derive(Debug, Clone)]
pub enum Type {
    /// Only valid as a function return type.
    Void,
    Primitive(Primitive),
    Pointer(Box<Type>),
    Struct(Rc<StructType>),
    /// A struct whose fields are not known yet.
    Opaque(String),
    /// A formal parameter of an enclosing template.
    Param(String),
    Template(TemplateType),
}

impl Type {
    pub fn bool() -> Type {
        Type::Primitive(Primitive::BOOL)
    }

    pub fn int(bits: u16) -> Type {
        Type::Primitive(Primitive::Signed(bits))
    }

    pub fn uint(bits: u16) -> Type {
        Type::Primitive(Primitive::Unsigned(bits))
    }

    pub fn float(bits: u16) -> Type {
        Type::Primitive(Primitive::Float(bits))
    }

    pub fn pointer_to(pointee: Type) -> Type {
        Type::Pointer(Box::new(pointee))
    }

    pub fn primitive(&self) -> Option<Primitive> {
        match self {
            Type::Primitive(p) => Some(*p),
            _ => None,
        }
    }

    pub fn pointee(&self) -> Option<&Type> {
        match self {
            Type::Pointer(inner) => Some(inner.as_ref()),
            _ => None,
        }
    }

    /// The canonical name of a struct or opaque struct.
    pub fn struct_name(&self) -> Option<&str> {
        match self {
            Type::Struct(s) => Some(&s.name),
            Type::Opaque(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, Type::Primitive(p) if p.is_bool())
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Type::Primitive(p) if !p.is_float() && !p.is_bool())
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Type::Primitive(p) if p.is_float())
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer(_))
    }

    pub fn is_struct(&self) -> bool {
        matches!(self, Type::Struct(_) | Type::Opaque(_))
    }

    /// True when no template parameter remains anywhere inside the type.
    pub fn is_concrete(&self) -> bool {
        match self {
            Type::Param(_) | Type::Template(_) => false,
            Type::Pointer(inner) => inner.is_concrete(),
            Type::Void | Type::Primitive(_) | Type::Struct(_) | Type::Opaque(_) => true,
        }
    }

    /// Size and alignment in bytes, or `None` for void, incomplete and generic types.
    pub fn size_align(&self, pointer_bytes: u32) -> Option<(u32, u32)> {
        match self {
            Type::Primitive(p) => Some((p.bytes(), p.bytes())),
            Type::Pointer(_) => Some((pointer_bytes, pointer_bytes)),
            Type::Struct(s) => s.layout(pointer_bytes).map(|l| (l.size, l.align)),
            Type::Void | Type::Opaque(_) | Type::Param(_) | Type::Template(_) => None,
        }
    }

    /// The Cranelift type carrying a value of this type. Struct values are
    /// carried as the address of their storage.
    pub fn clif(&self, pointer: ir::Type) -> Option<ir::Type> {
        match self {
            Type::Primitive(p) => Some(p.clif()),
            Type::Pointer(_) | Type::Struct(_) | Type::Opaque(_) => Some(pointer),
            Type::Void | Type::Param(_) | Type::Template(_) => None,
        }
    }

    /// Symbol-safe spelling used when mangling specialization names.
    pub fn mangle(&self) -> String {
        match self {
            Type::Void => "void".into(),
            Type::Primitive(p) => p.to_string(),
            Type::Pointer(inner) => format!("ptr_{}", inner.mangle()),
            Type::Struct(s) => match &s.origin {
                Some((base, args)) => mangle_name(base, args),
                None => s.name.clone(),
            },
            Type::Opaque(name) | Type::Param(name) => name.clone(),
            Type::Template(t) => mangle_name(&t.name, &t.args),
        }
    }

    /// Recursively transform all inner types via `f`, rebuilding the structure.
    pub fn map_inner_types(&self, f: &impl Fn(&Type) -> Type) -> Type {
        match self {
            Type::Pointer(inner) => Type::Pointer(Box::new(f(inner))),
            Type::Template(t) => Type::Template(TemplateType {
                name: t.name.clone(),
                args: t.args.iter().map(f).collect(),
            }),
            _ => self.clone(),
        }
    }

    /// Replace template parameters with their bindings. Template applications
    /// whose arguments become concrete stay `Template`; the translator turns
    /// them into specializations.
    pub fn substitute(&self, bindings: &HashMap<String, Type>) -> Type {
        match self {
            Type::Param(name) => bindings.get(name).cloned().unwrap_or_else(|| self.clone()),
            _ => self.map_inner_types(&|inner| inner.substitute(bindings)),
        }
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Type::Void, Type::Void) => true,
            (Type::Primitive(a), Type::Primitive(b)) => a == b,
            (Type::Pointer(a), Type::Pointer(b)) => a == b,
            (Type::Param(a), Type::Param(b)) => a == b,
            (Type::Template(a), Type::Template(b)) => a == b,
            _ => match (self.struct_name(), other.struct_name()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl Eq for Type {}

impl Hash for Type {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Type::Void => state.write_u8(0),
            Type::Primitive(p) => {
                state.write_u8(1);
                p.hash(state);
            }
            Type::Pointer(inner) => {
                state.write_u8(2);
                inner.hash(state);
            }
            Type::Struct(_) | Type::Opaque(_) => {
                state.write_u8(3);
                self.struct_name().hash(state);
            }
            Type::Param(name) => {
                state.write_u8(4);
                name.hash(state);
            }
            Type::Template(t) => {
                state.write_u8(5);
                t.hash(state);
            }
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Primitive(p) => write!(f, "{p}"),
            Type::Pointer(inner) => write!(f, "*{inner}"),
            Type::Struct(s) => write!(f, "{}", s.name),
            Type::Opaque(name) | Type::Param(name) => write!(f, "{name}"),
            Type::Template(t) => write!(f, "{}", canonical_name(&t.name, &t.args)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionType {
    pub params: Vec<Type>,
    pub ret: Type,
}

impl FunctionType {
    pub fn new(params: Vec<Type>, ret: Type) -> Self {
        Self { params, ret }
    }

    pub fn substitute(&self, bindings: &HashMap<String, Type>) -> FunctionType {
        FunctionType {
            params: self.params.iter().map(|p| p.substitute(bindings)).collect(),
            ret: self.ret.substitute(bindings),
        }
    }
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn(")?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{p}")?;
        }
        write!(f, ") -> {}", self.ret)
    }
}

/// `Name<A, B>`: the canonical name of a template applied to arguments.
pub fn canonical_name(base: &str, args: &[Type]) -> String {
    let args: Vec<String> = args.iter().map(Type::to_string).collect();
    format!("{}<{}>", base, args.join(", "))
}

pub fn mangle_name(base: &str, args: &[Type]) -> String {
    let suffixes: Vec<String> = args.iter().map(Type::mangle).collect();
    format!("{}__{}", base, suffixes.join("_"))
}

/// The types bound in the root scope of every module.
pub fn builtin_types() -> Vec<(&'static str, Type)> {
    let mut builtins = vec![("bool", Type::bool())];
    for bits in [8, 16, 32, 64] {
        let (signed, unsigned) = match bits {
            8 => ("i8", "u8"),
            16 => ("i16", "u16"),
            32 => ("i32", "u32"),
            _ => ("i64", "u64"),
        };
        builtins.push((signed, Type::int(bits)));
        builtins.push((unsigned, Type::uint(bits)));
    }
    builtins.push(("f32", Type::float(32)));
    builtins.push(("f64", Type::float(64)));
    builtins.push(("int", Type::int(64)));
    builtins.push(("uint", Type::uint(64)));
    builtins.push(("float", Type::float(64)));
    builtins
}

/// Infer template parameter bindings by matching a formal type against an actual one.
/// Returns false on a structural mismatch or a conflicting binding.
pub fn unify(formal: &Type, actual: &Type, bindings: &mut HashMap<String, Type>) -> bool {
    match (formal, actual) {
        (Type::Param(name), _) => match bindings.get(name) {
            Some(bound) => bound == actual,
            None => {
                bindings.insert(name.clone(), actual.clone());
                true
            }
        },
        (Type::Pointer(f), Type::Pointer(a)) => unify(f, a, bindings),
        (Type::Template(t), Type::Struct(s)) => match &s.origin {
            Some((base, args)) if *base == t.name && args.len() == t.args.len() => {
                t.args.iter().zip(args).all(|(f, a)| unify(f, a, bindings))
            }
            _ => false,
        },
        _ => formal == actual,
    }
}

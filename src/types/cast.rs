use super::{Primitive, Type};

/// How a value is converted by `cast`. The table is total: every
/// (source, target) pair either maps to one of these or is a cast error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastKind {
    /// Same machine representation; only the static type changes.
    Reinterpret,
    Reduce,
    SignExtend,
    ZeroExtend,
    IntToBool,
    IntToFloat { signed: bool },
    FloatToInt { signed: bool },
    Promote,
    Demote,
}

/// An integer-like view of a type: primitives other than floats, and pointers
/// (unsigned, pointer-sized).
fn int_view(ty: &Type, pointer_bits: u16) -> Option<(u16, bool)> {
    match ty {
        Type::Primitive(p) if !p.is_float() => Some((p.repr_bits(), p.is_signed())),
        Type::Pointer(_) => Some((pointer_bits, false)),
        _ => None,
    }
}

pub fn classify_cast(from: &Type, to: &Type, pointer_bits: u16) -> Option<CastKind> {
    if !from.is_concrete() || !to.is_concrete() {
        return None;
    }
    if from == to {
        return match from {
            Type::Primitive(_) | Type::Pointer(_) => Some(CastKind::Reinterpret),
            _ => None,
        };
    }
    if let (Type::Primitive(Primitive::Float(a)), Type::Primitive(Primitive::Float(b))) = (from, to) {
        return Some(if a < b { CastKind::Promote } else { CastKind::Demote });
    }
    if to.is_bool() {
        return match int_view(from, pointer_bits) {
            Some(_) => Some(CastKind::IntToBool),
            None => None,
        };
    }
    match (from, to) {
        (_, Type::Primitive(Primitive::Float(_))) => {
            let (_, signed) = int_view(from, pointer_bits).filter(|_| !from.is_pointer())?;
            Some(CastKind::IntToFloat { signed })
        }
        (Type::Primitive(Primitive::Float(_)), _) => {
            let (_, signed) = int_view(to, pointer_bits).filter(|_| !to.is_pointer())?;
            Some(CastKind::FloatToInt { signed })
        }
        _ => {
            let (from_bits, from_signed) = int_view(from, pointer_bits)?;
            let (to_bits, _) = int_view(to, pointer_bits)?;
            Some(if from_bits == to_bits {
                CastKind::Reinterpret
            } else if from_bits > to_bits {
                CastKind::Reduce
            } else if from_signed {
                CastKind::SignExtend
            } else {
                CastKind::ZeroExtend
            })
        }
    }
}

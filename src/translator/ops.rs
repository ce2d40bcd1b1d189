use cranelift_codegen::ir::condcodes::{FloatCC, IntCC};
use cranelift_codegen::ir::{types, InstBuilder, MemFlags, Value};
use cranelift_module::{DataDescription, Linkage, Module};
use tracing::trace;

use super::{FunctionTranslator, TypedValue};
use crate::ast::BinOp;
use crate::diagnostics::TranslateError;
use crate::span::Span;
use crate::types::{classify_cast, CastKind, Primitive, StructType, Type};

#[derive(Debug, Clone, Copy)]
enum Arith {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, Copy)]
enum Bitwise {
    And,
    Or,
    Xor,
}

#[derive(Debug, Clone, Copy)]
enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    fn int_cc(self, signed: bool) -> IntCC {
        match (self, signed) {
            (Comparison::Eq, _) => IntCC::Equal,
            (Comparison::Ne, _) => IntCC::NotEqual,
            (Comparison::Lt, true) => IntCC::SignedLessThan,
            (Comparison::Lt, false) => IntCC::UnsignedLessThan,
            (Comparison::Le, true) => IntCC::SignedLessThanOrEqual,
            (Comparison::Le, false) => IntCC::UnsignedLessThanOrEqual,
            (Comparison::Gt, true) => IntCC::SignedGreaterThan,
            (Comparison::Gt, false) => IntCC::UnsignedGreaterThan,
            (Comparison::Ge, true) => IntCC::SignedGreaterThanOrEqual,
            (Comparison::Ge, false) => IntCC::UnsignedGreaterThanOrEqual,
        }
    }

    fn float_cc(self) -> FloatCC {
        match self {
            Comparison::Eq => FloatCC::Equal,
            Comparison::Ne => FloatCC::NotEqual,
            Comparison::Lt => FloatCC::LessThan,
            Comparison::Le => FloatCC::LessThanOrEqual,
            Comparison::Gt => FloatCC::GreaterThan,
            Comparison::Ge => FloatCC::GreaterThanOrEqual,
        }
    }
}

impl<M: Module> FunctionTranslator<'_, M> {
    // ---- Constants ----

    /// An integer constant of type `ty`. The value must be representable in
    /// `ty`; literals never wrap silently.
    pub fn int_const(&mut self, value: i64, ty: &Type, span: Span) -> Result<TypedValue, TranslateError> {
        let prim = self.integer_primitive(ty, span)?;
        self.check_literal_range(i128::from(value), prim, ty, span)?;
        let bits = prim.repr_bits();
        let masked = if bits < 64 { value & ((1i64 << bits) - 1) } else { value };
        let v = self.ins().iconst(prim.clif(), masked);
        Ok(TypedValue::new(v, ty.clone()))
    }

    pub fn uint_const(&mut self, value: u64, ty: &Type, span: Span) -> Result<TypedValue, TranslateError> {
        let prim = self.integer_primitive(ty, span)?;
        self.check_literal_range(i128::from(value), prim, ty, span)?;
        // In range, so the bit pattern needs no masking.
        let v = self.ins().iconst(prim.clif(), value as i64);
        Ok(TypedValue::new(v, ty.clone()))
    }

    fn integer_primitive(&self, ty: &Type, span: Span) -> Result<Primitive, TranslateError> {
        match ty {
            Type::Primitive(p) if !p.is_float() => Ok(*p),
            other => Err(TranslateError::mismatch("an integer type", other, self.pos(span))),
        }
    }

    fn check_literal_range(&self, value: i128, prim: Primitive, ty: &Type, span: Span) -> Result<(), TranslateError> {
        let bits = u32::from(prim.bits());
        let (lo, hi) = if prim.is_signed() {
            (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
        } else {
            (0, (1i128 << bits) - 1)
        };
        if (lo..=hi).contains(&value) {
            Ok(())
        } else {
            Err(TranslateError::mismatch(ty, format!("literal {value} out of range"), self.pos(span)))
        }
    }

    pub fn float_const(&mut self, value: f64, ty: &Type, span: Span) -> Result<TypedValue, TranslateError> {
        let v = match ty {
            Type::Primitive(Primitive::Float(32)) => self.ins().f32const(value as f32),
            Type::Primitive(Primitive::Float(_)) => self.ins().f64const(value),
            other => return Err(TranslateError::mismatch("a float type", other, self.pos(span))),
        };
        Ok(TypedValue::new(v, ty.clone()))
    }

    pub fn bool_const(&mut self, value: bool) -> Result<TypedValue, TranslateError> {
        let v = self.ins().iconst(types::I8, i64::from(value));
        Ok(TypedValue::new(v, Type::bool()))
    }

    /// A NUL-terminated constant, typed `*u8`. Equal literals share one data object.
    pub fn string_literal(&mut self, text: &str, span: Span) -> Result<TypedValue, TranslateError> {
        let id = match self.tr.strings.get(text) {
            Some(id) => *id,
            None => {
                let name = format!(".str.{}", self.tr.strings.len());
                let id = self
                    .tr
                    .module
                    .declare_data(&name, Linkage::Local, false, false)
                    .map_err(|e| TranslateError::backend(format!("declare string data error: {e}")))?;
                let mut bytes = text.as_bytes().to_vec();
                bytes.push(0);
                let mut desc = DataDescription::new();
                desc.define(bytes.into_boxed_slice());
                self.tr
                    .module
                    .define_data(id, &desc)
                    .map_err(|e| TranslateError::backend(format!("define string data error: {e}")))?;
                self.tr.strings.insert(text.to_string(), id);
                id
            }
        };
        let gv = self.data_ref(id);
        let ptr = self.tr.ptr;
        let v = self.ins().global_value(ptr, gv);
        trace!(len = text.len(), ?span, "string literal");
        Ok(TypedValue::new(v, Type::pointer_to(Type::uint(8))))
    }

    // ---- Casts ----

    pub fn cast(&mut self, value: TypedValue, to: &Type, span: Span) -> Result<TypedValue, TranslateError> {
        let to = self.tr.complete(to);
        let kind = classify_cast(&value.ty, &to, self.tr.ptr.bits() as u16)
            .ok_or_else(|| TranslateError::cast(&value.ty, &to, self.pos(span)))?;
        let target = to
            .clif(self.tr.ptr)
            .ok_or_else(|| TranslateError::cast(&value.ty, &to, self.pos(span)))?;
        let source_bits = value.ty.clif(self.tr.ptr).map_or(0, |t| t.bits());
        let v = value.value;
        let out = match kind {
            CastKind::Reinterpret => v,
            CastKind::Reduce => self.ins().ireduce(target, v),
            CastKind::SignExtend => self.ins().sextend(target, v),
            CastKind::ZeroExtend => self.ins().uextend(target, v),
            CastKind::IntToBool => self.ins().icmp_imm(IntCC::NotEqual, v, 0),
            CastKind::IntToFloat { signed } => {
                let wide = match (source_bits < 32, signed) {
                    (true, true) => self.ins().sextend(types::I32, v),
                    (true, false) => self.ins().uextend(types::I32, v),
                    (false, _) => v,
                };
                if signed {
                    self.ins().fcvt_from_sint(target, wide)
                } else {
                    self.ins().fcvt_from_uint(target, wide)
                }
            }
            CastKind::FloatToInt { signed } => {
                let via = if target.bits() < 32 { types::I32 } else { target };
                let converted = if signed {
                    self.ins().fcvt_to_sint_sat(via, v)
                } else {
                    self.ins().fcvt_to_uint_sat(via, v)
                };
                if via == target {
                    converted
                } else {
                    // Saturate to the narrow range before dropping the high bits.
                    let bits = target.bits();
                    let clamped = if signed {
                        let hi = self.ins().iconst(types::I32, (1i64 << (bits - 1)) - 1);
                        let lo = self.ins().iconst(types::I32, -(1i64 << (bits - 1)) & 0xffff_ffff);
                        let below = self.ins().smin(converted, hi);
                        self.ins().smax(below, lo)
                    } else {
                        let hi = self.ins().iconst(types::I32, (1i64 << bits) - 1);
                        self.ins().umin(converted, hi)
                    };
                    self.ins().ireduce(target, clamped)
                }
            }
            CastKind::Promote => self.ins().fpromote(target, v),
            CastKind::Demote => self.ins().fdemote(target, v),
        };
        Ok(TypedValue::new(out, to))
    }

    // ---- Memory ----

    pub fn add_load(&mut self, ptr: TypedValue, span: Span) -> Result<TypedValue, TranslateError> {
        let pointee = match ptr.ty.pointee() {
            Some(pointee) => self.tr.complete(pointee),
            None => return Err(TranslateError::mismatch("a pointer", &ptr.ty, self.pos(span))),
        };
        match &pointee {
            Type::Primitive(_) | Type::Pointer(_) => {
                let clif = pointee.clif(self.tr.ptr).unwrap_or(self.tr.ptr);
                let v = self.ins().load(clif, MemFlags::new(), ptr.value, 0);
                Ok(TypedValue::new(v, pointee))
            }
            Type::Struct(strukt) => {
                let slot = self.create_slot(&pointee, span)?;
                let p = self.tr.ptr;
                let copy = self.ins().stack_addr(p, slot, 0);
                self.copy_struct(copy, ptr.value, strukt, 0)?;
                Ok(TypedValue::new(copy, pointee))
            }
            Type::Void | Type::Opaque(_) | Type::Param(_) | Type::Template(_) => {
                Err(TranslateError::mismatch("a pointer to a sized type", &ptr.ty, self.pos(span)))
            }
        }
    }

    pub fn add_store(&mut self, ptr: TypedValue, value: TypedValue, span: Span) -> Result<(), TranslateError> {
        let pointee = match ptr.ty.pointee() {
            Some(pointee) => self.tr.complete(pointee),
            None => return Err(TranslateError::mismatch("a pointer", &ptr.ty, self.pos(span))),
        };
        if pointee != value.ty {
            return Err(TranslateError::mismatch(&pointee, &value.ty, self.pos(span)));
        }
        self.store_value(ptr.value, value.value, &pointee)
    }

    /// Store `value` of type `ty` at `addr`; structs are copied field by field.
    pub(super) fn store_value(&mut self, addr: Value, value: Value, ty: &Type) -> Result<(), TranslateError> {
        match self.tr.complete(ty) {
            Type::Struct(strukt) => self.copy_struct(addr, value, &strukt, 0),
            _ => {
                self.ins().store(MemFlags::new(), value, addr, 0);
                Ok(())
            }
        }
    }

    fn copy_struct(&mut self, dst: Value, src: Value, strukt: &StructType, base: i32) -> Result<(), TranslateError> {
        let layout = strukt
            .layout(self.tr.pointer_bytes())
            .ok_or_else(|| TranslateError::internal(format!("struct {} has no layout", strukt.name)))?;
        for ((_, field), offset) in strukt.fields.iter().zip(layout.offsets) {
            let offset = base + offset as i32;
            match self.tr.complete(field) {
                Type::Struct(inner) => self.copy_struct(dst, src, &inner, offset)?,
                other => {
                    let clif = other
                        .clif(self.tr.ptr)
                        .ok_or_else(|| TranslateError::internal(format!("field type {other} has no machine type")))?;
                    let v = self.ins().load(clif, MemFlags::new(), src, offset);
                    self.ins().store(MemFlags::new(), v, dst, offset);
                }
            }
        }
        Ok(())
    }

    // ---- Struct fields ----

    /// Address of `field` inside the struct `ptr` points to.
    pub fn field_address(&mut self, ptr: TypedValue, field: &str, span: Span) -> Result<TypedValue, TranslateError> {
        let strukt = match ptr.ty.pointee().map(|p| self.tr.complete(p)) {
            Some(Type::Struct(strukt)) => strukt,
            Some(Type::Opaque(name)) => {
                return Err(TranslateError::unknown_field(name, field, self.pos(span)));
            }
            _ => return Err(TranslateError::mismatch("a pointer to a struct", &ptr.ty, self.pos(span))),
        };
        let Some((index, field_ty)) = strukt.field(field) else {
            return Err(TranslateError::unknown_field(&strukt.name, field, self.pos(span)));
        };
        let field_ty = field_ty.clone();
        let offset = strukt
            .layout(self.tr.pointer_bytes())
            .map(|layout| layout.offsets[index])
            .ok_or_else(|| TranslateError::internal(format!("struct {} has no layout", strukt.name)))?;
        let addr = if offset == 0 { ptr.value } else { self.ins().iadd_imm(ptr.value, i64::from(offset)) };
        Ok(TypedValue::new(addr, Type::pointer_to(field_ty)))
    }

    /// Load `field` out of a struct value.
    pub fn field_access(&mut self, value: TypedValue, field: &str, span: Span) -> Result<TypedValue, TranslateError> {
        if !value.ty.is_struct() {
            return Err(TranslateError::mismatch("a struct", &value.ty, self.pos(span)));
        }
        let ptr = TypedValue::new(value.value, Type::pointer_to(value.ty));
        let addr = self.field_address(ptr, field, span)?;
        self.add_load(addr, span)
    }

    // ---- Arithmetic ----

    pub fn binop(&mut self, op: BinOp, lhs: TypedValue, rhs: TypedValue, span: Span) -> Result<TypedValue, TranslateError> {
        match op {
            BinOp::Add => self.add(lhs, rhs, span),
            BinOp::Sub => self.sub(lhs, rhs, span),
            BinOp::Mul => self.mul(lhs, rhs, span),
            BinOp::Div => self.div(lhs, rhs, span),
            BinOp::Rem => self.rem(lhs, rhs, span),
            BinOp::BitAnd => self.bit_and(lhs, rhs, span),
            BinOp::BitOr => self.bit_or(lhs, rhs, span),
            BinOp::BitXor => self.bit_xor(lhs, rhs, span),
            BinOp::Shl => self.left_shift(lhs, rhs, span),
            BinOp::Shr => self.right_shift(lhs, rhs, span),
            BinOp::Eq => self.equal(lhs, rhs, span),
            BinOp::Neq => self.nequal(lhs, rhs, span),
            BinOp::Lt => self.less(lhs, rhs, span),
            BinOp::LtEq => self.lesseq(lhs, rhs, span),
            BinOp::Gt => self.greater(lhs, rhs, span),
            BinOp::GtEq => self.greatereq(lhs, rhs, span),
            BinOp::And => self.bool_and(lhs, rhs, span),
            BinOp::Or => self.bool_or(lhs, rhs, span),
        }
    }

    pub fn add(&mut self, lhs: TypedValue, rhs: TypedValue, span: Span) -> Result<TypedValue, TranslateError> {
        self.arith(Arith::Add, lhs, rhs, span)
    }

    pub fn sub(&mut self, lhs: TypedValue, rhs: TypedValue, span: Span) -> Result<TypedValue, TranslateError> {
        self.arith(Arith::Sub, lhs, rhs, span)
    }

    pub fn mul(&mut self, lhs: TypedValue, rhs: TypedValue, span: Span) -> Result<TypedValue, TranslateError> {
        self.arith(Arith::Mul, lhs, rhs, span)
    }

    pub fn div(&mut self, lhs: TypedValue, rhs: TypedValue, span: Span) -> Result<TypedValue, TranslateError> {
        self.arith(Arith::Div, lhs, rhs, span)
    }

    pub fn rem(&mut self, lhs: TypedValue, rhs: TypedValue, span: Span) -> Result<TypedValue, TranslateError> {
        self.arith(Arith::Rem, lhs, rhs, span)
    }

    fn arith(&mut self, op: Arith, lhs: TypedValue, rhs: TypedValue, span: Span) -> Result<TypedValue, TranslateError> {
        self.same_type(&lhs, &rhs, span)?;
        let prim = match &lhs.ty {
            Type::Primitive(p) if !p.is_bool() => *p,
            other => return Err(TranslateError::mismatch("a numeric type", other, self.pos(span))),
        };
        let (a, b) = (lhs.value, rhs.value);
        let v = match (op, prim.is_float(), prim.is_signed()) {
            (Arith::Add, false, _) => Some(self.ins().iadd(a, b)),
            (Arith::Sub, false, _) => Some(self.ins().isub(a, b)),
            (Arith::Mul, false, _) => Some(self.ins().imul(a, b)),
            (Arith::Div, false, true) => Some(self.ins().sdiv(a, b)),
            (Arith::Div, false, false) => Some(self.ins().udiv(a, b)),
            (Arith::Rem, false, true) => Some(self.ins().srem(a, b)),
            (Arith::Rem, false, false) => Some(self.ins().urem(a, b)),
            (Arith::Add, true, _) => Some(self.ins().fadd(a, b)),
            (Arith::Sub, true, _) => Some(self.ins().fsub(a, b)),
            (Arith::Mul, true, _) => Some(self.ins().fmul(a, b)),
            (Arith::Div, true, _) => Some(self.ins().fdiv(a, b)),
            // no float remainder instruction
            (Arith::Rem, true, _) => None,
        };
        match v {
            Some(v) => Ok(TypedValue::new(v, lhs.ty)),
            None => Err(TranslateError::mismatch("an integer type", &lhs.ty, self.pos(span))),
        }
    }

    pub fn bit_and(&mut self, lhs: TypedValue, rhs: TypedValue, span: Span) -> Result<TypedValue, TranslateError> {
        self.bitwise(Bitwise::And, lhs, rhs, span)
    }

    pub fn bit_or(&mut self, lhs: TypedValue, rhs: TypedValue, span: Span) -> Result<TypedValue, TranslateError> {
        self.bitwise(Bitwise::Or, lhs, rhs, span)
    }

    pub fn bit_xor(&mut self, lhs: TypedValue, rhs: TypedValue, span: Span) -> Result<TypedValue, TranslateError> {
        self.bitwise(Bitwise::Xor, lhs, rhs, span)
    }

    fn bitwise(&mut self, op: Bitwise, lhs: TypedValue, rhs: TypedValue, span: Span) -> Result<TypedValue, TranslateError> {
        self.same_type(&lhs, &rhs, span)?;
        if !lhs.ty.is_integer() && !lhs.ty.is_bool() {
            return Err(TranslateError::mismatch("an integer type", &lhs.ty, self.pos(span)));
        }
        let (a, b) = (lhs.value, rhs.value);
        let v = match op {
            Bitwise::And => self.ins().band(a, b),
            Bitwise::Or => self.ins().bor(a, b),
            Bitwise::Xor => self.ins().bxor(a, b),
        };
        Ok(TypedValue::new(v, lhs.ty))
    }

    /// The shift amount may be any integer width.
    pub fn left_shift(&mut self, lhs: TypedValue, rhs: TypedValue, span: Span) -> Result<TypedValue, TranslateError> {
        self.check_shift(&lhs, &rhs, span)?;
        let v = self.ins().ishl(lhs.value, rhs.value);
        Ok(TypedValue::new(v, lhs.ty))
    }

    /// Arithmetic for signed values, logical for unsigned ones.
    pub fn right_shift(&mut self, lhs: TypedValue, rhs: TypedValue, span: Span) -> Result<TypedValue, TranslateError> {
        self.check_shift(&lhs, &rhs, span)?;
        let signed = lhs.ty.primitive().is_some_and(Primitive::is_signed);
        let v = if signed { self.ins().sshr(lhs.value, rhs.value) } else { self.ins().ushr(lhs.value, rhs.value) };
        Ok(TypedValue::new(v, lhs.ty))
    }

    fn check_shift(&self, lhs: &TypedValue, rhs: &TypedValue, span: Span) -> Result<(), TranslateError> {
        for operand in [lhs, rhs] {
            if !operand.ty.is_integer() {
                return Err(TranslateError::mismatch("an integer type", &operand.ty, self.pos(span)));
            }
        }
        Ok(())
    }

    pub fn neg(&mut self, value: TypedValue, span: Span) -> Result<TypedValue, TranslateError> {
        let v = if value.ty.is_float() {
            self.ins().fneg(value.value)
        } else if value.ty.is_integer() {
            self.ins().ineg(value.value)
        } else {
            return Err(TranslateError::mismatch("a numeric type", &value.ty, self.pos(span)));
        };
        Ok(TypedValue::new(v, value.ty))
    }

    pub fn bit_not(&mut self, value: TypedValue, span: Span) -> Result<TypedValue, TranslateError> {
        if !value.ty.is_integer() {
            return Err(TranslateError::mismatch("an integer type", &value.ty, self.pos(span)));
        }
        let v = self.ins().bnot(value.value);
        Ok(TypedValue::new(v, value.ty))
    }

    // ---- Comparisons ----

    pub fn equal(&mut self, lhs: TypedValue, rhs: TypedValue, span: Span) -> Result<TypedValue, TranslateError> {
        self.compare(Comparison::Eq, lhs, rhs, span)
    }

    pub fn nequal(&mut self, lhs: TypedValue, rhs: TypedValue, span: Span) -> Result<TypedValue, TranslateError> {
        self.compare(Comparison::Ne, lhs, rhs, span)
    }

    pub fn less(&mut self, lhs: TypedValue, rhs: TypedValue, span: Span) -> Result<TypedValue, TranslateError> {
        self.compare(Comparison::Lt, lhs, rhs, span)
    }

    pub fn lesseq(&mut self, lhs: TypedValue, rhs: TypedValue, span: Span) -> Result<TypedValue, TranslateError> {
        self.compare(Comparison::Le, lhs, rhs, span)
    }

    pub fn greater(&mut self, lhs: TypedValue, rhs: TypedValue, span: Span) -> Result<TypedValue, TranslateError> {
        self.compare(Comparison::Gt, lhs, rhs, span)
    }

    pub fn greatereq(&mut self, lhs: TypedValue, rhs: TypedValue, span: Span) -> Result<TypedValue, TranslateError> {
        self.compare(Comparison::Ge, lhs, rhs, span)
    }

    fn compare(&mut self, cmp: Comparison, lhs: TypedValue, rhs: TypedValue, span: Span) -> Result<TypedValue, TranslateError> {
        self.same_type(&lhs, &rhs, span)?;
        let (a, b) = (lhs.value, rhs.value);
        let v = match &lhs.ty {
            Type::Primitive(p) if p.is_float() => self.ins().fcmp(cmp.float_cc(), a, b),
            Type::Primitive(p) => {
                let signed = p.is_signed();
                self.ins().icmp(cmp.int_cc(signed), a, b)
            }
            Type::Pointer(_) => self.ins().icmp(cmp.int_cc(false), a, b),
            other => return Err(TranslateError::mismatch("a comparable type", other, self.pos(span))),
        };
        Ok(TypedValue::new(v, Type::bool()))
    }

    // ---- Booleans ----

    /// Both operands are evaluated; there is no short-circuiting.
    pub fn bool_and(&mut self, lhs: TypedValue, rhs: TypedValue, span: Span) -> Result<TypedValue, TranslateError> {
        self.check_bools(&lhs, &rhs, span)?;
        let v = self.ins().band(lhs.value, rhs.value);
        Ok(TypedValue::new(v, Type::bool()))
    }

    pub fn bool_or(&mut self, lhs: TypedValue, rhs: TypedValue, span: Span) -> Result<TypedValue, TranslateError> {
        self.check_bools(&lhs, &rhs, span)?;
        let v = self.ins().bor(lhs.value, rhs.value);
        Ok(TypedValue::new(v, Type::bool()))
    }

    pub fn bool_not(&mut self, value: TypedValue, span: Span) -> Result<TypedValue, TranslateError> {
        if !value.ty.is_bool() {
            return Err(TranslateError::mismatch(Type::bool(), &value.ty, self.pos(span)));
        }
        let v = self.ins().bxor_imm(value.value, 1);
        Ok(TypedValue::new(v, Type::bool()))
    }

    fn check_bools(&self, lhs: &TypedValue, rhs: &TypedValue, span: Span) -> Result<(), TranslateError> {
        for operand in [lhs, rhs] {
            if !operand.ty.is_bool() {
                return Err(TranslateError::mismatch(Type::bool(), &operand.ty, self.pos(span)));
            }
        }
        Ok(())
    }

    fn same_type(&self, lhs: &TypedValue, rhs: &TypedValue, span: Span) -> Result<(), TranslateError> {
        if lhs.ty != rhs.ty {
            return Err(TranslateError::mismatch(&lhs.ty, &rhs.ty, self.pos(span)));
        }
        Ok(())
    }
}

//! Property-based tests for translation invariants.
//!
//! Executable properties JIT one module per thread and compare the generated
//! code against Rust's own semantics for the same operation.

mod common;
use common::*;

use std::collections::HashSet;

use proptest::prelude::*;

use craeft::ast::{BinOp, Toplevel};
use craeft::span::Span;
use craeft::types::{FunctionType, Type};

const INT_TARGETS: [&str; 6] = ["i8", "u8", "i16", "u16", "i32", "u32"];

/// `i64 to_<T>(i64 x) { return (i64)(T)x; }` for every narrow integer type,
/// plus float conversions and wrapping arithmetic.
fn cast_module() -> Vec<Toplevel> {
    let mut decls: Vec<Toplevel> = INT_TARGETS
        .iter()
        .map(|t| {
            func(
                &format!("to_{t}"),
                vec![("x", ty("i64"))],
                ty("i64"),
                vec![ret(cast(cast(var("x"), ty(t)), ty("i64")))],
            )
        })
        .collect();
    decls.push(func("f2i", vec![("x", ty("f64"))], ty("i64"), vec![ret(cast(var("x"), ty("i64")))]));
    decls.push(func("f2u8", vec![("x", ty("f64"))], ty("i64"), vec![ret(cast(cast(var("x"), ty("u8")), ty("i64")))]));
    decls.push(func("i2f", vec![("x", ty("i64"))], ty("f64"), vec![ret(cast(var("x"), ty("f64")))]));
    for (name, op) in [("add", BinOp::Add), ("sub", BinOp::Sub), ("mul", BinOp::Mul)] {
        decls.push(func(
            name,
            vec![("a", ty("i64")), ("b", ty("i64"))],
            ty("i64"),
            vec![ret(binop(op, var("a"), var("b")))],
        ));
    }
    decls
}

thread_local! {
    static MODULE: Jit = jit(&cast_module());
}

fn call_f64_i64(jit: &Jit, name: &str, x: f64) -> i64 {
    let f: extern "C" fn(f64) -> i64 = unsafe { std::mem::transmute(jit.ptr(name)) };
    f(x)
}

fn call_i64_f64(jit: &Jit, name: &str, x: i64) -> f64 {
    let f: extern "C" fn(i64) -> f64 = unsafe { std::mem::transmute(jit.ptr(name)) };
    f(x)
}

fn rust_narrow(target: &str, x: i64) -> i64 {
    match target {
        "i8" => x as i8 as i64,
        "u8" => x as u8 as i64,
        "i16" => x as i16 as i64,
        "u16" => x as u16 as i64,
        "i32" => x as i32 as i64,
        _ => x as u32 as i64,
    }
}

#[derive(Debug, Clone, Copy)]
enum ScopeOp {
    Push,
    Pop,
    Declare,
}

fn arb_scope_op() -> impl Strategy<Value = ScopeOp> {
    prop_oneof![Just(ScopeOp::Push), Just(ScopeOp::Pop), Just(ScopeOp::Declare)]
}

fn arb_type_name() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec!["i8", "u16", "i32", "int", "i64", "f32", "float", "bool"])
}

proptest! {
    /// Integer casts truncate and extend exactly like Rust's `as`.
    #[test]
    fn integer_casts_match_rust(x in any::<i64>(), target in prop::sample::select(INT_TARGETS.to_vec())) {
        let got = MODULE.with(|jit| jit.call1_i64(&format!("to_{target}"), x));
        prop_assert_eq!(got, rust_narrow(target, x));
    }

    /// Float to integer conversion saturates, as Rust's `as` does.
    #[test]
    fn float_casts_saturate(x in any::<f64>()) {
        let (wide, narrow) = MODULE.with(|jit| (call_f64_i64(jit, "f2i", x), call_f64_i64(jit, "f2u8", x)));
        prop_assert_eq!(wide, x as i64);
        prop_assert_eq!(narrow, x as u8 as i64);
    }

    #[test]
    fn int_to_float_matches_rust(x in any::<i64>()) {
        let got = MODULE.with(|jit| call_i64_f64(jit, "i2f", x));
        prop_assert_eq!(got, x as f64);
    }

    /// Integer arithmetic wraps.
    #[test]
    fn arithmetic_wraps(a in any::<i64>(), b in any::<i64>()) {
        let (add, sub, mul) = MODULE.with(|jit| {
            (jit.call2_i64("add", a, b), jit.call2_i64("sub", a, b), jit.call2_i64("mul", a, b))
        });
        prop_assert_eq!(add, a.wrapping_add(b));
        prop_assert_eq!(sub, a.wrapping_sub(b));
        prop_assert_eq!(mul, a.wrapping_mul(b));
    }

    /// Whatever scopes a body opens, ending the function returns to the
    /// depth it started from, and inner declarations never leak.
    #[test]
    fn scopes_balance(ops in prop::collection::vec(arb_scope_op(), 0..40)) {
        let mut tr = jit_translator();
        let base = tr.env().depth();
        let mut declared = 0;
        tr.create_and_start_function(FunctionType::new(vec![], Type::Void), &[], "f", Span::dummy(), |f| {
            let body = f.translator().env().depth();
            let mut depth = body;
            for op in ops {
                match op {
                    ScopeOp::Push => {
                        f.push_scope();
                        depth += 1;
                    }
                    ScopeOp::Pop if depth > body => {
                        f.pop_scope();
                        depth -= 1;
                    }
                    ScopeOp::Pop => {}
                    ScopeOp::Declare => {
                        f.declare(&format!("v{declared}"), &Type::int(32), Span::dummy())?;
                        declared += 1;
                    }
                }
                assert_eq!(f.translator().env().depth(), depth);
            }
            Ok(())
        })
        .unwrap();
        prop_assert_eq!(tr.env().depth(), base);
        for i in 0..declared {
            let name = format!("v{i}");
            prop_assert!(tr.lookup_identifier(&name).is_none());
        }
    }

    /// Each distinct argument tuple is specialized exactly once, however
    /// often and in whatever order it is requested.
    #[test]
    fn specialization_is_idempotent(uses in prop::collection::vec(arb_type_name(), 1..12)) {
        let mut decls = vec![identity()];
        for (i, name) in uses.iter().enumerate() {
            decls.push(func(
                &format!("use{i}"),
                vec![("x", ty(name))],
                ty(name),
                vec![ret(tcall("identity", vec![ty(name)], vec![var("x")]))],
            ));
        }
        let tr = generate(&decls).unwrap();

        let canonical: HashSet<Type> = uses
            .iter()
            .map(|name| tr.lookup_type(name, Span::dummy()).unwrap())
            .collect();
        prop_assert_eq!(tr.templates().specialization_count("identity"), canonical.len());
        prop_assert_eq!(tr.body_count(), uses.len() + canonical.len());
    }
}

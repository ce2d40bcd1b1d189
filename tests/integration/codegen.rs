mod common;
use common::*;

use craeft::ast::{BinOp, Expr, UnaryOp};
use craeft::diagnostics::TranslateError;
use craeft::span::{Span, Spanned};

fn point() -> craeft::ast::Toplevel {
    strukt("Point", vec![("x", ty("i64")), ("y", ty("i64"))])
}

#[test]
fn struct_argument_sum() {
    let jit = jit(&[
        point(),
        func(
            "sum",
            vec![("p", ty("Point"))],
            ty("i64"),
            vec![ret(binop(BinOp::Add, field(var("p"), "x"), field(var("p"), "y")))],
        ),
        func(
            "run",
            vec![],
            ty("i64"),
            vec![
                decl(ty("Point"), "p"),
                assign(field(var("p"), "x"), int(3)),
                assign(field(var("p"), "y"), int(4)),
                ret(call("sum", vec![var("p")])),
            ],
        ),
    ]);
    assert_eq!(jit.call0_i64("run"), 7);
}

#[test]
fn struct_parameters_are_copies() {
    let jit = jit(&[
        point(),
        func(
            "clobber",
            vec![("p", ty("Point"))],
            ty("i64"),
            vec![assign(field(var("p"), "x"), int(100)), ret(field(var("p"), "x"))],
        ),
        func(
            "run",
            vec![],
            ty("i64"),
            vec![
                decl(ty("Point"), "p"),
                assign(field(var("p"), "x"), int(1)),
                assign(field(var("p"), "y"), int(2)),
                expr_stmt(call("clobber", vec![var("p")])),
                ret(field(var("p"), "x")),
            ],
        ),
    ]);
    assert_eq!(jit.call0_i64("run"), 1);
}

#[test]
fn struct_return_through_hidden_pointer() {
    let jit = jit(&[
        point(),
        func(
            "make",
            vec![("a", ty("i64")), ("b", ty("i64"))],
            ty("Point"),
            vec![
                decl(ty("Point"), "p"),
                assign(field(var("p"), "x"), var("a")),
                assign(field(var("p"), "y"), var("b")),
                ret(var("p")),
            ],
        ),
        func(
            "run",
            vec![],
            ty("i64"),
            vec![
                let_(ty("Point"), "q", call("make", vec![int(2), int(5)])),
                ret(binop(BinOp::Sub, field(var("q"), "y"), field(var("q"), "x"))),
            ],
        ),
        func("make_y", vec![], ty("i64"), vec![ret(field(call("make", vec![int(8), int(9)]), "y"))]),
    ]);
    assert_eq!(jit.call0_i64("run"), 3);
    assert_eq!(jit.call0_i64("make_y"), 9);
}

#[test]
fn nested_struct_fields() {
    let jit = jit(&[
        point(),
        strukt("Line", vec![("a", ty("Point")), ("b", ty("Point"))]),
        func(
            "run",
            vec![],
            ty("i64"),
            vec![
                decl(ty("Line"), "l"),
                assign(field(field(var("l"), "b"), "y"), int(6)),
                assign(field(field(var("l"), "a"), "x"), int(1)),
                ret(binop(BinOp::Add, field(field(var("l"), "b"), "y"), field(field(var("l"), "a"), "x"))),
            ],
        ),
    ]);
    assert_eq!(jit.call0_i64("run"), 7);
}

#[test]
fn recursion() {
    let jit = jit(&[func(
        "fact",
        vec![("n", ty("i64"))],
        ty("i64"),
        vec![
            if_(binop(BinOp::LtEq, var("n"), int(1)), vec![ret(int(1))], None),
            ret(binop(BinOp::Mul, var("n"), call("fact", vec![binop(BinOp::Sub, var("n"), int(1))]))),
        ],
    )]);
    assert_eq!(jit.call1_i64("fact", 5), 120);
    assert_eq!(jit.call1_i64("fact", 1), 1);
}

#[test]
fn if_without_else_falls_through() {
    let jit = jit(&[func(
        "abs",
        vec![("x", ty("i64"))],
        ty("i64"),
        vec![
            if_(binop(BinOp::Lt, var("x"), int(0)), vec![ret(unop(UnaryOp::Neg, var("x")))], None),
            ret(var("x")),
        ],
    )]);
    assert_eq!(jit.call1_i64("abs", -5), 5);
    assert_eq!(jit.call1_i64("abs", 12), 12);
}

#[test]
fn if_else_both_returning() {
    let jit = jit(&[func(
        "sign",
        vec![("x", ty("i64"))],
        ty("i64"),
        vec![if_(
            binop(BinOp::Lt, var("x"), int(0)),
            vec![ret(unop(UnaryOp::Neg, int(1)))],
            Some(vec![ret(int(1))]),
        )],
    )]);
    assert_eq!(jit.call1_i64("sign", -3), -1);
    assert_eq!(jit.call1_i64("sign", 3), 1);
}

#[test]
fn assignments_inside_branches_reach_merge() {
    let jit = jit(&[func(
        "max",
        vec![("a", ty("i64")), ("b", ty("i64"))],
        ty("i64"),
        vec![
            decl(ty("i64"), "m"),
            if_(
                binop(BinOp::Gt, var("a"), var("b")),
                vec![assign(var("m"), var("a"))],
                Some(vec![assign(var("m"), var("b"))]),
            ),
            ret(var("m")),
        ],
    )]);
    assert_eq!(jit.call2_i64("max", 4, 9), 9);
    assert_eq!(jit.call2_i64("max", 10, -2), 10);
}

#[test]
fn shadowing_in_branch_scope() {
    let jit = jit(&[func(
        "run",
        vec![],
        ty("i64"),
        vec![
            let_(ty("i64"), "x", int(1)),
            if_(boolean(true), vec![let_(ty("i64"), "x", int(2)), assign(var("x"), int(3))], None),
            ret(var("x")),
        ],
    )]);
    assert_eq!(jit.call0_i64("run"), 1);
}

#[test]
fn logical_operators() {
    let in_range = binop(
        BinOp::And,
        binop(BinOp::Gt, var("a"), int(0)),
        binop(BinOp::Lt, var("a"), int(10)),
    );
    let jit = jit(&[func(
        "in_range",
        vec![("a", ty("i64"))],
        ty("i64"),
        vec![
            if_(in_range, vec![ret(int(1))], None),
            if_(
                binop(BinOp::Or, unop(UnaryOp::Not, boolean(true)), binop(BinOp::Eq, var("a"), int(42))),
                vec![ret(int(2))],
                None,
            ),
            ret(int(0)),
        ],
    )]);
    assert_eq!(jit.call1_i64("in_range", 5), 1);
    assert_eq!(jit.call1_i64("in_range", 42), 2);
    assert_eq!(jit.call1_i64("in_range", -1), 0);
}

#[test]
fn pointers_write_through() {
    let jit = jit(&[
        func(
            "set",
            vec![("p", ptr(ty("i64"))), ("v", ty("i64"))],
            void(),
            vec![assign(deref(var("p")), var("v"))],
        ),
        func(
            "run",
            vec![],
            ty("i64"),
            vec![
                let_(ty("i64"), "x", int(1)),
                expr_stmt(call("set", vec![addr_of(var("x")), int(9)])),
                ret(var("x")),
            ],
        ),
    ]);
    assert_eq!(jit.call0_i64("run"), 9);
}

#[test]
fn field_through_struct_pointer() {
    let jit = jit(&[
        point(),
        func(
            "bump",
            vec![("p", ptr(ty("Point")))],
            void(),
            vec![
                assign(
                    field(deref(var("p")), "y"),
                    binop(BinOp::Add, field(deref(var("p")), "y"), int(10)),
                ),
                ret_void(),
            ],
        ),
        func(
            "run",
            vec![],
            ty("i64"),
            vec![
                decl(ty("Point"), "p"),
                assign(field(var("p"), "y"), int(5)),
                expr_stmt(call("bump", vec![addr_of(var("p"))])),
                ret(field(var("p"), "y")),
            ],
        ),
    ]);
    assert_eq!(jit.call0_i64("run"), 15);
}

#[test]
fn literal_typing_from_context() {
    let jit = jit(&[
        func(
            "avg",
            vec![("a", ty("f64")), ("b", ty("f64"))],
            ty("f64"),
            vec![ret(binop(BinOp::Div, binop(BinOp::Add, var("a"), var("b")), int(2)))],
        ),
        func("run", vec![], ty("f64"), vec![ret(call("avg", vec![int(1), float(2.0)]))]),
        func(
            "narrow",
            vec![],
            ty("i64"),
            vec![
                let_(ty("i32"), "x", int(40)),
                let_(ty("i32"), "y", binop(BinOp::Add, int(2), var("x"))),
                ret(cast(var("y"), ty("i64"))),
            ],
        ),
    ]);
    assert_eq!(jit.call0_f64("run"), 1.5);
    assert_eq!(jit.call0_i64("narrow"), 42);
}

#[test]
fn integer_literals_must_fit_their_type() {
    let literal = Spanned::new(Expr::IntLiteral(300), Span::new(12, 15));
    let err = codegen_error(&[func("run", vec![], void(), vec![let_(ty("u8"), "x", literal)])]);
    match err {
        TranslateError::TypeMismatch { expected, pos, .. } => {
            assert_eq!(expected, "u8");
            assert_eq!(pos.span, Span::new(12, 15));
        }
        other => panic!("unexpected error: {other}"),
    }

    let err = codegen_error(&[func("run", vec![], void(), vec![let_(ty("i8"), "x", unop(UnaryOp::Neg, int(129)))])]);
    assert!(matches!(err, TranslateError::TypeMismatch { .. }), "{err}");
}

#[test]
fn literals_at_the_edges_of_narrow_types() {
    let jit = jit(&[
        func(
            "min_i8",
            vec![],
            ty("i64"),
            vec![let_(ty("i8"), "x", unop(UnaryOp::Neg, int(128))), ret(cast(var("x"), ty("i64")))],
        ),
        func(
            "max_u8",
            vec![],
            ty("i64"),
            vec![let_(ty("u8"), "x", int(255)), ret(cast(var("x"), ty("i64")))],
        ),
    ]);
    assert_eq!(jit.call0_i64("min_i8"), -128);
    assert_eq!(jit.call0_i64("max_u8"), 255);
}

#[test]
fn falling_off_a_value_function_fails_validation() {
    let mut tr = generate(&[func(
        "maybe",
        vec![("flag", ty("bool"))],
        ty("i64"),
        vec![if_(var("flag"), vec![ret(int(1))], None)],
    )])
    .unwrap();
    match tr.validate(&mut std::io::sink()) {
        Err(TranslateError::ModuleValidation { functions }) => assert_eq!(functions, vec!["maybe".to_string()]),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn casts() {
    let jit = jit(&[
        func(
            "trunc",
            vec![],
            ty("i64"),
            vec![let_(ty("f64"), "x", float(3.75)), ret(cast(var("x"), ty("i64")))],
        ),
        func(
            "wrap",
            vec![],
            ty("i64"),
            vec![
                let_(ty("i64"), "big", int(300)),
                let_(ty("u8"), "small", cast(var("big"), ty("u8"))),
                ret(cast(var("small"), ty("i64"))),
            ],
        ),
        func(
            "sign_extend",
            vec![],
            ty("i64"),
            vec![let_(ty("i8"), "b", unop(UnaryOp::Neg, int(2))), ret(cast(var("b"), ty("i64")))],
        ),
        func(
            "to_float",
            vec![],
            ty("f64"),
            vec![let_(ty("i32"), "n", int(7)), ret(cast(var("n"), ty("f64")))],
        ),
        func(
            "saturate",
            vec![],
            ty("i64"),
            vec![let_(ty("f64"), "huge", float(1e300)), ret(cast(var("huge"), ty("i64")))],
        ),
    ]);
    assert_eq!(jit.call0_i64("trunc"), 3);
    assert_eq!(jit.call0_i64("wrap"), 44);
    assert_eq!(jit.call0_i64("sign_extend"), -2);
    assert_eq!(jit.call0_f64("to_float"), 7.0);
    assert_eq!(jit.call0_i64("saturate"), i64::MAX);
}

#[test]
fn shifts_and_bit_operations() {
    let jit = jit(&[
        func(
            "shr_signed",
            vec![("x", ty("i64"))],
            ty("i64"),
            vec![ret(binop(BinOp::Shr, var("x"), int(1)))],
        ),
        func(
            "mix",
            vec![],
            ty("i64"),
            vec![
                let_(ty("i64"), "a", int(0b1100)),
                let_(ty("i32"), "s", int(2)),
                ret(binop(
                    BinOp::BitXor,
                    binop(BinOp::BitOr, binop(BinOp::Shl, var("a"), var("s")), int(1)),
                    binop(BinOp::BitAnd, var("a"), unop(UnaryOp::BitNot, int(4))),
                )),
            ],
        ),
    ]);
    assert_eq!(jit.call1_i64("shr_signed", -8), -4);
    assert_eq!(jit.call0_i64("mix"), (0b1100 << 2 | 1) ^ (0b1100 & !4));
}

#[test]
fn remainder_and_unsigned_division() {
    let jit = jit(&[
        func("srem", vec![("a", ty("i64")), ("b", ty("i64"))], ty("i64"), vec![ret(binop(BinOp::Rem, var("a"), var("b")))]),
        func(
            "udiv",
            vec![],
            ty("i64"),
            vec![
                let_(ty("u64"), "a", cast(unop(UnaryOp::Neg, int(2)), ty("u64"))),
                ret(cast(binop(BinOp::Div, var("a"), int(2)), ty("i64"))),
            ],
        ),
    ]);
    assert_eq!(jit.call2_i64("srem", -7, 3), -1);
    assert_eq!(jit.call0_i64("udiv"), i64::MAX);
}

#[test]
fn identity_specializes_once_per_argument_tuple() {
    let tr = generate(&[
        identity(),
        func("use_int", vec![], ty("i64"), vec![ret(call("identity", vec![int(5)]))]),
        func("use_float", vec![], ty("f64"), vec![ret(tcall("identity", vec![ty("float")], vec![float(2.5)]))]),
    ])
    .unwrap();
    assert_eq!(tr.templates().specialization_count("identity"), 2);
    assert!(tr.body("identity__i64").is_some());
    assert!(tr.body("identity__f64").is_some());
    let bodies = tr.body_count();

    let mut cg = craeft::codegen::ModuleCodegen::with_module(tr);
    cg.codegen(&[func(
        "use_int_again",
        vec![],
        ty("i64"),
        vec![ret(tcall("identity", vec![ty("int")], vec![int(7)]))],
    )])
    .unwrap();
    let tr = cg.finish_module().unwrap();
    assert_eq!(tr.templates().specialization_count("identity"), 2);
    assert_eq!(tr.body_count(), bodies + 1);

    let jit = Jit::from_translator(tr);
    assert_eq!(jit.call0_i64("use_int"), 5);
    assert_eq!(jit.call0_f64("use_float"), 2.5);
    assert_eq!(jit.call0_i64("use_int_again"), 7);
}

#[test]
fn template_struct_with_generic_accessor() {
    let pair_of_i64 = || templated("Pair", vec![ty("i64")]);
    let jit = jit(&[
        template_struct(&["T"], "Pair", vec![("first", ty("T")), ("second", ty("T"))]),
        template_fn(
            &["T"],
            "first_of",
            vec![("p", templated("Pair", vec![ty("T")]))],
            ty("T"),
            vec![ret(field(var("p"), "first"))],
        ),
        func(
            "run",
            vec![],
            ty("i64"),
            vec![
                decl(pair_of_i64(), "p"),
                assign(field(var("p"), "first"), int(3)),
                assign(field(var("p"), "second"), int(4)),
                ret(binop(BinOp::Add, call("first_of", vec![var("p")]), field(var("p"), "second"))),
            ],
        ),
    ]);
    assert_eq!(jit.call0_i64("run"), 7);
}

#[test]
fn template_body_calls_another_template() {
    let jit = jit(&[
        identity(),
        template_fn(
            &["T"],
            "twice",
            vec![("x", ty("T"))],
            ty("T"),
            vec![ret(binop(BinOp::Add, call("identity", vec![var("x")]), var("x")))],
        ),
        func("run", vec![], ty("i64"), vec![ret(call("twice", vec![int(21)]))]),
    ]);
    assert_eq!(jit.call0_i64("run"), 42);
}

#[test]
fn prototype_completed_by_later_definition() {
    let jit = jit(&[
        prototype("later", vec![("x", ty("i64"))], ty("i64")),
        func("run", vec![], ty("i64"), vec![ret(call("later", vec![int(20)]))]),
        func("later", vec![("x", ty("i64"))], ty("i64"), vec![ret(binop(BinOp::Add, var("x"), int(1)))]),
    ]);
    assert_eq!(jit.call0_i64("run"), 21);
}

#[test]
fn self_referential_struct_through_pointer() {
    let jit = jit(&[
        strukt("Node", vec![("value", ty("i64")), ("next", ptr(ty("Node")))]),
        func(
            "run",
            vec![],
            ty("i64"),
            vec![
                decl(ty("Node"), "a"),
                decl(ty("Node"), "b"),
                assign(field(var("b"), "value"), int(11)),
                assign(field(var("a"), "next"), addr_of(var("b"))),
                ret(field(deref(field(var("a"), "next")), "value")),
            ],
        ),
    ]);
    assert_eq!(jit.call0_i64("run"), 11);
}

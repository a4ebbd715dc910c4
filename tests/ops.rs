use bigdecimal::BigDecimal;
use pretty_assertions::assert_eq;
use zinnia::{binary, BinOp, ClassBuilder, Context, ErrorKind, ObjectValue, Value};

fn ctx() -> Context {
    Context::new()
}

fn expect_int(value: &Value) -> i64 {
    match value {
        Value::Int(n) => *n,
        other => panic!("expected Int, got {other:?}"),
    }
}

fn expect_float(value: &Value) -> f64 {
    match value {
        Value::Float(x) => *x,
        other => panic!("expected Float, got {other:?}"),
    }
}

fn expect_str(value: &Value) -> String {
    match value {
        Value::Str(s) => s.as_str().to_string(),
        other => panic!("expected Str, got {other:?}"),
    }
}

#[test]
fn integer_arithmetic_keeps_precedence_results() {
    let mut ctx = ctx();
    let product = binary(&mut ctx, BinOp::Mul, &Value::Int(2), &Value::Int(3)).unwrap();
    let sum = binary(&mut ctx, BinOp::Add, &Value::Int(1), &product).unwrap();
    assert_eq!(expect_int(&sum), 7);
}

#[test]
fn int_and_float_promote_to_float() {
    let mut ctx = ctx();
    let r = binary(&mut ctx, BinOp::Add, &Value::Int(1), &Value::Float(0.5)).unwrap();
    assert_eq!(expect_float(&r), 1.5);
    let r = binary(&mut ctx, BinOp::Mul, &Value::Float(2.0), &Value::Int(3)).unwrap();
    assert_eq!(expect_float(&r), 6.0);
}

#[test]
fn int_and_bignum_promote_to_bignum() {
    let mut ctx = ctx();
    let big = Value::bignum("100000000000000000000".parse::<BigDecimal>().unwrap());
    let r = binary(&mut ctx, BinOp::Add, &Value::Int(1), &big).unwrap();
    match r {
        Value::BigNum(n) => {
            assert_eq!(n.to_string(), "100000000000000000001");
        }
        other => panic!("expected BigNum, got {other:?}"),
    }
}

#[test]
fn division_by_zero_raises_before_computing() {
    let mut ctx = ctx();
    ctx.ret_val = Value::Int(99);

    let err = binary(&mut ctx, BinOp::Div, &Value::Int(5), &Value::Int(0)).unwrap_err();
    assert_eq!(err.kind, ErrorKind::DivisionByZero);
    let err = binary(&mut ctx, BinOp::Mod, &Value::Int(5), &Value::Int(0)).unwrap_err();
    assert_eq!(err.kind, ErrorKind::DivisionByZero);
    let err = binary(&mut ctx, BinOp::Div, &Value::Float(5.0), &Value::Float(0.0)).unwrap_err();
    assert_eq!(err.kind, ErrorKind::DivisionByZero);

    // A failing operator leaves the result slot alone.
    assert_eq!(expect_int(&ctx.ret_val), 99);
}

#[test]
fn integer_pow_truncates_and_negative_exponents_escape_to_float() {
    let mut ctx = ctx();
    let r = binary(&mut ctx, BinOp::Pow, &Value::Int(2), &Value::Int(10)).unwrap();
    assert_eq!(expect_int(&r), 1024);
    let r = binary(&mut ctx, BinOp::Pow, &Value::Int(2), &Value::Int(-1)).unwrap();
    assert_eq!(expect_float(&r), 0.5);
}

#[test]
fn string_plus_anything_concatenates_display_strings() {
    let mut ctx = ctx();
    let r = binary(&mut ctx, BinOp::Add, &Value::str("a"), &Value::Int(1)).unwrap();
    assert_eq!(expect_str(&r), "a1");
    let r = binary(&mut ctx, BinOp::Add, &Value::Int(1), &Value::str("a")).unwrap();
    assert_eq!(expect_str(&r), "1a");
}

#[test]
fn array_concatenation_builds_a_fresh_array() {
    let mut ctx = ctx();
    let a = Value::array(vec![Value::Int(1), Value::Int(2)]);
    let b = Value::array(vec![Value::Int(3)]);
    let joined = binary(&mut ctx, BinOp::Add, &a, &b).unwrap();
    match &joined {
        Value::Array(items) => assert_eq!(items.read().len(), 3),
        other => panic!("expected Array, got {other:?}"),
    }
    // The operands are untouched.
    match &a {
        Value::Array(items) => assert_eq!(items.read().len(), 2),
        _ => unreachable!(),
    }
}

#[test]
fn repetition_applies_to_strings_and_arrays() {
    let mut ctx = ctx();
    let r = binary(&mut ctx, BinOp::Mul, &Value::str("ab"), &Value::Int(3)).unwrap();
    assert_eq!(expect_str(&r), "ababab");
    let r = binary(&mut ctx, BinOp::Mul, &Value::Int(2), &Value::str("x")).unwrap();
    assert_eq!(expect_str(&r), "xx");
    let r = binary(
        &mut ctx,
        BinOp::Mul,
        &Value::array(vec![Value::Int(0)]),
        &Value::Int(4),
    )
    .unwrap();
    match r {
        Value::Array(items) => assert_eq!(items.read().len(), 4),
        other => panic!("expected Array, got {other:?}"),
    }
}

#[test]
fn percent_formats_strings() {
    let mut ctx = ctx();
    let args = Value::array(vec![Value::str("x"), Value::Int(3)]);
    let r = binary(&mut ctx, BinOp::Mod, &Value::str("%s = %d%%"), &args).unwrap();
    assert_eq!(expect_str(&r), "x = 3%");

    // A single non-array operand formats as a one-element list.
    let r = binary(&mut ctx, BinOp::Mod, &Value::str("id-%d"), &Value::Int(7)).unwrap();
    assert_eq!(expect_str(&r), "id-7");
}

#[test]
fn dunder_methods_back_operators_on_objects() {
    let mut ctx = ctx();
    let t = ClassBuilder::new("Meters")
        .method("__add__", |ctx, this, args| {
            let this = this.unwrap_or_default();
            let mine = this.get_member("n", ctx)?;
            let mine = ctx.must_int(&mine, "n")?;
            let other = args.first().cloned().unwrap_or(Value::Undefined);
            let theirs = other.get_member("n", ctx)?;
            let theirs = ctx.must_int(&theirs, "n")?;
            let out = ObjectValue::new(this.type_of());
            out.set_field("n", Value::Int(mine + theirs));
            Ok(Value::Object(out))
        })
        .build();
    let a = ObjectValue::new(t.clone());
    a.set_field("n", Value::Int(2));
    let b = ObjectValue::new(t);
    b.set_field("n", Value::Int(3));

    let sum = binary(
        &mut ctx,
        BinOp::Add,
        &Value::Object(a),
        &Value::Object(b),
    )
    .unwrap();
    let n = sum.get_member("n", &mut ctx).unwrap();
    assert_eq!(expect_int(&n), 5);
}

#[test]
fn unsupported_operands_report_both_types() {
    let mut ctx = ctx();
    let err = binary(&mut ctx, BinOp::Sub, &Value::Nil, &Value::Int(1)).unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeMismatch);
    assert!(err.message.contains("Nil"));
    assert!(err.message.contains("Int"));
}

#[test]
fn comparison_overrides_win_over_native_rules() {
    let mut ctx = ctx();
    // Every Wildcard claims equality with anything.
    let t = ClassBuilder::new("Wildcard")
        .method("__eq__", |_, _, _| Ok(Value::Bool(true)))
        .build();
    let wild = Value::Object(ObjectValue::new(t));
    assert!(ctx.values_equal(&wild, &Value::Int(5)).unwrap());
    assert!(ctx.values_equal(&Value::Int(5), &wild).unwrap());
}

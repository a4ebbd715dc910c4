use pretty_assertions::assert_eq;
use zinnia::{builtin, CompareResult, Context, ErrorKind, ObjectValue, Value};

fn ctx() -> Context {
    Context::new()
}

fn expect_int(value: &Value) -> i64 {
    match value {
        Value::Int(n) => *n,
        other => panic!("expected Int, got {other:?}"),
    }
}

#[test]
fn truthiness_follows_the_zero_empty_rule() {
    assert!(!Value::Undefined.is_true());
    assert!(!Value::Nil.is_true());
    assert!(!Value::Bool(false).is_true());
    assert!(!Value::Int(0).is_true());
    assert!(!Value::Float(0.0).is_true());
    assert!(!Value::str("").is_true());
    assert!(!Value::array(vec![]).is_true());
    assert!(!Value::bytes(vec![]).is_true());
    assert!(!Value::map().is_true());

    assert!(Value::Bool(true).is_true());
    assert!(Value::Int(-1).is_true());
    assert!(Value::Float(0.5).is_true());
    assert!(Value::str("x").is_true());
    assert!(Value::array(vec![Value::Nil]).is_true());
    assert!(builtin("f", |_, _, _| Ok(Value::Undefined)).is_true());
}

#[test]
fn object_truthiness_tracks_live_field_count() {
    let obj = ObjectValue::plain();
    let value = Value::Object(obj.clone());
    assert!(!value.is_true());

    obj.set_field("a", Value::Int(1));
    assert!(value.is_true());
    assert_eq!(obj.field_count(), 1);

    // Writing Undefined deletes the field.
    obj.set_field("a", Value::Undefined);
    assert_eq!(obj.field_count(), 0);
    assert!(!value.is_true());
}

#[test]
fn array_reads_support_negative_indices_and_forgive_out_of_range() {
    let mut ctx = ctx();
    let arr = Value::array(vec![Value::Int(10), Value::Int(20), Value::Int(30)]);
    assert_eq!(expect_int(&arr.get_index(0, &mut ctx).unwrap()), 10);
    assert_eq!(expect_int(&arr.get_index(-1, &mut ctx).unwrap()), 30);
    assert!(arr.get_index(3, &mut ctx).unwrap().is_undefined());
    assert!(arr.get_index(-4, &mut ctx).unwrap().is_undefined());
}

#[test]
fn array_writes_raise_on_out_of_range() {
    let mut ctx = ctx();
    let arr = Value::array(vec![Value::Int(1)]);
    arr.set_index(-1, Value::Int(2), &mut ctx).unwrap();
    assert_eq!(expect_int(&arr.get_index(0, &mut ctx).unwrap()), 2);

    let err = arr.set_index(5, Value::Int(9), &mut ctx).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Runtime);
}

#[test]
fn string_indexing_counts_runes_not_bytes() {
    let mut ctx = ctx();
    let s = Value::str("héllo");
    match s.get_index(1, &mut ctx).unwrap() {
        Value::Str(c) => assert_eq!(c.as_str(), "é"),
        other => panic!("expected Str, got {other:?}"),
    }
    match &s {
        Value::Str(sv) => assert_eq!(sv.char_len(), 5),
        _ => unreachable!(),
    }
}

#[test]
fn bytes_writes_validate_the_element_range() {
    let mut ctx = ctx();
    let b = Value::bytes(vec![1, 2, 3]);
    b.set_index(0, Value::Int(255), &mut ctx).unwrap();
    assert_eq!(expect_int(&b.get_index(0, &mut ctx).unwrap()), 255);

    let err = b.set_index(1, Value::Int(300), &mut ctx).unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeMismatch);
}

#[test]
fn numeric_comparison_crosses_int_and_float() {
    let mut ctx = ctx();
    let r = Value::Int(1)
        .compare_to(&Value::Float(1.0), &mut ctx)
        .unwrap();
    assert_eq!(r, CompareResult::EQUAL);
    assert!(ctx.value_less(&Value::Int(1), &Value::Float(1.5)).unwrap());
    assert!(ctx
        .value_less_eq(&Value::Int(2), &Value::Int(2))
        .unwrap());
    assert!(ctx
        .value_greater(&Value::Float(2.5), &Value::Int(2))
        .unwrap());
}

#[test]
fn distinct_array_handles_compare_elementwise() {
    let mut ctx = ctx();
    let a = Value::array(vec![Value::Int(1), Value::Int(2)]);
    let b = Value::array(vec![Value::Int(1), Value::Int(2)]);
    let c = Value::array(vec![Value::Int(1), Value::Int(3)]);
    assert!(ctx.values_equal(&a, &b).unwrap());
    assert!(ctx.value_less(&a, &c).unwrap());
    // Shorter prefix orders first.
    let d = Value::array(vec![Value::Int(1)]);
    assert!(ctx.value_less(&d, &a).unwrap());
}

#[test]
fn map_stores_and_deletes_by_value_key() {
    let mut ctx = ctx();
    let map = match Value::map() {
        Value::Map(m) => m,
        _ => unreachable!(),
    };
    map.set(&mut ctx, Value::str("a"), Value::Int(1)).unwrap();
    map.set(&mut ctx, Value::Int(2), Value::str("two")).unwrap();
    assert_eq!(map.len(), 2);

    let got = map.get(&mut ctx, &Value::str("a")).unwrap().unwrap();
    assert_eq!(expect_int(&got), 1);

    map.set(&mut ctx, Value::str("a"), Value::Undefined).unwrap();
    assert_eq!(map.len(), 1);
    assert!(map.get(&mut ctx, &Value::str("a")).unwrap().is_none());
}

#[test]
fn map_collision_chains_resolve_by_equality() {
    let mut ctx = ctx();
    let map = match Value::map() {
        Value::Map(m) => m,
        _ => unreachable!(),
    };
    // Two distinct objects sharing a hash method that always returns 7,
    // distinguished by an id field, land in the same bucket.
    let hash_fn = builtin("hash", |_, _, _| Ok(Value::Int(7)));
    let k1 = ObjectValue::plain();
    k1.set_field("hash", hash_fn.clone());
    k1.set_field("id", Value::Int(1));
    let k2 = ObjectValue::plain();
    k2.set_field("hash", hash_fn);
    k2.set_field("id", Value::Int(2));

    map.set(&mut ctx, Value::Object(k1.clone()), Value::str("one"))
        .unwrap();
    map.set(&mut ctx, Value::Object(k2.clone()), Value::str("two"))
        .unwrap();
    assert_eq!(map.len(), 2);

    let got = map.get(&mut ctx, &Value::Object(k2)).unwrap().unwrap();
    match got {
        Value::Str(s) => assert_eq!(s.as_str(), "two"),
        other => panic!("expected Str, got {other:?}"),
    }
}

#[test]
fn unhashable_keys_are_rejected() {
    let mut ctx = ctx();
    let map = match Value::map() {
        Value::Map(m) => m,
        _ => unreachable!(),
    };
    let err = map
        .set(&mut ctx, Value::array(vec![]), Value::Int(1))
        .unwrap_err();
    assert!(err.message.contains("not hashable"));
}

#[test]
fn display_strings_render_nested_structures() {
    let mut ctx = ctx();
    let obj = ObjectValue::plain();
    obj.set_field("n", Value::Int(3));
    let arr = Value::array(vec![Value::Int(1), Value::str("a"), Value::Object(obj)]);
    assert_eq!(arr.display_string(&mut ctx).unwrap(), "[1, a, {n: 3}]");
}

#[test]
fn str_object_display_honors_str_override() {
    let mut ctx = ctx();
    let t = zinnia::ClassBuilder::new("Point")
        .method("__str__", |_, _, _| Ok(Value::str("<point>")))
        .build();
    let obj = Value::Object(ObjectValue::new(t));
    assert_eq!(obj.display_string(&mut ctx).unwrap(), "<point>");
}

#[test]
fn reference_semantics_share_mutations_across_clones() {
    let mut ctx = ctx();
    let a = Value::array(vec![Value::Int(1)]);
    let b = a.clone();
    a.set_index(0, Value::Int(42), &mut ctx).unwrap();
    assert_eq!(expect_int(&b.get_index(0, &mut ctx).unwrap()), 42);
}

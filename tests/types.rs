use std::sync::Arc;

use pretty_assertions::assert_eq;
use zinnia::{
    builtin, types, ClassBuilder, Context, FuncValue, NodeFn, ObjectValue, TypeRef, TypeValue,
    Value,
};

fn ctx() -> Context {
    Context::new()
}

fn expect_str(value: &Value) -> String {
    match value {
        Value::Str(s) => s.as_str().to_string(),
        other => panic!("expected Str, got {other:?}"),
    }
}

/// A script-style method: a FuncValue whose body is a native node, so the
/// full binding machinery (this, super, arguments, parameters) runs.
fn method(
    name: &str,
    params: &[&str],
    owner: &TypeRef,
    body: impl Fn(&mut Context) -> zinnia::Result<()> + Send + Sync + 'static,
) -> Value {
    let f = FuncValue::new(
        name,
        params.iter().map(|p| p.to_string()).collect(),
        Arc::new(NodeFn::new(body)),
    )
    .belong_to(owner.clone());
    Value::func(f)
}

fn animal_type() -> TypeRef {
    let animal = TypeValue::new("Animal", vec![]);
    animal.set_member(
        "__init__",
        method("__init__", &["name"], &animal, |ctx| {
            let this = ctx.get_variable("this")?;
            let name = ctx.get_variable("name")?;
            // Record the tag seen while this initializer runs.
            let seen = Value::str(this.type_name());
            this.set_member("name", name, ctx)?;
            this.set_member("init_tag", seen, ctx)?;
            ctx.ret_val = Value::Undefined;
            Ok(())
        }),
    );
    animal.set_member(
        "speak",
        method("speak", &[], &animal, |ctx| {
            let this = ctx.get_variable("this")?;
            let name = this.get_member("name", ctx)?;
            ctx.ret_val = Value::str(format!("{} makes a sound", expect_str(&name)));
            Ok(())
        }),
    );
    animal
}

fn dog_type(animal: &TypeRef) -> TypeRef {
    let dog = TypeValue::new("Dog", vec![animal.clone()]);
    dog.set_member(
        "__init__",
        method("__init__", &["name"], &dog, |ctx| {
            let sup = ctx.get_variable("super")?;
            let init = sup.get_member("__init__", ctx)?;
            let name = ctx.get_variable("name")?;
            ctx.call(&init, vec![name])?;
            let this = ctx.get_variable("this")?;
            this.set_member("kind", Value::str("dog"), ctx)?;
            ctx.ret_val = Value::Undefined;
            Ok(())
        }),
    );
    dog
}

#[test]
fn instantiation_runs_init_and_tags_the_instance() {
    let mut ctx = ctx();
    let animal = animal_type();
    let instance = ctx
        .call(&Value::Type(animal.clone()), vec![Value::str("Generic")])
        .unwrap();
    assert_eq!(instance.type_name(), "Animal");
    let name = instance.get_member("name", &mut ctx).unwrap();
    assert_eq!(expect_str(&name), "Generic");
}

#[test]
fn super_chains_base_initializers_and_restores_the_tag() {
    let mut ctx = ctx();
    let animal = animal_type();
    let dog = dog_type(&animal);

    let rex = ctx
        .call(&Value::Type(dog.clone()), vec![Value::str("Rex")])
        .unwrap();

    // The base initializer ran against the instance with the base tag.
    let seen = rex.get_member("init_tag", &mut ctx).unwrap();
    assert_eq!(expect_str(&seen), "Animal");
    // After the chain the instance carries its own type again.
    assert_eq!(rex.type_name(), "Dog");

    let name = rex.get_member("name", &mut ctx).unwrap();
    assert_eq!(expect_str(&name), "Rex");
    let kind = rex.get_member("kind", &mut ctx).unwrap();
    assert_eq!(expect_str(&kind), "dog");
}

#[test]
fn inherited_methods_bind_the_real_receiver() {
    let mut ctx = ctx();
    let animal = animal_type();
    let dog = dog_type(&animal);
    let rex = ctx
        .call(&Value::Type(dog), vec![Value::str("Rex")])
        .unwrap();

    let speak = rex.get_member("speak", &mut ctx).unwrap();
    assert!(matches!(speak, Value::Bound(_)));
    let line = ctx.call(&speak, vec![]).unwrap();
    assert_eq!(expect_str(&line), "Rex makes a sound");
}

#[test]
fn diamond_resolution_is_depth_first_first_hit_wins() {
    let left = TypeValue::new("Left", vec![]);
    left.set_member("id", Value::Int(1));
    let right = TypeValue::new("Right", vec![]);
    right.set_member("id", Value::Int(2));
    let both = TypeValue::new("Both", vec![left, right]);

    assert!(matches!(both.find_member("id"), Some(Value::Int(1))));
}

#[test]
fn subtype_checks_walk_the_base_chain() {
    let animal = animal_type();
    let dog = dog_type(&animal);
    assert!(dog.is_sub_of(&animal));
    assert!(!animal.is_sub_of(&dog));
    assert!(dog.is_sub_of(&dog));
}

#[test]
fn get_attr_hook_supplies_missing_members() {
    let mut ctx = ctx();
    let t = ClassBuilder::new("Lazy")
        .method("__getAttr__", |ctx, _, args| {
            let name = ctx.must_str(args.first().unwrap_or(&Value::Undefined), "name")?;
            if name == "color" {
                Ok(Value::str("blue"))
            } else {
                Ok(Value::Undefined)
            }
        })
        .build();
    let obj = Value::Object(ObjectValue::new(t));
    let color = obj.get_member("color", &mut ctx).unwrap();
    assert_eq!(expect_str(&color), "blue");
    assert!(obj.get_member("missing", &mut ctx).unwrap().is_undefined());
}

#[test]
fn must_and_not_nil_are_available_on_every_value() {
    let mut ctx = ctx();
    let must = Value::Int(5).get_member("must", &mut ctx).unwrap();
    let five = ctx.call(&must, vec![]).unwrap();
    assert!(matches!(five, Value::Int(5)));

    let must_zero = Value::Int(0).get_member("must", &mut ctx).unwrap();
    let err = ctx
        .call(&must_zero, vec![Value::str("zero rejected")])
        .unwrap_err();
    assert_eq!(err.message, "zero rejected");

    let not_nil = Value::Nil.get_member("not_nil", &mut ctx).unwrap();
    assert!(ctx.call(&not_nil, vec![]).is_err());
}

#[test]
fn extension_members_attach_methods_to_scalar_types() {
    let mut ctx = ctx();
    ctx.register_extension(
        &types::int(),
        "double",
        builtin("double", |ctx, this, _| {
            let n = ctx.must_int(&this.unwrap_or_default(), "receiver")?;
            Ok(Value::Int(n * 2))
        }),
    );
    let double = Value::Int(21).get_member("double", &mut ctx).unwrap();
    let answer = ctx.call(&double, vec![]).unwrap();
    assert!(matches!(answer, Value::Int(42)));
}

#[test]
fn type_statics_resolve_through_bases() {
    let mut ctx = ctx();
    let animal = animal_type();
    animal.set_static("legs", Value::Int(4));
    let dog = dog_type(&animal);

    let name = Value::Type(dog.clone()).get_member("__name__", &mut ctx).unwrap();
    assert_eq!(expect_str(&name), "Dog");
    let legs = Value::Type(dog).get_member("legs", &mut ctx).unwrap();
    assert!(matches!(legs, Value::Int(4)));
}

#[test]
fn objects_with_call_member_are_callable() {
    let mut ctx = ctx();
    let t = ClassBuilder::new("Adder")
        .method("__call__", |ctx, this, args| {
            let this = this.unwrap_or_default();
            let base = this.get_member("base", ctx)?;
            let base = ctx.must_int(&base, "base")?;
            let n = ctx.must_int(args.first().unwrap_or(&Value::Undefined), "n")?;
            Ok(Value::Int(base + n))
        })
        .build();
    let adder = ObjectValue::new(t);
    adder.set_field("base", Value::Int(10));
    let adder = Value::Object(adder);
    assert!(adder.is_callable());
    let sum = ctx.call(&adder, vec![Value::Int(5)]).unwrap();
    assert!(matches!(sum, Value::Int(15)));
}

#[test]
fn native_factory_replaces_allocation() {
    let mut ctx = ctx();
    let t = TypeValue::with_factory("Token", vec![], |_, _, args| {
        Ok(args.into_iter().next().unwrap_or(Value::Nil))
    });
    let out = ctx.call(&Value::Type(t), vec![Value::Int(9)]).unwrap();
    assert!(matches!(out, Value::Int(9)));
}

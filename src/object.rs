//! The prototype type/object system: types with ordered base lists,
//! instances as shared field maps with a mutable type tag, synthesized
//! `super` views, and bound methods.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::context::Context;
use crate::diagnostics::Result;
use crate::host::HostValue;
use crate::value::{BuiltinFunction, Value};

pub type TypeRef = Arc<TypeValue>;

type Factory = Box<dyn Fn(&mut Context, &TypeRef, Vec<Value>) -> Result<Value> + Send + Sync>;

/// User type ids are allocated above the builtin range; synthesized super
/// views use the negated id of the type they view.
static NEXT_TYPE_ID: AtomicI64 = AtomicI64::new(100_000);

/// A runtime type: an identity, an ordered list of bases, a member table
/// shared by instances, and a static table owned by the type itself.
pub struct TypeValue {
    pub id: i64,
    pub name: String,
    pub bases: Vec<TypeRef>,
    members: RwLock<IndexMap<String, Value>>,
    statics: RwLock<IndexMap<String, Value>>,
    super_view: OnceLock<TypeRef>,
    factory: Option<Factory>,
}

impl TypeValue {
    pub fn new(name: impl Into<String>, bases: Vec<TypeRef>) -> TypeRef {
        let id = NEXT_TYPE_ID.fetch_add(1, Ordering::Relaxed);
        Self::with_id(id, name, bases, None)
    }

    /// A type whose invocation bypasses allocate-and-init and runs a native
    /// factory instead.
    pub fn with_factory<F>(name: impl Into<String>, bases: Vec<TypeRef>, factory: F) -> TypeRef
    where
        F: Fn(&mut Context, &TypeRef, Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    {
        let id = NEXT_TYPE_ID.fetch_add(1, Ordering::Relaxed);
        Self::with_id(id, name, bases, Some(Box::new(factory)))
    }

    pub(crate) fn builtin(id: i64, name: &str) -> TypeRef {
        Self::with_id(id, name, Vec::new(), None)
    }

    fn with_id(id: i64, name: impl Into<String>, bases: Vec<TypeRef>, factory: Option<Factory>) -> TypeRef {
        let name = name.into();
        let mut statics = IndexMap::new();
        statics.insert("__name__".to_string(), Value::str(name.clone()));
        Arc::new(Self {
            id,
            name,
            bases,
            members: RwLock::new(IndexMap::new()),
            statics: RwLock::new(statics),
            super_view: OnceLock::new(),
            factory,
        })
    }

    pub fn set_member(&self, name: impl Into<String>, value: Value) {
        self.members.write().insert(name.into(), value);
    }

    pub fn set_static(&self, name: impl Into<String>, value: Value) {
        self.statics.write().insert(name.into(), value);
    }

    /// A member defined directly on this type, ignoring bases.
    pub fn own_member(&self, name: &str) -> Option<Value> {
        self.members.read().get(name).cloned()
    }

    /// Member resolution: own table first, then bases left-to-right,
    /// depth-first. The first hit wins; there is no linearization.
    pub fn find_member(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.own_member(name) {
            return Some(v);
        }
        self.bases.iter().find_map(|base| base.find_member(name))
    }

    pub fn find_static(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.statics.read().get(name).cloned() {
            return Some(v);
        }
        self.bases.iter().find_map(|base| base.find_static(name))
    }

    pub fn is_sub_of(&self, other: &TypeValue) -> bool {
        self.id == other.id || self.bases.iter().any(|base| base.is_sub_of(other))
    }

    /// The synthesized `super` view of this type: a negative-id type whose
    /// `__init__` chains the bases' own initializers in declaration order,
    /// re-tagging the instance to each base while that base's initializer
    /// runs. The original tag is restored once the chain completes.
    pub fn super_type(this: &TypeRef) -> TypeRef {
        this.super_view
            .get_or_init(|| {
                let bases = this.bases.clone();
                let mut statics = IndexMap::new();
                let name = format!("super({})", this.name);
                statics.insert("__name__".to_string(), Value::str(name.clone()));
                let view = Arc::new(TypeValue {
                    id: -this.id,
                    name,
                    bases: this.bases.clone(),
                    members: RwLock::new(IndexMap::new()),
                    statics: RwLock::new(statics),
                    super_view: OnceLock::new(),
                    factory: None,
                });
                view.set_member(
                    "__init__",
                    Value::Builtin(Arc::new(BuiltinFunction::new(
                        "__init__",
                        Vec::new(),
                        move |ctx, this, args| {
                            let target = match &this {
                                Some(Value::Object(view)) => view.this_object(),
                                _ => {
                                    return Err(ctx.runtime_error(
                                        "super __init__ requires an object receiver",
                                    ))
                                }
                            };
                            let original = target.tag();
                            for base in &bases {
                                if let Some(init) = base.own_member("__init__") {
                                    target.set_tag(base.clone());
                                    ctx.invoke(
                                        &init,
                                        Some(Value::Object(target.clone())),
                                        args.clone(),
                                    )?;
                                }
                            }
                            target.set_tag(original);
                            Ok(Value::Undefined)
                        },
                    ))),
                );
                view
            })
            .clone()
    }

    /// Invoking a type: run its factory if registered, otherwise allocate
    /// an instance and run `__init__` when defined.
    pub fn instantiate(this: &TypeRef, ctx: &mut Context, args: Vec<Value>) -> Result<Value> {
        if let Some(factory) = &this.factory {
            return factory(ctx, this, args);
        }
        let obj = ObjectValue::new(this.clone());
        if let Some(init) = this.find_member("__init__") {
            ctx.invoke(&init, Some(Value::Object(obj.clone())), args)?;
        }
        Ok(Value::Object(obj))
    }
}

/// An instance: a shared ordered field map plus a mutable type tag. Super
/// views share the field storage of the instance they view and remember the
/// real instance through `this`.
#[derive(Clone)]
pub struct ObjectValue {
    tag: Arc<RwLock<TypeRef>>,
    fields: Arc<RwLock<IndexMap<String, Value>>>,
    reserved: Arc<RwLock<Option<HostValue>>>,
    this: Option<Arc<ObjectValue>>,
}

impl ObjectValue {
    pub fn new(tag: TypeRef) -> Self {
        Self {
            tag: Arc::new(RwLock::new(tag)),
            fields: Arc::new(RwLock::new(IndexMap::new())),
            reserved: Arc::new(RwLock::new(None)),
            this: None,
        }
    }

    /// A plain object with the root Object type.
    pub fn plain() -> Self {
        Self::new(types::object())
    }

    pub fn tag(&self) -> TypeRef {
        self.tag.read().clone()
    }

    pub fn set_tag(&self, tag: TypeRef) {
        *self.tag.write() = tag;
    }

    pub fn get_field(&self, name: &str) -> Option<Value> {
        self.fields.read().get(name).cloned()
    }

    /// Setting a field to Undefined deletes it, which keeps the field count
    /// equal to the number of defined fields.
    pub fn set_field(&self, name: &str, value: Value) {
        let mut fields = self.fields.write();
        if value.is_undefined() {
            fields.shift_remove(name);
        } else {
            fields.insert(name.to_string(), value);
        }
    }

    pub fn field_count(&self) -> usize {
        self.fields.read().len()
    }

    pub fn fields_snapshot(&self) -> Vec<(String, Value)> {
        self.fields
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn reserved(&self) -> Option<HostValue> {
        self.reserved.read().clone()
    }

    pub fn set_reserved(&self, host: HostValue) {
        *self.reserved.write() = Some(host);
    }

    /// The real instance behind this handle: super views point back at the
    /// object they were derived from.
    pub fn this_object(&self) -> ObjectValue {
        match &self.this {
            Some(real) => real.as_ref().clone(),
            None => self.clone(),
        }
    }

    /// The `super` view of this instance for the given type: shares field
    /// storage, carries the synthesized super type as its tag.
    pub fn super_of(&self, t: &TypeRef) -> ObjectValue {
        ObjectValue {
            tag: Arc::new(RwLock::new(TypeValue::super_type(t))),
            fields: self.fields.clone(),
            reserved: self.reserved.clone(),
            this: Some(Arc::new(self.this_object())),
        }
    }

    /// Identity: two handles are the same object when they share field
    /// storage.
    pub fn handle_eq(&self, other: &ObjectValue) -> bool {
        Arc::ptr_eq(&self.fields, &other.fields)
    }
}

/// A callable paired with the receiver it was looked up on.
pub struct BoundMethod {
    pub owner: Value,
    pub func: Value,
}

impl BoundMethod {
    /// Binds `func` to `owner`; re-binding a bound method rebinds its
    /// underlying callable.
    pub fn bind(owner: Value, func: Value) -> Value {
        let func = unbound(&func);
        Value::Bound(Arc::new(BoundMethod { owner, func }))
    }
}

/// Strips method binding, yielding the underlying callable.
pub fn unbound(value: &Value) -> Value {
    match value {
        Value::Bound(b) => b.func.clone(),
        other => other.clone(),
    }
}

/// Fluent construction of native-backed classes.
pub struct ClassBuilder {
    name: String,
    bases: Vec<TypeRef>,
    members: Vec<(String, Value)>,
    statics: Vec<(String, Value)>,
}

impl ClassBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bases: Vec::new(),
            members: Vec::new(),
            statics: Vec::new(),
        }
    }

    pub fn base(mut self, t: TypeRef) -> Self {
        self.bases.push(t);
        self
    }

    pub fn constructor<F>(self, f: F) -> Self
    where
        F: Fn(&mut Context, Option<Value>, Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    {
        self.method("__init__", f)
    }

    pub fn method<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&mut Context, Option<Value>, Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    {
        self.members.push((
            name.to_string(),
            Value::Builtin(Arc::new(BuiltinFunction::new(name, Vec::new(), f))),
        ));
        self
    }

    pub fn static_value(mut self, name: &str, value: Value) -> Self {
        self.statics.push((name.to_string(), value));
        self
    }

    pub fn build(self) -> TypeRef {
        let t = TypeValue::new(self.name, self.bases);
        for (name, value) in self.members {
            t.set_member(name, value);
        }
        for (name, value) in self.statics {
            t.set_static(name, value);
        }
        t
    }
}

/// The builtin types. Ids are fixed and well below the user-type range.
pub mod types {
    use std::sync::LazyLock;

    use super::{TypeRef, TypeValue};
    use crate::members;

    pub const TYPE_ID_TYPE: i64 = 1;
    pub const TYPE_ID_UNDEFINED: i64 = 2;
    pub const TYPE_ID_NIL: i64 = 3;
    pub const TYPE_ID_BOOL: i64 = 4;
    pub const TYPE_ID_INT: i64 = 5;
    pub const TYPE_ID_FLOAT: i64 = 6;
    pub const TYPE_ID_BIGNUM: i64 = 7;
    pub const TYPE_ID_STR: i64 = 8;
    pub const TYPE_ID_BYTES: i64 = 9;
    pub const TYPE_ID_ARRAY: i64 = 10;
    pub const TYPE_ID_MAP: i64 = 11;
    pub const TYPE_ID_OBJECT: i64 = 12;
    pub const TYPE_ID_FUNC: i64 = 13;
    pub const TYPE_ID_HOST: i64 = 14;

    macro_rules! builtin_type {
        ($fn_name:ident, $static_name:ident, $id:expr, $name:expr, $install:path) => {
            static $static_name: LazyLock<TypeRef> = LazyLock::new(|| {
                let t = TypeValue::builtin($id, $name);
                $install(&t);
                t
            });

            pub fn $fn_name() -> TypeRef {
                $static_name.clone()
            }
        };
        ($fn_name:ident, $static_name:ident, $id:expr, $name:expr) => {
            static $static_name: LazyLock<TypeRef> =
                LazyLock::new(|| TypeValue::builtin($id, $name));

            pub fn $fn_name() -> TypeRef {
                $static_name.clone()
            }
        };
    }

    builtin_type!(type_type, TYPE, TYPE_ID_TYPE, "Type");
    builtin_type!(undefined, UNDEFINED, TYPE_ID_UNDEFINED, "Undefined");
    builtin_type!(nil, NIL, TYPE_ID_NIL, "Nil");
    builtin_type!(bool_type, BOOL, TYPE_ID_BOOL, "Bool");
    builtin_type!(int, INT, TYPE_ID_INT, "Int", members::install_int);
    builtin_type!(float, FLOAT, TYPE_ID_FLOAT, "Float", members::install_float);
    builtin_type!(bignum, BIGNUM, TYPE_ID_BIGNUM, "BigNum");
    builtin_type!(str_type, STR, TYPE_ID_STR, "Str", members::install_str);
    builtin_type!(bytes, BYTES, TYPE_ID_BYTES, "Bytes", members::install_bytes);
    builtin_type!(array, ARRAY, TYPE_ID_ARRAY, "Array", members::install_array);
    builtin_type!(map, MAP, TYPE_ID_MAP, "Map", members::install_map);
    builtin_type!(object, OBJECT, TYPE_ID_OBJECT, "Object", members::install_object);
    builtin_type!(func, FUNC, TYPE_ID_FUNC, "Func");
    builtin_type!(host, HOST, TYPE_ID_HOST, "Host");
}

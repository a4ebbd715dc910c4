//! Bridging host (Rust) data in and out of the value model.
//!
//! Values the runtime has no native shape for travel as [`HostValue`]: an
//! opaque, shareable `Any` with a type-name tag. Everything with a natural
//! mapping converts through [`IntoValue`] and [`FromValue`]: numeric kinds
//! to Int/Float, byte vectors to Bytes, other vectors to Array, string maps
//! to Object.

use std::any::Any;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::context::Context;
use crate::diagnostics::{ErrorKind, Result};
use crate::object::ObjectValue;
use crate::value::{builtin, Value};

/// An opaque host object carried by `Value::Host`. Cloning shares the
/// underlying data.
#[derive(Clone)]
pub struct HostValue {
    type_name: Arc<str>,
    inner: Arc<dyn Any + Send + Sync>,
}

impl HostValue {
    pub fn new<T: Any + Send + Sync>(type_name: &str, value: T) -> Self {
        Self {
            type_name: type_name.into(),
            inner: Arc::new(value),
        }
    }

    pub fn from_arc<T: Any + Send + Sync>(type_name: &str, value: Arc<T>) -> Self {
        Self {
            type_name: type_name.into(),
            inner: value,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.inner.clone().downcast::<T>().ok()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }
}

/// Wraps a Rust closure as a script-callable value that ignores any bound
/// receiver.
pub fn host_fn<F>(name: &str, f: F) -> Value
where
    F: Fn(&mut Context, Vec<Value>) -> Result<Value> + Send + Sync + 'static,
{
    builtin(name, move |ctx, _this, args| f(ctx, args))
}

/// Host data with a natural script shape.
pub trait IntoValue {
    fn into_value(self) -> Value;
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

impl IntoValue for bool {
    fn into_value(self) -> Value {
        Value::Bool(self)
    }
}

impl IntoValue for i32 {
    fn into_value(self) -> Value {
        Value::Int(self as i64)
    }
}

impl IntoValue for i64 {
    fn into_value(self) -> Value {
        Value::Int(self)
    }
}

impl IntoValue for u32 {
    fn into_value(self) -> Value {
        Value::Int(self as i64)
    }
}

impl IntoValue for f32 {
    fn into_value(self) -> Value {
        Value::Float(self as f64)
    }
}

impl IntoValue for f64 {
    fn into_value(self) -> Value {
        Value::Float(self)
    }
}

impl IntoValue for &str {
    fn into_value(self) -> Value {
        Value::str(self)
    }
}

impl IntoValue for String {
    fn into_value(self) -> Value {
        Value::str(self)
    }
}

/// Byte buffers convert to Bytes, not to an Array of Ints; the newtype
/// keeps that conversion apart from the generic `Vec<T>` one.
pub struct HostBytes(pub Vec<u8>);

impl IntoValue for HostBytes {
    fn into_value(self) -> Value {
        Value::bytes(self.0)
    }
}

impl<T: IntoValue> IntoValue for Vec<T> {
    fn into_value(self) -> Value {
        Value::array(self.into_iter().map(IntoValue::into_value).collect())
    }
}

impl<T: IntoValue> IntoValue for Option<T> {
    fn into_value(self) -> Value {
        match self {
            Some(v) => v.into_value(),
            None => Value::Nil,
        }
    }
}

impl<T: IntoValue> IntoValue for IndexMap<String, T> {
    fn into_value(self) -> Value {
        let obj = ObjectValue::plain();
        for (name, value) in self {
            obj.set_field(&name, value.into_value());
        }
        Value::Object(obj)
    }
}

/// Script data with a natural host shape.
pub trait FromValue: Sized {
    fn from_value(ctx: &Context, value: &Value) -> Result<Self>;
}

fn mismatch(ctx: &Context, expected: &str, value: &Value) -> crate::diagnostics::RuntimeError {
    ctx.error(
        ErrorKind::TypeMismatch,
        format!("expected {expected}, got {}", value.type_name()),
    )
}

impl FromValue for Value {
    fn from_value(_ctx: &Context, value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

impl FromValue for bool {
    fn from_value(ctx: &Context, value: &Value) -> Result<Self> {
        match value {
            Value::Bool(b) => Ok(*b),
            other => Err(mismatch(ctx, "Bool", other)),
        }
    }
}

impl FromValue for i64 {
    fn from_value(ctx: &Context, value: &Value) -> Result<Self> {
        match value {
            Value::Int(n) => Ok(*n),
            other => Err(mismatch(ctx, "Int", other)),
        }
    }
}

impl FromValue for f64 {
    fn from_value(ctx: &Context, value: &Value) -> Result<Self> {
        match value {
            Value::Int(n) => Ok(*n as f64),
            Value::Float(x) => Ok(*x),
            other => Err(mismatch(ctx, "Float", other)),
        }
    }
}

impl FromValue for String {
    fn from_value(ctx: &Context, value: &Value) -> Result<Self> {
        match value {
            Value::Str(s) => Ok(s.as_str().to_string()),
            other => Err(mismatch(ctx, "Str", other)),
        }
    }
}

impl FromValue for HostBytes {
    fn from_value(ctx: &Context, value: &Value) -> Result<Self> {
        match value {
            Value::Bytes(b) => Ok(HostBytes(b.read().clone())),
            Value::Str(s) => Ok(HostBytes(s.as_str().as_bytes().to_vec())),
            other => Err(mismatch(ctx, "Bytes", other)),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(ctx: &Context, value: &Value) -> Result<Self> {
        match value {
            Value::Array(a) => {
                let items = a.read().clone();
                items
                    .iter()
                    .map(|item| T::from_value(ctx, item))
                    .collect()
            }
            other => Err(mismatch(ctx, "Array", other)),
        }
    }
}

impl<T: FromValue> FromValue for IndexMap<String, T> {
    fn from_value(ctx: &Context, value: &Value) -> Result<Self> {
        match value {
            Value::Object(obj) => {
                let mut out = IndexMap::new();
                for (name, field) in obj.fields_snapshot() {
                    out.insert(name, T::from_value(ctx, &field)?);
                }
                Ok(out)
            }
            other => Err(mismatch(ctx, "Object", other)),
        }
    }
}

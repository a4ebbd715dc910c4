//! Member dispatch and the native method tables for builtin types.
//!
//! Resolution order for `value.member`:
//! object fields, then the type's member table (bases left-to-right,
//! depth-first), then the `__getAttr__` hook, then the common members every
//! value carries (`must`, `not_nil`), then the extension registry keyed by
//! `(type_id, name)`. Callable non-Object results are bound to the
//! receiver.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::context::Context;
use crate::diagnostics::{ErrorKind, Result};
use crate::object::{types, BoundMethod, ObjectValue, TypeRef};
use crate::task;
use crate::value::{builtin, MapValue, StrValue, Value};

/// Full member lookup; Undefined when nothing matches.
pub fn lookup(ctx: &mut Context, owner: &Value, name: &str) -> Result<Value> {
    match owner {
        Value::Bound(b) => {
            let inner = b.func.clone();
            lookup(ctx, &inner, name)
        }
        Value::Object(obj) => {
            if let Some(v) = obj.get_field(name) {
                return Ok(v);
            }
            let tag = obj.tag();
            if let Some(v) = tag.find_member(name) {
                return Ok(bind(owner, v));
            }
            if let Some(hook) = tag.find_member("__getAttr__") {
                let got = ctx.call_with(&hook, Some(owner.clone()), vec![Value::str(name)])?;
                if !got.is_undefined() {
                    return Ok(got);
                }
            }
            tail_lookup(ctx, owner, tag.id, name)
        }
        Value::Type(t) => {
            if let Some(v) = t.find_static(name) {
                return Ok(bind(owner, v));
            }
            if let Some(hook) = t.find_static("__getAttr__") {
                let got = ctx.call_with(&hook, Some(owner.clone()), vec![Value::str(name)])?;
                if !got.is_undefined() {
                    return Ok(got);
                }
            }
            // Methods reached through the type are deliberately unbound so
            // they can be applied to an explicit receiver.
            if let Some(v) = t.find_member(name) {
                return Ok(v);
            }
            tail_lookup(ctx, owner, types::TYPE_ID_TYPE, name)
        }
        other => {
            let t = other.type_of();
            if let Some(v) = t.find_member(name) {
                return Ok(bind(owner, v));
            }
            tail_lookup(ctx, owner, t.id, name)
        }
    }
}

fn tail_lookup(ctx: &mut Context, owner: &Value, type_id: i64, name: &str) -> Result<Value> {
    if let Some(v) = common_member(name) {
        return Ok(bind(owner, v));
    }
    if let Some(v) = ctx.extension_member(type_id, name) {
        return Ok(bind(owner, v));
    }
    Ok(Value::Undefined)
}

fn bind(owner: &Value, found: Value) -> Value {
    if found.is_callable() && !matches!(found, Value::Object(_)) {
        BoundMethod::bind(owner.clone(), found)
    } else {
        found
    }
}

/// Members available on every value.
fn common_member(name: &str) -> Option<Value> {
    match name {
        "must" => Some(builtin("must", |ctx, this, args| {
            let this = this.unwrap_or_default();
            if this.is_true() {
                Ok(this)
            } else {
                let message = match args.first() {
                    Some(m) => m.display_string(ctx)?,
                    None => format!("assertion failed on {}", this.display_string(ctx)?),
                };
                Err(ctx.runtime_error(message))
            }
        })),
        "not_nil" => Some(builtin("not_nil", |ctx, this, args| {
            let this = this.unwrap_or_default();
            if this.is_nil() || this.is_undefined() {
                let message = match args.first() {
                    Some(m) => m.display_string(ctx)?,
                    None => "unexpected nil value".to_string(),
                };
                Err(ctx.runtime_error(message))
            } else {
                Ok(this)
            }
        })),
        _ => None,
    }
}

fn opt_arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or(Value::Undefined)
}

fn recv_str(ctx: &Context, this: &Option<Value>) -> Result<Arc<StrValue>> {
    match this {
        Some(Value::Str(s)) => Ok(s.clone()),
        _ => Err(ctx.error(ErrorKind::TypeMismatch, "receiver must be a Str")),
    }
}

fn recv_array(ctx: &Context, this: &Option<Value>) -> Result<Arc<RwLock<Vec<Value>>>> {
    match this {
        Some(Value::Array(a)) => Ok(a.clone()),
        _ => Err(ctx.error(ErrorKind::TypeMismatch, "receiver must be an Array")),
    }
}

fn recv_map(ctx: &Context, this: &Option<Value>) -> Result<MapValue> {
    match this {
        Some(Value::Map(m)) => Ok(m.clone()),
        _ => Err(ctx.error(ErrorKind::TypeMismatch, "receiver must be a Map")),
    }
}

fn recv_object(ctx: &Context, this: &Option<Value>) -> Result<ObjectValue> {
    match this {
        Some(Value::Object(o)) => Ok(o.clone()),
        _ => Err(ctx.error(ErrorKind::TypeMismatch, "receiver must be an Object")),
    }
}

pub(crate) fn install_int(t: &TypeRef) {
    t.set_member(
        "abs",
        builtin("abs", |ctx, this, _| match this {
            Some(Value::Int(n)) => Ok(Value::Int(n.wrapping_abs())),
            _ => Err(ctx.error(ErrorKind::TypeMismatch, "receiver must be an Int")),
        }),
    );
    t.set_member(
        "to_float",
        builtin("to_float", |ctx, this, _| match this {
            Some(Value::Int(n)) => Ok(Value::Float(n as f64)),
            _ => Err(ctx.error(ErrorKind::TypeMismatch, "receiver must be an Int")),
        }),
    );
    t.set_member(
        "to_str",
        builtin("to_str", |ctx, this, _| match this {
            Some(Value::Int(n)) => Ok(Value::str(n.to_string())),
            _ => Err(ctx.error(ErrorKind::TypeMismatch, "receiver must be an Int")),
        }),
    );
}

pub(crate) fn install_float(t: &TypeRef) {
    t.set_member(
        "floor",
        builtin("floor", |ctx, this, _| match this {
            Some(Value::Float(x)) => Ok(Value::Float(x.floor())),
            _ => Err(ctx.error(ErrorKind::TypeMismatch, "receiver must be a Float")),
        }),
    );
    t.set_member(
        "ceil",
        builtin("ceil", |ctx, this, _| match this {
            Some(Value::Float(x)) => Ok(Value::Float(x.ceil())),
            _ => Err(ctx.error(ErrorKind::TypeMismatch, "receiver must be a Float")),
        }),
    );
    t.set_member(
        "to_int",
        builtin("to_int", |ctx, this, _| match this {
            Some(Value::Float(x)) => Ok(Value::Int(x.trunc() as i64)),
            _ => Err(ctx.error(ErrorKind::TypeMismatch, "receiver must be a Float")),
        }),
    );
}

pub(crate) fn install_str(t: &TypeRef) {
    t.set_member(
        "len",
        builtin("len", |ctx, this, _| {
            Ok(Value::Int(recv_str(ctx, &this)?.char_len() as i64))
        }),
    );
    t.set_member(
        "upper",
        builtin("upper", |ctx, this, _| {
            Ok(Value::str(recv_str(ctx, &this)?.as_str().to_uppercase()))
        }),
    );
    t.set_member(
        "lower",
        builtin("lower", |ctx, this, _| {
            Ok(Value::str(recv_str(ctx, &this)?.as_str().to_lowercase()))
        }),
    );
    t.set_member(
        "trim",
        builtin("trim", |ctx, this, _| {
            Ok(Value::str(recv_str(ctx, &this)?.as_str().trim()))
        }),
    );
    t.set_member(
        "split",
        builtin("split", |ctx, this, args| {
            let s = recv_str(ctx, &this)?;
            let sep = ctx.must_str(&opt_arg(&args, 0), "separator")?;
            let parts = s
                .as_str()
                .split(sep.as_str())
                .map(Value::str)
                .collect::<Vec<_>>();
            Ok(Value::array(parts))
        }),
    );
    t.set_member(
        "contains",
        builtin("contains", |ctx, this, args| {
            let s = recv_str(ctx, &this)?;
            let needle = ctx.must_str(&opt_arg(&args, 0), "substring")?;
            Ok(Value::Bool(s.as_str().contains(needle.as_str())))
        }),
    );
    t.set_member(
        "chars",
        builtin("chars", |ctx, this, _| {
            let s = recv_str(ctx, &this)?;
            let chars = s
                .runes()
                .iter()
                .map(|c| Value::str(c.to_string()))
                .collect::<Vec<_>>();
            Ok(Value::array(chars))
        }),
    );
    t.set_member(
        "to_int",
        builtin("to_int", |ctx, this, _| {
            let s = recv_str(ctx, &this)?;
            s.as_str()
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| ctx.runtime_error(format!("cannot parse {:?} as Int", s.as_str())))
        }),
    );
    t.set_member(
        "to_bytes",
        builtin("to_bytes", |ctx, this, _| {
            Ok(Value::bytes(recv_str(ctx, &this)?.as_str().as_bytes().to_vec()))
        }),
    );
}

pub(crate) fn install_bytes(t: &TypeRef) {
    t.set_member(
        "len",
        builtin("len", |ctx, this, _| match this {
            Some(Value::Bytes(b)) => Ok(Value::Int(b.read().len() as i64)),
            _ => Err(ctx.error(ErrorKind::TypeMismatch, "receiver must be Bytes")),
        }),
    );
    t.set_member(
        "to_str",
        builtin("to_str", |ctx, this, _| match this {
            Some(Value::Bytes(b)) => {
                let bytes = b.read().clone();
                String::from_utf8(bytes)
                    .map(Value::str)
                    .map_err(|_| ctx.runtime_error("bytes are not valid UTF-8"))
            }
            _ => Err(ctx.error(ErrorKind::TypeMismatch, "receiver must be Bytes")),
        }),
    );
}

pub(crate) fn install_array(t: &TypeRef) {
    t.set_member(
        "len",
        builtin("len", |ctx, this, _| {
            Ok(Value::Int(recv_array(ctx, &this)?.read().len() as i64))
        }),
    );
    t.set_member(
        "push",
        builtin("push", |ctx, this, args| {
            let a = recv_array(ctx, &this)?;
            for arg in args {
                a.write().push(arg);
            }
            Ok(this.unwrap_or_default())
        }),
    );
    t.set_member(
        "pop",
        builtin("pop", |ctx, this, _| {
            let a = recv_array(ctx, &this)?;
            let popped = a.write().pop();
            Ok(popped.unwrap_or(Value::Undefined))
        }),
    );
    t.set_member(
        "each",
        builtin("each", |ctx, this, args| {
            let a = recv_array(ctx, &this)?;
            let callback = ctx.must_callable(&opt_arg(&args, 0), "callback")?;
            let items = a.read().clone();
            for (i, item) in items.into_iter().enumerate() {
                ctx.call(&callback, vec![item, Value::Int(i as i64)])?;
            }
            Ok(Value::Undefined)
        }),
    );
    t.set_member(
        "map",
        builtin("map", |ctx, this, args| {
            let a = recv_array(ctx, &this)?;
            let callback = ctx.must_callable(&opt_arg(&args, 0), "callback")?;
            let items = a.read().clone();
            let mut mapped = Vec::with_capacity(items.len());
            for (i, item) in items.into_iter().enumerate() {
                mapped.push(ctx.call(&callback, vec![item, Value::Int(i as i64)])?);
            }
            Ok(Value::array(mapped))
        }),
    );
    t.set_member(
        "filter",
        builtin("filter", |ctx, this, args| {
            let a = recv_array(ctx, &this)?;
            let callback = ctx.must_callable(&opt_arg(&args, 0), "callback")?;
            let items = a.read().clone();
            let mut kept = Vec::new();
            for (i, item) in items.into_iter().enumerate() {
                if ctx
                    .call(&callback, vec![item.clone(), Value::Int(i as i64)])?
                    .is_true()
                {
                    kept.push(item);
                }
            }
            Ok(Value::array(kept))
        }),
    );
    t.set_member(
        "join",
        builtin("join", |ctx, this, args| {
            let a = recv_array(ctx, &this)?;
            let sep = match opt_arg(&args, 0) {
                Value::Undefined => String::new(),
                other => ctx.must_str(&other, "separator")?,
            };
            let items = a.read().clone();
            let mut parts = Vec::with_capacity(items.len());
            for item in &items {
                parts.push(item.display_string(ctx)?);
            }
            Ok(Value::str(parts.join(&sep)))
        }),
    );
    t.set_member(
        "slice",
        builtin("slice", |ctx, this, args| {
            let a = recv_array(ctx, &this)?;
            let items = a.read().clone();
            let len = items.len() as i64;
            let mut start = ctx.must_int(&opt_arg(&args, 0), "start")?;
            let mut end = match opt_arg(&args, 1) {
                Value::Undefined => len,
                other => ctx.must_int(&other, "end")?,
            };
            if start < 0 {
                start += len;
            }
            if end < 0 {
                end += len;
            }
            let start = start.clamp(0, len) as usize;
            let end = end.clamp(0, len) as usize;
            let slice = if start < end {
                items[start..end].to_vec()
            } else {
                Vec::new()
            };
            Ok(Value::array(slice))
        }),
    );
}

pub(crate) fn install_map(t: &TypeRef) {
    t.set_member(
        "load",
        builtin("load", |ctx, this, args| {
            let m = recv_map(ctx, &this)?;
            let key = opt_arg(&args, 0);
            Ok(m.get(ctx, &key)?.unwrap_or(Value::Undefined))
        }),
    );
    t.set_member(
        "store",
        builtin("store", |ctx, this, args| {
            let m = recv_map(ctx, &this)?;
            m.set(ctx, opt_arg(&args, 0), opt_arg(&args, 1))?;
            Ok(Value::Undefined)
        }),
    );
    t.set_member(
        "len",
        builtin("len", |ctx, this, _| {
            Ok(Value::Int(recv_map(ctx, &this)?.len() as i64))
        }),
    );
    t.set_member(
        "keys",
        builtin("keys", |ctx, this, _| {
            let m = recv_map(ctx, &this)?;
            Ok(Value::array(m.entries().into_iter().map(|(k, _)| k).collect()))
        }),
    );
    t.set_member(
        "values",
        builtin("values", |ctx, this, _| {
            let m = recv_map(ctx, &this)?;
            Ok(Value::array(m.entries().into_iter().map(|(_, v)| v).collect()))
        }),
    );
    t.set_member(
        "each",
        builtin("each", |ctx, this, args| {
            let m = recv_map(ctx, &this)?;
            let callback = ctx.must_callable(&opt_arg(&args, 0), "callback")?;
            for (k, v) in m.entries() {
                ctx.call(&callback, vec![k, v])?;
            }
            Ok(Value::Undefined)
        }),
    );
}

pub(crate) fn install_object(t: &TypeRef) {
    t.set_member(
        "keys",
        builtin("keys", |ctx, this, _| {
            let o = recv_object(ctx, &this)?;
            let keys = o
                .fields_snapshot()
                .into_iter()
                .map(|(k, _)| Value::str(k))
                .collect();
            Ok(Value::array(keys))
        }),
    );
    t.set_member(
        "values",
        builtin("values", |ctx, this, _| {
            let o = recv_object(ctx, &this)?;
            let values = o.fields_snapshot().into_iter().map(|(_, v)| v).collect();
            Ok(Value::array(values))
        }),
    );
    t.set_member(
        "pairs",
        builtin("pairs", |ctx, this, _| {
            let o = recv_object(ctx, &this)?;
            let pairs = o
                .fields_snapshot()
                .into_iter()
                .map(|(k, v)| Value::array(vec![Value::str(k), v]))
                .collect();
            Ok(Value::array(pairs))
        }),
    );
    t.set_member(
        "each",
        builtin("each", |ctx, this, args| {
            let o = recv_object(ctx, &this)?;
            let callback = ctx.must_callable(&opt_arg(&args, 0), "callback")?;
            for (k, v) in o.fields_snapshot() {
                ctx.call(&callback, vec![Value::str(k), v])?;
            }
            Ok(Value::Undefined)
        }),
    );
}

/// The fixed builtins table every context starts with.
pub fn default_builtins() -> IndexMap<String, Value> {
    let mut table = IndexMap::new();
    table.insert(
        "print".to_string(),
        builtin("print", |ctx, _, args| {
            let mut parts = Vec::with_capacity(args.len());
            for arg in &args {
                parts.push(arg.display_string(ctx)?);
            }
            ctx.write_stdout(&parts.join(" "))?;
            Ok(Value::Undefined)
        }),
    );
    table.insert(
        "println".to_string(),
        builtin("println", |ctx, _, args| {
            let mut parts = Vec::with_capacity(args.len());
            for arg in &args {
                parts.push(arg.display_string(ctx)?);
            }
            ctx.write_stdout(&format!("{}\n", parts.join(" ")))?;
            Ok(Value::Undefined)
        }),
    );
    table.insert(
        "len".to_string(),
        builtin("len", |ctx, _, args| {
            let v = opt_arg(&args, 0);
            let len = match &v {
                Value::Str(s) => s.char_len(),
                Value::Bytes(b) => b.read().len(),
                Value::Array(a) => a.read().len(),
                Value::Map(m) => m.len(),
                Value::Object(o) => o.field_count(),
                other => {
                    return Err(ctx.error(
                        ErrorKind::TypeMismatch,
                        format!("{} has no length", other.type_name()),
                    ))
                }
            };
            Ok(Value::Int(len as i64))
        }),
    );
    table.insert(
        "type".to_string(),
        builtin("type", |_, _, args| {
            Ok(Value::Type(opt_arg(&args, 0).type_of()))
        }),
    );
    table.insert(
        "str".to_string(),
        builtin("str", |ctx, _, args| {
            Ok(Value::str(opt_arg(&args, 0).display_string(ctx)?))
        }),
    );
    table.insert(
        "int".to_string(),
        builtin("int", |ctx, _, args| match opt_arg(&args, 0) {
            Value::Int(n) => Ok(Value::Int(n)),
            Value::Float(x) => Ok(Value::Int(x.trunc() as i64)),
            Value::Bool(b) => Ok(Value::Int(b as i64)),
            Value::Str(s) => s
                .as_str()
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| ctx.runtime_error(format!("cannot parse {:?} as Int", s.as_str()))),
            other => Err(ctx.error(
                ErrorKind::TypeMismatch,
                format!("cannot convert {} to Int", other.type_name()),
            )),
        }),
    );
    table.insert(
        "float".to_string(),
        builtin("float", |ctx, _, args| match opt_arg(&args, 0) {
            Value::Int(n) => Ok(Value::Float(n as f64)),
            Value::Float(x) => Ok(Value::Float(x)),
            Value::Str(s) => s
                .as_str()
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| ctx.runtime_error(format!("cannot parse {:?} as Float", s.as_str()))),
            other => Err(ctx.error(
                ErrorKind::TypeMismatch,
                format!("cannot convert {} to Float", other.type_name()),
            )),
        }),
    );
    table.insert(
        "bool".to_string(),
        builtin("bool", |_, _, args| Ok(Value::Bool(opt_arg(&args, 0).is_true()))),
    );
    table.insert(
        "range".to_string(),
        builtin("range", |ctx, _, args| {
            let n = ctx.must_int(&opt_arg(&args, 0), "count")?;
            Ok(Value::array((0..n.max(0)).map(Value::Int).collect()))
        }),
    );
    table.insert(
        "spawn".to_string(),
        builtin("spawn", |ctx, _, mut args| {
            if args.is_empty() {
                return Err(ctx.runtime_error("spawn requires a callable argument"));
            }
            let callee = args.remove(0);
            task::spawn(ctx, callee, None, args)
        }),
    );
    table.insert(
        "channel".to_string(),
        builtin("channel", |ctx, _, args| {
            let capacity = match opt_arg(&args, 0) {
                Value::Undefined => 0,
                other => ctx.must_int(&other, "capacity")?,
            };
            task::make_channel(capacity.max(0) as usize)
        }),
    );
    table.insert(
        "eval".to_string(),
        builtin("eval", |ctx, _, args| {
            let code = ctx.must_str(&opt_arg(&args, 0), "code")?;
            ctx.eval(&code, false)
        }),
    );
    table
}

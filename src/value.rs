//! The runtime value model: a closed set of variants with a shared
//! capability surface (type identity, truthiness, member and index access,
//! comparison, hashing for map keys).
//!
//! Array, Object, Map, and Bytes values have reference semantics: cloning a
//! `Value` clones an `Arc` handle, and mutation through any handle is seen
//! by all of them.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use bigdecimal::BigDecimal;
use bigdecimal::Zero;
use bitflags::bitflags;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHasher};

use crate::context::{Context, FuncEnv};
use crate::diagnostics::{ErrorKind, Result};
use crate::host::HostValue;
use crate::members;
use crate::node::Eval;
use crate::object::{types, BoundMethod, ObjectValue, TypeRef};

bitflags! {
    /// Result of comparing two values. Flags may be OR-ed so that a
    /// relational test is a containment check: `<=` holds when the result
    /// intersects `LESS | EQUAL`. The empty set means "not equal and not
    /// ordered".
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CompareResult: u8 {
        const EQUAL = 1;
        const LESS = 2;
        const GREATER = 4;
    }
}

impl CompareResult {
    pub const NOT_EQUAL: CompareResult = CompareResult::empty();

    pub fn is_equal(self) -> bool {
        self.contains(CompareResult::EQUAL)
    }

    pub fn is_ordered(self) -> bool {
        !self.is_empty()
    }
}

/// A string value caches both the host string and its rune (char) slice so
/// that indexing and length are O(1) in characters, not bytes.
#[derive(Debug)]
pub struct StrValue {
    text: String,
    runes: Vec<char>,
}

impl StrValue {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let runes = text.chars().collect();
        Self { text, runes }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn runes(&self) -> &[char] {
        &self.runes
    }

    pub fn char_len(&self) -> usize {
        self.runes.len()
    }
}

/// A hash map keyed by arbitrary hashable values: buckets by hash code,
/// collision chains resolved by value equality.
#[derive(Clone, Default)]
pub struct MapValue {
    buckets: Arc<RwLock<FxHashMap<i64, Vec<(Value, Value)>>>>,
}

impl MapValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, ctx: &mut Context, key: &Value) -> Result<Option<Value>> {
        let hash = key.hash_key(ctx)?;
        // Snapshot the chain before comparing: key equality may run user
        // code, which must not happen under the bucket lock.
        let chain = self.buckets.read().get(&hash).cloned();
        if let Some(chain) = chain {
            for (k, v) in &chain {
                if ctx.values_equal(key, k)? {
                    return Ok(Some(v.clone()));
                }
            }
        }
        Ok(None)
    }

    /// Stores `value` under `key`; storing Undefined removes the entry.
    pub fn set(&self, ctx: &mut Context, key: Value, value: Value) -> Result<()> {
        let hash = key.hash_key(ctx)?;
        let chain = self.buckets.read().get(&hash).cloned();
        let mut found = None;
        if let Some(chain) = &chain {
            for (i, (k, _)) in chain.iter().enumerate() {
                if ctx.values_equal(&key, k)? {
                    found = Some(i);
                    break;
                }
            }
        }
        let is_delete = value.is_undefined();
        let mut buckets = self.buckets.write();
        match (found, is_delete) {
            (Some(i), true) => {
                if let Some(chain) = buckets.get_mut(&hash) {
                    if i < chain.len() {
                        chain.remove(i);
                        if chain.is_empty() {
                            buckets.remove(&hash);
                        }
                    }
                }
            }
            (Some(i), false) => {
                if let Some(chain) = buckets.get_mut(&hash) {
                    if let Some(entry) = chain.get_mut(i) {
                        entry.1 = value;
                    }
                }
            }
            (None, false) => buckets.entry(hash).or_default().push((key, value)),
            (None, true) => {}
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buckets.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A point-in-time copy of all entries, safe to iterate while user
    /// callbacks mutate the map.
    pub fn entries(&self) -> Vec<(Value, Value)> {
        self.buckets
            .read()
            .values()
            .flat_map(|chain| chain.iter().cloned())
            .collect()
    }

    pub fn handle_eq(&self, other: &MapValue) -> bool {
        Arc::ptr_eq(&self.buckets, &other.buckets)
    }
}

/// A script-defined function: parameter list, body node, optional owning
/// type (enables `super` inside methods), and the captured frame chain when
/// the function is a closure.
#[derive(Clone)]
pub struct FuncValue {
    pub name: String,
    pub params: Vec<String>,
    /// When set, surplus arguments are collected into the last parameter.
    pub expand_last: bool,
    pub body: Arc<dyn Eval>,
    pub belong_type: Option<TypeRef>,
    pub env: Option<FuncEnv>,
}

impl FuncValue {
    pub fn new(name: impl Into<String>, params: Vec<String>, body: Arc<dyn Eval>) -> Self {
        Self {
            name: name.into(),
            params,
            expand_last: false,
            body,
            belong_type: None,
            env: None,
        }
    }

    pub fn expand_last(mut self) -> Self {
        self.expand_last = true;
        self
    }

    pub fn belong_to(mut self, t: TypeRef) -> Self {
        self.belong_type = Some(t);
        self
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            "<anonymous>"
        } else {
            &self.name
        }
    }
}

type BuiltinBody = Box<dyn Fn(&mut Context, Option<Value>, Vec<Value>) -> Result<Value> + Send + Sync>;

/// A native function exposed to scripts. The callback receives the context,
/// the bound receiver when invoked as a method, and the argument values.
pub struct BuiltinFunction {
    pub name: String,
    pub arg_names: Vec<String>,
    body: BuiltinBody,
}

impl BuiltinFunction {
    pub fn new<F>(name: impl Into<String>, arg_names: Vec<String>, body: F) -> Self
    where
        F: Fn(&mut Context, Option<Value>, Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            arg_names,
            body: Box::new(body),
        }
    }

    pub fn call(&self, ctx: &mut Context, this: Option<Value>, args: Vec<Value>) -> Result<Value> {
        (self.body)(ctx, this, args)
    }
}

/// Wraps a Rust closure as a script-callable value.
pub fn builtin<F>(name: &str, f: F) -> Value
where
    F: Fn(&mut Context, Option<Value>, Vec<Value>) -> Result<Value> + Send + Sync + 'static,
{
    Value::Builtin(Arc::new(BuiltinFunction::new(name, Vec::new(), f)))
}

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    BigNum(Arc<BigDecimal>),
    Str(Arc<StrValue>),
    Bytes(Arc<RwLock<Vec<u8>>>),
    Array(Arc<RwLock<Vec<Value>>>),
    Object(ObjectValue),
    Map(MapValue),
    Func(Arc<FuncValue>),
    Builtin(Arc<BuiltinFunction>),
    Type(TypeRef),
    Bound(Arc<BoundMethod>),
    Host(HostValue),
}

impl Value {
    pub fn bool(value: bool) -> Self {
        Value::Bool(value)
    }

    pub fn int(value: i64) -> Self {
        Value::Int(value)
    }

    pub fn float(value: f64) -> Self {
        Value::Float(value)
    }

    pub fn bignum(value: BigDecimal) -> Self {
        Value::BigNum(Arc::new(value))
    }

    pub fn str(value: impl Into<String>) -> Self {
        Value::Str(Arc::new(StrValue::new(value)))
    }

    pub fn bytes(value: Vec<u8>) -> Self {
        Value::Bytes(Arc::new(RwLock::new(value)))
    }

    pub fn array(values: Vec<Value>) -> Self {
        Value::Array(Arc::new(RwLock::new(values)))
    }

    pub fn map() -> Self {
        Value::Map(MapValue::new())
    }

    pub fn object(obj: ObjectValue) -> Self {
        Value::Object(obj)
    }

    pub fn func(f: FuncValue) -> Self {
        Value::Func(Arc::new(f))
    }

    pub fn host(h: HostValue) -> Self {
        Value::Host(h)
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// The runtime type of this value.
    pub fn type_of(&self) -> TypeRef {
        match self {
            Value::Undefined => types::undefined(),
            Value::Nil => types::nil(),
            Value::Bool(_) => types::bool_type(),
            Value::Int(_) => types::int(),
            Value::Float(_) => types::float(),
            Value::BigNum(_) => types::bignum(),
            Value::Str(_) => types::str_type(),
            Value::Bytes(_) => types::bytes(),
            Value::Array(_) => types::array(),
            Value::Object(obj) => obj.tag(),
            Value::Map(_) => types::map(),
            Value::Func(_) | Value::Builtin(_) | Value::Bound(_) => types::func(),
            Value::Type(_) => types::type_type(),
            Value::Host(_) => types::host(),
        }
    }

    pub fn type_name(&self) -> String {
        self.type_of().name.clone()
    }

    /// Truthiness: false, nil, undefined, zero numbers, and empty
    /// strings/collections are false; everything else is true.
    pub fn is_true(&self) -> bool {
        match self {
            Value::Undefined | Value::Nil => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::BigNum(n) => !n.is_zero(),
            Value::Str(s) => s.char_len() > 0,
            Value::Bytes(b) => !b.read().is_empty(),
            Value::Array(a) => !a.read().is_empty(),
            Value::Object(obj) => obj.field_count() > 0,
            Value::Map(m) => !m.is_empty(),
            Value::Func(_)
            | Value::Builtin(_)
            | Value::Type(_)
            | Value::Bound(_)
            | Value::Host(_) => true,
        }
    }

    /// True when invoking this value can succeed: functions, bound methods,
    /// types, and objects whose type defines `__call__`.
    pub fn is_callable(&self) -> bool {
        match self {
            Value::Func(_) | Value::Builtin(_) | Value::Bound(_) | Value::Type(_) => true,
            Value::Object(obj) => obj.tag().find_member("__call__").is_some(),
            _ => false,
        }
    }

    /// Member lookup through the full dispatch chain; yields Undefined when
    /// nothing matches. Callable non-Object results come back bound to the
    /// receiver.
    pub fn get_member(&self, name: &str, ctx: &mut Context) -> Result<Value> {
        members::lookup(ctx, self, name)
    }

    /// Member assignment. Only objects (fields) and types (statics) accept
    /// writes; assigning Undefined to an object field deletes it.
    pub fn set_member(&self, name: &str, value: Value, ctx: &mut Context) -> Result<()> {
        match self {
            Value::Object(obj) => {
                obj.set_field(name, value);
                Ok(())
            }
            Value::Type(t) => {
                t.set_static(name, value);
                Ok(())
            }
            _ => Err(ctx.error(
                ErrorKind::TypeMismatch,
                format!("cannot set member {name} on {}", self.type_name()),
            )),
        }
    }

    /// Integer indexing with negative-from-end. Out-of-range reads yield
    /// Undefined rather than raising.
    pub fn get_index(&self, index: i64, _ctx: &mut Context) -> Result<Value> {
        match self {
            Value::Array(a) => {
                let items = a.read();
                Ok(match resolve_index(index, items.len()) {
                    Some(i) => items[i].clone(),
                    None => Value::Undefined,
                })
            }
            Value::Str(s) => Ok(match resolve_index(index, s.char_len()) {
                Some(i) => Value::str(s.runes()[i].to_string()),
                None => Value::Undefined,
            }),
            Value::Bytes(b) => {
                let bytes = b.read();
                Ok(match resolve_index(index, bytes.len()) {
                    Some(i) => Value::Int(bytes[i] as i64),
                    None => Value::Undefined,
                })
            }
            _ => Ok(Value::Undefined),
        }
    }

    /// Indexed assignment. Unlike reads, out-of-range writes raise.
    pub fn set_index(&self, index: i64, value: Value, ctx: &mut Context) -> Result<()> {
        match self {
            Value::Array(a) => {
                let mut items = a.write();
                let len = items.len();
                match resolve_index(index, len) {
                    Some(i) => {
                        items[i] = value;
                        Ok(())
                    }
                    None => Err(ctx.runtime_error(format!(
                        "array index {index} out of range (length {len})"
                    ))),
                }
            }
            Value::Bytes(b) => {
                let byte = match value {
                    Value::Int(n) if (0..=255).contains(&n) => n as u8,
                    other => {
                        return Err(ctx.error(
                            ErrorKind::TypeMismatch,
                            format!("bytes element must be an Int in 0..256, got {}", other.type_name()),
                        ))
                    }
                };
                let mut bytes = b.write();
                let len = bytes.len();
                match resolve_index(index, len) {
                    Some(i) => {
                        bytes[i] = byte;
                        Ok(())
                    }
                    None => Err(ctx.runtime_error(format!(
                        "bytes index {index} out of range (length {len})"
                    ))),
                }
            }
            _ => Err(ctx.error(
                ErrorKind::TypeMismatch,
                format!("cannot assign by index on {}", self.type_name()),
            )),
        }
    }

    /// Native pairwise comparison. User overrides (`__eq__`, `__lt__`,
    /// `__gt__`) are tried by the context-level helpers before this.
    pub fn compare_to(&self, other: &Value, ctx: &mut Context) -> Result<CompareResult> {
        use CompareResult as R;
        Ok(match (self, other) {
            (Value::Undefined, Value::Undefined) => R::EQUAL,
            (Value::Nil, Value::Nil) => R::EQUAL,
            (Value::Bool(a), Value::Bool(b)) => flag_eq(a == b),
            (Value::Int(a), Value::Int(b)) => ord_flags(a.cmp(b)),
            (Value::Int(a), Value::Float(b)) => float_flags(*a as f64, *b),
            (Value::Float(a), Value::Int(b)) => float_flags(*a, *b as f64),
            (Value::Float(a), Value::Float(b)) => float_flags(*a, *b),
            (Value::BigNum(a), Value::BigNum(b)) => ord_flags(a.as_ref().cmp(b.as_ref())),
            (Value::BigNum(a), Value::Int(b)) => ord_flags(a.as_ref().cmp(&BigDecimal::from(*b))),
            (Value::Int(a), Value::BigNum(b)) => ord_flags(BigDecimal::from(*a).cmp(b.as_ref())),
            (Value::BigNum(a), Value::Float(b)) => match BigDecimal::try_from(*b) {
                Ok(b) => ord_flags(a.as_ref().cmp(&b)),
                Err(_) => R::NOT_EQUAL,
            },
            (Value::Float(a), Value::BigNum(b)) => match BigDecimal::try_from(*a) {
                Ok(a) => ord_flags(a.cmp(b.as_ref())),
                Err(_) => R::NOT_EQUAL,
            },
            (Value::Str(a), Value::Str(b)) => ord_flags(a.as_str().cmp(b.as_str())),
            (Value::Bytes(a), Value::Bytes(b)) => {
                let (a, b) = (a.read().clone(), b.read().clone());
                ord_flags(a.cmp(&b))
            }
            (Value::Array(a), Value::Array(b)) => {
                if Arc::ptr_eq(a, b) {
                    return Ok(R::EQUAL);
                }
                let (xs, ys) = (a.read().clone(), b.read().clone());
                for (x, y) in xs.iter().zip(ys.iter()) {
                    let r = ctx.values_compare(x, y)?;
                    if r != R::EQUAL {
                        return Ok(r);
                    }
                }
                ord_flags(xs.len().cmp(&ys.len()))
            }
            (Value::Object(a), Value::Object(b)) => {
                if a.handle_eq(b) {
                    return Ok(R::EQUAL);
                }
                let fields = a.fields_snapshot();
                if fields.len() != b.field_count() {
                    return Ok(R::NOT_EQUAL);
                }
                for (name, va) in fields {
                    match b.get_field(&name) {
                        Some(vb) if ctx.values_equal(&va, &vb)? => {}
                        _ => return Ok(R::NOT_EQUAL),
                    }
                }
                R::EQUAL
            }
            (Value::Map(a), Value::Map(b)) => flag_eq(a.handle_eq(b)),
            (Value::Type(a), Value::Type(b)) => flag_eq(a.id == b.id),
            (Value::Func(a), Value::Func(b)) => flag_eq(Arc::ptr_eq(a, b)),
            (Value::Builtin(a), Value::Builtin(b)) => flag_eq(Arc::ptr_eq(a, b)),
            _ => R::NOT_EQUAL,
        })
    }

    /// Hash code for use as a map key. Int, Bool, Float, Str, Bytes, and
    /// Type hash natively; other values may supply a `hash` method.
    pub fn hash_key(&self, ctx: &mut Context) -> Result<i64> {
        match self {
            Value::Int(n) => Ok(*n),
            Value::Bool(b) => Ok(*b as i64),
            Value::Float(f) => Ok(f.to_bits() as i64),
            Value::Str(s) => Ok(fx_hash(s.as_str().as_bytes())),
            Value::Bytes(b) => Ok(fx_hash(&b.read())),
            Value::Type(t) => Ok(t.id),
            _ => {
                let hasher = self.get_member("hash", ctx)?;
                if hasher.is_callable() {
                    match ctx.call(&hasher, Vec::new())? {
                        Value::Int(n) => Ok(n),
                        other => Err(ctx.runtime_error(format!(
                            "hash method returned a non-integer {}",
                            other.type_name()
                        ))),
                    }
                } else {
                    Err(ctx.runtime_error(format!(
                        "key of type {} is not hashable",
                        self.type_name()
                    )))
                }
            }
        }
    }

    /// The user-visible string form, honoring an object's `__str__`.
    pub fn display_string(&self, ctx: &mut Context) -> Result<String> {
        match self {
            Value::Object(obj) => {
                let str_fn = self.get_member("__str__", ctx)?;
                if str_fn.is_callable() {
                    let rendered = ctx.call(&str_fn, Vec::new())?;
                    return rendered.display_string(ctx);
                }
                let mut out = String::from("{");
                for (i, (name, value)) in obj.fields_snapshot().into_iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&name);
                    out.push_str(": ");
                    out.push_str(&value.display_string(ctx)?);
                }
                out.push('}');
                Ok(out)
            }
            Value::Array(a) => {
                let items = a.read().clone();
                let mut out = String::from("[");
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&item.display_string(ctx)?);
                }
                out.push(']');
                Ok(out)
            }
            Value::Map(m) => {
                let mut out = String::from("{");
                for (i, (k, v)) in m.entries().into_iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&k.display_string(ctx)?);
                    out.push_str(": ");
                    out.push_str(&v.display_string(ctx)?);
                }
                out.push('}');
                Ok(out)
            }
            Value::Bound(b) => b.func.display_string(ctx),
            other => Ok(other.to_string()),
        }
    }
}

fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let i = if index < 0 { len + index } else { index };
    if (0..len).contains(&i) {
        Some(i as usize)
    } else {
        None
    }
}

fn flag_eq(eq: bool) -> CompareResult {
    if eq {
        CompareResult::EQUAL
    } else {
        CompareResult::NOT_EQUAL
    }
}

fn ord_flags(ord: std::cmp::Ordering) -> CompareResult {
    match ord {
        std::cmp::Ordering::Less => CompareResult::LESS,
        std::cmp::Ordering::Equal => CompareResult::EQUAL,
        std::cmp::Ordering::Greater => CompareResult::GREATER,
    }
}

fn float_flags(a: f64, b: f64) -> CompareResult {
    match a.partial_cmp(&b) {
        Some(ord) => ord_flags(ord),
        None => CompareResult::NOT_EQUAL,
    }
}

fn fx_hash(bytes: &[u8]) -> i64 {
    let mut hasher = FxHasher::default();
    bytes.hash(&mut hasher);
    hasher.finish() as i64
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::BigNum(n) => write!(f, "{}", n.normalized()),
            Value::Str(s) => write!(f, "{}", s.as_str()),
            Value::Bytes(b) => write!(f, "{}", String::from_utf8_lossy(&b.read())),
            Value::Array(a) => {
                let items = a.read().clone();
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Object(obj) => {
                write!(f, "{{")?;
                for (i, (name, value)) in obj.fields_snapshot().into_iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {value}")?;
                }
                write!(f, "}}")
            }
            Value::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.entries().into_iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            Value::Func(func) => write!(f, "<func {}>", func.display_name()),
            Value::Builtin(func) => write!(f, "<builtin {}>", func.name),
            Value::Type(t) => write!(f, "<type {}>", t.name),
            Value::Bound(b) => write!(f, "{}", b.func),
            Value::Host(h) => write!(f, "<host {}>", h.type_name()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{:?}", s.as_str()),
            other => write!(f, "{other}"),
        }
    }
}

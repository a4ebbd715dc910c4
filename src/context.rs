//! The execution context: the frame chain with deferred calls, control-flow
//! flags, variable resolution, invocation, error raising with stack capture,
//! and the module/eval service.
//!
//! A `Context` is the per-call-stack state of one running script. Frames
//! link child to parent only; popping a frame runs its deferred calls in
//! LIFO order. Shared services (the module cache, the extension-member
//! registry, the builtins table, and the I/O streams) live behind `Arc`
//! handles so cloned contexts for spawned tasks see the same instances.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::diagnostics::{ErrorKind, Result, RuntimeError, StackEntry};
use crate::members;
use crate::object::{types, ObjectValue, TypeRef, TypeValue};
use crate::value::{CompareResult, FuncValue, Value};

/// A deferred call registered with `defer`; runs when its frame is popped.
#[derive(Clone)]
pub struct DeferCall {
    pub callee: Value,
    pub args: Vec<Value>,
    /// A required defer that turns out not to be callable raises; an
    /// optional one is skipped.
    pub required: bool,
}

/// One lexical scope. Frames are immutable except for their variable
/// table, position, and defer stack, all behind their own locks, so a
/// captured chain can be shared between closures.
pub struct Frame {
    parent: Option<Arc<Frame>>,
    level: usize,
    func_level: usize,
    loop_level: usize,
    func_name: String,
    position: RwLock<(String, u32)>,
    variables: RwLock<IndexMap<String, Value>>,
    defers: Mutex<Vec<DeferCall>>,
}

impl Frame {
    fn root() -> Arc<Frame> {
        Arc::new(Frame {
            parent: None,
            level: 0,
            func_level: 0,
            loop_level: 0,
            func_name: "<main>".to_string(),
            position: RwLock::new((String::new(), 0)),
            variables: RwLock::new(IndexMap::new()),
            defers: Mutex::new(Vec::new()),
        })
    }

    fn child(self: &Arc<Frame>, func_name: Option<&str>, loop_frame: bool) -> Arc<Frame> {
        let position = self.position.read().clone();
        Arc::new(Frame {
            parent: Some(self.clone()),
            level: self.level + 1,
            func_level: self.func_level + usize::from(func_name.is_some()),
            loop_level: self.loop_level + usize::from(loop_frame),
            func_name: func_name
                .map(str::to_string)
                .unwrap_or_else(|| self.func_name.clone()),
            position: RwLock::new(position),
            variables: RwLock::new(IndexMap::new()),
            defers: Mutex::new(Vec::new()),
        })
    }
}

/// The frame chain captured by a closure at its definition site.
#[derive(Clone)]
pub struct FuncEnv {
    pub cur: Arc<Frame>,
    pub func_root: Arc<Frame>,
    pub root: Arc<Frame>,
}

/// What an import request should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    /// Compile and evaluate as a module; the result is its export object.
    Script,
    Text,
    Bytes,
    Csv,
    Json,
}

/// The host-installed import resolver. Receives the context, the module
/// path (empty for inline eval), the inline source (empty for file
/// imports), the requested kind, and the modification time of the cached
/// copy (0 when none). Returns the loaded value and its modification time,
/// or `None` when the module cannot be found (the cached copy, if any, is
/// then reused).
pub type ImportFn =
    dyn Fn(&mut Context, &str, &str, ImportKind, i64) -> Result<Option<(Value, i64)>> + Send + Sync;

struct ModuleEntry {
    value: Value,
    mod_time: i64,
}

/// A typed argument rule for native functions.
pub struct Param<'a> {
    pub name: &'a str,
    pub ty: Option<TypeRef>,
    pub required: bool,
    pub default: Value,
}

impl<'a> Param<'a> {
    pub fn required(name: &'a str, ty: Option<TypeRef>) -> Self {
        Self {
            name,
            ty,
            required: true,
            default: Value::Undefined,
        }
    }

    pub fn optional(name: &'a str, ty: Option<TypeRef>, default: Value) -> Self {
        Self {
            name,
            ty,
            required: false,
            default,
        }
    }
}

pub struct Context {
    root: Arc<Frame>,
    func_root: Arc<Frame>,
    cur: Arc<Frame>,
    /// Result slot: every evaluation and invocation leaves its value here.
    pub ret_val: Value,
    pub breaking: bool,
    pub break_label: Option<String>,
    pub continuing: bool,
    pub continue_label: Option<String>,
    pub returned: bool,
    builtins: Arc<IndexMap<String, Value>>,
    local: ObjectValue,
    /// Module evaluation writes its exports here.
    pub export: ObjectValue,
    modules: Arc<DashMap<String, ModuleEntry>>,
    extensions: Arc<DashMap<(i64, String), Value>>,
    stdout: Arc<Mutex<Box<dyn Write + Send>>>,
    stderr: Arc<Mutex<Box<dyn Write + Send>>>,
    pub can_eval: bool,
    pub is_debug: bool,
    import_fn: Option<Arc<ImportFn>>,
    import_paths: Vec<PathBuf>,
    pub args: Vec<String>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        let root = Frame::root();
        let import_paths: Vec<PathBuf> = std::env::var("ZINNIA_PATH")
            .map(|raw| {
                raw.split(':')
                    .filter(|p| !p.is_empty())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default();
        let can_eval = matches!(
            std::env::var("ZINNIA_EVAL").as_deref(),
            Ok("1") | Ok("true")
        );
        debug!(paths = import_paths.len(), can_eval, "new context");
        Self {
            func_root: root.clone(),
            cur: root.clone(),
            root,
            ret_val: Value::Undefined,
            breaking: false,
            break_label: None,
            continuing: false,
            continue_label: None,
            returned: false,
            builtins: Arc::new(members::default_builtins()),
            local: ObjectValue::plain(),
            export: ObjectValue::plain(),
            modules: Arc::new(DashMap::new()),
            extensions: Arc::new(DashMap::new()),
            stdout: Arc::new(Mutex::new(Box::new(std::io::stdout()))),
            stderr: Arc::new(Mutex::new(Box::new(std::io::stderr()))),
            can_eval,
            is_debug: false,
            import_fn: None,
            import_paths,
            args: Vec::new(),
        }
    }

    /// A fresh context sharing this one's services: same builtins, module
    /// cache, extension registry, streams, and resolver, but its own frame
    /// chain and flags. This is what a spawned task runs on.
    pub fn clone_for_task(&self) -> Context {
        let root = Frame::root();
        debug!("cloned context for task");
        Context {
            func_root: root.clone(),
            cur: root.clone(),
            root,
            ret_val: Value::Undefined,
            breaking: false,
            break_label: None,
            continuing: false,
            continue_label: None,
            returned: false,
            builtins: self.builtins.clone(),
            local: ObjectValue::plain(),
            export: ObjectValue::plain(),
            modules: self.modules.clone(),
            extensions: self.extensions.clone(),
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
            can_eval: self.can_eval,
            is_debug: self.is_debug,
            import_fn: self.import_fn.clone(),
            import_paths: self.import_paths.clone(),
            args: self.args.clone(),
        }
    }

    /// Clears frames, flags, and scratch state while keeping the shared
    /// services installed.
    pub fn reset(&mut self) {
        let root = Frame::root();
        self.func_root = root.clone();
        self.cur = root.clone();
        self.root = root;
        self.ret_val = Value::Undefined;
        self.breaking = false;
        self.break_label = None;
        self.continuing = false;
        self.continue_label = None;
        self.returned = false;
        self.local = ObjectValue::plain();
        self.export = ObjectValue::plain();
    }

    // ---- streams ----

    pub fn set_stdout(&mut self, w: impl Write + Send + 'static) {
        self.stdout = Arc::new(Mutex::new(Box::new(w)));
    }

    pub fn set_stderr(&mut self, w: impl Write + Send + 'static) {
        self.stderr = Arc::new(Mutex::new(Box::new(w)));
    }

    pub fn write_stdout(&self, text: &str) -> Result<()> {
        let mut out = self.stdout.lock();
        out.write_all(text.as_bytes())?;
        out.flush()?;
        Ok(())
    }

    pub fn write_stderr(&self, text: &str) -> Result<()> {
        let mut out = self.stderr.lock();
        out.write_all(text.as_bytes())?;
        out.flush()?;
        Ok(())
    }

    // ---- frames ----

    pub fn push_frame(&mut self) {
        self.cur = self.cur.child(None, false);
    }

    pub fn push_loop_frame(&mut self) {
        self.cur = self.cur.child(None, true);
    }

    /// Pushes a function-boundary frame. An empty name pushes a plain
    /// block frame instead (anonymous immediate blocks).
    pub fn push_func_frame(&mut self, name: &str) {
        if name.is_empty() {
            self.push_frame();
            return;
        }
        let child = self.cur.child(Some(name), false);
        self.func_root = child.clone();
        self.cur = child;
    }

    /// Pops the current frame: runs its deferred calls (LIFO), then steps
    /// to the parent. Crossing a function boundary clears the `returned`
    /// flag and recomputes the function root.
    pub fn pop_frame(&mut self) -> Result<()> {
        let frame = self.cur.clone();
        let defer_result = self.run_defers(&frame);
        let parent = match &frame.parent {
            Some(p) => p.clone(),
            None => {
                return Err(RuntimeError::new(
                    ErrorKind::StackUnderflow,
                    "popped the root frame",
                ))
            }
        };
        self.cur = parent.clone();
        if frame.func_level != parent.func_level {
            self.returned = false;
            let mut fr = parent;
            loop {
                match &fr.parent {
                    Some(p) if p.func_level == fr.func_level => fr = p.clone(),
                    _ => break,
                }
            }
            self.func_root = fr;
        }
        defer_result
    }

    fn run_defers(&mut self, frame: &Arc<Frame>) -> Result<()> {
        let calls: Vec<DeferCall> = {
            let mut defers = frame.defers.lock();
            defers.drain(..).collect()
        };
        if calls.is_empty() {
            return Ok(());
        }
        // Defers must not clobber the value the frame produced.
        let saved = std::mem::take(&mut self.ret_val);
        let mut result = Ok(());
        for call in calls.into_iter().rev() {
            match self.invoke(&call.callee, None, call.args) {
                Ok(true) => {}
                Ok(false) => {
                    if call.required {
                        result = Err(self.runtime_error("deferred value is not callable"));
                        break;
                    }
                }
                Err(err) => {
                    result = Err(err);
                    break;
                }
            }
        }
        self.ret_val = saved;
        result
    }

    /// Registers a deferred call on the current function's root frame, so
    /// it runs when the function returns.
    pub fn add_defer(&mut self, callee: Value, args: Vec<Value>, required: bool) {
        self.func_root.defers.lock().push(DeferCall {
            callee,
            args,
            required,
        });
    }

    /// Registers a deferred call on the current block frame.
    pub fn add_block_defer(&mut self, callee: Value, args: Vec<Value>, required: bool) {
        self.cur.defers.lock().push(DeferCall {
            callee,
            args,
            required,
        });
    }

    pub fn frame_depth(&self) -> usize {
        self.cur.level
    }

    pub fn loop_level(&self) -> usize {
        self.cur.loop_level
    }

    pub fn current_function(&self) -> String {
        self.cur.func_name.clone()
    }

    pub fn set_position(&self, file: &str, line: u32) {
        *self.cur.position.write() = (file.to_string(), line);
    }

    pub fn capture_env(&self) -> FuncEnv {
        FuncEnv {
            cur: self.cur.clone(),
            func_root: self.func_root.clone(),
            root: self.root.clone(),
        }
    }

    /// A copy of `f` carrying the current frame chain, making it a closure
    /// over this definition site.
    pub fn capture_closure(&self, f: &FuncValue) -> Value {
        let mut f = f.clone();
        f.env = Some(self.capture_env());
        Value::func(f)
    }

    // ---- variables ----

    /// Resolves a name: frames innermost-out, then builtins, then the
    /// pseudo-variables. `_` never resolves; `local` names the per-context
    /// scratch object unless a real binding shadows it.
    pub fn find_value(&self, name: &str) -> Option<Value> {
        if name == "_" {
            return None;
        }
        let mut frame: &Arc<Frame> = &self.cur;
        loop {
            if let Some(v) = frame.variables.read().get(name) {
                return Some(v.clone());
            }
            match &frame.parent {
                Some(p) => frame = p,
                None => break,
            }
        }
        if let Some(v) = self.builtins.get(name) {
            return Some(v.clone());
        }
        if name == "local" {
            return Some(Value::Object(self.local.clone()));
        }
        None
    }

    pub fn get_variable(&self, name: &str) -> Result<Value> {
        self.find_value(name)
            .ok_or_else(|| self.runtime_error(format!("undefined variable {name}")))
    }

    /// Defines a name in the current frame. Redefinition is an error;
    /// the `_` sink silently discards.
    pub fn set_local(&mut self, name: &str, value: Value) -> Result<()> {
        if name == "_" {
            return Ok(());
        }
        let mut vars = self.cur.variables.write();
        if vars.contains_key(name) {
            return Err(self.runtime_error(format!("variable {name} redefined")));
        }
        vars.insert(name.to_string(), value);
        Ok(())
    }

    /// Defines or overwrites a name in the current frame. Used for the
    /// implicit bindings (`this`, `super`, parameters).
    pub fn force_set_local(&mut self, name: &str, value: Value) {
        if name == "_" {
            return;
        }
        self.cur
            .variables
            .write()
            .insert(name.to_string(), value);
    }

    /// Assigns to the nearest existing binding; absent names are an error.
    pub fn modify_value(&mut self, name: &str, value: Value) -> Result<()> {
        if name == "_" {
            return Ok(());
        }
        let mut frame: &Arc<Frame> = &self.cur;
        loop {
            {
                let mut vars = frame.variables.write();
                if vars.contains_key(name) {
                    vars.insert(name.to_string(), value);
                    return Ok(());
                }
            }
            match &frame.parent {
                Some(p) => frame = p,
                None => break,
            }
        }
        Err(self.runtime_error(format!("variable {name} not exists")))
    }

    // ---- errors ----

    pub fn error(&self, kind: ErrorKind, message: impl Into<String>) -> RuntimeError {
        RuntimeError::new(kind, message).with_stack(self.capture_stack())
    }

    pub fn runtime_error(&self, message: impl Into<String>) -> RuntimeError {
        self.error(ErrorKind::Runtime, message)
    }

    /// One entry per function-boundary frame, innermost first.
    fn capture_stack(&self) -> Vec<StackEntry> {
        let mut entries = Vec::new();
        let mut frame: &Arc<Frame> = &self.cur;
        loop {
            let (file, line) = frame.position.read().clone();
            entries.push(StackEntry {
                file,
                line,
                function: frame.func_name.clone(),
            });
            let func_level = frame.func_level;
            let mut next = frame.parent.as_ref();
            while let Some(p) = next {
                if p.func_level == func_level {
                    next = p.parent.as_ref();
                } else {
                    break;
                }
            }
            match next {
                Some(p) => frame = p,
                None => break,
            }
        }
        entries
    }

    /// Writes the message and trace to the error stream. In debug mode the
    /// error is re-raised after reporting.
    pub fn report_error(&mut self, err: &RuntimeError) -> Result<()> {
        self.write_stderr(&err.message_with_stack())?;
        if self.is_debug {
            return Err(err.clone());
        }
        Ok(())
    }

    // ---- argument helpers ----

    pub fn must_int(&self, v: &Value, what: &str) -> Result<i64> {
        match v {
            Value::Int(n) => Ok(*n),
            other => Err(self.error(
                ErrorKind::TypeMismatch,
                format!("{what} must be an Int, got {}", other.type_name()),
            )),
        }
    }

    pub fn must_float(&self, v: &Value, what: &str) -> Result<f64> {
        match v {
            Value::Int(n) => Ok(*n as f64),
            Value::Float(x) => Ok(*x),
            other => Err(self.error(
                ErrorKind::TypeMismatch,
                format!("{what} must be a Float, got {}", other.type_name()),
            )),
        }
    }

    pub fn must_str(&self, v: &Value, what: &str) -> Result<String> {
        match v {
            Value::Str(s) => Ok(s.as_str().to_string()),
            other => Err(self.error(
                ErrorKind::TypeMismatch,
                format!("{what} must be a Str, got {}", other.type_name()),
            )),
        }
    }

    pub fn must_bool(&self, v: &Value, what: &str) -> Result<bool> {
        match v {
            Value::Bool(b) => Ok(*b),
            other => Err(self.error(
                ErrorKind::TypeMismatch,
                format!("{what} must be a Bool, got {}", other.type_name()),
            )),
        }
    }

    pub fn must_object(&self, v: &Value, what: &str) -> Result<ObjectValue> {
        match v {
            Value::Object(o) => Ok(o.clone()),
            other => Err(self.error(
                ErrorKind::TypeMismatch,
                format!("{what} must be an Object, got {}", other.type_name()),
            )),
        }
    }

    pub fn must_callable(&self, v: &Value, what: &str) -> Result<Value> {
        if v.is_callable() {
            Ok(v.clone())
        } else {
            Err(self.error(
                ErrorKind::TypeMismatch,
                format!("{what} must be callable, got {}", v.type_name()),
            ))
        }
    }

    /// Validates `args` against a rule table, filling defaults for missing
    /// optional parameters. Returns one value per rule.
    pub fn check_args(&self, func: &str, args: &[Value], params: &[Param]) -> Result<Vec<Value>> {
        if args.len() > params.len() {
            return Err(self.runtime_error(format!(
                "{func} takes at most {} arguments, got {}",
                params.len(),
                args.len()
            )));
        }
        let mut out = Vec::with_capacity(params.len());
        for (i, rule) in params.iter().enumerate() {
            let arg = args.get(i).cloned();
            let value = match arg {
                Some(v) if !v.is_undefined() => v,
                _ if rule.required => {
                    return Err(self.runtime_error(format!(
                        "{func} missing required argument {}",
                        rule.name
                    )))
                }
                _ => rule.default.clone(),
            };
            if let Some(ty) = &rule.ty {
                let actual = value.type_of();
                let int_to_float = ty.id == types::TYPE_ID_FLOAT && matches!(value, Value::Int(_));
                if !actual.is_sub_of(ty) && !int_to_float {
                    return Err(self.error(
                        ErrorKind::TypeMismatch,
                        format!(
                            "{func} argument {} must be {}, got {}",
                            rule.name, ty.name, actual.name
                        ),
                    ));
                }
            }
            out.push(value);
        }
        Ok(out)
    }

    // ---- invocation ----

    /// Invokes a callable, leaving the result in `ret_val`. Returns false
    /// (without touching `ret_val`) when the value is not callable.
    pub fn invoke(&mut self, callee: &Value, this: Option<Value>, args: Vec<Value>) -> Result<bool> {
        match callee {
            Value::Builtin(f) => {
                let f = f.clone();
                let result = f.call(self, this, args)?;
                self.ret_val = result;
                Ok(true)
            }
            Value::Func(f) => {
                let f = f.clone();
                self.invoke_func(&f, this, args)?;
                Ok(true)
            }
            Value::Bound(b) => {
                let (owner, func) = (b.owner.clone(), b.func.clone());
                self.invoke(&func, Some(owner), args)
            }
            Value::Type(t) => {
                let t = t.clone();
                let instance = TypeValue::instantiate(&t, self, args)?;
                self.ret_val = instance;
                Ok(true)
            }
            Value::Object(obj) => match obj.tag().find_member("__call__") {
                Some(f) => self.invoke(&f, Some(callee.clone()), args),
                None => Ok(false),
            },
            _ => Ok(false),
        }
    }

    /// Like `invoke`, but an uncallable callee is an error and the result
    /// comes back directly.
    pub fn call_with(
        &mut self,
        callee: &Value,
        this: Option<Value>,
        args: Vec<Value>,
    ) -> Result<Value> {
        if self.invoke(callee, this, args)? {
            Ok(self.ret_val.clone())
        } else {
            Err(self.error(
                ErrorKind::TypeMismatch,
                format!("{} is not callable", callee.type_name()),
            ))
        }
    }

    pub fn call(&mut self, callee: &Value, args: Vec<Value>) -> Result<Value> {
        self.call_with(callee, None, args)
    }

    pub fn call_method(&mut self, owner: &Value, name: &str, args: Vec<Value>) -> Result<Value> {
        let method = owner.get_member(name, self)?;
        if !method.is_callable() {
            return Err(self.runtime_error(format!(
                "{} has no callable member {name}",
                owner.type_name()
            )));
        }
        self.call(&method, args)
    }

    fn invoke_func(&mut self, f: &Arc<FuncValue>, this: Option<Value>, args: Vec<Value>) -> Result<()> {
        // Closures evaluate on their captured chain; the live chain is
        // restored afterwards no matter how the body exits.
        let saved = f.env.as_ref().map(|env| {
            let prev = (self.cur.clone(), self.func_root.clone(), self.root.clone());
            self.cur = env.cur.clone();
            self.func_root = env.func_root.clone();
            self.root = env.root.clone();
            prev
        });
        self.push_func_frame(f.display_name());
        let body_result = self.bind_and_eval(f, this, args);
        let pop_result = self.pop_frame();
        if let Some((cur, func_root, root)) = saved {
            self.cur = cur;
            self.func_root = func_root;
            self.root = root;
        }
        body_result?;
        pop_result
    }

    fn bind_and_eval(&mut self, f: &Arc<FuncValue>, this: Option<Value>, mut args: Vec<Value>) -> Result<()> {
        let mut this_val = this.unwrap_or(Value::Undefined);
        if let (Value::Object(obj), Some(owner_type)) = (&this_val, &f.belong_type) {
            let sup = obj.super_of(owner_type);
            self.force_set_local("super", Value::Object(sup));
            // Inside a method the receiver is always the real instance,
            // even when the call arrived through a super view.
            this_val = Value::Object(obj.this_object());
        }
        self.force_set_local("this", this_val);
        self.force_set_local("arguments", Value::array(args.clone()));
        let count = f.params.len();
        if f.expand_last && count > 0 {
            while args.len() < count - 1 {
                args.push(Value::Undefined);
            }
            let rest = args.split_off(count - 1);
            args.push(Value::array(rest));
        } else {
            args.resize(count, Value::Undefined);
        }
        for (name, value) in f.params.iter().zip(args) {
            self.force_set_local(name, value);
        }
        let body = f.body.clone();
        body.eval(self)
    }

    // ---- comparison ----

    /// Compares two values, consulting user overrides (`__eq__`, `__lt__`,
    /// `__gt__`) before the native pairwise rules when an object is
    /// involved.
    pub fn values_compare(&mut self, left: &Value, right: &Value) -> Result<CompareResult> {
        if matches!(left, Value::Object(_)) || matches!(right, Value::Object(_)) {
            if let Some(result) = self.override_compare(left, right)? {
                return Ok(result);
            }
        }
        left.compare_to(right, self)
    }

    fn override_compare(&mut self, left: &Value, right: &Value) -> Result<Option<CompareResult>> {
        let (probe, other, swapped) = if matches!(left, Value::Object(_)) {
            (left, right, false)
        } else {
            (right, left, true)
        };
        let mut any = false;
        let eq = probe.get_member("__eq__", self)?;
        if eq.is_callable() {
            any = true;
            if self.call(&eq, vec![other.clone()])?.is_true() {
                return Ok(Some(CompareResult::EQUAL));
            }
        }
        let lt = probe.get_member("__lt__", self)?;
        if lt.is_callable() {
            any = true;
            if self.call(&lt, vec![other.clone()])?.is_true() {
                return Ok(Some(if swapped {
                    CompareResult::GREATER
                } else {
                    CompareResult::LESS
                }));
            }
        }
        let gt = probe.get_member("__gt__", self)?;
        if gt.is_callable() {
            any = true;
            if self.call(&gt, vec![other.clone()])?.is_true() {
                return Ok(Some(if swapped {
                    CompareResult::LESS
                } else {
                    CompareResult::GREATER
                }));
            }
        }
        Ok(if any {
            Some(CompareResult::NOT_EQUAL)
        } else {
            None
        })
    }

    pub fn values_equal(&mut self, left: &Value, right: &Value) -> Result<bool> {
        Ok(self.values_compare(left, right)?.is_equal())
    }

    pub fn value_less(&mut self, left: &Value, right: &Value) -> Result<bool> {
        Ok(self.values_compare(left, right)? == CompareResult::LESS)
    }

    pub fn value_less_eq(&mut self, left: &Value, right: &Value) -> Result<bool> {
        Ok(self
            .values_compare(left, right)?
            .intersects(CompareResult::LESS | CompareResult::EQUAL))
    }

    pub fn value_greater(&mut self, left: &Value, right: &Value) -> Result<bool> {
        Ok(self.values_compare(left, right)? == CompareResult::GREATER)
    }

    pub fn value_greater_eq(&mut self, left: &Value, right: &Value) -> Result<bool> {
        Ok(self
            .values_compare(left, right)?
            .intersects(CompareResult::GREATER | CompareResult::EQUAL))
    }

    // ---- extension members ----

    /// Registers a method for a type in the shared side table; all
    /// contexts cloned from this one see it immediately.
    pub fn register_extension(&self, t: &TypeRef, name: &str, value: Value) {
        self.extensions.insert((t.id, name.to_string()), value);
    }

    pub(crate) fn extension_member(&self, type_id: i64, name: &str) -> Option<Value> {
        self.extensions
            .get(&(type_id, name.to_string()))
            .map(|entry| entry.value().clone())
    }

    // ---- module / eval service ----

    pub fn set_import_fn<F>(&mut self, f: F)
    where
        F: Fn(&mut Context, &str, &str, ImportKind, i64) -> Result<Option<(Value, i64)>>
            + Send
            + Sync
            + 'static,
    {
        self.import_fn = Some(Arc::new(f));
    }

    pub fn import_paths(&self) -> &[PathBuf] {
        &self.import_paths
    }

    pub fn set_import_paths(&mut self, paths: Vec<PathBuf>) {
        self.import_paths = paths;
    }

    /// Loads a module through the resolver, consulting the shared cache.
    /// A cached module with a nonzero modification time is returned as-is
    /// unless `force` is set; a zero modification time marks the module
    /// volatile and re-checks the resolver on every import.
    pub fn import_module(&mut self, path: &str, force: bool, kind: ImportKind) -> Result<Value> {
        let mut cached: Option<(Value, i64)> = None;
        if let Some(entry) = self.modules.get(path) {
            let (value, mod_time) = (entry.value.clone(), entry.mod_time);
            drop(entry);
            if !force && mod_time != 0 {
                trace!(path, "import served from cache");
                return Ok(value);
            }
            cached = Some((value, mod_time));
        }
        let last_mod = cached.as_ref().map_or(0, |(_, t)| *t);
        let resolver = self
            .import_fn
            .clone()
            .ok_or_else(|| self.error(ErrorKind::Import, "no import resolver installed"))?;
        debug!(path, ?kind, force, "importing module");
        match resolver(self, path, "", kind, last_mod)? {
            Some((value, mod_time)) => {
                // An unchanged modification time keeps the cached handle.
                if let Some((old, old_time)) = cached {
                    if mod_time == old_time {
                        return Ok(old);
                    }
                }
                // Undefined is never cached; it evicts any stale entry so a
                // later import consults the resolver again.
                if value.is_undefined() {
                    self.modules.remove(path);
                    return Ok(value);
                }
                self.modules.insert(
                    path.to_string(),
                    ModuleEntry {
                        value: value.clone(),
                        mod_time,
                    },
                );
                Ok(value)
            }
            None => match self.modules.get(path) {
                Some(entry) => Ok(entry.value.clone()),
                None => Err(self.error(
                    ErrorKind::Import,
                    format!("cannot find module {path}"),
                )),
            },
        }
    }

    /// Evaluates inline source through the resolver. Requires the eval
    /// permission unless forced; results are never cached.
    pub fn eval(&mut self, code: &str, force: bool) -> Result<Value> {
        if !force && !self.can_eval {
            return Err(self.runtime_error("eval is not permitted in this context"));
        }
        let resolver = self
            .import_fn
            .clone()
            .ok_or_else(|| self.error(ErrorKind::Import, "no import resolver installed"))?;
        trace!(force, "inline eval");
        match resolver(self, "", code, ImportKind::Script, 0)? {
            Some((value, _)) => Ok(value),
            None => Err(self.error(ErrorKind::Import, "eval produced no result")),
        }
    }

    /// Imports `_autoimport.zn` from each search path root and spills its
    /// exports into the current frame.
    pub fn auto_import(&mut self) -> Result<()> {
        for root in self.import_paths.clone() {
            let candidate = root.join("_autoimport.zn");
            if !candidate.exists() {
                continue;
            }
            let path = candidate.to_string_lossy().to_string();
            let exports = self.import_module(&path, false, ImportKind::Script)?;
            if let Value::Object(exports) = exports {
                for (name, value) in exports.fields_snapshot() {
                    self.force_set_local(&name, value);
                }
            }
        }
        Ok(())
    }
}

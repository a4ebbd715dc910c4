//! The concurrency bridge: running a callable on its own OS thread with a
//! cloned context, joining its completion value, and script-visible
//! channels.
//!
//! A spawned task gets a fresh frame chain but shares the module cache,
//! builtins, extension registry, and I/O streams with its parent. A failed
//! task reports its error to the error stream and completes with Undefined;
//! errors never propagate to joiners.

use std::sync::{Arc, LazyLock};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::debug;

use crate::context::Context;
use crate::diagnostics::Result;
use crate::host::HostValue;
use crate::object::{ClassBuilder, ObjectValue, TypeRef};
use crate::value::Value;

/// The joinable side of a spawned task. The completion channel holds one
/// slot and is closed once; the first join caches the value so later joins
/// return it without touching the channel.
pub struct TaskHandle {
    receiver: Receiver<Value>,
    cell: Mutex<Option<Value>>,
}

impl TaskHandle {
    /// Blocks until the task completes. A task that failed (or whose
    /// sender vanished) joins as Undefined.
    pub fn join(&self) -> Value {
        let mut cell = self.cell.lock();
        if let Some(value) = cell.as_ref() {
            return value.clone();
        }
        let value = self.receiver.recv().unwrap_or(Value::Undefined);
        *cell = Some(value.clone());
        value
    }

    /// Non-blocking probe: the completion value if the task already
    /// finished.
    pub fn try_join(&self) -> Option<Value> {
        let mut cell = self.cell.lock();
        if let Some(value) = cell.as_ref() {
            return Some(value.clone());
        }
        match self.receiver.try_recv() {
            Ok(value) => {
                *cell = Some(value.clone());
                Some(value)
            }
            Err(_) => None,
        }
    }
}

/// Runs `callee` on a new thread with a task clone of `ctx`. Returns the
/// script-visible handle object with `join`/`await` members.
pub fn spawn(ctx: &mut Context, callee: Value, this: Option<Value>, args: Vec<Value>) -> Result<Value> {
    let callable = ctx.must_callable(&callee, "task")?;
    let mut task_ctx = ctx.clone_for_task();
    let (sender, receiver): (Sender<Value>, Receiver<Value>) = bounded(1);
    debug!("spawning task");
    thread::spawn(move || match task_ctx.call_with(&callable, this, args) {
        Ok(value) => {
            let _ = sender.send(value);
        }
        Err(err) => {
            // Dropping the sender closes the channel; joiners observe
            // Undefined. The error belongs to the task alone.
            let _ = task_ctx.report_error(&err);
        }
    });
    let handle = Arc::new(TaskHandle {
        receiver,
        cell: Mutex::new(None),
    });
    Ok(handle_object(handle))
}

static TASK_TYPE: LazyLock<TypeRef> = LazyLock::new(|| {
    let join = |ctx: &mut Context, this: Option<Value>, _args: Vec<Value>| {
        let handle = handle_of(ctx, &this)?;
        Ok(handle.join())
    };
    ClassBuilder::new("Task")
        .method("join", join)
        .method("await", join)
        .build()
});

pub fn task_type() -> TypeRef {
    TASK_TYPE.clone()
}

fn handle_object(handle: Arc<TaskHandle>) -> Value {
    let obj = ObjectValue::new(task_type());
    obj.set_reserved(HostValue::from_arc("Task", handle));
    Value::Object(obj)
}

fn handle_of(ctx: &Context, this: &Option<Value>) -> Result<Arc<TaskHandle>> {
    if let Some(Value::Object(obj)) = this {
        if let Some(host) = obj.reserved() {
            if let Some(handle) = host.downcast::<TaskHandle>() {
                return Ok(handle);
            }
        }
    }
    Err(ctx.runtime_error("receiver is not a task handle"))
}

/// Both ends of a script channel. Held whole so the channel stays open for
/// as long as any handle to it exists.
pub struct ChannelPair {
    sender: Sender<Value>,
    receiver: Receiver<Value>,
}

static CHANNEL_TYPE: LazyLock<TypeRef> = LazyLock::new(|| {
    ClassBuilder::new("Channel")
        .constructor(|ctx, this, args| {
            let obj = ctx.must_object(&this.unwrap_or_default(), "receiver")?;
            let capacity = match args.first() {
                Some(Value::Undefined) | None => 0,
                Some(v) => ctx.must_int(v, "capacity")?.max(0) as usize,
            };
            let (sender, receiver) = bounded(capacity);
            obj.set_reserved(HostValue::new("Channel", ChannelPair { sender, receiver }));
            Ok(Value::Undefined)
        })
        .method("send", |ctx, this, args| {
            let ch = channel_of(ctx, &this)?;
            let value = args.first().cloned().unwrap_or(Value::Undefined);
            match args.get(1) {
                Some(Value::Undefined) | None => match ch.sender.send(value) {
                    Ok(()) => Ok(Value::Bool(true)),
                    Err(_) => Err(ctx.runtime_error("channel is closed")),
                },
                Some(timeout) => {
                    let secs = ctx.must_float(timeout, "timeout")?;
                    if secs <= 0.0 {
                        Ok(Value::Bool(ch.sender.try_send(value).is_ok()))
                    } else {
                        let wait = Duration::from_secs_f64(secs);
                        Ok(Value::Bool(ch.sender.send_timeout(value, wait).is_ok()))
                    }
                }
            }
        })
        .method("recv", |ctx, this, args| {
            let ch = channel_of(ctx, &this)?;
            match args.first() {
                Some(Value::Undefined) | None => {
                    Ok(ch.receiver.recv().unwrap_or(Value::Undefined))
                }
                Some(timeout) => {
                    let secs = ctx.must_float(timeout, "timeout")?;
                    if secs <= 0.0 {
                        Ok(ch.receiver.try_recv().unwrap_or(Value::Undefined))
                    } else {
                        let wait = Duration::from_secs_f64(secs);
                        Ok(ch.receiver.recv_timeout(wait).unwrap_or(Value::Undefined))
                    }
                }
            }
        })
        .build()
});

pub fn channel_type() -> TypeRef {
    CHANNEL_TYPE.clone()
}

/// A ready-made channel object, bypassing type invocation.
pub fn make_channel(capacity: usize) -> Result<Value> {
    let obj = ObjectValue::new(channel_type());
    let (sender, receiver) = bounded(capacity);
    obj.set_reserved(HostValue::new("Channel", ChannelPair { sender, receiver }));
    Ok(Value::Object(obj))
}

fn channel_of(ctx: &Context, this: &Option<Value>) -> Result<Arc<ChannelPair>> {
    if let Some(Value::Object(obj)) = this {
        if let Some(host) = obj.reserved() {
            if let Some(pair) = host.downcast::<ChannelPair>() {
                return Ok(pair);
            }
        }
    }
    Err(ctx.runtime_error("receiver is not a channel"))
}

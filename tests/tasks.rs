use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use zinnia::{builtin, spawn, types, Context, Value};

fn ctx() -> Context {
    Context::new()
}

fn expect_int(value: &Value) -> i64 {
    match value {
        Value::Int(n) => *n,
        other => panic!("expected Int, got {other:?}"),
    }
}

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).to_string()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn spawned_tasks_join_with_their_result() {
    let mut ctx = ctx();
    let work = builtin("work", |ctx, _, args| {
        let n = ctx.must_int(args.first().unwrap_or(&Value::Undefined), "n")?;
        std::thread::sleep(Duration::from_millis(10));
        Ok(Value::Int(n * 2))
    });
    let handle = spawn(&mut ctx, work, None, vec![Value::Int(21)]).unwrap();
    let out = ctx.call_method(&handle, "join", vec![]).unwrap();
    assert_eq!(expect_int(&out), 42);

    // Joining again serves the cached value; `await` is an alias.
    let again = ctx.call_method(&handle, "join", vec![]).unwrap();
    assert_eq!(expect_int(&again), 42);
    let waited = ctx.call_method(&handle, "await", vec![]).unwrap();
    assert_eq!(expect_int(&waited), 42);
}

#[test]
fn the_spawn_builtin_forwards_arguments() {
    let mut ctx = ctx();
    let spawn_fn = ctx.get_variable("spawn").unwrap();
    let add = builtin("add", |ctx, _, args| {
        let a = ctx.must_int(args.first().unwrap_or(&Value::Undefined), "a")?;
        let b = ctx.must_int(args.get(1).unwrap_or(&Value::Undefined), "b")?;
        Ok(Value::Int(a + b))
    });
    let handle = ctx
        .call(&spawn_fn, vec![add, Value::Int(2), Value::Int(3)])
        .unwrap();
    let out = ctx.call_method(&handle, "join", vec![]).unwrap();
    assert_eq!(expect_int(&out), 5);
}

#[test]
fn spawning_a_non_callable_fails_immediately() {
    let mut ctx = ctx();
    let err = spawn(&mut ctx, Value::Int(1), None, vec![]).unwrap_err();
    assert!(err.message.contains("callable"));
}

#[test]
fn failed_tasks_report_to_stderr_and_join_as_undefined() {
    let mut ctx = ctx();
    let buf = SharedBuf::default();
    ctx.set_stderr(buf.clone());

    let boom = builtin("boom", |ctx, _, _| {
        Err(ctx.runtime_error("task exploded"))
    });
    let handle = spawn(&mut ctx, boom, None, vec![]).unwrap();
    let out = ctx.call_method(&handle, "join", vec![]).unwrap();
    assert!(out.is_undefined());
    // The task clone shares the parent's error stream.
    assert!(buf.text().contains("Exception! task exploded"));
}

#[test]
fn channels_buffer_and_probe_without_blocking() {
    let mut ctx = ctx();
    let channel_fn = ctx.get_variable("channel").unwrap();
    let ch = ctx.call(&channel_fn, vec![Value::Int(2)]).unwrap();

    let sent = ctx
        .call_method(&ch, "send", vec![Value::Int(1)])
        .unwrap();
    assert!(sent.is_true());
    ctx.call_method(&ch, "send", vec![Value::Int(2)]).unwrap();

    // A full buffer rejects a zero-timeout send instead of blocking.
    let refused = ctx
        .call_method(&ch, "send", vec![Value::Int(3), Value::Int(0)])
        .unwrap();
    assert!(!refused.is_true());

    let got = ctx.call_method(&ch, "recv", vec![]).unwrap();
    assert_eq!(expect_int(&got), 1);
    let got = ctx.call_method(&ch, "recv", vec![]).unwrap();
    assert_eq!(expect_int(&got), 2);

    // An empty channel answers Undefined on a zero-timeout probe and
    // after a short timed wait.
    let empty = ctx
        .call_method(&ch, "recv", vec![Value::Int(0)])
        .unwrap();
    assert!(empty.is_undefined());
    let timed = ctx
        .call_method(&ch, "recv", vec![Value::Float(0.01)])
        .unwrap();
    assert!(timed.is_undefined());
}

#[test]
fn rendezvous_channels_pass_values_between_tasks() {
    let mut ctx = ctx();
    let channel_fn = ctx.get_variable("channel").unwrap();
    // Capacity zero: send and recv meet.
    let ch = ctx.call(&channel_fn, vec![]).unwrap();

    let echo = builtin("echo", |ctx, _, args| {
        let ch = args.first().cloned().unwrap_or(Value::Undefined);
        let got = ctx.call_method(&ch, "recv", vec![])?;
        let n = ctx.must_int(&got, "received")?;
        Ok(Value::Int(n + 1))
    });
    let handle = spawn(&mut ctx, echo, None, vec![ch.clone()]).unwrap();

    ctx.call_method(&ch, "send", vec![Value::Int(41)]).unwrap();
    let out = ctx.call_method(&handle, "join", vec![]).unwrap();
    assert_eq!(expect_int(&out), 42);
}

#[test]
fn channel_type_is_constructible_from_scripts() {
    let mut ctx = ctx();
    let ch = ctx
        .call(&Value::Type(zinnia::task::channel_type()), vec![Value::Int(1)])
        .unwrap();
    ctx.call_method(&ch, "send", vec![Value::str("ping")]).unwrap();
    let got = ctx.call_method(&ch, "recv", vec![]).unwrap();
    match got {
        Value::Str(s) => assert_eq!(s.as_str(), "ping"),
        other => panic!("expected Str, got {other:?}"),
    }
}

#[test]
fn task_clones_share_the_extension_registry() {
    let mut ctx = ctx();
    let register = builtin("register", |ctx, _, _| {
        ctx.register_extension(
            &types::int(),
            "negate",
            builtin("negate", |ctx, this, _| {
                let n = ctx.must_int(&this.unwrap_or_default(), "receiver")?;
                Ok(Value::Int(-n))
            }),
        );
        Ok(Value::Bool(true))
    });
    let handle = spawn(&mut ctx, register, None, vec![]).unwrap();
    ctx.call_method(&handle, "join", vec![]).unwrap();

    // The registration made inside the task is visible here.
    let negate = Value::Int(8).get_member("negate", &mut ctx).unwrap();
    let out = ctx.call(&negate, vec![]).unwrap();
    assert_eq!(expect_int(&out), -8);
}

#[test]
fn tasks_run_on_independent_frame_chains() {
    let mut ctx = ctx();
    ctx.set_local("secret", Value::Int(1)).unwrap();
    let probe = builtin("probe", |ctx, _, _| {
        Ok(Value::Bool(ctx.find_value("secret").is_some()))
    });
    let handle = spawn(&mut ctx, probe, None, vec![]).unwrap();
    let saw = ctx.call_method(&handle, "join", vec![]).unwrap();
    assert!(!saw.is_true());
}

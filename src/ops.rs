//! Binary operator dispatch.
//!
//! Numeric pairs resolve in a fixed preference order (Int∘Int, Int∘Float,
//! Int∘BigNum, Float∘Int, Float∘Float, Float∘BigNum, BigNum∘any) with the
//! result type following the promotion. Non-numeric specializations
//! (string/array concatenation and repetition, string formatting) are tried
//! next, then the left operand's dunder method, and only then does the
//! operation fail with a type mismatch. Division and modulo check for a
//! zero divisor before computing anything.

use bigdecimal::{BigDecimal, ToPrimitive, Zero};

use crate::context::Context;
use crate::diagnostics::{ErrorKind, Result};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
        }
    }

    fn dunder(self) -> &'static str {
        match self {
            BinOp::Add => "__add__",
            BinOp::Sub => "__sub__",
            BinOp::Mul => "__mul__",
            BinOp::Div => "__div__",
            BinOp::Mod => "__mod__",
            BinOp::Pow => "__pow__",
        }
    }
}

pub fn binary(ctx: &mut Context, op: BinOp, left: &Value, right: &Value) -> Result<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => int_int(ctx, op, *a, *b),
        (Value::Int(a), Value::Float(b)) => float_float(ctx, op, *a as f64, *b),
        (Value::Int(a), Value::BigNum(b)) => {
            big_big(ctx, op, BigDecimal::from(*a), b.as_ref().clone())
        }
        (Value::Float(a), Value::Int(b)) => float_float(ctx, op, *a, *b as f64),
        (Value::Float(a), Value::Float(b)) => float_float(ctx, op, *a, *b),
        (Value::Float(a), Value::BigNum(b)) => {
            big_big(ctx, op, float_to_big(ctx, *a)?, b.as_ref().clone())
        }
        (Value::BigNum(a), Value::Int(b)) => {
            big_big(ctx, op, a.as_ref().clone(), BigDecimal::from(*b))
        }
        (Value::BigNum(a), Value::Float(b)) => {
            big_big(ctx, op, a.as_ref().clone(), float_to_big(ctx, *b)?)
        }
        (Value::BigNum(a), Value::BigNum(b)) => {
            big_big(ctx, op, a.as_ref().clone(), b.as_ref().clone())
        }
        _ => non_numeric(ctx, op, left, right),
    }
}

fn non_numeric(ctx: &mut Context, op: BinOp, left: &Value, right: &Value) -> Result<Value> {
    match (op, left, right) {
        (BinOp::Add, Value::Str(a), _) => {
            let mut out = a.as_str().to_string();
            out.push_str(&right.display_string(ctx)?);
            return Ok(Value::str(out));
        }
        (BinOp::Add, _, Value::Str(b)) => {
            let mut out = left.display_string(ctx)?;
            out.push_str(b.as_str());
            return Ok(Value::str(out));
        }
        (BinOp::Add, Value::Array(a), Value::Array(b)) => {
            let mut items = a.read().clone();
            items.extend(b.read().iter().cloned());
            return Ok(Value::array(items));
        }
        (BinOp::Mul, Value::Str(s), Value::Int(n)) | (BinOp::Mul, Value::Int(n), Value::Str(s)) => {
            return Ok(Value::str(s.as_str().repeat((*n).max(0) as usize)));
        }
        (BinOp::Mul, Value::Array(a), Value::Int(n)) => {
            let items = a.read().clone();
            let mut out = Vec::with_capacity(items.len() * (*n).max(0) as usize);
            for _ in 0..(*n).max(0) {
                out.extend(items.iter().cloned());
            }
            return Ok(Value::array(out));
        }
        (BinOp::Mod, Value::Str(template), Value::Array(args)) => {
            let args = args.read().clone();
            return Ok(Value::str(format_string(ctx, template.as_str(), &args)?));
        }
        (BinOp::Mod, Value::Str(template), other) => {
            let args = vec![other.clone()];
            return Ok(Value::str(format_string(ctx, template.as_str(), &args)?));
        }
        _ => {}
    }
    let method = left.get_member(op.dunder(), ctx)?;
    if method.is_callable() {
        return ctx.call(&method, vec![right.clone()]);
    }
    Err(ctx.error(
        ErrorKind::TypeMismatch,
        format!(
            "unsupported operand types for {}: {} and {}",
            op.symbol(),
            left.type_name(),
            right.type_name()
        ),
    ))
}

fn int_int(ctx: &mut Context, op: BinOp, a: i64, b: i64) -> Result<Value> {
    Ok(match op {
        BinOp::Add => Value::Int(a.wrapping_add(b)),
        BinOp::Sub => Value::Int(a.wrapping_sub(b)),
        BinOp::Mul => Value::Int(a.wrapping_mul(b)),
        BinOp::Div => {
            check_zero(ctx, b == 0)?;
            Value::Int(a.wrapping_div(b))
        }
        BinOp::Mod => {
            check_zero(ctx, b == 0)?;
            Value::Int(a.wrapping_rem(b))
        }
        BinOp::Pow => {
            // Non-negative exponents stay integral (truncated); negative
            // exponents escape to Float.
            let exp = b.clamp(i32::MIN as i64, i32::MAX as i64) as i32;
            if b >= 0 {
                Value::Int((a as f64).powi(exp).trunc() as i64)
            } else {
                Value::Float((a as f64).powi(exp))
            }
        }
    })
}

fn float_float(ctx: &mut Context, op: BinOp, a: f64, b: f64) -> Result<Value> {
    Ok(match op {
        BinOp::Add => Value::Float(a + b),
        BinOp::Sub => Value::Float(a - b),
        BinOp::Mul => Value::Float(a * b),
        BinOp::Div => {
            check_zero(ctx, b == 0.0)?;
            Value::Float(a / b)
        }
        BinOp::Mod => {
            check_zero(ctx, b == 0.0)?;
            Value::Float(a % b)
        }
        BinOp::Pow => Value::Float(a.powf(b)),
    })
}

fn big_big(ctx: &mut Context, op: BinOp, a: BigDecimal, b: BigDecimal) -> Result<Value> {
    Ok(match op {
        BinOp::Add => Value::bignum(a + b),
        BinOp::Sub => Value::bignum(a - b),
        BinOp::Mul => Value::bignum(a * b),
        BinOp::Div => {
            check_zero(ctx, b.is_zero())?;
            Value::bignum(a / b)
        }
        BinOp::Mod => {
            check_zero(ctx, b.is_zero())?;
            Value::bignum(a % b)
        }
        BinOp::Pow => {
            let base = a.to_f64().unwrap_or(f64::NAN);
            let exp = b.to_f64().unwrap_or(f64::NAN);
            float_to_big(ctx, base.powf(exp)).map(Value::bignum)?
        }
    })
}

fn float_to_big(ctx: &Context, x: f64) -> Result<BigDecimal> {
    BigDecimal::try_from(x)
        .map_err(|_| ctx.runtime_error(format!("cannot represent {x} as a BigNum")))
}

fn check_zero(ctx: &Context, is_zero: bool) -> Result<()> {
    if is_zero {
        Err(ctx.error(ErrorKind::DivisionByZero, "division by zero"))
    } else {
        Ok(())
    }
}

/// `%`-directive formatting: `%s` renders any value, `%d` requires an
/// integer-convertible value, `%f` a float-convertible one, `%%` a literal
/// percent sign.
pub fn format_string(ctx: &mut Context, template: &str, args: &[Value]) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut next = 0usize;
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let directive = chars
            .next()
            .ok_or_else(|| ctx.runtime_error("format string ends with a bare %"))?;
        if directive == '%' {
            out.push('%');
            continue;
        }
        let arg = args.get(next).cloned().ok_or_else(|| {
            ctx.runtime_error(format!("format string needs more than {next} arguments"))
        })?;
        next += 1;
        match directive {
            's' => out.push_str(&arg.display_string(ctx)?),
            'd' => match arg {
                Value::Int(n) => out.push_str(&n.to_string()),
                Value::Float(x) => out.push_str(&(x.trunc() as i64).to_string()),
                other => {
                    return Err(ctx.error(
                        ErrorKind::TypeMismatch,
                        format!("%d requires a number, got {}", other.type_name()),
                    ))
                }
            },
            'f' => match arg {
                Value::Int(n) => out.push_str(&format!("{:.6}", n as f64)),
                Value::Float(x) => out.push_str(&format!("{x:.6}")),
                other => {
                    return Err(ctx.error(
                        ErrorKind::TypeMismatch,
                        format!("%f requires a number, got {}", other.type_name()),
                    ))
                }
            },
            other => {
                return Err(ctx.runtime_error(format!("unknown format directive %{other}")))
            }
        }
    }
    Ok(out)
}

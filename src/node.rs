//! The contract between front-ends and the runtime. The core does not
//! parse anything: a front-end lowers source text into a tree of nodes
//! implementing [`Eval`], and the runtime only ever walks that tree.

use crate::context::Context;
use crate::diagnostics::Result;
use crate::value::Value;

/// An evaluable program fragment. Evaluation leaves its result in
/// `ctx.ret_val`; statements that produce nothing leave Undefined there.
pub trait Eval: Send + Sync {
    fn eval(&self, ctx: &mut Context) -> Result<()>;
}

/// A node backed by a Rust closure. Hosts and tests use this to splice
/// native behavior into function bodies without a front-end.
pub struct NodeFn<F>(F);

impl<F> NodeFn<F>
where
    F: Fn(&mut Context) -> Result<()> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Eval for NodeFn<F>
where
    F: Fn(&mut Context) -> Result<()> + Send + Sync,
{
    fn eval(&self, ctx: &mut Context) -> Result<()> {
        (self.0)(ctx)
    }
}

/// A node that evaluates to a fixed value.
pub struct NodeConst(pub Value);

impl Eval for NodeConst {
    fn eval(&self, ctx: &mut Context) -> Result<()> {
        ctx.ret_val = self.0.clone();
        Ok(())
    }
}

//! Execution core for the Zinnia scripting language: the value model, the
//! prototype type/object system, operator dispatch, the execution context
//! with frames and deferred calls, the module/eval service, and the
//! spawn/join concurrency bridge.
//!
//! The crate contains no lexer or parser. Front-ends lower source text into
//! trees of nodes implementing [`node::Eval`] and drive them against a
//! [`context::Context`]; the host installs an import resolver to give
//! `import` and `eval` meaning.

pub mod context;
pub mod diagnostics;
pub mod host;
pub mod members;
pub mod node;
pub mod object;
pub mod ops;
pub mod task;
pub mod value;

pub use context::{Context, FuncEnv, ImportKind, Param};
pub use diagnostics::{ErrorKind, Result, RuntimeError, StackEntry};
pub use host::{host_fn, FromValue, HostBytes, HostValue, IntoValue};
pub use node::{Eval, NodeConst, NodeFn};
pub use object::{types, BoundMethod, ClassBuilder, ObjectValue, TypeRef, TypeValue};
pub use ops::{binary, BinOp};
pub use task::{spawn, TaskHandle};
pub use value::{builtin, BuiltinFunction, CompareResult, FuncValue, MapValue, StrValue, Value};

use std::fmt;

use thiserror::Error;

/// Classification of a runtime failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// General script-level error; the catch-all kind for raised exceptions.
    Runtime,
    /// An operand or argument had the wrong type.
    TypeMismatch,
    /// Integer, float, or big-number division or modulo by zero.
    DivisionByZero,
    /// The import resolver could not produce the requested module.
    Import,
    /// Popping below the root frame. Host misuse, never a script error.
    StackUnderflow,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Runtime => "runtime error",
            ErrorKind::TypeMismatch => "type mismatch",
            ErrorKind::DivisionByZero => "division by zero",
            ErrorKind::Import => "import error",
            ErrorKind::StackUnderflow => "stack underflow",
        };
        f.write_str(name)
    }
}

/// One call-stack entry. The runtime captures one entry per
/// function-boundary frame, innermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackEntry {
    pub file: String,
    pub line: u32,
    pub function: String,
}

impl fmt::Display for StackEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.file, self.line, self.function)
    }
}

/// Error raised by the runtime: a message plus the call stack at the raise
/// site.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub message: String,
    pub stack: Vec<StackEntry>,
}

impl RuntimeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stack: Vec::new(),
        }
    }

    pub fn with_stack(mut self, stack: Vec<StackEntry>) -> Self {
        self.stack = stack;
        self
    }

    /// Full user-visible rendering: the message, then one trace line per
    /// function frame.
    pub fn message_with_stack(&self) -> String {
        let mut out = format!("Exception! {}\n", self.message);
        for entry in &self.stack {
            out.push_str(&entry.to_string());
            out.push('\n');
        }
        out
    }

    /// StackUnderflow signals a corrupted frame chain; no recovery point
    /// should swallow it.
    pub fn is_fatal(&self) -> bool {
        self.kind == ErrorKind::StackUnderflow
    }
}

impl From<std::io::Error> for RuntimeError {
    fn from(err: std::io::Error) -> Self {
        RuntimeError::new(ErrorKind::Runtime, format!("I/O error: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

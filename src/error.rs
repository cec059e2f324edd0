//! Closed-set error kind plus the owned, embedder-facing error wrapper.
//!
//! `LuaError` stays a one-byte `Copy` enum so it is cheap to carry in the
//! `Result` of hot-path Host API calls; the human-readable message is kept
//! out of band (on the `ExecutionState` that raised it) until the boundary
//! produces a [`LuaFullError`].

use std::fmt;

/// The closed set of failure kinds a Host API entry point can raise, plus
/// the two internal signaling values (`Yield`, `Exit`) the execution-state
/// machinery uses for non-local control transfer that never reaches an
/// embedder as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LuaError {
    /// Allocation failed even after an emergency full collection.
    MemoryError,
    /// Raised by script code, a metamethod, or a host `CFunction`.
    RuntimeError,
    /// Raised by the (external) parser/lexer collaborator.
    SyntaxError,
    /// Raised while running a finalizer; reported but does not abort
    /// collection.
    FinalizerError,
    /// Raised while running the user error function during a protected
    /// call.
    ErrorInErrorHandling,
    /// A `RuntimeError` subkind: arithmetic/comparison/index on
    /// incompatible types after metamethod fallback failed.
    TypeError,
    /// Index out of range for the current frame (not one of the seven
    /// spec error kinds, but every index-resolution entry point needs a
    /// local failure signal distinct from the above).
    IndexOutOfBounds,
    /// Coroutine yield in flight; carried through `Result` plumbing, never
    /// surfaced to an embedder as a thrown error.
    Yield,
    /// Internal VM-exit signal: the top-level frame returned.
    Exit,
}

impl LuaError {
    /// The integer thread-status code this error kind maps to (ok=0 is not
    /// representable here since `Ok` carries no `LuaError`).
    pub fn status_code(self) -> i32 {
        match self {
            LuaError::Yield => 1,
            LuaError::RuntimeError | LuaError::TypeError | LuaError::IndexOutOfBounds => 2,
            LuaError::SyntaxError => 3,
            LuaError::MemoryError => 4,
            LuaError::FinalizerError => 5,
            LuaError::ErrorInErrorHandling => 6,
            LuaError::Exit => 0,
        }
    }
}

impl fmt::Display for LuaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LuaError::MemoryError => write!(f, "memory error"),
            LuaError::RuntimeError => write!(f, "runtime error"),
            LuaError::SyntaxError => write!(f, "syntax error"),
            LuaError::FinalizerError => write!(f, "error in finalizer"),
            LuaError::ErrorInErrorHandling => write!(f, "error in error handling"),
            LuaError::TypeError => write!(f, "type error"),
            LuaError::IndexOutOfBounds => write!(f, "index out of bounds"),
            LuaError::Yield => write!(f, "yield"),
            LuaError::Exit => write!(f, "exit"),
        }
    }
}

impl std::error::Error for LuaError {}

/// Owned error value combining a [`LuaError`] kind with its message,
/// suitable for propagation through ordinary Rust `?`-based error
/// handling at the embedder boundary.
#[derive(Debug, Clone)]
pub struct LuaFullError {
    kind: LuaError,
    message: String,
}

impl LuaFullError {
    pub fn new(kind: LuaError, message: impl Into<String>) -> Self {
        LuaFullError {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> LuaError {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for LuaFullError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for LuaFullError {}

pub type LuaResult<T> = Result<T, LuaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_spec_table() {
        assert_eq!(LuaError::Yield.status_code(), 1);
        assert_eq!(LuaError::RuntimeError.status_code(), 2);
        assert_eq!(LuaError::SyntaxError.status_code(), 3);
        assert_eq!(LuaError::MemoryError.status_code(), 4);
        assert_eq!(LuaError::FinalizerError.status_code(), 5);
        assert_eq!(LuaError::ErrorInErrorHandling.status_code(), 6);
    }

    #[test]
    fn full_error_falls_back_to_kind_display() {
        let e = LuaFullError::new(LuaError::RuntimeError, "");
        assert_eq!(e.to_string(), "runtime error");
        let e = LuaFullError::new(LuaError::RuntimeError, "boom");
        assert_eq!(e.to_string(), "boom");
    }
}

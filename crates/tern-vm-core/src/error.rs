//! Error kinds and the engine's internal error type

use serde::Serialize;
use thiserror::Error;

use crate::value::Value;

/// Error taxonomy visible to scripts and embedders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// Plain `Error` (also used for thrown non-error values)
    Error,
    /// `TypeError`
    TypeError,
    /// `RangeError`
    RangeError,
    /// `ReferenceError`
    ReferenceError,
    /// `SyntaxError`
    SyntaxError,
    /// Engine invariant violation
    InternalError,
}

impl ErrorKind {
    /// All kinds, in intrinsic table order
    pub const ALL: [ErrorKind; 6] = [
        Self::Error,
        Self::TypeError,
        Self::RangeError,
        Self::ReferenceError,
        Self::SyntaxError,
        Self::InternalError,
    ];

    /// Constructor name
    pub const fn name(self) -> &'static str {
        match self {
            Self::Error => "Error",
            Self::TypeError => "TypeError",
            Self::RangeError => "RangeError",
            Self::ReferenceError => "ReferenceError",
            Self::SyntaxError => "SyntaxError",
            Self::InternalError => "InternalError",
        }
    }

    /// Position in the realm's intrinsic prototype table
    pub const fn table_index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Failure inside the engine
///
/// Errors the engine raises itself stay unmaterialized until a `catch`
/// or the embedder boundary needs them as objects.
#[derive(Debug, Clone, Error)]
pub enum VmError {
    /// Engine-raised error of a given kind
    #[error("{kind}: {message}")]
    Raised {
        /// Constructor to materialize with
        kind: ErrorKind,
        /// `message` property
        message: String,
    },

    /// Value thrown by script code
    #[error("Uncaught exception")]
    Exception(Box<Value>),

    /// Module failed validation
    #[error("Bytecode error: {0}")]
    Bytecode(#[from] tern_vm_bytecode::BytecodeError),
}

impl VmError {
    /// Engine-raised error
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Raised {
            kind,
            message: message.into(),
        }
    }

    /// `TypeError`
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    /// `ReferenceError`
    pub fn reference_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ReferenceError, message)
    }

    /// `RangeError`
    pub fn range_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RangeError, message)
    }

    /// Broken engine invariant
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalError, message)
    }

    /// Script throw of `value`
    pub fn exception(value: Value) -> Self {
        Self::Exception(Box::new(value))
    }

    /// Stack depth limit reached
    pub fn stack_overflow() -> Self {
        Self::range_error("Maximum call stack size exceeded.")
    }

    /// Kind and message, unless a script value was thrown
    pub(crate) fn kind_and_message(&self) -> Option<(ErrorKind, String)> {
        match self {
            Self::Raised { kind, message } => Some((*kind, message.clone())),
            Self::Bytecode(e) => Some((ErrorKind::InternalError, e.to_string())),
            Self::Exception(_) => None,
        }
    }
}

/// Result of engine-internal operations
pub type VmResult<T> = std::result::Result<T, VmError>;

/// Error returned to embedders
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}")]
pub struct EngineException {
    /// Taxonomy tag
    pub kind: ErrorKind,
    /// Human-readable message
    pub message: String,
    /// Thrown value, when the error reached script code as a value
    pub value: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_taxonomy() {
        let err = VmError::type_error("x is not a function");
        assert_eq!(err.to_string(), "TypeError: x is not a function");
        assert_eq!(
            VmError::stack_overflow().to_string(),
            "RangeError: Maximum call stack size exceeded."
        );

        let exception = EngineException {
            kind: ErrorKind::RangeError,
            message: "Division by zero".to_string(),
            value: None,
        };
        assert_eq!(exception.to_string(), "RangeError: Division by zero");
    }
}

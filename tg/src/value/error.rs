//! Value and call error types

use thiserror::Error;

/// Errors raised by operations on values
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    #[error("cannot {op}: value is frozen")]
    Frozen { op: &'static str },

    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },
}

impl ValueError {
    /// Check if this error came from mutating a frozen value
    pub fn is_frozen(&self) -> bool {
        matches!(self, ValueError::Frozen { .. })
    }
}

/// Errors returned by a callable's body
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("{function}: {message}")]
    Failed { function: String, message: String },

    #[error("{function}: cancelled")]
    Cancelled { function: String },

    #[error(transparent)]
    Value(#[from] ValueError),
}

impl CallError {
    /// Build a failure raised by the named function
    pub fn failed(function: impl Into<String>, message: impl Into<String>) -> Self {
        CallError::Failed {
            function: function.into(),
            message: message.into(),
        }
    }

    /// Build the error a function returns when it stops because its context was cancelled
    pub fn cancelled(function: impl Into<String>) -> Self {
        CallError::Cancelled {
            function: function.into(),
        }
    }

    /// Check if the function stopped because of cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CallError::Cancelled { .. })
    }
}

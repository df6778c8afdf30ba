//! Task group error types

use thiserror::Error;

use crate::duration::DurationError;
use crate::value::CallError;

/// The bound context was cancelled before the operation could proceed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("context cancelled")]
pub struct Cancelled;

/// Errors that can occur while building, filling or waiting on a task group
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GroupError {
    #[error("group: invalid every: {0}")]
    InvalidDuration(#[from] DurationError),

    #[error("group: every must be a positive interval, got {every:?}")]
    NonPositiveInterval { every: String },

    #[error("group: {0}")]
    InvalidArgument(String),

    #[error("{op}: frozen")]
    Frozen { op: &'static str },

    #[error("group.go: expected callable got {type_name}")]
    NotCallable { type_name: &'static str },

    #[error(transparent)]
    Task(#[from] CallError),

    #[error("group: {0}")]
    Cancelled(#[from] Cancelled),
}

impl GroupError {
    /// Check if this error was raised while constructing a group
    pub fn is_construction(&self) -> bool {
        matches!(
            self,
            GroupError::InvalidDuration(_) | GroupError::NonPositiveInterval { .. } | GroupError::InvalidArgument(_)
        )
    }

    pub fn is_frozen(&self) -> bool {
        matches!(self, GroupError::Frozen { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, GroupError::Cancelled(_))
    }

    /// The task body's error, if this is one
    pub fn task_error(&self) -> Option<&CallError> {
        match self {
            GroupError::Task(err) => Some(err),
            _ => None,
        }
    }
}

/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 */

use crate::sync::LockKind;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::sync::Arc;
use thiserror::Error;

/// Error type returned by task and messenger bodies
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Contract violations and bounded-wait failures raised by the primitives
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum SyncError {
    #[error("{0}")]
    #[diagnostic(
        code(sync::invalid_argument),
        help("The call was rejected before doing anything. Check the arguments.")
    )]
    InvalidArgument(String),

    #[error("{0}")]
    #[diagnostic(
        code(sync::invalid_state),
        help("A one-shot or ordering contract was violated by the caller.")
    )]
    InvalidState(String),

    /// Display is the requested timeout in milliseconds and nothing else
    #[error("{millis}")]
    #[diagnostic(
        code(sync::timeout),
        help("The signal was not triggered in time. Increase the timeout or check the producer.")
    )]
    Timeout { millis: i64 },

    #[error("{kind} lock: {remaining_ms}")]
    #[diagnostic(
        code(sync::lock_timeout),
        help(
            "Lock could not be acquired before the deadline. \
             Look for a holder that never released."
        )
    )]
    LockTimeout { kind: LockKind, remaining_ms: i64 },

    #[error("Interrupted")]
    #[diagnostic(
        code(sync::interrupted),
        help("The wait was abandoned because its cancel token fired.")
    )]
    Interrupted,
}

impl SyncError {
    #[inline]
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    #[inline]
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub(crate) fn timeout(requested: std::time::Duration) -> Self {
        Self::Timeout {
            millis: i64::try_from(requested.as_millis()).unwrap_or(i64::MAX),
        }
    }

    /// True for the timeout variants
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::LockTimeout { .. })
    }
}

/// Failure raised inside a unit of work
///
/// Cheap to clone so it can be both stored in a completion token and
/// handed to every waiter that reads the payload.
#[derive(Error, Debug, Clone)]
pub enum TaskError {
    #[error("{0}")]
    Failed(Arc<dyn StdError + Send + Sync + 'static>),

    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Build from a panic payload caught by `catch_unwind`
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        TaskError::Panicked(msg)
    }

    /// Underlying error when the task returned one
    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        match self {
            TaskError::Failed(e) => Some(e.as_ref()),
            TaskError::Panicked(_) => None,
        }
    }
}

impl From<BoxError> for TaskError {
    fn from(err: BoxError) -> Self {
        TaskError::Failed(Arc::from(err))
    }
}

/// Result type for primitive operations
pub type SyncResult<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_timeout_display_is_bare_millis() {
        let err = SyncError::timeout(Duration::from_millis(50));
        assert_eq!(err.to_string(), "50");
        assert!(err.is_timeout());
    }

    #[test]
    fn test_lock_timeout_display() {
        let err = SyncError::LockTimeout {
            kind: LockKind::Write,
            remaining_ms: -3,
        };
        assert_eq!(err.to_string(), "Write lock: -3");
    }

    #[test]
    fn test_sync_error_serialization() {
        let error = SyncError::invalid_state("Too early");
        let json = serde_json::to_string(&error).unwrap();
        let deserialized: SyncError = serde_json::from_str(&json).unwrap();
        assert_eq!(error, deserialized);
    }

    #[test]
    fn test_task_error_from_box() {
        let boxed: BoxError = "Oops".into();
        let err: TaskError = boxed.into();
        assert_eq!(err.to_string(), "Oops");
        assert!(err.cause().is_some());
    }

    #[test]
    fn test_task_error_from_panic() {
        let caught = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        let err = TaskError::from_panic(caught);
        assert_eq!(err.to_string(), "task panicked: boom");
        assert!(err.cause().is_none());
    }
}

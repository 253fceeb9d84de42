/*!
 * Task Contract
 *
 * Units of work accepted by [`ScatterGather`](super::ScatterGather) and the
 * record produced when one of them fails.
 */

use crate::core::{BoxError, TaskError};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Runnable unit of work
pub trait Task: Send + Sync {
    fn run(&self) -> Result<(), BoxError>;

    /// Cancellation hook, if this task has one
    ///
    /// Invoked once for a task that was admitted to a batch but never
    /// dispatched.
    fn as_cancellable(&self) -> Option<&dyn Cancellable> {
        None
    }
}

/// Capability to be told that queued work will never run
pub trait Cancellable: Send + Sync {
    fn cancel(&self) -> Result<(), BoxError>;
}

impl<F> Task for F
where
    F: Fn() -> Result<(), BoxError> + Send + Sync,
{
    fn run(&self) -> Result<(), BoxError> {
        self()
    }
}

/// A task that failed, and why
#[derive(Clone)]
pub struct TaskFailure {
    pub target: Arc<dyn Task>,
    pub cause: TaskError,
}

impl TaskFailure {
    /// True if this failure belongs to `task` (allocation identity)
    pub fn is_for(&self, task: &Arc<dyn Task>) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.target), Arc::as_ptr(task))
    }
}

impl fmt::Debug for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskFailure")
            .field("target", &Arc::as_ptr(&self.target))
            .field("cause", &self.cause)
            .finish()
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task {:p} failed: {}", Arc::as_ptr(&self.target), self.cause)
    }
}

/// Run `task`, turning both returned errors and panics into [`TaskError`]
pub(crate) fn run_caught(task: &dyn Task) -> Result<(), TaskError> {
    match panic::catch_unwind(AssertUnwindSafe(|| task.run())) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(TaskError::from(e)),
        Err(payload) => Err(TaskError::from_panic(payload)),
    }
}

/*!
 * Fire-and-Forget Messenger
 *
 * A unit of work started in the background whose only observable result is
 * a [`CompletionToken`]. Success completes the token with `(true, Ok(value))`;
 * an error or a panic completes it with `(false, Err(cause))`. Nothing is
 * ever propagated to the caller that started it.
 */

use super::pool::{Executor, ThreadPerTask};
use crate::core::{BoxError, TaskError};
use crate::sync::CompletionToken;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Result carried in a messenger's completion token
pub type Outcome<T> = Result<T, TaskError>;

/// Background unit of work with a completion token
pub trait Messenger: Send + Sized + 'static {
    type Output: Send + 'static;

    /// The work itself; runs exactly once on the executor's thread
    fn execute(self) -> Result<Self::Output, BoxError>;

    /// Run on a dedicated new thread
    fn start(self) -> Arc<CompletionToken<Outcome<Self::Output>>> {
        self.start_on(&ThreadPerTask::new("messenger"))
    }

    /// Run on `executor`
    ///
    /// If the executor refuses the job the token is completed right away
    /// with `false` and the rejection.
    fn start_on(self, executor: &dyn Executor) -> Arc<CompletionToken<Outcome<Self::Output>>> {
        let token = Arc::new(CompletionToken::new());
        let remote = Arc::clone(&token);
        let name = std::any::type_name::<Self>();

        let job = Box::new(move || {
            let started = Instant::now();
            let outcome = match panic::catch_unwind(AssertUnwindSafe(|| self.execute())) {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(TaskError::from(e)),
                Err(payload) => Err(TaskError::from_panic(payload)),
            };

            let status = outcome.is_ok();
            info!(
                messenger = name,
                status,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "messenger finished"
            );
            if let Err(e) = remote.complete_with(status, outcome) {
                error!(messenger = name, error = %e, "messenger token already complete");
            }
        });

        if let Err(e) = executor.execute(job) {
            error!(messenger = name, error = %e, "executor rejected messenger");
            let cause = TaskError::Failed(Arc::new(e));
            if let Err(e) = token.complete_with(false, Err(cause)) {
                error!(messenger = name, error = %e, "messenger token already complete");
            }
        }

        token
    }
}

/*!
 * Task Execution
 *
 * Thread pools, batch scatter/gather and fire-and-forget messengers built
 * on the primitives in [`crate::sync`].
 */

pub mod aggregator;
pub mod messenger;
pub mod pool;
pub mod task;

pub use aggregator::{BatchReport, ScatterGather};
pub use messenger::{Messenger, Outcome};
pub use pool::{Executor, Job, ThreadPerTask, WorkerPool};
pub use task::{Cancellable, Task, TaskFailure};

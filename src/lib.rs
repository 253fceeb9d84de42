/*!
 * gatherkit
 * Thread-based synchronization primitives and batch execution
 *
 * - [`sync`]: event flags, completion tokens, token groups, multicasters,
 *   a writer-preferring reader/writer lock and cooperative cancellation
 * - [`exec`]: worker pools, scatter/gather batches, fire-and-forget messengers
 * - [`service`]: idle-timeout tracking
 */

pub mod config;
pub mod core;
pub mod exec;
pub mod monitoring;
pub mod service;
pub mod sync;

// Re-exports
pub use crate::config::{GatherConfig, PoolConfig};
pub use crate::core::{BoxError, ObjectId, SyncError, SyncResult, TaskError};
pub use crate::exec::{
    BatchReport, Cancellable, Executor, Messenger, Outcome, ScatterGather, Task, TaskFailure,
    ThreadPerTask, WorkerPool,
};
pub use crate::monitoring::init_tracing;
pub use crate::service::{IdleClient, IdleTracker};
pub use crate::sync::{
    CancelToken, CompletionToken, EventFlag, EventListener, FairRwLock, Gate, LockKind,
    LockStats, LockToken, Multicaster, ScopedLock, TokenGroup, Waitable,
};

/*!
 * Scatter/Gather Executor
 *
 * Runs a batch of independent tasks on a bounded worker pool and blocks
 * until every dispatched task has finished.
 *
 * # Algorithm
 *
 * 1. Freeze the input into a working queue; `admitted` is its length.
 * 2. Start a pool of `thread_count` core threads and a [`Gate`] holding
 *    `admitted` permits.
 * 3. For each task: take one permit, dispatch. The worker wrapper runs the
 *    task, routes any failure, and always gives its permit back.
 * 4. Join by acquiring all `admitted` permits.
 * 5. A fired [`CancelToken`] stops dispatch and abandons the join. Tasks
 *    already dispatched still run to completion.
 * 6. Shutdown accounting, then cancellation hooks for undispatched tasks.
 *
 * A failing task never aborts the batch.
 */

use super::pool::{Executor, WorkerPool};
use super::task::{run_caught, Task, TaskFailure};
use crate::config::GatherConfig;
use crate::core::{SyncError, SyncResult, TaskError};
use crate::monitoring::generate_trace_id;
use crate::sync::{CancelToken, Gate};
use serde::Serialize;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What happened to each admitted task
///
/// `processed + in_transit + discarded == admitted` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BatchReport {
    /// Tasks in the frozen batch
    pub admitted: usize,
    /// Dispatched and finished at accounting time
    pub processed: usize,
    /// Dispatched but still running or queued in the pool
    pub in_transit: usize,
    /// Never dispatched
    pub discarded: usize,
    /// The join was abandoned because the cancel token fired
    pub interrupted: bool,
}

/// Batch executor with backpressure and a join barrier
#[derive(Debug, Default)]
pub struct ScatterGather {
    config: GatherConfig,
    cancel: Option<CancelToken>,
}

/// Gives one permit back however the wrapper exits
struct PermitGuard(Arc<Gate>);

impl Drop for PermitGuard {
    fn drop(&mut self) {
        self.0.release(1);
    }
}

impl ScatterGather {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: GatherConfig) -> Self {
        Self {
            config,
            cancel: None,
        }
    }

    /// Observe `cancel` while dispatching and joining
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Run `tasks` with one thread per task
    pub fn process_all<I>(
        &self,
        tasks: I,
        errors: Option<&flume::Sender<TaskFailure>>,
    ) -> SyncResult<BatchReport>
    where
        I: IntoIterator<Item = Arc<dyn Task>>,
    {
        let queue: VecDeque<Arc<dyn Task>> = tasks.into_iter().collect();
        if queue.is_empty() {
            debug!("empty task queue");
            return Ok(BatchReport::default());
        }
        let threads = queue.len();
        self.run_batch(threads, queue, errors)
    }

    /// Run `tasks` on `thread_count` core threads
    ///
    /// Worker failures go to `errors` when supplied and are logged otherwise.
    /// They never reach the caller.
    pub fn process<I>(
        &self,
        thread_count: usize,
        tasks: I,
        errors: Option<&flume::Sender<TaskFailure>>,
    ) -> SyncResult<BatchReport>
    where
        I: IntoIterator<Item = Arc<dyn Task>>,
    {
        if thread_count < 1 {
            return Err(SyncError::invalid_argument(format!(
                "Unreasonable thread count ({})",
                thread_count
            )));
        }

        // Freeze the input
        let queue: VecDeque<Arc<dyn Task>> = tasks.into_iter().collect();
        if queue.is_empty() {
            debug!("empty task queue");
            return Ok(BatchReport::default());
        }
        self.run_batch(thread_count, queue, errors)
    }

    fn run_batch(
        &self,
        thread_count: usize,
        mut queue: VecDeque<Arc<dyn Task>>,
        errors: Option<&flume::Sender<TaskFailure>>,
    ) -> SyncResult<BatchReport> {
        let batch_id = generate_trace_id();
        let span = tracing::info_span!("process", %batch_id, threads = thread_count);
        let _entered = span.enter();

        let admitted = queue.len();
        // No point in more core threads than tasks
        let pool = WorkerPool::new(self.config.pool_config(thread_count.min(admitted)))?;
        let gate = Arc::new(Gate::new(admitted));

        let mut interrupted = false;
        while let Some(task) = queue.pop_front() {
            let permit = match &self.cancel {
                Some(cancel) if cancel.is_cancelled() => Err(SyncError::Interrupted),
                Some(cancel) => gate.acquire_cancellable(1, cancel),
                None => {
                    gate.acquire(1);
                    Ok(())
                }
            };
            if permit.is_err() {
                debug!("interrupted while dispatching, stopping");
                queue.push_front(task);
                interrupted = true;
                break;
            }

            let guard = PermitGuard(Arc::clone(&gate));
            let errors = errors.cloned();
            let run_span = tracing::debug_span!(parent: &span, "run");
            let dispatched = Arc::clone(&task);

            let job = Box::new(move || {
                let _permit = guard;
                let _entered = run_span.enter();
                if let Err(cause) = run_caught(task.as_ref()) {
                    report_failure(errors.as_ref(), TaskFailure { target: task, cause });
                }
            });

            if let Err(e) = pool.execute(job) {
                // The rejected job dropped its guard, returning the permit
                error!(error = %e, "pool rejected task");
                queue.push_front(dispatched);
                break;
            }
        }

        if !interrupted && queue.is_empty() {
            let joined = match &self.cancel {
                Some(cancel) if cancel.is_cancelled() => Err(SyncError::Interrupted),
                Some(cancel) => gate.acquire_cancellable(admitted, cancel),
                None => {
                    gate.acquire(admitted);
                    Ok(())
                }
            };
            match joined {
                Ok(()) => gate.release(admitted),
                Err(_) => {
                    debug!("interrupted while joining, stopping");
                    interrupted = true;
                }
            }
        }

        let report = shutdown(&pool, &gate, admitted, queue, interrupted);
        if !interrupted {
            pool.join();
        }
        Ok(report)
    }
}

/// Route a worker failure to the error channel, or log it
fn report_failure(errors: Option<&flume::Sender<TaskFailure>>, failure: TaskFailure) {
    match errors {
        None => error!(cause = %failure.cause, "worker failed"),
        Some(tx) => {
            if let Err(flume::SendError(failure)) = tx.send(failure) {
                let _oops = tracing::error_span!("oops").entered();
                error!(%failure, "error channel closed while reporting a failure");
            }
        }
    }
}

fn shutdown(
    pool: &WorkerPool,
    gate: &Gate,
    admitted: usize,
    remaining: VecDeque<Arc<dyn Task>>,
    interrupted: bool,
) -> BatchReport {
    let _span = tracing::debug_span!("shutdown").entered();
    pool.shutdown();

    let discarded = remaining.len();
    let dispatched = admitted - discarded;
    // Undispatched tasks still hold their permits in the gate
    let processed = gate.available().saturating_sub(discarded).min(dispatched);
    let in_transit = dispatched - processed;

    info!(processed, in_transit, discarded, "batch finished");
    cancel_remaining(remaining);

    BatchReport {
        admitted,
        processed,
        in_transit,
        discarded,
        interrupted,
    }
}

fn cancel_remaining(remaining: VecDeque<Arc<dyn Task>>) {
    if remaining.is_empty() {
        return;
    }
    let _span = tracing::debug_span!("cleanup").entered();
    warn!(count = remaining.len(), "queue cleanup");

    for task in remaining {
        if let Some(hook) = task.as_cancellable() {
            // A failing hook must not stop the rest of the cleanup
            match panic::catch_unwind(AssertUnwindSafe(|| hook.cancel())) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "failed to clean up task"),
                Err(payload) => {
                    warn!(cause = %TaskError::from_panic(payload), "task cleanup panicked")
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BoxError;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: &Arc<AtomicUsize>) -> Arc<dyn Task> {
        let counter = counter.clone();
        Arc::new(move || -> Result<(), BoxError> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_rejects_zero_threads() {
        let err = ScatterGather::new()
            .process(0, Vec::<Arc<dyn Task>>::new(), None)
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidArgument(ref m) if m.contains("(0)")));
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let report = ScatterGather::new()
            .process(4, Vec::<Arc<dyn Task>>::new(), None)
            .unwrap();
        assert_eq!(report, BatchReport::default());
    }

    #[test]
    fn test_all_processed() {
        let counter = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<_> = (0..20).map(|_| counting(&counter)).collect();
        let report = ScatterGather::new().process(4, tasks, None).unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 20);
        assert_eq!(
            report,
            BatchReport {
                admitted: 20,
                processed: 20,
                in_transit: 0,
                discarded: 0,
                interrupted: false,
            }
        );
    }

    #[test]
    fn test_pool_sized_to_batch() {
        let config = GatherConfig::from_json(r#"{"overflow": 0}"#).unwrap();
        let names = Arc::new(parking_lot::Mutex::new(HashSet::new()));
        let tasks: Vec<Arc<dyn Task>> = (0..3)
            .map(|_| {
                let names = names.clone();
                Arc::new(move || -> Result<(), BoxError> {
                    let name = std::thread::current().name().unwrap_or_default().to_string();
                    names.lock().insert(name);
                    Ok(())
                }) as Arc<dyn Task>
            })
            .collect();

        let report = ScatterGather::with_config(config)
            .process(2000, tasks, None)
            .unwrap();
        assert_eq!(report.processed, 3);

        let allowed: HashSet<String> = (0..3).map(|i| format!("gatherkit-worker-{}", i)).collect();
        let seen = names.lock().clone();
        assert!(seen.is_subset(&allowed), "workers: {:?}", seen);
    }

    #[test]
    fn test_process_all() {
        let counter = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<_> = (0..5).map(|_| counting(&counter)).collect();
        let report = ScatterGather::new().process_all(tasks, None).unwrap();
        assert_eq!(report.processed, 5);
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_failure_without_channel_does_not_abort() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut tasks: Vec<_> = (0..4).map(|_| counting(&counter)).collect();
        tasks.insert(2, Arc::new(|| -> Result<(), BoxError> { panic!("worker exploded") }));

        let report = ScatterGather::new().process(2, tasks, None).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        assert_eq!(report.processed, 5);
    }

    #[test]
    fn test_report_serializes() {
        let report = BatchReport {
            admitted: 3,
            processed: 1,
            in_transit: 1,
            discarded: 1,
            interrupted: true,
        };
        let json = serde_json::to_value(report).unwrap();
        assert_eq!(json["in_transit"], 1);
        assert_eq!(json["interrupted"], true);
    }
}

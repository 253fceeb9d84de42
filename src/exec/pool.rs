/*!
 * Executors
 *
 * Where jobs run. [`WorkerPool`] keeps up to a fixed number of named core
 * threads fed from one channel and grows into a bounded overflow when every
 * thread is busy and work is queued. Core threads start one per submitted job
 * until the core size is reached. [`ThreadPerTask`] is the degenerate
 * executor that gives every job its own thread.
 *
 * # Shutdown
 *
 * Shutting a pool down only closes the submission side. Jobs already queued
 * still run; each worker exits once the channel is drained.
 */

use crate::config::PoolConfig;
use crate::core::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

/// Boxed unit of work handed to an executor
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Something that runs jobs
pub trait Executor: Send + Sync {
    /// Accept `job` for execution. Fails if the executor no longer takes work.
    fn execute(&self, job: Job) -> SyncResult<()>;
}

struct PoolShared {
    config: PoolConfig,
    rx: flume::Receiver<Job>,
    /// Live worker threads
    live: AtomicUsize,
    /// Workers parked on the channel
    idle: AtomicUsize,
    next_index: AtomicUsize,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

/// Bounded worker pool with lazy overflow threads
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    tx: Mutex<Option<flume::Sender<Job>>>,
}

impl WorkerPool {
    /// Create a pool. Core threads are spawned on demand by `execute`.
    pub fn new(config: PoolConfig) -> SyncResult<Self> {
        config.validate()?;
        let (tx, rx) = flume::unbounded();
        let shared = Arc::new(PoolShared {
            config,
            rx,
            live: AtomicUsize::new(0),
            idle: AtomicUsize::new(0),
            next_index: AtomicUsize::new(0),
            handles: Mutex::new(Vec::new()),
        });

        debug!(
            threads = shared.config.threads,
            overflow = shared.config.overflow,
            "worker pool started"
        );
        Ok(Self {
            shared,
            tx: Mutex::new(Some(tx)),
        })
    }

    /// Stop accepting jobs; queued jobs still run
    pub fn shutdown(&self) {
        if self.tx.lock().take().is_some() {
            debug!(queued = self.queued(), "worker pool shutting down");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.tx.lock().is_none()
    }

    /// Shut down and wait for every worker thread to exit
    pub fn join(&self) {
        self.shutdown();
        let handles: Vec<_> = std::mem::take(&mut *self.shared.handles.lock());
        for handle in handles {
            if handle.join().is_err() {
                error!("worker thread panicked outside of a job");
            }
        }
    }

    /// Live worker threads, core and overflow
    pub fn live_threads(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    /// Jobs accepted but not yet picked up
    pub fn queued(&self) -> usize {
        self.shared.rx.len()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Spawn a core worker while the pool is below its core size.
    /// Returns whether a worker was spawned.
    fn spawn_core(&self) -> SyncResult<bool> {
        let shared = &self.shared;
        let threads = shared.config.threads;
        let reserved = shared
            .live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| {
                (live < threads).then_some(live + 1)
            })
            .is_ok();
        if !reserved {
            return Ok(false);
        }

        spawn_worker(shared).map(|()| true).map_err(|e| {
            shared.live.fetch_sub(1, Ordering::SeqCst);
            e
        })
    }

    /// Spawn an overflow worker if everyone is busy and work is waiting
    fn maybe_grow(&self) {
        let shared = &self.shared;
        if shared.idle.load(Ordering::SeqCst) > 0 || shared.rx.is_empty() {
            return;
        }

        let max = shared.config.max_threads();
        let reserved = shared
            .live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| {
                (live < max).then_some(live + 1)
            })
            .is_ok();
        if !reserved {
            return;
        }

        if let Err(e) = spawn_worker(shared) {
            shared.live.fetch_sub(1, Ordering::SeqCst);
            error!(error = %e, "failed to spawn overflow worker");
        }
    }
}

impl Executor for WorkerPool {
    fn execute(&self, job: Job) -> SyncResult<()> {
        let spawned = {
            let tx = self.tx.lock();
            let sender = tx
                .as_ref()
                .ok_or_else(|| SyncError::invalid_state("Worker pool is shut down"))?;

            let spawned = match self.spawn_core() {
                Ok(spawned) => spawned,
                // Nobody would ever pick the job up
                Err(e) if self.live_threads() == 0 => return Err(e),
                Err(e) => {
                    error!(error = %e, "failed to spawn core worker");
                    false
                }
            };
            sender
                .send(job)
                .map_err(|_| SyncError::invalid_state("Worker pool is shut down"))?;
            spawned
        };
        // A fresh core worker covers this job
        if !spawned {
            self.maybe_grow();
        }
        Ok(())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.shared.config.threads)
            .field("overflow", &self.shared.config.overflow)
            .field("live", &self.live_threads())
            .field("queued", &self.queued())
            .finish()
    }
}

/// Caller must already have counted the thread in `live`
fn spawn_worker(shared: &Arc<PoolShared>) -> SyncResult<()> {
    let index = shared.next_index.fetch_add(1, Ordering::SeqCst);
    let name = format!("{}-{}", shared.config.thread_name_prefix, index);
    let worker_shared = Arc::clone(shared);

    let handle = thread::Builder::new()
        .name(name)
        .spawn(move || worker_loop(worker_shared))
        .map_err(|e| SyncError::invalid_state(format!("Failed to spawn worker thread: {}", e)))?;

    shared.handles.lock().push(handle);
    Ok(())
}

fn worker_loop(shared: Arc<PoolShared>) {
    loop {
        shared.idle.fetch_add(1, Ordering::SeqCst);
        let next = shared.rx.recv();
        shared.idle.fetch_sub(1, Ordering::SeqCst);

        match next {
            Ok(job) => {
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    error!("job panicked; worker continues");
                }
            }
            // Every sender is gone and the queue is drained
            Err(_) => break,
        }
    }
    shared.live.fetch_sub(1, Ordering::SeqCst);
}

/// Executor that spawns one named thread per job
#[derive(Debug)]
pub struct ThreadPerTask {
    prefix: String,
    next_index: AtomicUsize,
}

impl ThreadPerTask {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next_index: AtomicUsize::new(0),
        }
    }
}

impl Default for ThreadPerTask {
    fn default() -> Self {
        Self::new("gatherkit-task")
    }
}

impl Executor for ThreadPerTask {
    fn execute(&self, job: Job) -> SyncResult<()> {
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        thread::Builder::new()
            .name(format!("{}-{}", self.prefix, index))
            .spawn(job)
            .map(drop)
            .map_err(|e| SyncError::invalid_state(format!("Failed to spawn thread: {}", e)))
    }
}

/*!
 * Idle Tracker
 *
 * Fires a one-time idle timeout for every registered client that has not
 * been reset within its idle limit. The tracker is an ordinary value with an
 * explicit start/stop lifecycle; whoever needs idle tracking owns one.
 *
 * A client whose timeout fired is unregistered. Register it again to re-arm.
 */

use crate::core::{SyncError, SyncResult};
use crate::sync::Monitor;
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Something that can go idle
pub trait IdleClient: Send + Sync {
    /// How long the client may stay idle
    fn idle_limit(&self) -> Duration;

    /// Called once, on the tracker thread, when the limit elapses
    fn idle_timeout(&self);
}

struct Entry {
    client: Arc<dyn IdleClient>,
    deadline: Instant,
}

#[derive(Default)]
struct Registry {
    entries: Vec<Entry>,
    running: bool,
    /// Bumped on every change the tracker thread must react to
    generation: u64,
}

impl Registry {
    fn position(&self, client: &Arc<dyn IdleClient>) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| std::ptr::addr_eq(Arc::as_ptr(&e.client), Arc::as_ptr(client)))
    }
}

/// Registry of idle clients with a background timer thread
pub struct IdleTracker {
    monitor: Arc<Monitor<Registry>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl IdleTracker {
    pub fn new() -> Self {
        Self {
            monitor: Monitor::new(Registry::default()),
            worker: Mutex::new(None),
        }
    }

    /// Start the timer thread
    pub fn start(&self) -> SyncResult<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(SyncError::invalid_state("Idle tracker is already running"));
        }

        self.monitor.lock().running = true;
        let monitor = Arc::clone(&self.monitor);
        let handle = thread::Builder::new()
            .name("gatherkit-idle".to_string())
            .spawn(move || run_tracker(monitor))
            .map_err(|e| {
                self.monitor.lock().running = false;
                SyncError::invalid_state(format!("Failed to spawn idle tracker: {}", e))
            })?;

        *worker = Some(handle);
        debug!("idle tracker started");
        Ok(())
    }

    /// Stop the timer thread and wait for it. Registrations are kept.
    pub fn stop(&self) {
        let Some(handle) = self.worker.lock().take() else {
            return;
        };

        self.update(|registry| registry.running = false);
        if handle.thread().id() != thread::current().id() && handle.join().is_err() {
            error!("idle tracker thread panicked");
        }
        debug!("idle tracker stopped");
    }

    pub fn is_running(&self) -> bool {
        self.monitor.lock().running
    }

    /// Arm (or re-arm) `client` with its own idle limit
    pub fn register(&self, client: Arc<dyn IdleClient>) {
        let deadline = Instant::now() + client.idle_limit();
        self.update(|registry| match registry.position(&client) {
            Some(i) => registry.entries[i].deadline = deadline,
            None => registry.entries.push(Entry { client, deadline }),
        });
    }

    /// Restart the idle countdown for a registered client
    pub fn reset(&self, client: &Arc<dyn IdleClient>) -> SyncResult<()> {
        let deadline = Instant::now() + client.idle_limit();
        self.try_update(|registry| {
            let i = registry.position(client).ok_or_else(not_registered)?;
            registry.entries[i].deadline = deadline;
            Ok(())
        })
    }

    pub fn unregister(&self, client: &Arc<dyn IdleClient>) -> SyncResult<()> {
        self.try_update(|registry| {
            let i = registry.position(client).ok_or_else(not_registered)?;
            registry.entries.swap_remove(i);
            Ok(())
        })
    }

    pub fn is_registered(&self, client: &Arc<dyn IdleClient>) -> bool {
        self.monitor.lock().position(client).is_some()
    }

    pub fn len(&self) -> usize {
        self.monitor.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn update(&self, f: impl FnOnce(&mut Registry)) {
        let _ = self.try_update(|registry| {
            f(registry);
            Ok(())
        });
    }

    fn try_update(&self, f: impl FnOnce(&mut Registry) -> SyncResult<()>) -> SyncResult<()> {
        let mut registry = self.monitor.lock();
        f(&mut registry)?;
        registry.generation = registry.generation.wrapping_add(1);
        drop(registry);
        self.monitor.notify_all();
        Ok(())
    }
}

impl Default for IdleTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IdleTracker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for IdleTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdleTracker")
            .field("running", &self.is_running())
            .field("clients", &self.len())
            .finish()
    }
}

fn not_registered() -> SyncError {
    SyncError::invalid_argument("Idle client is not registered")
}

fn run_tracker(monitor: Arc<Monitor<Registry>>) {
    let mut registry = monitor.lock();

    while registry.running {
        let now = Instant::now();
        let (expired, armed): (Vec<Entry>, Vec<Entry>) = std::mem::take(&mut registry.entries)
            .into_iter()
            .partition(|e| e.deadline <= now);
        registry.entries = armed;

        if !expired.is_empty() {
            // Callbacks may call back into the tracker
            MutexGuard::unlocked(&mut registry, || {
                for entry in expired {
                    fire(entry.client.as_ref());
                }
            });
            continue;
        }

        let next = registry.entries.iter().map(|e| e.deadline).min();
        let seen = registry.generation;
        monitor.wait_while(&mut registry, next, None, |r| {
            r.running && r.generation == seen
        });
    }
}

fn fire(client: &dyn IdleClient) {
    if panic::catch_unwind(AssertUnwindSafe(|| client.idle_timeout())).is_err() {
        error!("idle client panicked in its timeout callback");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Sleeper {
        limit: Duration,
        fired: AtomicUsize,
    }

    impl Sleeper {
        fn new(limit_ms: u64) -> Arc<Self> {
            Arc::new(Self {
                limit: Duration::from_millis(limit_ms),
                fired: AtomicUsize::new(0),
            })
        }
    }

    impl IdleClient for Sleeper {
        fn idle_limit(&self) -> Duration {
            self.limit
        }

        fn idle_timeout(&self) {
            self.fired.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_timeout_fires_once_and_unregisters() {
        let tracker = IdleTracker::new();
        tracker.start().unwrap();

        let sleeper = Sleeper::new(30);
        let client: Arc<dyn IdleClient> = sleeper.clone();
        tracker.register(client.clone());
        assert!(tracker.is_registered(&client));

        thread::sleep(Duration::from_millis(200));
        assert_eq!(sleeper.fired.load(Ordering::SeqCst), 1);
        assert!(!tracker.is_registered(&client));
        assert!(tracker.reset(&client).is_err());
        tracker.stop();
    }

    #[test]
    fn test_reset_postpones_timeout() {
        let tracker = IdleTracker::new();
        tracker.start().unwrap();

        let sleeper = Sleeper::new(150);
        let client: Arc<dyn IdleClient> = sleeper.clone();
        tracker.register(client.clone());

        for _ in 0..4 {
            thread::sleep(Duration::from_millis(50));
            tracker.reset(&client).unwrap();
        }
        assert_eq!(sleeper.fired.load(Ordering::SeqCst), 0);

        tracker.unregister(&client).unwrap();
        assert!(tracker.unregister(&client).is_err());
        thread::sleep(Duration::from_millis(200));
        assert_eq!(sleeper.fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_lifecycle() {
        let tracker = IdleTracker::new();
        assert!(!tracker.is_running());
        tracker.start().unwrap();
        assert!(tracker.is_running());
        assert!(tracker.start().is_err());
        tracker.stop();
        assert!(!tracker.is_running());
        tracker.start().unwrap();
        drop(tracker);
    }
}

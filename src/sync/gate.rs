/*!
 * Gate
 *
 * Counting semaphore used as a join point: workers release one permit each
 * as they finish, the dispatcher acquires all of them at once.
 */

use super::cancel::CancelToken;
use super::monitor::{Monitor, WaitOutcome};
use crate::core::{SyncError, SyncResult};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Counting semaphore with bulk acquire
pub struct Gate {
    monitor: Arc<Monitor<usize>>,
}

impl Gate {
    pub fn new(permits: usize) -> Self {
        Self {
            monitor: Monitor::new(permits),
        }
    }

    /// Block until `n` permits are available, then take them all
    pub fn acquire(&self, n: usize) {
        let mut permits = self.monitor.lock();
        self.monitor
            .wait_while(&mut permits, None, None, |available| *available < n);
        *permits -= n;
    }

    pub fn acquire_timeout(&self, n: usize, timeout: Duration) -> SyncResult<()> {
        self.acquire_until(n, Some(Instant::now() + timeout), None)
            .map_err(|e| match e {
                SyncError::Timeout { .. } => SyncError::timeout(timeout),
                other => other,
            })
    }

    pub fn acquire_cancellable(&self, n: usize, cancel: &CancelToken) -> SyncResult<()> {
        self.acquire_until(n, None, Some(cancel))
    }

    fn acquire_until(
        &self,
        n: usize,
        deadline: Option<Instant>,
        cancel: Option<&CancelToken>,
    ) -> SyncResult<()> {
        let mut permits = self.monitor.lock();
        match self
            .monitor
            .wait_while(&mut permits, deadline, cancel, |available| *available < n)
        {
            WaitOutcome::Ready => {
                *permits -= n;
                Ok(())
            }
            WaitOutcome::TimedOut => Err(SyncError::Timeout { millis: 0 }),
            WaitOutcome::Cancelled => Err(SyncError::Interrupted),
        }
    }

    /// Take `n` permits only if they are available now
    pub fn try_acquire(&self, n: usize) -> bool {
        let mut permits = self.monitor.lock();
        if *permits < n {
            return false;
        }
        *permits -= n;
        true
    }

    pub fn release(&self, n: usize) {
        *self.monitor.lock() += n;
        self.monitor.notify_all();
    }

    pub fn available(&self) -> usize {
        *self.monitor.lock()
    }
}

impl fmt::Debug for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gate")
            .field("available", &self.available())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_bulk_acquire_waits_for_all_releases() {
        let gate = Arc::new(Gate::new(0));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let gate = gate.clone();
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(10 * i));
                    gate.release(1);
                })
            })
            .collect();

        gate.acquire(4);
        assert_eq!(gate.available(), 0);
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_try_acquire() {
        let gate = Gate::new(2);
        assert!(gate.try_acquire(2));
        assert!(!gate.try_acquire(1));
        gate.release(1);
        assert!(gate.try_acquire(1));
    }

    #[test]
    fn test_acquire_timeout() {
        let gate = Gate::new(1);
        let err = gate.acquire_timeout(2, Duration::from_millis(20)).unwrap_err();
        assert_eq!(err, SyncError::Timeout { millis: 20 });
        assert_eq!(gate.available(), 1);
    }

    #[test]
    fn test_acquire_cancelled() {
        let gate = Arc::new(Gate::new(0));
        let token = CancelToken::new();
        let (remote, remote_token) = (gate.clone(), token.clone());
        let handle = thread::spawn(move || remote.acquire_cancellable(1, &remote_token));

        thread::sleep(Duration::from_millis(30));
        token.cancel();
        assert_eq!(handle.join().unwrap(), Err(SyncError::Interrupted));
    }
}

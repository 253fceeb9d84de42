/*!
 * Cooperative Cancellation
 *
 * A clonable token that blocking waits can observe. Firing the token wakes
 * every wait currently registered on it; the waits then fail with
 * `SyncError::Interrupted` without granting whatever they were waiting for.
 *
 * # Lock Ordering
 *
 * A waiter registers while holding its primitive's state mutex, so it nests
 * state -> registry. `cancel()` snapshots the registry, drops that lock, and
 * only then touches each primitive's state mutex. The reverse nesting never
 * happens.
 */

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Something a cancelled token must wake up
pub(crate) trait Wake: Send + Sync {
    fn wake(&self);
}

struct Inner {
    cancelled: AtomicBool,
    next_id: AtomicU64,
    wakers: Mutex<Vec<(u64, Weak<dyn Wake>)>>,
}

/// Cancellation signal shared between a controller and blocked waiters
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                next_id: AtomicU64::new(0),
                wakers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Fire the token. Idempotent.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }

        let targets: Vec<Arc<dyn Wake>> = self
            .inner
            .wakers
            .lock()
            .iter()
            .filter_map(|(_, w)| w.upgrade())
            .collect();

        for target in targets {
            target.wake();
        }
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Register a waker for the lifetime of the returned guard
    pub(crate) fn register(&self, waker: Weak<dyn Wake>) -> Registration<'_> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.wakers.lock().push((id, waker));
        Registration { token: self, id }
    }

    #[cfg(test)]
    fn registered(&self) -> usize {
        self.inner.wakers.lock().len()
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Removes its waker from the token on drop
pub(crate) struct Registration<'a> {
    token: &'a CancelToken,
    id: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.token.inner.wakers.lock().retain(|(id, _)| *id != self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counter(AtomicUsize);

    impl Wake for Counter {
        fn wake(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_cancel_wakes_registered() {
        let token = CancelToken::new();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let weak: Weak<dyn Wake> = Arc::downgrade(&counter) as Weak<dyn Wake>;

        let reg = token.register(weak);
        assert_eq!(token.registered(), 1);

        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);

        drop(reg);
        assert_eq!(token.registered(), 0);
    }

    #[test]
    fn test_clones_share_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}

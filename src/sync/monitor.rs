/*!
 * Monitor
 *
 * One mutex plus one condvar guarding a primitive's state. Every blocking
 * primitive in this crate owns exactly one monitor and never takes another
 * primitive's lock while holding it.
 *
 * Waits are predicate loops: the predicate is re-checked after every wake,
 * deadlines are absolute, and a `CancelToken` can abandon the wait.
 */

use super::cancel::{CancelToken, Wake};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::{Arc, Weak};
use std::time::Instant;

/// How a monitor wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitOutcome {
    Ready,
    TimedOut,
    Cancelled,
}

pub(crate) struct Monitor<S> {
    state: Mutex<S>,
    cond: Condvar,
}

impl<S: Send + 'static> Monitor<S> {
    pub(crate) fn new(state: S) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(state),
            cond: Condvar::new(),
        })
    }

    #[inline]
    pub(crate) fn lock(&self) -> MutexGuard<'_, S> {
        self.state.lock()
    }

    #[inline]
    pub(crate) fn notify_all(&self) {
        self.cond.notify_all();
    }

    /// Block while `blocked` holds
    ///
    /// `blocked` runs under the lock before the first sleep and after every
    /// wake. On `TimedOut`/`Cancelled` the predicate was still true at the
    /// moment of giving up.
    pub(crate) fn wait_while<F>(
        self: &Arc<Self>,
        guard: &mut MutexGuard<'_, S>,
        deadline: Option<Instant>,
        cancel: Option<&CancelToken>,
        mut blocked: F,
    ) -> WaitOutcome
    where
        F: FnMut(&mut S) -> bool,
    {
        let _registration = cancel.map(|token| {
            let weak: Weak<dyn Wake> = Arc::downgrade(self) as Weak<dyn Wake>;
            token.register(weak)
        });

        loop {
            if !blocked(&mut **guard) {
                return WaitOutcome::Ready;
            }

            if cancel.is_some_and(CancelToken::is_cancelled) {
                return WaitOutcome::Cancelled;
            }

            match deadline {
                None => self.cond.wait(guard),
                Some(deadline) => {
                    if self.cond.wait_until(guard, deadline).timed_out() {
                        if !blocked(&mut **guard) {
                            return WaitOutcome::Ready;
                        }
                        return WaitOutcome::TimedOut;
                    }
                }
            }
        }
    }
}

impl<S: Send> Wake for Monitor<S> {
    fn wake(&self) {
        // Taking the lock orders this wake after a waiter's predicate check
        drop(self.state.lock());
        self.cond.notify_all();
    }
}

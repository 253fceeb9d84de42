/*!
 * Event Flag
 *
 * Edge-triggered boolean signal. `trigger()` stores a status, raises a
 * one-shot "pending" edge and wakes every waiter. The edge is consumed by the
 * first `is_triggered()`/`can_get_status()` read; the status itself stays
 * readable any number of times.
 *
 * Unlike a completion token, a flag may be triggered any number of times.
 */

use super::cancel::CancelToken;
use super::monitor::{Monitor, WaitOutcome};
use super::traits::Waitable;
use crate::core::{ObjectId, SyncError, SyncResult};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub(crate) struct FlagState {
    status: bool,
    pending: bool,
    /// Bumped on every trigger so waiters can tell a trigger happened
    generation: u64,
}

/// Edge-triggered event flag
pub struct EventFlag {
    id: ObjectId,
    name: Option<String>,
    monitor: Arc<Monitor<FlagState>>,
}

impl EventFlag {
    pub fn new() -> Self {
        Self {
            id: ObjectId::next(),
            name: None,
            monitor: Monitor::new(FlagState::default()),
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new()
        }
    }

    /// Name qualified by its owner: `{owner}/{name}`
    ///
    /// An empty `name` keeps the trailing separator.
    pub fn owned(owner: impl fmt::Display, name: &str) -> Self {
        Self::named(format!("{}/{}", owner, name))
    }

    #[inline]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Set the status, raise the edge, wake all waiters
    pub fn trigger(&self, status: bool) {
        let mut state = self.monitor.lock();
        state.status = status;
        state.pending = true;
        state.generation = state.generation.wrapping_add(1);
        self.monitor.notify_all();
    }

    /// `trigger(true)`
    #[inline]
    pub fn post(&self) {
        self.trigger(true);
    }

    /// `trigger(false)`
    #[inline]
    pub fn clear(&self) {
        self.trigger(false);
    }

    /// Current status. Does not consume the edge.
    pub fn status(&self) -> bool {
        self.monitor.lock().status
    }

    /// True at most once per trigger; reading consumes the edge
    pub fn is_triggered(&self) -> bool {
        let mut state = self.monitor.lock();
        std::mem::take(&mut state.pending)
    }

    /// Same consuming semantics as [`is_triggered`](Self::is_triggered)
    pub fn can_get_status(&self) -> bool {
        self.is_triggered()
    }

    /// Block until triggered and return the status
    ///
    /// Returns immediately if an unconsumed edge is already pending.
    pub fn wait(&self) -> bool {
        match self.wait_inner(None, None, || false) {
            Ok(status) => status,
            // Unbounded, uncancellable waits only end Ready
            Err(_) => self.status(),
        }
    }

    /// Block until triggered or `timeout` elapses
    ///
    /// The timeout error carries the requested timeout, not elapsed time.
    pub fn wait_timeout(&self, timeout: Duration) -> SyncResult<bool> {
        self.wait_inner(Some(timeout), None, || false)
    }

    /// Block until triggered, the token fires, or the optional timeout elapses
    pub fn wait_cancellable(
        &self,
        cancel: &CancelToken,
        timeout: Option<Duration>,
    ) -> SyncResult<bool> {
        self.wait_inner(timeout, Some(cancel), || false)
    }

    /// Shared wait loop; `done` lets a wrapper end the wait on its own state
    ///
    /// `done` is evaluated under this flag's lock, so any state it reads must be
    /// published before the matching `trigger()`.
    pub(crate) fn wait_inner<D>(
        &self,
        timeout: Option<Duration>,
        cancel: Option<&CancelToken>,
        done: D,
    ) -> SyncResult<bool>
    where
        D: Fn() -> bool,
    {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.monitor.lock();

        if state.pending || done() {
            return Ok(state.status);
        }

        let entered_at = state.generation;
        let outcome = self.monitor.wait_while(&mut state, deadline, cancel, |s| {
            s.generation == entered_at && !done()
        });

        match outcome {
            WaitOutcome::Ready => Ok(state.status),
            WaitOutcome::TimedOut => Err(SyncError::timeout(timeout.unwrap_or_default())),
            WaitOutcome::Cancelled => Err(SyncError::Interrupted),
        }
    }
}

impl Default for EventFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl Waitable for EventFlag {
    fn wait(&self) -> SyncResult<bool> {
        Ok(EventFlag::wait(self))
    }

    fn wait_deadline(
        &self,
        deadline: Option<Instant>,
        cancel: Option<&CancelToken>,
    ) -> SyncResult<bool> {
        let timeout = deadline.map(|d| d.saturating_duration_since(Instant::now()));
        self.wait_inner(timeout, cancel, || false)
    }
}

impl fmt::Display for EventFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(EventFlag")?;
        if let Some(name) = self.name.as_deref().filter(|n| !n.is_empty()) {
            write!(f, "[{}]", name)?;
        }
        write!(f, ".{}:{})", self.id, self.status())
    }
}

impl fmt::Debug for EventFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.monitor.lock();
        f.debug_struct("EventFlag")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("status", &state.status)
            .field("pending", &state.pending)
            .finish()
    }
}

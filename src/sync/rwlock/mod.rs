/*!
 * Fair Reader/Writer Lock
 *
 * Multiple-reader, single-writer lock that hands out accountable tokens
 * instead of anonymous guards. Every acquisition returns a [`LockToken`] that
 * must be passed back to [`FairRwLock::release`].
 *
 * # Admission Policy
 *
 * - Read: no active writer (or the caller's thread owns the write lock) **and**
 *   no writer waiting. Queued writers take absolute priority over new readers.
 * - Write: no active reader **and** no active writer, unless the caller's
 *   thread already owns the write lock (re-entrant acquisition).
 *
 * Writer preference starves readers once writers arrive at roughly a third
 * of the reader rate or more. That is the intended trade-off.
 */

mod scoped;
mod slots;

pub use scoped::ScopedLock;

use super::cancel::CancelToken;
use super::monitor::{Monitor, WaitOutcome};
use crate::core::{ObjectId, SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use slots::SlotTable;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// Lock token kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockKind {
    Read,
    Write,
}

impl fmt::Display for LockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKind::Read => write!(f, "Read"),
            LockKind::Write => write!(f, "Write"),
        }
    }
}

/// Handle for one granted acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockToken {
    kind: LockKind,
    lock: ObjectId,
    slot: u32,
    generation: u32,
}

impl LockToken {
    #[inline]
    pub fn kind(&self) -> LockKind {
        self.kind
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({} Lock Token {}/{}.{})",
            self.kind, self.lock, self.slot, self.generation
        )
    }
}

/// Snapshot of lock bookkeeping for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LockStats {
    pub waiting_readers: usize,
    pub waiting_writers: usize,
    pub active_readers: usize,
    pub active_writers: usize,
}

#[derive(Default)]
struct LockState {
    waiting_readers: usize,
    waiting_writers: usize,
    active_readers: usize,
    /// Write stack; the most recent acquisition is last
    writers: Vec<LockToken>,
    owner: Option<ThreadId>,
    slots: SlotTable,
}

impl LockState {
    #[inline]
    fn owned_by(&self, me: ThreadId) -> bool {
        self.owner == Some(me)
    }

    #[inline]
    fn allows(&self, kind: LockKind, me: ThreadId) -> bool {
        match kind {
            LockKind::Read => {
                (self.writers.is_empty() || self.owned_by(me)) && self.waiting_writers == 0
            }
            LockKind::Write => {
                self.active_readers == 0 && (self.writers.is_empty() || self.owned_by(me))
            }
        }
    }

    fn waiting_mut(&mut self, kind: LockKind) -> &mut usize {
        match kind {
            LockKind::Read => &mut self.waiting_readers,
            LockKind::Write => &mut self.waiting_writers,
        }
    }

    fn grant(&mut self, lock: ObjectId, kind: LockKind, me: ThreadId) -> LockToken {
        let (slot, generation) = self.slots.insert(kind);
        let token = LockToken {
            kind,
            lock,
            slot,
            generation,
        };
        match kind {
            LockKind::Read => self.active_readers += 1,
            LockKind::Write => {
                self.writers.push(token);
                self.owner = Some(me);
            }
        }
        token
    }
}

/// Writer-preferring, token-accountable reader/writer lock
pub struct FairRwLock {
    id: ObjectId,
    monitor: Arc<Monitor<LockState>>,
}

impl FairRwLock {
    pub fn new() -> Self {
        Self {
            id: ObjectId::next(),
            monitor: Monitor::new(LockState::default()),
        }
    }

    #[inline]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Block until a read lock is granted
    pub fn read_lock(&self) -> LockToken {
        self.acquire_or_grant(LockKind::Read)
    }

    /// Block until a read lock is granted or `timeout` elapses
    pub fn read_lock_timeout(&self, timeout: Duration) -> SyncResult<LockToken> {
        self.acquire(LockKind::Read, Some(timeout), None)
    }

    pub fn read_lock_cancellable(&self, cancel: &CancelToken) -> SyncResult<LockToken> {
        self.acquire(LockKind::Read, None, Some(cancel))
    }

    /// Block until a write lock is granted
    pub fn write_lock(&self) -> LockToken {
        self.acquire_or_grant(LockKind::Write)
    }

    /// Block until a write lock is granted or `timeout` elapses
    pub fn write_lock_timeout(&self, timeout: Duration) -> SyncResult<LockToken> {
        self.acquire(LockKind::Write, Some(timeout), None)
    }

    pub fn write_lock_cancellable(&self, cancel: &CancelToken) -> SyncResult<LockToken> {
        self.acquire(LockKind::Write, None, Some(cancel))
    }

    /// Grant a read lock only if admissible right now
    pub fn try_read_lock(&self) -> Option<LockToken> {
        self.try_acquire(LockKind::Read)
    }

    /// Grant a write lock only if admissible right now
    pub fn try_write_lock(&self) -> Option<LockToken> {
        self.try_acquire(LockKind::Write)
    }

    /// Read lock released by an explicit call on the returned scope
    pub fn read_scoped(&self) -> ScopedLock<'_> {
        ScopedLock::new(self, self.read_lock())
    }

    /// Write lock released by an explicit call on the returned scope
    pub fn write_scoped(&self) -> ScopedLock<'_> {
        ScopedLock::new(self, self.write_lock())
    }

    /// Release a previously granted token and wake all waiters
    ///
    /// A write token is accepted only when it is the most recent write
    /// acquisition. Anything else must be an active read token.
    pub fn release(&self, token: LockToken) -> SyncResult<()> {
        let mut state = self.monitor.lock();
        let result = self.release_locked(&mut state, token);
        debug_assert_eq!(
            state.slots.occupied(),
            state.active_readers + state.writers.len()
        );
        self.monitor.notify_all();
        result
    }

    fn release_locked(&self, state: &mut LockState, token: LockToken) -> SyncResult<()> {
        let invalid =
            || SyncError::invalid_argument(format!("Not a valid lock token: '{}'", token));

        if token.lock != self.id {
            return Err(invalid());
        }

        if state.writers.last() == Some(&token) {
            state.writers.pop();
            state.slots.remove(token.slot, token.generation);
            if state.writers.is_empty() {
                state.owner = None;
            }
            return Ok(());
        }

        if token.kind == LockKind::Read
            && state.slots.get(token.slot, token.generation) == Some(LockKind::Read)
        {
            state.slots.remove(token.slot, token.generation);
            state.active_readers -= 1;
            return Ok(());
        }

        Err(invalid())
    }

    pub fn stats(&self) -> LockStats {
        let state = self.monitor.lock();
        LockStats {
            waiting_readers: state.waiting_readers,
            waiting_writers: state.waiting_writers,
            active_readers: state.active_readers,
            active_writers: state.writers.len(),
        }
    }

    fn acquire_or_grant(&self, kind: LockKind) -> LockToken {
        loop {
            // Unbounded, uncancellable acquisition only ever ends granted
            if let Ok(token) = self.acquire(kind, None, None) {
                return token;
            }
        }
    }

    fn try_acquire(&self, kind: LockKind) -> Option<LockToken> {
        let me = thread::current().id();
        let mut state = self.monitor.lock();
        if !state.allows(kind, me) {
            return None;
        }
        Some(state.grant(self.id, kind, me))
    }

    fn acquire(
        &self,
        kind: LockKind,
        timeout: Option<Duration>,
        cancel: Option<&CancelToken>,
    ) -> SyncResult<LockToken> {
        let me = thread::current().id();
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.monitor.lock();

        // Register intent; a waiting writer blocks new readers from here on
        *state.waiting_mut(kind) += 1;
        let outcome = self
            .monitor
            .wait_while(&mut state, deadline, cancel, |s| !s.allows(kind, me));
        *state.waiting_mut(kind) -= 1;

        match outcome {
            WaitOutcome::Ready => Ok(state.grant(self.id, kind, me)),
            WaitOutcome::TimedOut => {
                if kind == LockKind::Write {
                    // Readers held back by our intent may proceed now
                    self.monitor.notify_all();
                }
                let remaining_ms = deadline.map(remaining_millis).unwrap_or_default();
                tracing::debug!(lock = %self.id, %kind, remaining_ms, "lock acquisition timed out");
                Err(SyncError::LockTimeout { kind, remaining_ms })
            }
            WaitOutcome::Cancelled => {
                if kind == LockKind::Write {
                    self.monitor.notify_all();
                }
                Err(SyncError::Interrupted)
            }
        }
    }
}

impl Default for FairRwLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FairRwLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FairRwLock")
            .field("id", &self.id)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Signed milliseconds left until `deadline`; negative once it has passed
fn remaining_millis(deadline: Instant) -> i64 {
    let now = Instant::now();
    if deadline >= now {
        i64::try_from((deadline - now).as_millis()).unwrap_or(i64::MAX)
    } else {
        -i64::try_from((now - deadline).as_millis()).unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_readers_share() {
        let lock = FairRwLock::new();
        let a = lock.read_lock();
        let b = lock.read_lock();
        assert_eq!(lock.stats().active_readers, 2);
        assert!(lock.try_write_lock().is_none());
        lock.release(a).unwrap();
        lock.release(b).unwrap();
        assert_eq!(lock.stats(), LockStats::default());
    }

    #[test]
    fn test_write_reentrant_same_thread() {
        let lock = FairRwLock::new();
        let outer = lock.write_lock();
        let inner = lock.write_lock_timeout(Duration::from_millis(50)).unwrap();
        assert_eq!(lock.stats().active_writers, 2);

        // Owner may also read while holding the write lock
        let read = lock.read_lock_timeout(Duration::from_millis(50)).unwrap();
        lock.release(read).unwrap();

        // Only the head of the write stack is releasable
        assert!(lock.release(outer).is_err());
        lock.release(inner).unwrap();
        lock.release(outer).unwrap();
        assert_eq!(lock.stats(), LockStats::default());
    }

    #[test]
    fn test_release_rejects_stale_and_foreign_tokens() {
        let lock = FairRwLock::new();
        let other = FairRwLock::new();

        let token = lock.read_lock();
        lock.release(token).unwrap();
        let err = lock.release(token).unwrap_err();
        assert!(matches!(
            err,
            SyncError::InvalidArgument(ref m) if m.starts_with("Not a valid lock token")
        ));

        let foreign = other.read_lock();
        assert!(lock.release(foreign).is_err());
        other.release(foreign).unwrap();
    }

    #[test]
    fn test_write_timeout_when_read_held() {
        let lock = Arc::new(FairRwLock::new());
        let reader = lock.read_lock();

        let remote = lock.clone();
        let result = thread::spawn(move || remote.write_lock_timeout(Duration::from_millis(50)))
            .join()
            .unwrap();

        match result {
            Err(SyncError::LockTimeout { kind, remaining_ms }) => {
                assert_eq!(kind, LockKind::Write);
                assert!(remaining_ms <= 0);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_eq!(lock.stats().waiting_writers, 0);
        lock.release(reader).unwrap();
    }

    #[test]
    fn test_waiting_writer_blocks_new_readers() {
        let lock = Arc::new(FairRwLock::new());
        let reader = lock.read_lock();

        let remote = lock.clone();
        let writer = thread::spawn(move || {
            let token = remote.write_lock();
            remote.release(token).unwrap();
        });

        while lock.stats().waiting_writers == 0 {
            thread::sleep(Duration::from_millis(5));
        }

        // A queued writer has priority over a new reader from another thread
        let remote = lock.clone();
        let late_reader =
            thread::spawn(move || remote.read_lock_timeout(Duration::from_millis(50)));
        assert!(late_reader.join().unwrap().is_err());

        lock.release(reader).unwrap();
        writer.join().unwrap();
        assert!(lock.try_read_lock().is_some());
    }

    #[test]
    fn test_cancel_pending_write() {
        let lock = Arc::new(FairRwLock::new());
        let reader = lock.read_lock();
        let token = CancelToken::new();
        let gave_up = Arc::new(AtomicBool::new(false));

        let (remote, remote_token, flag) = (lock.clone(), token.clone(), gave_up.clone());
        let handle = thread::spawn(move || {
            let result = remote.write_lock_cancellable(&remote_token);
            flag.store(true, Ordering::SeqCst);
            result
        });

        thread::sleep(Duration::from_millis(50));
        assert!(!gave_up.load(Ordering::SeqCst));
        token.cancel();

        assert_eq!(handle.join().unwrap(), Err(SyncError::Interrupted));
        assert_eq!(lock.stats().waiting_writers, 0);
        lock.release(reader).unwrap();
    }
}

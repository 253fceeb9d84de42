/*!
 * Completion Token
 *
 * One-shot result carrier for an asynchronous operation. Pairs a
 * success/failure status with an arbitrary payload and releases both to
 * waiters exactly once.
 *
 * Built on [`EventFlag`], but completion is sticky: reading the flag's edge
 * never makes the token look incomplete again.
 */

use super::cancel::CancelToken;
use super::event::EventFlag;
use super::traits::Waitable;
use crate::core::{ObjectId, SyncError, SyncResult};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

const TOO_EARLY: &str = "Too early, you have to wait until the operation is complete";
const ALREADY_COMPLETE: &str = "Can't complete the token more than once";

struct TokenState<T> {
    status: bool,
    payload: Option<T>,
}

/// Asynchronous completion token
pub struct CompletionToken<T> {
    flag: EventFlag,
    completed: AtomicBool,
    state: Mutex<TokenState<T>>,
}

impl<T> CompletionToken<T> {
    pub fn new() -> Self {
        Self::from_payload(None)
    }

    /// Token carrying an initial payload; `complete(status)` keeps it
    pub fn with_payload(payload: T) -> Self {
        Self::from_payload(Some(payload))
    }

    fn from_payload(payload: Option<T>) -> Self {
        Self {
            flag: EventFlag::new(),
            completed: AtomicBool::new(false),
            state: Mutex::new(TokenState {
                status: false,
                payload,
            }),
        }
    }

    #[inline]
    pub fn id(&self) -> ObjectId {
        self.flag.id()
    }

    /// Sticky completion check
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    /// Completion status; `false` until completed
    pub fn status(&self) -> bool {
        self.state.lock().status
    }

    /// Complete keeping the current payload
    pub fn complete(&self, status: bool) -> SyncResult<()> {
        self.finish(status, None)
    }

    /// Complete and replace the payload
    pub fn complete_with(&self, status: bool, payload: T) -> SyncResult<()> {
        self.finish(status, Some(payload))
    }

    fn finish(&self, status: bool, payload: Option<T>) -> SyncResult<()> {
        {
            let mut state = self.state.lock();
            if self.is_complete() {
                return Err(SyncError::invalid_state(ALREADY_COMPLETE));
            }
            state.status = status;
            if payload.is_some() {
                state.payload = payload;
            }
            self.completed.store(true, Ordering::SeqCst);
        }

        tracing::trace!(token = %self.id(), status, "complete");
        self.flag.trigger(status);
        Ok(())
    }

    /// Move the payload out. Subsequent reads see `None`.
    pub fn take_payload(&self) -> SyncResult<Option<T>> {
        if !self.is_complete() {
            return Err(SyncError::invalid_state(TOO_EARLY));
        }
        Ok(self.state.lock().payload.take())
    }

    /// Block until complete and return the status
    pub fn wait(&self) -> bool {
        self.wait_until(None, None).unwrap_or_else(|_| self.status())
    }

    /// Block until complete or `timeout` elapses
    pub fn wait_timeout(&self, timeout: Duration) -> SyncResult<bool> {
        self.wait_until(Some(timeout), None)
    }

    pub fn wait_cancellable(
        &self,
        cancel: &CancelToken,
        timeout: Option<Duration>,
    ) -> SyncResult<bool> {
        self.wait_until(timeout, Some(cancel))
    }

    fn wait_until(
        &self,
        timeout: Option<Duration>,
        cancel: Option<&CancelToken>,
    ) -> SyncResult<bool> {
        if self.is_complete() {
            return Ok(self.status());
        }
        self.flag
            .wait_inner(timeout, cancel, || self.completed.load(Ordering::SeqCst))?;
        Ok(self.status())
    }
}

impl<T: Clone> CompletionToken<T> {
    /// Payload, available only after completion
    pub fn payload(&self) -> SyncResult<Option<T>> {
        if !self.is_complete() {
            return Err(SyncError::invalid_state(TOO_EARLY));
        }
        Ok(self.state.lock().payload.clone())
    }
}

impl<T> Default for CompletionToken<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> Waitable for CompletionToken<T> {
    fn wait(&self) -> SyncResult<bool> {
        Ok(CompletionToken::wait(self))
    }

    fn wait_deadline(
        &self,
        deadline: Option<Instant>,
        cancel: Option<&CancelToken>,
    ) -> SyncResult<bool> {
        let timeout = deadline.map(|d| d.saturating_duration_since(Instant::now()));
        self.wait_until(timeout, cancel)
    }
}

impl<T: fmt::Display> fmt::Display for CompletionToken<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CompletionToken.{}(", self.id())?;
        match &self.state.lock().payload {
            Some(payload) => write!(f, "{}", payload)?,
            None => write!(f, "null")?,
        }
        let phase = if self.is_complete() { "complete" } else { "waiting" };
        write!(f, ":{})", phase)
    }
}

impl<T> fmt::Debug for CompletionToken<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionToken")
            .field("id", &self.id())
            .field("complete", &self.is_complete())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_lifecycle_initial_payload() {
        let token = Arc::new(CompletionToken::with_payload("Hi there".to_string()));

        let err = token.payload().unwrap_err();
        assert_eq!(err, SyncError::InvalidState(TOO_EARLY.to_string()));
        assert!(!token.is_complete());
        assert_eq!(
            token.to_string(),
            format!("CompletionToken.{}(Hi there:waiting)", token.id())
        );

        let remote = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            remote.complete(true).unwrap();
        });

        assert!(token.wait());
        assert!(token.is_complete());
        assert!(token.wait());
        assert_eq!(token.payload().unwrap().as_deref(), Some("Hi there"));
        assert!(token.status());
        assert_eq!(
            token.to_string(),
            format!("CompletionToken.{}(Hi there:complete)", token.id())
        );
        handle.join().unwrap();
    }

    #[test]
    fn test_lifecycle_complete_with_payload() {
        let token: Arc<CompletionToken<&'static str>> = Arc::new(CompletionToken::new());
        assert_eq!(
            token.to_string(),
            format!("CompletionToken.{}(null:waiting)", token.id())
        );

        let remote = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            remote.complete_with(true, "Done!").unwrap();
        });

        assert!(token.wait_timeout(Duration::from_millis(1000)).unwrap());
        assert!(token.wait_timeout(Duration::from_millis(150)).unwrap());
        assert_eq!(token.payload().unwrap(), Some("Done!"));

        let err = token.complete(false).unwrap_err();
        assert_eq!(err, SyncError::InvalidState(ALREADY_COMPLETE.to_string()));
        // Status survives the rejected second completion
        assert!(token.status());
        handle.join().unwrap();
    }

    #[test]
    fn test_completion_is_sticky_after_edge_read() {
        let token: CompletionToken<()> = CompletionToken::new();
        token.complete(false).unwrap();
        assert!(token.flag.is_triggered());
        assert!(token.is_complete());
        assert!(!token.wait());
    }

    #[test]
    fn test_take_payload() {
        let token = CompletionToken::new();
        assert!(token.take_payload().is_err());
        token.complete_with(true, vec![1, 2, 3]).unwrap();
        assert_eq!(token.take_payload().unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(token.take_payload().unwrap(), None);
    }

    #[test]
    fn test_wait_timeout_incomplete() {
        let token: CompletionToken<()> = CompletionToken::new();
        let err = token.wait_timeout(Duration::from_millis(20)).unwrap_err();
        assert_eq!(err, SyncError::Timeout { millis: 20 });
    }
}

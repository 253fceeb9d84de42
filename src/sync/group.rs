/*!
 * Token Group
 *
 * Dynamic collection of waitable signals with a "wait for all" barrier.
 * Typical use: submit N messengers to a pool, collect their tokens, join.
 */

use super::cancel::CancelToken;
use super::traits::Waitable;
use crate::core::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Group of signals joined as one
#[derive(Default)]
pub struct TokenGroup {
    members: Mutex<Vec<Arc<dyn Waitable>>>,
}

impl TokenGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a member
    pub fn add(&self, member: Arc<dyn Waitable>) {
        self.members.lock().push(member);
    }

    pub fn len(&self) -> usize {
        self.members.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.lock().is_empty()
    }

    /// Block until every member completed
    ///
    /// Returns `true` iff every member completed with a `true` status.
    pub fn wait_for_all(&self) -> SyncResult<bool> {
        self.join(None, None)
    }

    /// Like [`wait_for_all`](Self::wait_for_all) with one overall deadline
    pub fn wait_for_all_timeout(&self, timeout: Duration) -> SyncResult<bool> {
        self.join(Some(timeout), None).map_err(|e| match e {
            SyncError::Timeout { .. } => SyncError::timeout(timeout),
            other => other,
        })
    }

    pub fn wait_for_all_cancellable(&self, cancel: &CancelToken) -> SyncResult<bool> {
        self.join(None, Some(cancel))
    }

    fn join(&self, timeout: Option<Duration>, cancel: Option<&CancelToken>) -> SyncResult<bool> {
        // Snapshot so members can be added while we block
        let members: Vec<Arc<dyn Waitable>> = self.members.lock().clone();
        let deadline = timeout.map(|t| Instant::now() + t);

        let mut all_ok = true;
        for member in members {
            let status = match (deadline, cancel) {
                (None, None) => member.wait()?,
                _ => member.wait_deadline(deadline, cancel)?,
            };
            all_ok &= status;
        }
        Ok(all_ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::CompletionToken;
    use std::thread;

    #[test]
    fn test_wait_for_all_any_order() {
        let group = TokenGroup::new();
        let tokens: Vec<Arc<CompletionToken<usize>>> =
            (0..5).map(|_| Arc::new(CompletionToken::new())).collect();
        for token in &tokens {
            group.add(token.clone());
        }
        assert_eq!(group.len(), 5);

        let handles: Vec<_> = tokens
            .iter()
            .enumerate()
            .rev()
            .map(|(i, token)| {
                let token = token.clone();
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(10 * (5 - i as u64)));
                    token.complete_with(true, i).unwrap();
                })
            })
            .collect();

        assert!(group.wait_for_all().unwrap());
        assert!(tokens.iter().all(|t| t.is_complete()));
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_wait_for_all_reports_failure() {
        let group = TokenGroup::new();
        let ok: Arc<CompletionToken<()>> = Arc::new(CompletionToken::new());
        let failed: Arc<CompletionToken<()>> = Arc::new(CompletionToken::new());
        group.add(ok.clone());
        group.add(failed.clone());
        ok.complete(true).unwrap();
        failed.complete(false).unwrap();
        assert!(!group.wait_for_all().unwrap());
    }

    #[test]
    fn test_wait_for_all_timeout() {
        let group = TokenGroup::new();
        group.add(Arc::new(CompletionToken::<()>::new()));
        let err = group
            .wait_for_all_timeout(Duration::from_millis(30))
            .unwrap_err();
        assert_eq!(err, SyncError::Timeout { millis: 30 });
    }

    #[test]
    fn test_empty_group() {
        let group = TokenGroup::new();
        assert!(group.is_empty());
        assert!(group.wait_for_all().unwrap());
    }
}

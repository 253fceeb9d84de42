/*!
 * Scoped Lock
 *
 * Holds one [`LockToken`] for the duration of a scope. Release is explicit
 * so failures surface to the caller; dropping a still-held scope releases
 * the token and logs a warning.
 */

use super::{FairRwLock, LockKind, LockToken};
use crate::core::SyncResult;

/// Token bound to the lock that granted it
#[must_use = "dropping a ScopedLock immediately releases the lock"]
pub struct ScopedLock<'a> {
    lock: &'a FairRwLock,
    token: Option<LockToken>,
}

impl<'a> ScopedLock<'a> {
    pub(super) fn new(lock: &'a FairRwLock, token: LockToken) -> Self {
        Self {
            lock,
            token: Some(token),
        }
    }

    pub fn kind(&self) -> Option<LockKind> {
        self.token.map(|t| t.kind())
    }

    #[inline]
    pub fn is_held(&self) -> bool {
        self.token.is_some()
    }

    /// Release the held token
    pub fn release(mut self) -> SyncResult<()> {
        match self.token.take() {
            Some(token) => self.lock.release(token),
            None => Ok(()),
        }
    }

    fn on_drop(&mut self) {
        if let Some(token) = self.token.take() {
            tracing::warn!(
                lock = %self.lock.id(),
                %token,
                "scoped lock dropped while held; releasing"
            );
            if let Err(e) = self.lock.release(token) {
                tracing::error!(lock = %self.lock.id(), error = %e, "scoped lock release failed");
            }
        }
    }
}

impl Drop for ScopedLock<'_> {
    fn drop(&mut self) {
        self.on_drop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_release() {
        let lock = FairRwLock::new();
        let scope = lock.write_scoped();
        assert_eq!(scope.kind(), Some(LockKind::Write));
        assert!(scope.is_held());
        assert_eq!(lock.stats().active_writers, 1);
        scope.release().unwrap();
        assert_eq!(lock.stats().active_writers, 0);
    }

    #[test]
    fn test_drop_releases() {
        let lock = FairRwLock::new();
        {
            let _scope = lock.read_scoped();
            assert_eq!(lock.stats().active_readers, 1);
        }
        assert_eq!(lock.stats().active_readers, 0);
        assert!(lock.try_write_lock().is_some());
    }
}

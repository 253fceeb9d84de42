/*!
 * Synchronization Traits
 *
 * Common shape of everything a thread can block on until it completes.
 */

use super::cancel::CancelToken;
use crate::core::SyncResult;
use std::time::Instant;

/// A signal that can be waited for
///
/// Implementations must be:
/// - **Thread-safe**: waited on from any thread
/// - **Re-checkable**: the wait re-evaluates its condition after each wake
pub trait Waitable: Send + Sync {
    /// Wait without a bound and return the completion status
    fn wait(&self) -> SyncResult<bool>;

    /// Wait until an absolute deadline and/or cancellation
    ///
    /// `None` deadline means no bound.
    fn wait_deadline(
        &self,
        deadline: Option<Instant>,
        cancel: Option<&CancelToken>,
    ) -> SyncResult<bool>;
}

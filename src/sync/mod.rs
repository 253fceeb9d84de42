/*!
 * Synchronization Primitives
 *
 * Blocking signals, a token-accountable reader/writer lock, and the
 * cancellation machinery they share.
 *
 * # Primitives
 *
 * - [`EventFlag`]: edge-triggered flag with level status
 * - [`CompletionToken`]: one-shot status + payload for an async operation
 * - [`TokenGroup`]: wait for a dynamic set of signals
 * - [`Multicaster`]: synchronous in-order listener fan-out
 * - [`FairRwLock`]: writer-preferring lock with release tokens
 * - [`Gate`]: counting semaphore with bulk acquire
 * - [`CancelToken`]: abandons blocking waits
 */

mod cancel;
mod completion;
mod event;
mod gate;
mod group;
mod monitor;
mod multicast;
mod rwlock;
mod traits;

pub(crate) use monitor::Monitor;

pub use cancel::CancelToken;
pub use completion::CompletionToken;
pub use event::EventFlag;
pub use gate::Gate;
pub use group::TokenGroup;
pub use multicast::{EventListener, Multicaster};
pub use rwlock::{FairRwLock, LockKind, LockStats, LockToken, ScopedLock};
pub use traits::Waitable;

/*!
 * Notification Multicaster
 *
 * Synchronized listener set notified synchronously, in insertion order, on
 * the caller's thread.
 *
 * # Known Limitation
 *
 * There is no isolation between listeners. If one returns an error (or
 * panics) the listeners after it are not notified and the error reaches the
 * caller. If one blocks, the caller blocks with it. Delivery that survives a
 * misbehaving listener needs a different, asynchronous multicaster.
 */

use crate::core::BoxError;
use parking_lot::Mutex;
use std::sync::Arc;

/// Receiver of multicast notifications
pub trait EventListener<P: ?Sized, E: ?Sized>: Send + Sync {
    /// `producer` is whatever the notifier presents as the event source
    fn event_notification(&self, producer: &P, event: &E) -> Result<(), BoxError>;
}

/// Fan-out notifier
pub struct Multicaster<P: ?Sized, E: ?Sized> {
    listeners: Mutex<Vec<Arc<dyn EventListener<P, E>>>>,
}

impl<P: ?Sized, E: ?Sized> Multicaster<P, E> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Add a listener; adding one that is already present is a no-op
    ///
    /// Returns `true` if the set changed.
    pub fn add_listener(&self, listener: Arc<dyn EventListener<P, E>>) -> bool {
        let mut listeners = self.listeners.lock();
        if listeners.iter().any(|l| same_listener(l, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    /// Remove a listener. Returns `true` if it was present.
    pub fn remove_listener(&self, listener: &Arc<dyn EventListener<P, E>>) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|l| !same_listener(l, listener));
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }

    /// Notify every listener in order; stops at the first error
    ///
    /// Iterates a snapshot, so callbacks may add or remove listeners.
    pub fn notify_listeners(&self, producer: &P, event: &E) -> Result<(), BoxError> {
        let snapshot: Vec<_> = self.listeners.lock().clone();
        for listener in snapshot {
            listener.event_notification(producer, event)?;
        }
        Ok(())
    }
}

impl<P: ?Sized, E: ?Sized> Default for Multicaster<P, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P, E, F> EventListener<P, E> for F
where
    P: ?Sized,
    E: ?Sized,
    F: Fn(&P, &E) -> Result<(), BoxError> + Send + Sync,
{
    fn event_notification(&self, producer: &P, event: &E) -> Result<(), BoxError> {
        self(producer, event)
    }
}

/// Identity comparison on the allocation, ignoring vtable pointers
#[inline]
fn same_listener<P: ?Sized, E: ?Sized>(
    a: &Arc<dyn EventListener<P, E>>,
    b: &Arc<dyn EventListener<P, E>>,
) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

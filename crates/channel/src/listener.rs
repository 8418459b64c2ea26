//! Listener registry with one-shot and persistent subscriptions.
//!
//! Registration is keyed by the identity of the `Arc`: adding the same
//! listener again is a no-op, whatever the one-shot flag of the second call.

use std::sync::{Arc, Mutex, PoisonError};

/// Receives envelopes of type `T` dispatched by a channel.
pub trait EnvelopeListener<T>: Send + Sync {
    fn on_receive(&self, envelope: &T);
}

impl<T, F> EnvelopeListener<T> for F
where
    F: Fn(&T) + Send + Sync,
{
    fn on_receive(&self, envelope: &T) {
        self(envelope)
    }
}

struct Entry<T> {
    listener: Arc<dyn EnvelopeListener<T>>,
    remove_after_receive: bool,
}

impl<T> Clone for Entry<T> {
    fn clone(&self) -> Self {
        Self {
            listener: self.listener.clone(),
            remove_after_receive: self.remove_after_receive,
        }
    }
}

/// Ordered listeners for one envelope type.
pub struct ListenerRegistry<T> {
    entries: Mutex<Vec<Entry<T>>>,
}

impl<T> Default for ListenerRegistry<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }
}

impl<T> ListenerRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener. Returns `false` if it was already registered.
    pub fn add(&self, listener: Arc<dyn EnvelopeListener<T>>, remove_after_receive: bool) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.iter().any(|e| same_listener(&e.listener, &listener)) {
            return false;
        }
        entries.push(Entry {
            listener,
            remove_after_receive,
        });
        true
    }

    /// Unregisters a listener. Returns whether it was registered.
    pub fn remove(&self, listener: &Arc<dyn EnvelopeListener<T>>) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|e| !same_listener(&e.listener, listener));
        entries.len() != before
    }

    pub fn contains(&self, listener: &Arc<dyn EnvelopeListener<T>>) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|e| same_listener(&e.listener, listener))
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers an envelope to every registered listener in order.
    ///
    /// The registry is snapshotted and one-shot listeners are removed under
    /// the lock, so a one-shot listener fires exactly once even when two
    /// dispatches race. Listeners run without the lock held and may add or
    /// remove listeners, which affects the next dispatch only.
    pub fn dispatch(&self, envelope: &T) -> usize {
        let snapshot = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            let snapshot = entries.clone();
            entries.retain(|e| !e.remove_after_receive);
            snapshot
        };

        for entry in &snapshot {
            entry.listener.on_receive(envelope);
        }
        snapshot.len()
    }
}

fn same_listener<T>(a: &Arc<dyn EnvelopeListener<T>>, b: &Arc<dyn EnvelopeListener<T>>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

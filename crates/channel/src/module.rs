//! Module pipeline applied to envelopes on send and on receive.
//!
//! A module may pass an envelope through, replace it, or swallow it by
//! returning `None`. Swallowing is silent: the send does not reach the
//! transport, or the received envelope does not reach any listener.

use std::sync::{Arc, PoisonError, RwLock};

/// A transform stage for envelopes of type `T`.
pub trait ChannelModule<T>: Send + Sync {
    /// Called before an envelope is handed to the transport.
    fn on_sending(&self, envelope: T) -> Option<T> {
        Some(envelope)
    }

    /// Called when an envelope arrives, before listener dispatch.
    fn on_receiving(&self, envelope: T) -> Option<T> {
        Some(envelope)
    }
}

/// An ordered, mutable list of modules for one envelope type.
pub struct ModuleChain<T> {
    modules: RwLock<Vec<Arc<dyn ChannelModule<T>>>>,
}

impl<T> Default for ModuleChain<T> {
    fn default() -> Self {
        Self {
            modules: RwLock::new(Vec::new()),
        }
    }
}

impl<T> ModuleChain<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a module to the end of the chain.
    pub fn add(&self, module: Arc<dyn ChannelModule<T>>) {
        self.modules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(module);
    }

    /// Removes a module by identity. Returns whether it was present.
    pub fn remove(&self, module: &Arc<dyn ChannelModule<T>>) -> bool {
        let mut modules = self.modules.write().unwrap_or_else(PoisonError::into_inner);
        let before = modules.len();
        modules.retain(|m| !same_module(m, module));
        modules.len() != before
    }

    pub fn len(&self) -> usize {
        self.modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs the send stages in order. `None` means the envelope was swallowed.
    pub fn apply_sending(&self, envelope: T) -> Option<T> {
        self.snapshot()
            .iter()
            .try_fold(envelope, |envelope, module| module.on_sending(envelope))
    }

    /// Runs the receive stages in order. `None` means the envelope was swallowed.
    pub fn apply_receiving(&self, envelope: T) -> Option<T> {
        self.snapshot()
            .iter()
            .try_fold(envelope, |envelope, module| module.on_receiving(envelope))
    }

    // Modules run without the lock held so they may mutate the chain.
    fn snapshot(&self) -> Vec<Arc<dyn ChannelModule<T>>> {
        self.modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn same_module<T>(a: &Arc<dyn ChannelModule<T>>, b: &Arc<dyn ChannelModule<T>>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

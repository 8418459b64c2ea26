//! In-process transport that records sent envelopes.
//!
//! Received envelopes are injected with [`MemoryTransport::raise_on_receive`],
//! which calls the listener synchronously on the caller's thread.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use protocol::error::{ProtocolError, Result};
use protocol::{Envelope, EnvelopeKind, SessionCompression, SessionEncryption};

use super::{Transport, TransportListener};

/// A transport kept entirely in memory.
pub struct MemoryTransport {
    sent: Mutex<Vec<Envelope>>,
    listener: RwLock<Option<Arc<dyn TransportListener>>>,
    connected: AtomicBool,
    close_calls: AtomicUsize,
    fail_close: AtomicBool,
    compression: Mutex<SessionCompression>,
    encryption: Mutex<SessionEncryption>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    /// Creates a connected transport with no compression and no encryption.
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            listener: RwLock::new(None),
            connected: AtomicBool::new(true),
            close_calls: AtomicUsize::new(0),
            fail_close: AtomicBool::new(false),
            compression: Mutex::new(SessionCompression::None),
            encryption: Mutex::new(SessionEncryption::None),
        }
    }

    /// Makes every subsequent `close` call fail after recording it.
    pub fn fail_on_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Delivers an envelope to the listener as if read from the peer.
    ///
    /// Returns `false` when no listener is registered.
    pub fn raise_on_receive(&self, envelope: Envelope) -> bool {
        let listener = self
            .listener
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match listener {
            Some(listener) => {
                listener.on_receive(envelope);
                true
            }
            None => false,
        }
    }

    /// Returns a copy of every envelope sent so far.
    pub fn sent(&self) -> Vec<Envelope> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Returns the sent envelopes of one kind.
    pub fn sent_of_kind(&self, kind: EnvelopeKind) -> Vec<Envelope> {
        self.sent()
            .into_iter()
            .filter(|envelope| envelope.kind() == kind)
            .collect()
    }

    /// Drains the sent envelopes.
    pub fn take_sent(&self) -> Vec<Envelope> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Number of times `close` has been called.
    pub fn close_count(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

impl Transport for MemoryTransport {
    fn send(&self, envelope: Envelope) -> Result<()> {
        if !self.is_connected() {
            return Err(ProtocolError::ConnectionClosed(
                "memory transport is closed".to_string(),
            ));
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(envelope);
        Ok(())
    }

    fn set_listener(&self, listener: Arc<dyn TransportListener>) {
        *self.listener.write().unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(ProtocolError::Io("close failed".to_string()));
        }

        if self.connected.swap(false, Ordering::SeqCst) {
            let listener = self
                .listener
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(listener) = listener {
                listener.on_closed();
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn compression(&self) -> SessionCompression {
        *self.compression.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_compression(&self, compression: SessionCompression) -> Result<()> {
        *self.compression.lock().unwrap_or_else(PoisonError::into_inner) = compression;
        Ok(())
    }

    fn encryption(&self) -> SessionEncryption {
        *self.encryption.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_encryption(&self, encryption: SessionEncryption) -> Result<()> {
        *self.encryption.lock().unwrap_or_else(PoisonError::into_inner) = encryption;
        Ok(())
    }
}

//! Transport boundary of the channel.
//!
//! A transport moves envelopes between peers. Sends are fire-and-forget:
//! [`Transport::send`] queues the envelope and returns without waiting for
//! the network. Received envelopes are pushed to the registered
//! [`TransportListener`] from a context owned by the transport.
//!
//! - [`MemoryTransport`]: in-process transport that records what is sent
//! - [`TcpTransport`]: newline-delimited JSON over TCP

pub mod memory;
pub mod tcp;

use std::sync::Arc;

use protocol::error::Result;
use protocol::{Envelope, SessionCompression, SessionEncryption};

/// Receives envelopes and lifecycle events from a transport.
pub trait TransportListener: Send + Sync {
    /// Called for every envelope read from the peer.
    fn on_receive(&self, envelope: Envelope);

    /// Called once when the transport is closed, locally or by the peer.
    fn on_closed(&self) {}
}

/// A duplex envelope transport.
pub trait Transport: Send + Sync {
    /// Queues an envelope for delivery.
    ///
    /// Fails with [`protocol::ProtocolError::ConnectionClosed`] once the
    /// transport is closed.
    fn send(&self, envelope: Envelope) -> Result<()>;

    /// Sets the listener for received envelopes, replacing any previous one.
    fn set_listener(&self, listener: Arc<dyn TransportListener>);

    /// Closes the transport. Closing twice is not an error.
    fn close(&self) -> Result<()>;

    /// Returns whether the transport is open.
    fn is_connected(&self) -> bool;

    fn compression(&self) -> SessionCompression;

    fn set_compression(&self, compression: SessionCompression) -> Result<()>;

    fn encryption(&self) -> SessionEncryption;

    fn set_encryption(&self, encryption: SessionEncryption) -> Result<()>;
}

pub use memory::MemoryTransport;
pub use tcp::TcpTransport;

//! TCP transport carrying newline-delimited JSON envelopes.
//!
//! Two background tasks own the socket: a writer fed by an unbounded queue
//! and a reader that pushes parsed envelopes to the listener. The reader
//! holds incoming data until a listener is registered.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use protocol::error::{ProtocolError, Result};
use protocol::{Envelope, SessionCompression, SessionEncryption};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use super::{Transport, TransportListener};

/// State shared between the transport handle and its tasks.
struct Shared {
    listener: RwLock<Option<Arc<dyn TransportListener>>>,
    listener_ready: Notify,
    connected: AtomicBool,
    shutdown: CancellationToken,
}

impl Shared {
    fn listener(&self) -> Option<Arc<dyn TransportListener>> {
        self.listener
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Marks the transport closed and notifies the listener once.
    fn mark_closed(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.shutdown.cancel();
            if let Some(listener) = self.listener() {
                listener.on_closed();
            }
        }
    }
}

/// A transport over a TCP stream.
pub struct TcpTransport {
    outgoing: mpsc::UnboundedSender<String>,
    shared: Arc<Shared>,
    peer_addr: Option<SocketAddr>,
}

impl TcpTransport {
    /// Connects to a remote peer.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::from_stream(stream))
    }

    /// Wraps an already connected stream.
    ///
    /// Must be called within a tokio runtime.
    pub fn from_stream(stream: TcpStream) -> Self {
        let peer_addr = stream.peer_addr().ok();
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            listener: RwLock::new(None),
            listener_ready: Notify::new(),
            connected: AtomicBool::new(true),
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(write_loop(write_half, outgoing_rx, shared.clone()));
        tokio::spawn(read_loop(read_half, shared.clone()));

        tracing::debug!(peer = ?peer_addr, "TCP transport started");

        Self {
            outgoing,
            shared,
            peer_addr,
        }
    }

    /// Address of the remote peer, if known.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outgoing: mpsc::UnboundedReceiver<String>,
    shared: Arc<Shared>,
) {
    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => {
                // Flush what was queued before the close.
                while let Ok(line) = outgoing.try_recv() {
                    if writer.write_all(format!("{}\n", line).as_bytes()).await.is_err() {
                        break;
                    }
                }
                break;
            }
            line = outgoing.recv() => {
                let Some(mut line) = line else { break };
                line.push('\n');
                if let Err(e) = writer.write_all(line.as_bytes()).await {
                    tracing::error!(error = %e, "failed to write envelope");
                    break;
                }
            }
        }
    }

    let _ = writer.shutdown().await;
    shared.mark_closed();
}

async fn read_loop(reader: OwnedReadHalf, shared: Arc<Shared>) {
    let listener = loop {
        if let Some(listener) = shared.listener() {
            break listener;
        }
        tokio::select! {
            _ = shared.shutdown.cancelled() => return,
            _ = shared.listener_ready.notified() => {}
        }
    };

    let mut lines = BufReader::new(reader).lines();
    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match Envelope::from_json(&line) {
                        Ok(envelope) => listener.on_receive(envelope),
                        Err(e) => tracing::warn!(error = %e, "discarding unparseable envelope"),
                    }
                }
                Ok(None) => {
                    tracing::debug!("peer closed the connection");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to read envelope");
                    break;
                }
            }
        }
    }

    shared.mark_closed();
}

impl Transport for TcpTransport {
    fn send(&self, envelope: Envelope) -> Result<()> {
        if !self.is_connected() {
            return Err(ProtocolError::ConnectionClosed(
                "tcp transport is closed".to_string(),
            ));
        }
        let line = envelope.to_json()?;
        self.outgoing
            .send(line)
            .map_err(|_| ProtocolError::ConnectionClosed("writer task stopped".to_string()))
    }

    fn set_listener(&self, listener: Arc<dyn TransportListener>) {
        *self
            .shared
            .listener
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(listener);
        self.shared.listener_ready.notify_one();
    }

    fn close(&self) -> Result<()> {
        self.shared.mark_closed();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn compression(&self) -> SessionCompression {
        SessionCompression::None
    }

    fn set_compression(&self, compression: SessionCompression) -> Result<()> {
        match compression {
            SessionCompression::None => Ok(()),
            other => Err(ProtocolError::Unsupported(format!(
                "{:?} compression over tcp",
                other
            ))),
        }
    }

    fn encryption(&self) -> SessionEncryption {
        SessionEncryption::None
    }

    fn set_encryption(&self, encryption: SessionEncryption) -> Result<()> {
        match encryption {
            SessionEncryption::None => Ok(()),
            other => Err(ProtocolError::Unsupported(format!(
                "{:?} encryption over tcp",
                other
            ))),
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

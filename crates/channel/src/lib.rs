//! # LIME Channel Library
//!
//! This crate provides the channel engine of the LIME protocol: the
//! component that gates envelope traffic by session state, runs envelopes
//! through module pipelines and dispatches them to listeners.
//!
//! ## Overview
//!
//! - **Module Pipeline**: ordered transform stages per envelope type
//! - **Listener Registry**: one-shot and persistent listeners, deduplicated
//! - **Session State**: state, session id and nodes under a single lock
//! - **Keep-Alive**: periodic pings and disconnection on silence
//! - **Client Handshake**: negotiation and authentication up to `Established`
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       ClientChannel                         │
//! │              (handshake, session operations)                │
//! ├─────────────────────────────────────────────────────────────┤
//! │                          Channel                            │
//! │  ┌───────────────┐  ┌──────────────────┐  ┌──────────────┐  │
//! │  │ ModuleChain   │  │ ListenerRegistry │  │ SessionCtx   │  │
//! │  └───────────────┘  └──────────────────┘  └──────────────┘  │
//! │                        KeepAlive task                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │             Transport (memory, TCP + JSON lines)            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use channel::{ChannelConfig, ClientChannel, SessionEstablishment, TcpTransport};
//! use protocol::{Authentication, Identity, SessionState};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let transport = Arc::new(TcpTransport::connect("127.0.0.1:55321").await?);
//!     let client = ClientChannel::new(transport, ChannelConfig::default())?;
//!
//!     let identity: Identity = "alice@example.org".parse()?;
//!     let establishment = SessionEstablishment::new(identity, Authentication::plain("secret"))
//!         .with_instance("home");
//!     let session = client.establish_session_async(establishment).await?;
//!     assert_eq!(session.state, SessionState::Established);
//!
//!     client.send_finishing_session()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`channel`]: The channel engine
//! - [`client`]: Client session operations and handshake
//! - [`handshake`]: Pure handshake transitions
//! - [`module`]: Module pipeline
//! - [`listener`]: Listener registry
//! - [`state`]: Session state
//! - [`keepalive`]: Keep-alive scheduler
//! - [`receipt`]: Automatic receipt notifications
//! - [`transport`]: Transport boundary and implementations
//! - [`config`]: Configuration loading and defaults
//! - [`error`]: Error types

pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod handshake;
pub mod keepalive;
pub mod listener;
pub mod module;
pub mod receipt;
pub mod state;
pub mod transport;

pub use channel::{Channel, TransportClosed, WeakChannel};
pub use client::{ClientChannel, EstablishSessionListener};
pub use config::{ChannelConfig, ClientConfig, Config, ConfigError};
pub use error::{ChannelError, Result};
pub use handshake::{next_action, HandshakeAction, SessionEstablishment};
pub use keepalive::KeepAlive;
pub use listener::{EnvelopeListener, ListenerRegistry};
pub use module::{ChannelModule, ModuleChain};
pub use receipt::NotifyReceiptModule;
pub use state::{SessionContext, SessionSnapshot};
pub use transport::{MemoryTransport, TcpTransport, Transport, TransportListener};

//! # LIME Protocol Library
//!
//! This crate provides the envelope data model of the LIME messaging
//! protocol.
//!
//! ## Overview
//!
//! LIME peers exchange four kinds of envelopes over a duplex transport:
//!
//! - **Session**: negotiates and controls the session lifecycle
//! - **Message**: carries a document to a destination
//! - **Notification**: reports delivery events about a message
//! - **Command**: requests or responds over a resource
//!
//! Envelopes are addressed with [`Node`]s (`name@domain/instance`).
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{Envelope, Message, Node};
//!
//! let to: Node = "bob@example.org/home".parse().unwrap();
//! let message = Message::text(to, "hello");
//!
//! let json = Envelope::from(message.clone()).to_json().unwrap();
//! let parsed = Envelope::from_json(&json).unwrap();
//! assert_eq!(parsed, Envelope::Message(message));
//! ```
//!
//! ## Modules
//!
//! - [`envelope`]: Envelope kinds and their enumerations
//! - [`node`]: Identity and node addressing
//! - [`security`]: Authentication payloads
//! - [`resources`]: Presence, contact and delegation documents
//! - [`error`]: Error types

pub mod envelope;
pub mod error;
pub mod node;
pub mod resources;
pub mod security;

pub use envelope::{
    new_id, Command, CommandMethod, CommandStatus, Envelope, EnvelopeHeader, EnvelopeKind, Event,
    Message, Notification, Reason, Session, SessionCompression, SessionEncryption, SessionState,
    PING_MEDIA_TYPE, PING_URI, TEXT_PLAIN_MEDIA_TYPE,
};
pub use error::{ProtocolError, Result};
pub use node::{Identity, Node};
pub use security::{Authentication, AuthenticationScheme};

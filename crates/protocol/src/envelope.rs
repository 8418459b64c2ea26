//! Envelope definitions: messages, notifications, commands and sessions.
//!
//! Every envelope shares the same header (`id`, `from`, `to`, `pp`,
//! `metadata`). On the wire the kind of an envelope is inferred from the
//! fields it carries: `state` for sessions, `method` for commands, `event`
//! for notifications and `content` for messages.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::node::Node;
use crate::security::{Authentication, AuthenticationScheme};

/// Well-known URI of the ping resource.
pub const PING_URI: &str = "/ping";

/// Media type of the ping document.
pub const PING_MEDIA_TYPE: &str = "application/vnd.lime.ping+json";

/// Media type of plain text message content.
pub const TEXT_PLAIN_MEDIA_TYPE: &str = "text/plain";

/// Generates a new random envelope id.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Fields shared by every envelope kind.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EnvelopeHeader {
    /// Envelope identifier. Fire-and-forget envelopes may omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Originator of the envelope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Node>,
    /// Destination of the envelope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Node>,
    /// Per-hop originator, set by routing proxies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pp: Option<Node>,
    /// Free-form metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

/// Reason attached to failed notifications, commands and sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reason {
    /// Numeric reason code.
    pub code: i32,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Reason {
    /// Creates a reason with a description.
    pub fn new(code: i32, description: impl Into<String>) -> Self {
        Self {
            code,
            description: Some(description.into()),
        }
    }
}

// ============================================================================
// Message
// ============================================================================

/// A message carrying a document to a destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(flatten)]
    pub header: EnvelopeHeader,
    /// Media type of the content.
    #[serde(rename = "type")]
    pub media_type: String,
    /// The document.
    pub content: Value,
}

impl Message {
    /// Creates a message with a fresh id.
    pub fn new(media_type: impl Into<String>, content: Value) -> Self {
        Self {
            header: EnvelopeHeader {
                id: Some(new_id()),
                ..Default::default()
            },
            media_type: media_type.into(),
            content,
        }
    }

    /// Creates a `text/plain` message addressed to `to`.
    pub fn text(to: Node, text: impl Into<String>) -> Self {
        let mut message = Self::new(TEXT_PLAIN_MEDIA_TYPE, Value::String(text.into()));
        message.header.to = Some(to);
        message
    }
}

// ============================================================================
// Notification
// ============================================================================

/// Delivery events reported through notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Event {
    Accepted,
    Validated,
    Authorized,
    Dispatched,
    Received,
    Consumed,
    Failed,
}

/// A notification about the delivery of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(flatten)]
    pub header: EnvelopeHeader,
    /// The reported event.
    pub event: Event,
    /// Failure reason, for `Failed` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<Reason>,
}

impl Notification {
    /// Creates a notification for the message `id`.
    pub fn new(id: impl Into<String>, event: Event) -> Self {
        Self {
            header: EnvelopeHeader {
                id: Some(id.into()),
                ..Default::default()
            },
            event,
            reason: None,
        }
    }
}

// ============================================================================
// Command
// ============================================================================

/// Command methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommandMethod {
    Get,
    Set,
    Delete,
    Observe,
    Subscribe,
    Unsubscribe,
    Merge,
}

/// Command response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommandStatus {
    Success,
    Failure,
    Pending,
}

/// A request or response over a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    #[serde(flatten)]
    pub header: EnvelopeHeader,
    /// The method applied to the resource.
    pub method: CommandMethod,
    /// Resource URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// Media type of the resource document.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// The resource document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<Value>,
    /// Status, present on responses only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<CommandStatus>,
    /// Failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<Reason>,
}

impl Command {
    /// Creates a request with a fresh id.
    pub fn request(method: CommandMethod, uri: impl Into<String>) -> Self {
        Self {
            header: EnvelopeHeader {
                id: Some(new_id()),
                ..Default::default()
            },
            method,
            uri: Some(uri.into()),
            media_type: None,
            resource: None,
            status: None,
            reason: None,
        }
    }

    /// Creates a `GET /ping` request.
    pub fn ping_request() -> Self {
        Self::request(CommandMethod::Get, PING_URI)
    }

    /// Returns whether this command is a `GET /ping` request.
    pub fn is_ping_request(&self) -> bool {
        self.method == CommandMethod::Get
            && self.status.is_none()
            && self.uri.as_deref() == Some(PING_URI)
    }

    /// Builds the success response to a ping request.
    ///
    /// The response keeps the request id and is addressed to its sender.
    pub fn ping_response(request: &Command) -> Self {
        Self {
            header: EnvelopeHeader {
                id: request.header.id.clone(),
                to: request.header.from.clone(),
                ..Default::default()
            },
            method: CommandMethod::Get,
            uri: None,
            media_type: Some(PING_MEDIA_TYPE.to_string()),
            resource: Some(Value::Object(Default::default())),
            status: Some(CommandStatus::Success),
            reason: None,
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// Session states, in protocol order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    New,
    Negotiating,
    Authenticating,
    Established,
    Finishing,
    Finished,
    Failed,
}

impl SessionState {
    /// Returns whether the session can no longer progress.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Finished | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::New => "new",
            SessionState::Negotiating => "negotiating",
            SessionState::Authenticating => "authenticating",
            SessionState::Established => "established",
            SessionState::Finishing => "finishing",
            SessionState::Finished => "finished",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Transport compression options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionCompression {
    #[default]
    None,
    Gzip,
}

/// Transport encryption options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionEncryption {
    #[default]
    None,
    Tls,
}

/// A session envelope, used to negotiate and control the session lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(flatten)]
    pub header: EnvelopeHeader,
    /// Session state.
    pub state: SessionState,
    /// Encryption options offered by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_options: Option<Vec<SessionEncryption>>,
    /// Chosen encryption.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<SessionEncryption>,
    /// Compression options offered by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression_options: Option<Vec<SessionCompression>>,
    /// Chosen compression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<SessionCompression>,
    /// Authentication scheme.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<AuthenticationScheme>,
    /// Authentication document, opaque to the channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<Value>,
    /// Failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<Reason>,
}

impl Session {
    /// Creates a session envelope in the given state with no id.
    pub fn new(state: SessionState) -> Self {
        Self {
            header: EnvelopeHeader::default(),
            state,
            encryption_options: None,
            encryption: None,
            compression_options: None,
            compression: None,
            scheme: None,
            authentication: None,
            reason: None,
        }
    }

    /// Sets the scheme and document of an authentication.
    pub fn set_authentication(&mut self, authentication: &Authentication) {
        self.scheme = Some(authentication.scheme());
        self.authentication = Some(authentication.document().clone());
    }

    /// Returns the authentication carried by this session, if any.
    pub fn authentication(&self) -> Option<Authentication> {
        let scheme = self.scheme?;
        let document = self.authentication.clone().unwrap_or(Value::Null);
        Some(Authentication::from_parts(scheme, document))
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// The kind of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    Message,
    Notification,
    Command,
    Session,
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EnvelopeKind::Message => "message",
            EnvelopeKind::Notification => "notification",
            EnvelopeKind::Command => "command",
            EnvelopeKind::Session => "session",
        };
        f.write_str(name)
    }
}

/// Any envelope exchanged over a transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Envelope {
    // Variant order matters for untagged deserialization.
    Session(Session),
    Command(Command),
    Notification(Notification),
    Message(Message),
}

impl Envelope {
    /// The kind of this envelope.
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Envelope::Message(_) => EnvelopeKind::Message,
            Envelope::Notification(_) => EnvelopeKind::Notification,
            Envelope::Command(_) => EnvelopeKind::Command,
            Envelope::Session(_) => EnvelopeKind::Session,
        }
    }

    /// The shared header.
    pub fn header(&self) -> &EnvelopeHeader {
        match self {
            Envelope::Message(m) => &m.header,
            Envelope::Notification(n) => &n.header,
            Envelope::Command(c) => &c.header,
            Envelope::Session(s) => &s.header,
        }
    }

    /// The envelope id, if any.
    pub fn id(&self) -> Option<&str> {
        self.header().id.as_deref()
    }

    /// Serializes the envelope to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserializes an envelope from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl From<Message> for Envelope {
    fn from(message: Message) -> Self {
        Envelope::Message(message)
    }
}

impl From<Notification> for Envelope {
    fn from(notification: Notification) -> Self {
        Envelope::Notification(notification)
    }
}

impl From<Command> for Envelope {
    fn from(command: Command) -> Self {
        Envelope::Command(command)
    }
}

impl From<Session> for Envelope {
    fn from(session: Session) -> Self {
        Envelope::Session(session)
    }
}

//! Resource documents exchanged through commands.
//!
//! These are plain data; the channel never interprets them.

use serde::{Deserialize, Serialize};

use crate::envelope::CommandMethod;
use crate::node::{Identity, Node};

/// Media type of [`Presence`].
pub const PRESENCE_MEDIA_TYPE: &str = "application/vnd.lime.presence+json";

/// Media type of [`Contact`].
pub const CONTACT_MEDIA_TYPE: &str = "application/vnd.lime.contact+json";

/// Media type of [`Delegation`].
pub const DELEGATION_MEDIA_TYPE: &str = "application/vnd.lime.delegation+json";

/// Presence status of an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PresenceStatus {
    Unavailable,
    Available,
    Busy,
    Away,
}

/// How the server routes envelopes addressed to an identity without instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RoutingRule {
    Instance,
    Identity,
    IdentityByDistance,
    IdentityByPriority,
    Promiscuous,
    DomainByDistance,
}

/// Presence information of an identity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PresenceStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_rule: Option<RoutingRule>,
    /// RFC 3339 timestamp of the last activity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    /// Instances currently online.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instances: Option<Vec<String>>,
}

impl Presence {
    /// Creates a presence with a status and a routing rule.
    pub fn new(status: PresenceStatus, routing_rule: RoutingRule) -> Self {
        Self {
            status: Some(status),
            routing_rule: Some(routing_rule),
            ..Default::default()
        }
    }
}

/// A roster entry.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_pending: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_presence: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_account_info: Option<bool>,
}

/// A command type and the methods allowed on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedCommand {
    #[serde(rename = "type")]
    pub media_type: String,
    pub methods: Vec<CommandMethod>,
}

/// Grants a node permission to act on behalf of the owner.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Delegation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destinations: Option<Vec<Identity>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands: Option<Vec<LinkedCommand>>,
    /// Message media types the target may send.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<String>>,
}

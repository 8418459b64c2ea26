//! Protocol addressing: identities and nodes.
//!
//! An [`Identity`] is `name@domain`. A [`Node`] is an identity plus an optional
//! `/instance` suffix. Both are carried on the wire as plain strings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// A `name@domain` identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity {
    /// Name part, before the `@`.
    pub name: Option<String>,
    /// Domain part, after the `@`.
    pub domain: Option<String>,
}

impl Identity {
    /// Creates an identity from its parts.
    pub fn new(name: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            domain: Some(domain.into()),
        }
    }

    /// Parses an identity from `name@domain`.
    ///
    /// Any `/instance` suffix is ignored.
    pub fn parse(s: &str) -> Result<Self> {
        Node::parse(s).map(|node| node.to_identity())
    }

    /// Attaches an instance, producing a node.
    pub fn to_node(&self, instance: Option<&str>) -> Node {
        Node {
            name: self.name.clone(),
            domain: self.domain.clone(),
            instance: instance.map(str::to_string),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.name {
            write!(f, "{}", name)?;
        }
        if let Some(domain) = &self.domain {
            write!(f, "@{}", domain)?;
        }
        Ok(())
    }
}

impl FromStr for Identity {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Identity {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.to_string()
    }
}

/// A `name@domain/instance` node address.
///
/// Fields are optional because peers may omit parts of the address; the
/// channel can fill them from the session when configured to do so.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Node {
    /// Name part, before the `@`.
    pub name: Option<String>,
    /// Domain part, between `@` and `/`.
    pub domain: Option<String>,
    /// Instance part, after the `/`.
    pub instance: Option<String>,
}

impl Node {
    /// Creates a node from its parts.
    pub fn new(name: impl Into<String>, domain: impl Into<String>, instance: Option<&str>) -> Self {
        Self {
            name: Some(name.into()),
            domain: Some(domain.into()),
            instance: instance.map(str::to_string),
        }
    }

    /// Parses a node from `name@domain/instance`.
    ///
    /// Text without `@` is taken as the name alone. Empty parts are treated
    /// as absent.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ProtocolError::InvalidNode("empty node".to_string()));
        }

        let (identity, instance) = match s.split_once('/') {
            Some((identity, instance)) => (identity, non_empty(instance)),
            None => (s, None),
        };

        let (name, domain) = match identity.split_once('@') {
            Some((name, domain)) => {
                if domain.contains('@') {
                    return Err(ProtocolError::InvalidNode(s.to_string()));
                }
                (non_empty(name), non_empty(domain))
            }
            None => (non_empty(identity), None),
        };

        if name.is_none() && domain.is_none() {
            return Err(ProtocolError::InvalidNode(s.to_string()));
        }

        Ok(Self {
            name,
            domain,
            instance,
        })
    }

    /// Returns the identity part, dropping the instance.
    pub fn to_identity(&self) -> Identity {
        Identity {
            name: self.name.clone(),
            domain: self.domain.clone(),
        }
    }

    /// Returns whether name, domain and instance are all present.
    pub fn is_complete(&self) -> bool {
        self.name.is_some() && self.domain.is_some() && self.instance.is_some()
    }

    /// Fills absent parts from `other`, keeping the parts already present.
    pub fn fill_from(&mut self, other: &Node) {
        if self.name.is_none() {
            self.name = other.name.clone();
        }
        if self.domain.is_none() {
            self.domain = other.domain.clone();
        }
        if self.instance.is_none() {
            self.instance = other.instance.clone();
        }
    }
}

fn non_empty(part: &str) -> Option<String> {
    if part.is_empty() {
        None
    } else {
        Some(part.to_string())
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_identity())?;
        if let Some(instance) = &self.instance {
            write!(f, "/{}", instance)?;
        }
        Ok(())
    }
}

impl FromStr for Node {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Node {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Node> for String {
    fn from(node: Node) -> Self {
        node.to_string()
    }
}

impl From<Identity> for Node {
    fn from(identity: Identity) -> Self {
        Node {
            name: identity.name,
            domain: identity.domain,
            instance: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_node() {
        let node = Node::parse("alice@example.org/home").unwrap();
        assert_eq!(node.name.as_deref(), Some("alice"));
        assert_eq!(node.domain.as_deref(), Some("example.org"));
        assert_eq!(node.instance.as_deref(), Some("home"));
        assert!(node.is_complete());
    }

    #[test]
    fn test_parse_without_instance() {
        let node: Node = "alice@example.org".parse().unwrap();
        assert_eq!(node.instance, None);
        assert!(!node.is_complete());
        assert_eq!(node.to_string(), "alice@example.org");
    }

    #[test]
    fn test_parse_domain_only() {
        let node = Node::parse("@example.org").unwrap();
        assert_eq!(node.name, None);
        assert_eq!(node.domain.as_deref(), Some("example.org"));
        assert_eq!(node.to_string(), "@example.org");
    }

    #[test]
    fn test_parse_name_only() {
        let node = Node::parse("alice").unwrap();
        assert_eq!(node.name.as_deref(), Some("alice"));
        assert_eq!(node.domain, None);
    }

    #[test]
    fn test_parse_rejects_empty_and_garbage() {
        assert!(Node::parse("").is_err());
        assert!(Node::parse("@").is_err());
        assert!(Node::parse("a@b@c").is_err());
    }

    #[test]
    fn test_identity_ignores_instance() {
        let home = Node::parse("alice@example.org/home").unwrap();
        let work = Node::parse("alice@example.org/work").unwrap();
        assert_ne!(home, work);
        assert_eq!(home.to_identity(), work.to_identity());
        assert_eq!(Identity::parse("alice@example.org/home").unwrap(), home.to_identity());
    }

    #[test]
    fn test_fill_from_keeps_present_parts() {
        let mut partial = Node {
            name: Some("bob".to_string()),
            domain: None,
            instance: None,
        };
        let remote = Node::parse("alice@example.org/home").unwrap();
        partial.fill_from(&remote);
        assert_eq!(partial.to_string(), "bob@example.org/home");
    }

    #[test]
    fn test_identity_to_node() {
        let identity = Identity::new("alice", "example.org");
        let node = identity.to_node(Some("phone"));
        assert_eq!(node.to_string(), "alice@example.org/phone");
        assert_eq!(Node::from(identity).instance, None);
    }

    #[test]
    fn test_node_serializes_as_string() {
        let node = Node::parse("alice@example.org/home").unwrap();
        let json = serde_json::to_string(&node).unwrap();
        assert_eq!(json, "\"alice@example.org/home\"");
        let parsed: Node = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, node);
    }
}

//! Authentication payloads carried by session envelopes.
//!
//! The channel treats these as opaque; it only copies them into the
//! `Authenticating` session it sends.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Authentication scheme names as they appear in the `scheme` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthenticationScheme {
    /// Anonymous access.
    Guest,
    /// Password authentication.
    Plain,
    /// Authentication delegated to the transport (e.g. client certificates).
    Transport,
    /// Shared key authentication.
    Key,
    /// Token issued by an external provider.
    External,
}

/// An authentication payload for the `Authenticating` session step.
#[derive(Debug, Clone, PartialEq)]
pub struct Authentication {
    scheme: AuthenticationScheme,
    document: Value,
}

impl Authentication {
    /// Guest authentication.
    pub fn guest() -> Self {
        Self {
            scheme: AuthenticationScheme::Guest,
            document: json!({}),
        }
    }

    /// Plain password authentication. The password is base64 encoded on the wire.
    pub fn plain(password: &str) -> Self {
        Self {
            scheme: AuthenticationScheme::Plain,
            document: json!({ "password": BASE64.encode(password) }),
        }
    }

    /// Shared key authentication. The key is base64 encoded on the wire.
    pub fn key(key: &str) -> Self {
        Self {
            scheme: AuthenticationScheme::Key,
            document: json!({ "key": BASE64.encode(key) }),
        }
    }

    /// Transport-level authentication; the payload is empty.
    pub fn transport() -> Self {
        Self {
            scheme: AuthenticationScheme::Transport,
            document: json!({}),
        }
    }

    /// External token authentication.
    pub fn external(token: &str, issuer: &str) -> Self {
        Self {
            scheme: AuthenticationScheme::External,
            document: json!({ "token": token, "issuer": issuer }),
        }
    }

    /// Rebuilds an authentication from its wire parts.
    pub fn from_parts(scheme: AuthenticationScheme, document: Value) -> Self {
        Self { scheme, document }
    }

    /// The scheme of this authentication.
    pub fn scheme(&self) -> AuthenticationScheme {
        self.scheme
    }

    /// The JSON document sent in the session `authentication` field.
    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Decodes the password of a plain authentication.
    pub fn plain_password(&self) -> Option<String> {
        if self.scheme != AuthenticationScheme::Plain {
            return None;
        }
        let encoded = self.document.get("password")?.as_str()?;
        let bytes = BASE64.decode(encoded).ok()?;
        String::from_utf8(bytes).ok()
    }
}

//! Client session handshake transitions.
//!
//! The handshake is a pure function from the establishment parameters and
//! the last received session to the next action. The client channel
//! performs the action and waits for the next session envelope.

use protocol::{
    Authentication, Identity, Session, SessionCompression, SessionEncryption, SessionState,
};

use crate::error::{ChannelError, Result};

/// Parameters of a session establishment.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEstablishment {
    /// Preferred compression; the first offered option when `None`.
    pub compression: Option<SessionCompression>,
    /// Preferred encryption; the first offered option when `None`.
    pub encryption: Option<SessionEncryption>,
    pub identity: Identity,
    pub authentication: Authentication,
    pub instance: Option<String>,
}

impl SessionEstablishment {
    /// Creates an establishment that accepts whatever the server offers first.
    pub fn new(identity: Identity, authentication: Authentication) -> Self {
        Self {
            compression: None,
            encryption: None,
            identity,
            authentication,
            instance: None,
        }
    }

    pub fn with_compression(mut self, compression: SessionCompression) -> Self {
        self.compression = Some(compression);
        self
    }

    pub fn with_encryption(mut self, encryption: SessionEncryption) -> Self {
        self.encryption = Some(encryption);
        self
    }

    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }
}

/// What the client does in reaction to a received session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeAction {
    /// Reply with a negotiating session carrying the chosen options.
    Negotiate {
        compression: SessionCompression,
        encryption: SessionEncryption,
    },
    /// Apply the options the server confirmed and keep waiting.
    ConfigureTransport {
        compression: Option<SessionCompression>,
        encryption: Option<SessionEncryption>,
    },
    /// Reply with an authenticating session.
    Authenticate,
    /// The handshake is over; hand the session to the caller.
    Complete,
}

impl HandshakeAction {
    /// Returns whether the handshake keeps listening after this action.
    pub fn continues(&self) -> bool {
        !matches!(self, HandshakeAction::Complete)
    }
}

/// Decides the next handshake step for a received session.
pub fn next_action(
    establishment: &SessionEstablishment,
    session: &Session,
) -> Result<HandshakeAction> {
    match session.state {
        SessionState::Negotiating => {
            if session.compression_options.is_none() && session.encryption_options.is_none() {
                return Ok(HandshakeAction::ConfigureTransport {
                    compression: session.compression,
                    encryption: session.encryption,
                });
            }

            let compression = choose(
                establishment.compression,
                session.compression_options.as_deref(),
                "compression",
            )?;
            let encryption = choose(
                establishment.encryption,
                session.encryption_options.as_deref(),
                "encryption",
            )?;
            Ok(HandshakeAction::Negotiate {
                compression,
                encryption,
            })
        }
        SessionState::Authenticating => Ok(HandshakeAction::Authenticate),
        _ => Ok(HandshakeAction::Complete),
    }
}

fn choose<T: Copy>(preferred: Option<T>, offered: Option<&[T]>, axis: &str) -> Result<T> {
    if let Some(preferred) = preferred {
        return Ok(preferred);
    }
    offered
        .and_then(|options| options.first().copied())
        .ok_or_else(|| ChannelError::Handshake(format!("server offered no {} options", axis)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn establishment() -> SessionEstablishment {
        SessionEstablishment::new(Identity::new("alice", "example.org"), Authentication::guest())
    }

    fn negotiating() -> Session {
        let mut session = Session::new(SessionState::Negotiating);
        session.header.id = Some("s1".to_string());
        session
    }

    #[test]
    fn test_first_offered_options_by_default() {
        let mut session = negotiating();
        session.compression_options = Some(vec![SessionCompression::Gzip, SessionCompression::None]);
        session.encryption_options = Some(vec![SessionEncryption::Tls, SessionEncryption::None]);

        let action = next_action(&establishment(), &session).unwrap();
        assert_eq!(
            action,
            HandshakeAction::Negotiate {
                compression: SessionCompression::Gzip,
                encryption: SessionEncryption::Tls,
            }
        );
        assert!(action.continues());
    }

    #[test]
    fn test_preferences_override_offers() {
        let mut session = negotiating();
        session.compression_options = Some(vec![SessionCompression::Gzip, SessionCompression::None]);
        session.encryption_options = Some(vec![SessionEncryption::Tls, SessionEncryption::None]);

        let establishment = establishment()
            .with_compression(SessionCompression::None)
            .with_encryption(SessionEncryption::None);
        assert_eq!(
            next_action(&establishment, &session).unwrap(),
            HandshakeAction::Negotiate {
                compression: SessionCompression::None,
                encryption: SessionEncryption::None,
            }
        );
    }

    #[test]
    fn test_missing_axis_fails() {
        let mut session = negotiating();
        session.compression_options = Some(vec![SessionCompression::None]);

        let err = next_action(&establishment(), &session).unwrap_err();
        assert!(matches!(err, ChannelError::Handshake(ref m) if m.contains("encryption")));

        session.encryption_options = Some(Vec::new());
        assert!(next_action(&establishment(), &session).is_err());

        let establishment = establishment().with_encryption(SessionEncryption::None);
        assert!(next_action(&establishment, &session).is_ok());
    }

    #[test]
    fn test_confirmed_options_configure_transport() {
        let mut session = negotiating();
        session.compression = Some(SessionCompression::Gzip);
        session.encryption = Some(SessionEncryption::Tls);

        assert_eq!(
            next_action(&establishment(), &session).unwrap(),
            HandshakeAction::ConfigureTransport {
                compression: Some(SessionCompression::Gzip),
                encryption: Some(SessionEncryption::Tls),
            }
        );
    }

    #[test]
    fn test_authenticating_and_terminal_states() {
        let establishment = establishment();
        assert_eq!(
            next_action(&establishment, &Session::new(SessionState::Authenticating)).unwrap(),
            HandshakeAction::Authenticate
        );

        for state in [
            SessionState::Established,
            SessionState::Finished,
            SessionState::Failed,
            SessionState::New,
        ] {
            let action = next_action(&establishment, &Session::new(state)).unwrap();
            assert_eq!(action, HandshakeAction::Complete);
            assert!(!action.continues());
        }
    }
}

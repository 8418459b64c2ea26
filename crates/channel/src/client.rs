//! Client side of a channel: session negotiation and authentication.
//!
//! [`ClientChannel::establish_session`] drives the handshake with a session
//! listener that registers itself again after every intermediate step:
//!
//! ```text
//! New ──> Negotiating (options) ──> Negotiating (confirmed) ──> Authenticating ──> Established
//!            │ negotiate              │ configure transport       │ authenticate      │ done
//! ```
//!
//! Every step returns immediately; the next one runs when the server's next
//! session envelope arrives. If the transport closes before the handshake
//! ends, the listener gets a [`ProtocolError::ConnectionClosed`] failure.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use protocol::{
    Authentication, Event, Identity, Node, Notification, ProtocolError, Session,
    SessionCompression, SessionEncryption, SessionState,
};
use tokio::sync::oneshot;

use crate::channel::{Channel, TransportClosed, WeakChannel};
use crate::config::ChannelConfig;
use crate::error::{ChannelError, Result};
use crate::handshake::{next_action, HandshakeAction, SessionEstablishment};
use crate::listener::EnvelopeListener;
use crate::transport::Transport;

/// Outcome callbacks of [`ClientChannel::establish_session`].
pub trait EstablishSessionListener: Send + Sync {
    /// Called with the session that ended the handshake: established,
    /// finished or failed.
    fn on_received_session(&self, session: &Session);

    /// Called when a handshake step could not be performed.
    fn on_failure(&self, error: ChannelError);
}

/// A channel used by the client side of a session.
#[derive(Clone)]
pub struct ClientChannel {
    channel: Channel,
}

impl Deref for ClientChannel {
    type Target = Channel;

    fn deref(&self) -> &Channel {
        &self.channel
    }
}

impl From<Channel> for ClientChannel {
    fn from(channel: Channel) -> Self {
        Self { channel }
    }
}

impl ClientChannel {
    /// Creates a client channel in the `New` state.
    pub fn new(transport: Arc<dyn Transport>, config: ChannelConfig) -> Result<Self> {
        Channel::new(transport, config).map(Self::from)
    }

    /// The underlying channel.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Sends a `New` session and registers `listener` for the server's reply.
    pub fn start_new_session(&self, listener: Arc<dyn EnvelopeListener<Session>>) -> Result<()> {
        self.context().ensure(SessionState::New, "start a session")?;

        self.enqueue_session_listener(listener.clone());
        if let Err(e) = self.send_session(Session::new(SessionState::New)) {
            self.remove_session_listener(&listener);
            return Err(e);
        }
        Ok(())
    }

    /// Replies to the server's offer with the chosen options.
    pub fn negotiate_session(
        &self,
        compression: SessionCompression,
        encryption: SessionEncryption,
    ) -> Result<()> {
        let id = self
            .context()
            .ensure_with_id(SessionState::Negotiating, "negotiate a session")?;

        let mut session = Session::new(SessionState::Negotiating);
        session.header.id = id;
        session.compression = Some(compression);
        session.encryption = Some(encryption);
        self.send_session(session)
    }

    /// Sends the credentials of `identity`, from `identity/instance`.
    pub fn authenticate_session(
        &self,
        identity: &Identity,
        authentication: &Authentication,
        instance: Option<&str>,
    ) -> Result<()> {
        let id = self
            .context()
            .ensure_with_id(SessionState::Authenticating, "authenticate a session")?;
        check_identity(identity)?;

        let mut session = Session::new(SessionState::Authenticating);
        session.header.id = id;
        session.header.from = Some(identity.to_node(instance));
        session.set_authentication(authentication);
        self.send_session(session)
    }

    /// Asks the server to finish the session.
    pub fn send_finishing_session(&self) -> Result<()> {
        let id = self
            .context()
            .ensure_with_id(SessionState::Established, "finish a session")?;

        let mut session = Session::new(SessionState::Finishing);
        session.header.id = id;
        self.send_session(session)
    }

    /// Notifies `to` that the message `message_id` was received.
    pub fn send_received_notification(&self, message_id: impl Into<String>, to: Node) -> Result<()> {
        let mut notification = Notification::new(message_id, Event::Received);
        notification.header.to = Some(to);
        self.send_notification(notification)
    }

    /// Runs the whole handshake, reporting the outcome to `listener`.
    ///
    /// Fails immediately if the channel is not `New` or the identity is
    /// incomplete. Later failures go to [`EstablishSessionListener::on_failure`].
    pub fn establish_session(
        &self,
        establishment: SessionEstablishment,
        listener: Arc<dyn EstablishSessionListener>,
    ) -> Result<()> {
        self.context().ensure(SessionState::New, "establish a session")?;
        check_identity(&establishment.identity)?;

        tracing::debug!(identity = %establishment.identity, "establishing session");
        let handshake = Handshake::new(self.downgrade(), establishment, listener);
        let on_close: Arc<dyn EnvelopeListener<TransportClosed>> = handshake.clone();
        self.add_closed_listener(on_close.clone(), true);

        if let Err(e) = self.start_new_session(handshake) {
            self.remove_closed_listener(&on_close);
            return Err(e);
        }
        Ok(())
    }

    /// Runs the whole handshake and returns the session that ended it.
    ///
    /// The returned session may be `Failed`; check its state.
    pub async fn establish_session_async(
        &self,
        establishment: SessionEstablishment,
    ) -> Result<Session> {
        let (tx, rx) = oneshot::channel();
        let outcome = Arc::new(OneshotOutcome {
            tx: Mutex::new(Some(tx)),
        });
        self.establish_session(establishment, outcome)?;

        rx.await.unwrap_or_else(|_| {
            Err(ChannelError::Handshake(
                "channel dropped before the session was established".to_string(),
            ))
        })
    }
}

fn check_identity(identity: &Identity) -> Result<()> {
    if identity.name.is_none() {
        return Err(ChannelError::MissingArgument("identity name"));
    }
    if identity.domain.is_none() {
        return Err(ChannelError::MissingArgument("identity domain"));
    }
    Ok(())
}

/// The self-registering session listener driving a handshake.
struct Handshake {
    me: Weak<Handshake>,
    channel: WeakChannel,
    establishment: SessionEstablishment,
    listener: Arc<dyn EstablishSessionListener>,
    finished: AtomicBool,
}

impl Handshake {
    fn new(
        channel: WeakChannel,
        establishment: SessionEstablishment,
        listener: Arc<dyn EstablishSessionListener>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            channel,
            establishment,
            listener,
            finished: AtomicBool::new(false),
        })
    }

    /// Marks the handshake over and drops its registrations. Returns `false`
    /// if it was already over, in which case the outcome was reported.
    fn finish(&self, client: &ClientChannel) -> bool {
        if self.finished.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(me) = self.me.upgrade() {
            let on_session: Arc<dyn EnvelopeListener<Session>> = me.clone();
            let on_close: Arc<dyn EnvelopeListener<TransportClosed>> = me;
            client.remove_session_listener(&on_session);
            client.remove_closed_listener(&on_close);
        }
        true
    }

    fn step(&self, client: &ClientChannel, session: &Session) -> Result<bool> {
        let action = next_action(&self.establishment, session)?;
        tracing::debug!(state = %session.state, ?action, "handshake step");

        let registration = match (action.continues(), self.me.upgrade()) {
            (true, Some(me)) => {
                let me: Arc<dyn EnvelopeListener<Session>> = me;
                client.enqueue_session_listener(me.clone());
                Some(me)
            }
            _ => None,
        };

        let result = self.perform(client, action);
        if result.is_err() {
            if let Some(me) = &registration {
                client.remove_session_listener(me);
            }
        }
        result.map(|()| action.continues())
    }

    fn perform(&self, client: &ClientChannel, action: HandshakeAction) -> Result<()> {
        match action {
            HandshakeAction::Negotiate {
                compression,
                encryption,
            } => client.negotiate_session(compression, encryption),
            HandshakeAction::ConfigureTransport {
                compression,
                encryption,
            } => {
                let transport = client.transport();
                if let Some(compression) = compression {
                    if transport.compression() != compression {
                        transport.set_compression(compression)?;
                    }
                }
                if let Some(encryption) = encryption {
                    if transport.encryption() != encryption {
                        transport.set_encryption(encryption)?;
                    }
                }
                Ok(())
            }
            HandshakeAction::Authenticate => client.authenticate_session(
                &self.establishment.identity,
                &self.establishment.authentication,
                self.establishment.instance.as_deref(),
            ),
            HandshakeAction::Complete => Ok(()),
        }
    }
}

impl EnvelopeListener<Session> for Handshake {
    fn on_receive(&self, session: &Session) {
        let Some(channel) = self.channel.upgrade() else {
            return;
        };
        let client = ClientChannel::from(channel);
        if self.finished.load(Ordering::SeqCst) {
            return;
        }

        match self.step(&client, session) {
            Ok(true) => {}
            Ok(false) => {
                if !self.finish(&client) {
                    return;
                }
                match session.state {
                    SessionState::Established => tracing::info!(
                        session_id = ?session.header.id,
                        local = ?client.local_node().map(|n| n.to_string()),
                        "session established"
                    ),
                    state => tracing::warn!(
                        %state,
                        reason = ?session.reason,
                        "session ended during handshake"
                    ),
                }
                self.listener.on_received_session(session);
            }
            Err(e) => {
                if !self.finish(&client) {
                    return;
                }
                tracing::error!(error = %e, state = %session.state, "handshake failed");
                self.listener.on_failure(e);
            }
        }
    }
}

impl EnvelopeListener<TransportClosed> for Handshake {
    fn on_receive(&self, closed: &TransportClosed) {
        // A Finished or Failed session closed the transport; it is dispatched
        // to the handshake right after.
        if closed.state.is_terminal() {
            return;
        }
        let Some(channel) = self.channel.upgrade() else {
            return;
        };
        if !self.finish(&ClientChannel::from(channel)) {
            return;
        }

        tracing::warn!(state = %closed.state, "transport closed during the session handshake");
        self.listener
            .on_failure(ChannelError::Transport(ProtocolError::ConnectionClosed(
                format!("transport closed in the '{}' state", closed.state),
            )));
    }
}

/// Completes a oneshot with the handshake outcome.
struct OneshotOutcome {
    tx: Mutex<Option<oneshot::Sender<Result<Session>>>>,
}

impl OneshotOutcome {
    fn complete(&self, outcome: Result<Session>) {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(tx) = tx {
            let _ = tx.send(outcome);
        }
    }
}

impl EstablishSessionListener for OneshotOutcome {
    fn on_received_session(&self, session: &Session) {
        self.complete(Ok(session.clone()));
    }

    fn on_failure(&self, error: ChannelError) {
        self.complete(Err(error));
    }
}

//! The channel engine.
//!
//! A [`Channel`] pairs one transport with the session state, a module chain
//! per envelope type and a listener registry per envelope type.
//!
//! ```text
//! send_*  ──> state check ──> send modules ──> transport
//! transport ──> state check ──> receive modules ──> ping reply | listeners
//!                                                   (sessions: state update first)
//! ```
//!
//! Received sessions and transport closure are processed one at a time under
//! a re-entrant lock, so session listeners observe sessions in arrival order
//! and may call back into the channel from within the callback.

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use parking_lot::ReentrantMutex;
use protocol::{
    Command, Envelope, EnvelopeHeader, Message, Node, Notification, Session, SessionState,
};
use tokio::time::Instant;

use crate::config::ChannelConfig;
use crate::error::Result;
use crate::keepalive::{KeepAlive, KeepAliveTarget};
use crate::listener::{EnvelopeListener, ListenerRegistry};
use crate::module::ModuleChain;
use crate::receipt::NotifyReceiptModule;
use crate::state::{SessionContext, SessionSnapshot};
use crate::transport::{Transport, TransportListener};

/// Shared state of a channel and all its handles.
pub(crate) struct ChannelCore {
    transport: Arc<dyn Transport>,
    config: ChannelConfig,
    session: SessionContext,

    message_modules: ModuleChain<Message>,
    notification_modules: ModuleChain<Notification>,
    command_modules: ModuleChain<Command>,

    message_listeners: ListenerRegistry<Message>,
    notification_listeners: ListenerRegistry<Notification>,
    command_listeners: ListenerRegistry<Command>,
    session_listeners: ListenerRegistry<Session>,
    closed_listeners: ListenerRegistry<TransportClosed>,

    /// Serializes session processing: state update, close and dispatch.
    session_dispatch: ReentrantMutex<()>,

    last_activity: Mutex<Instant>,
    keepalive: Mutex<Option<KeepAlive>>,
}

/// A session-aware endpoint over a transport.
///
/// Cloning yields another handle to the same channel.
#[derive(Clone)]
pub struct Channel {
    core: Arc<ChannelCore>,
}

/// A non-owning channel handle, for modules and listeners that must not
/// keep the channel alive.
#[derive(Clone)]
pub struct WeakChannel {
    core: Weak<ChannelCore>,
}

impl WeakChannel {
    pub fn upgrade(&self) -> Option<Channel> {
        self.core.upgrade().map(|core| Channel { core })
    }
}

/// Raised to closed listeners when the transport of a channel closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportClosed {
    /// Session state at the time of the close.
    pub state: SessionState,
}

/// Forwards transport events to the channel without owning it.
struct TransportAdapter {
    core: Weak<ChannelCore>,
}

impl TransportListener for TransportAdapter {
    fn on_receive(&self, envelope: Envelope) {
        let Some(core) = self.core.upgrade() else {
            return;
        };
        match core.receive(envelope) {
            Ok(()) => {}
            Err(e) if e.is_precondition() => {
                tracing::warn!(error = %e, "dropping received envelope");
            }
            Err(e) => tracing::error!(error = %e, "failed to process received envelope"),
        }
    }

    fn on_closed(&self) {
        if let Some(core) = self.core.upgrade() {
            core.stop_keepalive();

            let _guard = core.session_dispatch.lock();
            let state = core.session.state();
            tracing::info!(%state, "transport closed");
            core.closed_listeners.dispatch(&TransportClosed { state });
        }
    }
}

impl Channel {
    /// Creates a channel for a fresh session, in the `New` state.
    pub fn new(transport: Arc<dyn Transport>, config: ChannelConfig) -> Result<Self> {
        Self::build(transport, config, SessionContext::new(SessionState::New))
    }

    /// Creates a channel for an existing session.
    pub fn with_session(
        transport: Arc<dyn Transport>,
        config: ChannelConfig,
        state: SessionState,
        session_id: Option<String>,
        local_node: Option<Node>,
        remote_node: Option<Node>,
    ) -> Result<Self> {
        let session = SessionContext::resumed(state, session_id, local_node, remote_node);
        Self::build(transport, config, session)
    }

    fn build(
        transport: Arc<dyn Transport>,
        config: ChannelConfig,
        session: SessionContext,
    ) -> Result<Self> {
        config.validate()?;

        let core = Arc::new(ChannelCore {
            transport,
            config,
            session,
            message_modules: ModuleChain::new(),
            notification_modules: ModuleChain::new(),
            command_modules: ModuleChain::new(),
            message_listeners: ListenerRegistry::new(),
            notification_listeners: ListenerRegistry::new(),
            command_listeners: ListenerRegistry::new(),
            session_listeners: ListenerRegistry::new(),
            closed_listeners: ListenerRegistry::new(),
            session_dispatch: ReentrantMutex::new(()),
            last_activity: Mutex::new(Instant::now()),
            keepalive: Mutex::new(None),
        });

        core.transport.set_listener(Arc::new(TransportAdapter {
            core: Arc::downgrade(&core),
        }));

        let channel = Self { core };
        if channel.core.config.auto_notify_receipt {
            channel
                .core
                .message_modules
                .add(Arc::new(NotifyReceiptModule::new(channel.downgrade())));
        }

        let keepalive = KeepAlive::spawn(
            Arc::downgrade(&channel.core),
            channel.core.config.ping_interval(),
            channel.core.config.ping_disconnection_interval(),
        );
        *channel.core.lock_keepalive() = keepalive;

        Ok(channel)
    }

    pub fn downgrade(&self) -> WeakChannel {
        WeakChannel {
            core: Arc::downgrade(&self.core),
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.core.transport
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.core.config
    }

    pub fn state(&self) -> SessionState {
        self.core.session.state()
    }

    pub fn session_id(&self) -> Option<String> {
        self.core.session.session_id()
    }

    pub fn local_node(&self) -> Option<Node> {
        self.core.session.local_node()
    }

    pub fn remote_node(&self) -> Option<Node> {
        self.core.session.remote_node()
    }

    /// State, session id and nodes read together.
    pub fn session(&self) -> SessionSnapshot {
        self.core.session.snapshot()
    }

    pub(crate) fn context(&self) -> &SessionContext {
        &self.core.session
    }

    /// Returns whether the keep-alive task is running.
    pub fn is_keep_alive_running(&self) -> bool {
        self.core
            .lock_keepalive()
            .as_ref()
            .is_some_and(|k| !k.is_stopped())
    }

    // ------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------

    /// Sends a message. Requires an established session.
    pub fn send_message(&self, message: Message) -> Result<()> {
        self.core.session.ensure(SessionState::Established, "send a message")?;
        match self.core.message_modules.apply_sending(message) {
            Some(message) => self.core.transmit(message.into(), true),
            None => {
                tracing::debug!("message swallowed by a send module");
                Ok(())
            }
        }
    }

    /// Sends a notification. Requires an established session.
    pub fn send_notification(&self, notification: Notification) -> Result<()> {
        self.core
            .session
            .ensure(SessionState::Established, "send a notification")?;
        match self.core.notification_modules.apply_sending(notification) {
            Some(notification) => self.core.transmit(notification.into(), true),
            None => {
                tracing::debug!("notification swallowed by a send module");
                Ok(())
            }
        }
    }

    /// Sends a command. Requires an established session.
    pub fn send_command(&self, command: Command) -> Result<()> {
        self.core.session.ensure(SessionState::Established, "send a command")?;
        self.core.send_command_unchecked(command, true)
    }

    /// Sends a session envelope as is.
    ///
    /// No state check is made; the session operations of
    /// [`ClientChannel`](crate::ClientChannel) check their own preconditions.
    pub fn send_session(&self, session: Session) -> Result<()> {
        self.core.transmit(session.into(), true)
    }

    // ------------------------------------------------------------------
    // Receiving
    // ------------------------------------------------------------------

    /// Processes an envelope as if it had been read from the transport.
    ///
    /// Messages, notifications and commands are rejected with
    /// [`ChannelError::InvalidState`](crate::ChannelError::InvalidState)
    /// unless the session is established.
    pub fn receive_envelope(&self, envelope: Envelope) -> Result<()> {
        self.core.receive(envelope)
    }

    // ------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------

    /// Registers a message listener. Returns `false` if already registered.
    pub fn add_message_listener(
        &self,
        listener: Arc<dyn EnvelopeListener<Message>>,
        remove_after_receive: bool,
    ) -> bool {
        self.core.message_listeners.add(listener, remove_after_receive)
    }

    pub fn remove_message_listener(&self, listener: &Arc<dyn EnvelopeListener<Message>>) -> bool {
        self.core.message_listeners.remove(listener)
    }

    /// Registers a notification listener. Returns `false` if already registered.
    pub fn add_notification_listener(
        &self,
        listener: Arc<dyn EnvelopeListener<Notification>>,
        remove_after_receive: bool,
    ) -> bool {
        self.core
            .notification_listeners
            .add(listener, remove_after_receive)
    }

    pub fn remove_notification_listener(
        &self,
        listener: &Arc<dyn EnvelopeListener<Notification>>,
    ) -> bool {
        self.core.notification_listeners.remove(listener)
    }

    /// Registers a command listener. Returns `false` if already registered.
    pub fn add_command_listener(
        &self,
        listener: Arc<dyn EnvelopeListener<Command>>,
        remove_after_receive: bool,
    ) -> bool {
        self.core.command_listeners.add(listener, remove_after_receive)
    }

    pub fn remove_command_listener(&self, listener: &Arc<dyn EnvelopeListener<Command>>) -> bool {
        self.core.command_listeners.remove(listener)
    }

    /// Registers a session listener. Returns `false` if already registered.
    pub fn add_session_listener(
        &self,
        listener: Arc<dyn EnvelopeListener<Session>>,
        remove_after_receive: bool,
    ) -> bool {
        self.core.session_listeners.add(listener, remove_after_receive)
    }

    /// Registers a session listener for the next received session only.
    pub fn enqueue_session_listener(&self, listener: Arc<dyn EnvelopeListener<Session>>) -> bool {
        self.add_session_listener(listener, true)
    }

    pub fn remove_session_listener(&self, listener: &Arc<dyn EnvelopeListener<Session>>) -> bool {
        self.core.session_listeners.remove(listener)
    }

    /// Registers a listener for the close of the transport.
    ///
    /// When a Finished or Failed session closes the transport, closed
    /// listeners run before that session is dispatched.
    pub fn add_closed_listener(
        &self,
        listener: Arc<dyn EnvelopeListener<TransportClosed>>,
        remove_after_receive: bool,
    ) -> bool {
        self.core.closed_listeners.add(listener, remove_after_receive)
    }

    pub fn remove_closed_listener(
        &self,
        listener: &Arc<dyn EnvelopeListener<TransportClosed>>,
    ) -> bool {
        self.core.closed_listeners.remove(listener)
    }

    // ------------------------------------------------------------------
    // Modules
    // ------------------------------------------------------------------

    pub fn message_modules(&self) -> &ModuleChain<Message> {
        &self.core.message_modules
    }

    pub fn notification_modules(&self) -> &ModuleChain<Notification> {
        &self.core.notification_modules
    }

    pub fn command_modules(&self) -> &ModuleChain<Command> {
        &self.core.command_modules
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Stops the keep-alive and closes the transport.
    pub fn close(&self) -> Result<()> {
        self.core.stop_keepalive();
        self.core.transport.close()?;
        Ok(())
    }
}

impl ChannelCore {
    fn lock_keepalive(&self) -> std::sync::MutexGuard<'_, Option<KeepAlive>> {
        self.keepalive.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stop_keepalive(&self) {
        if let Some(keepalive) = self.lock_keepalive().as_ref() {
            keepalive.stop();
        }
    }

    fn touch(&self) {
        *self.last_activity.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn transmit(&self, envelope: Envelope, track_activity: bool) -> Result<()> {
        if track_activity {
            self.touch();
        }
        tracing::debug!(kind = %envelope.kind(), id = ?envelope.id(), "sending envelope");
        self.transport.send(envelope)?;
        Ok(())
    }

    fn send_command_unchecked(&self, command: Command, track_activity: bool) -> Result<()> {
        match self.command_modules.apply_sending(command) {
            Some(command) => self.transmit(command.into(), track_activity),
            None => {
                tracing::debug!("command swallowed by a send module");
                Ok(())
            }
        }
    }

    fn ensure_established(&self, operation: &'static str) -> Result<()> {
        self.session.ensure(SessionState::Established, operation)
    }

    fn receive(&self, envelope: Envelope) -> Result<()> {
        self.touch();
        tracing::debug!(kind = %envelope.kind(), id = ?envelope.id(), "envelope received");

        match envelope {
            Envelope::Message(message) => self.receive_message(message),
            Envelope::Notification(notification) => self.receive_notification(notification),
            Envelope::Command(command) => self.receive_command(command),
            Envelope::Session(session) => {
                self.receive_session(session);
                Ok(())
            }
        }
    }

    fn receive_message(&self, message: Message) -> Result<()> {
        self.ensure_established("receive a message")?;
        let Some(mut message) = self.message_modules.apply_receiving(message) else {
            tracing::debug!("message swallowed by a receive module");
            return Ok(());
        };

        if self.config.fill_envelope_recipients {
            self.fill_recipients(&mut message.header);
        }
        self.message_listeners.dispatch(&message);
        Ok(())
    }

    fn receive_notification(&self, notification: Notification) -> Result<()> {
        self.ensure_established("receive a notification")?;
        let Some(notification) = self.notification_modules.apply_receiving(notification) else {
            tracing::debug!("notification swallowed by a receive module");
            return Ok(());
        };
        self.notification_listeners.dispatch(&notification);
        Ok(())
    }

    fn receive_command(&self, command: Command) -> Result<()> {
        self.ensure_established("receive a command")?;
        let Some(command) = self.command_modules.apply_receiving(command) else {
            tracing::debug!("command swallowed by a receive module");
            return Ok(());
        };

        if self.config.auto_reply_pings && command.is_ping_request() {
            tracing::debug!(id = ?command.header.id, "replying to ping");
            return self.send_command_unchecked(Command::ping_response(&command), true);
        }

        self.command_listeners.dispatch(&command);
        Ok(())
    }

    fn receive_session(&self, session: Session) {
        let _guard = self.session_dispatch.lock();

        let previous = self.session.apply(&session);
        if previous != session.state {
            tracing::info!(
                from = %previous,
                to = %session.state,
                session_id = ?session.header.id,
                "session state changed"
            );
        }

        if session.state.is_terminal() {
            self.stop_keepalive();
            if let Err(e) = self.transport.close() {
                tracing::error!(error = %e, state = %session.state, "failed to close transport");
            }
        }

        self.session_listeners.dispatch(&session);
    }

    fn fill_recipients(&self, header: &mut EnvelopeHeader) {
        let complete = |node: &Option<Node>| node.as_ref().is_some_and(Node::is_complete);
        if complete(&header.from) && complete(&header.to) {
            return;
        }

        let session = self.session.snapshot();
        fill_node(&mut header.from, session.remote_node.as_ref());
        fill_node(&mut header.to, session.local_node.as_ref());
        header.pp = None;
    }
}

fn fill_node(node: &mut Option<Node>, source: Option<&Node>) {
    let Some(source) = source else { return };
    match node {
        Some(node) => node.fill_from(source),
        None => *node = Some(source.clone()),
    }
}

impl KeepAliveTarget for ChannelCore {
    fn is_established(&self) -> bool {
        self.session.state() == SessionState::Established
    }

    fn idle_time(&self) -> Duration {
        self.last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    fn send_ping(&self) -> Result<()> {
        // Keep-alive pings are not activity: a peer that never answers is
        // still disconnected after the disconnection interval.
        self.send_command_unchecked(Command::ping_request(), false)
    }

    fn disconnect(&self) {
        if let Err(e) = self.transport.close() {
            tracing::error!(error = %e, "failed to close silent transport");
        }
    }
}

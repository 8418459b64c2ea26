//! Integration tests for the channel send/receive paths.
//!
//! These tests drive a channel through an in-memory transport:
//! - State gating of sends and receives
//! - Module pipelines on both directions
//! - Listener dispatch semantics
//! - Recipient filling and ping auto-reply

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use channel::{
    Channel, ChannelConfig, ChannelError, ChannelModule, EnvelopeListener, MemoryTransport,
    Transport,
};
use protocol::{
    Command, CommandMethod, CommandStatus, Envelope, EnvelopeKind, Event, Message, Node,
    Notification, Session, SessionState, PING_MEDIA_TYPE,
};
use rand::Rng;
use serde_json::json;

fn remote_node() -> Node {
    Node::parse("postmaster@example.org/server").unwrap()
}

fn local_node() -> Node {
    Node::parse("alice@example.org/home").unwrap()
}

fn channel_in(state: SessionState, config: ChannelConfig) -> (Arc<MemoryTransport>, Channel) {
    let transport = Arc::new(MemoryTransport::new());
    let channel = Channel::with_session(
        transport.clone(),
        config,
        state,
        Some("session-1".to_string()),
        Some(local_node()),
        Some(remote_node()),
    )
    .unwrap();
    (transport, channel)
}

fn established() -> (Arc<MemoryTransport>, Channel) {
    channel_in(SessionState::Established, ChannelConfig::default())
}

fn random_count() -> usize {
    rand::thread_rng().gen_range(1..=10)
}

fn message() -> Message {
    let mut message = Message::new("text/plain", json!("hello"));
    message.header.from = Some(remote_node());
    message.header.to = Some(local_node());
    message
}

fn command() -> Command {
    let mut command = Command::request(CommandMethod::Get, "/presence");
    command.header.from = Some(remote_node());
    command
}

fn notification() -> Notification {
    let mut notification = Notification::new(protocol::new_id(), Event::Dispatched);
    notification.header.from = Some(remote_node());
    notification
}

/// Counts invocations of a listener.
struct Counter<T> {
    count: AtomicUsize,
    last: Mutex<Option<T>>,
}

impl<T> Counter<T> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            count: AtomicUsize::new(0),
            last: Mutex::new(None),
        })
    }

    fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl<T: Clone + Send + Sync> EnvelopeListener<T> for Counter<T> {
    fn on_receive(&self, envelope: &T) {
        self.count.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(envelope.clone());
    }
}

/// Counts calls in both directions and optionally swallows envelopes.
struct Stage {
    sending: AtomicUsize,
    receiving: AtomicUsize,
    swallow: bool,
}

impl Stage {
    fn new(swallow: bool) -> Arc<Self> {
        Arc::new(Self {
            sending: AtomicUsize::new(0),
            receiving: AtomicUsize::new(0),
            swallow,
        })
    }
}

impl<T> ChannelModule<T> for Stage {
    fn on_sending(&self, envelope: T) -> Option<T> {
        self.sending.fetch_add(1, Ordering::SeqCst);
        (!self.swallow).then_some(envelope)
    }

    fn on_receiving(&self, envelope: T) -> Option<T> {
        self.receiving.fetch_add(1, Ordering::SeqCst);
        (!self.swallow).then_some(envelope)
    }
}

// =============================================================================
// State Gating Tests
// =============================================================================

#[test]
fn test_sends_fail_outside_established() {
    for state in [
        SessionState::New,
        SessionState::Negotiating,
        SessionState::Authenticating,
        SessionState::Finishing,
        SessionState::Finished,
        SessionState::Failed,
    ] {
        let (transport, channel) = channel_in(state, ChannelConfig::default());

        let results = [
            channel.send_message(message()),
            channel.send_notification(notification()),
            channel.send_command(command()),
        ];
        for result in results {
            match result {
                Err(ChannelError::InvalidState { state: actual, .. }) => assert_eq!(actual, state),
                other => panic!("expected an invalid state error, got {:?}", other),
            }
        }
        assert_eq!(transport.sent_count(), 0, "state {}", state);
    }
}

#[test]
fn test_sends_in_established_reach_transport() {
    let (transport, channel) = established();

    channel.send_message(message()).unwrap();
    channel.send_notification(notification()).unwrap();
    channel.send_command(command()).unwrap();

    let kinds: Vec<_> = transport.sent().iter().map(Envelope::kind).collect();
    assert_eq!(
        kinds,
        vec![
            EnvelopeKind::Message,
            EnvelopeKind::Notification,
            EnvelopeKind::Command
        ]
    );
}

#[test]
fn test_receives_dropped_after_session_finished() {
    let (transport, channel) = channel_in(SessionState::Finished, ChannelConfig::default());
    let messages = Counter::<Message>::new();
    let commands = Counter::<Command>::new();
    channel.add_message_listener(messages.clone(), false);
    channel.add_command_listener(commands.clone(), false);

    transport.raise_on_receive(message().into());
    transport.raise_on_receive(command().into());

    assert_eq!(messages.count(), 0);
    assert_eq!(commands.count(), 0);
    assert!(matches!(
        channel.receive_envelope(message().into()),
        Err(ChannelError::InvalidState { .. })
    ));
}

// =============================================================================
// Module Pipeline Tests
// =============================================================================

#[test]
fn test_each_send_module_called_once() {
    let (transport, channel) = established();
    let stages: Vec<_> = (0..random_count()).map(|_| Stage::new(false)).collect();
    for stage in &stages {
        channel.message_modules().add(stage.clone());
    }

    channel.send_message(message()).unwrap();

    assert_eq!(transport.sent_count(), 1);
    for stage in &stages {
        assert_eq!(stage.sending.load(Ordering::SeqCst), 1);
        assert_eq!(stage.receiving.load(Ordering::SeqCst), 0);
    }
}

#[test]
fn test_each_receive_module_called_once() {
    let (transport, channel) = established();
    let listener = Counter::<Notification>::new();
    channel.add_notification_listener(listener.clone(), false);
    let stages: Vec<_> = (0..random_count()).map(|_| Stage::new(false)).collect();
    for stage in &stages {
        channel.notification_modules().add(stage.clone());
    }

    transport.raise_on_receive(notification().into());

    assert_eq!(listener.count(), 1);
    for stage in &stages {
        assert_eq!(stage.receiving.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn test_send_module_returning_none_skips_transport() {
    let (transport, channel) = established();
    channel.command_modules().add(Stage::new(true));

    channel.send_command(command()).unwrap();
    assert_eq!(transport.sent_count(), 0);
}

#[test]
fn test_receive_module_returning_none_skips_listeners() {
    let (transport, channel) = established();
    let listener = Counter::<Message>::new();
    channel.add_message_listener(listener.clone(), false);
    let swallow = Stage::new(true);
    channel.message_modules().add(swallow.clone());

    transport.raise_on_receive(message().into());
    assert_eq!(listener.count(), 0);
    assert_eq!(swallow.receiving.load(Ordering::SeqCst), 1);
}

struct Replace(Message);

impl ChannelModule<Message> for Replace {
    fn on_sending(&self, _envelope: Message) -> Option<Message> {
        Some(self.0.clone())
    }

    fn on_receiving(&self, _envelope: Message) -> Option<Message> {
        Some(self.0.clone())
    }
}

#[test]
fn test_module_replacement_is_used() {
    let (transport, channel) = established();
    let replacement = message();
    channel
        .message_modules()
        .add(Arc::new(Replace(replacement.clone())));
    let listener = Counter::<Message>::new();
    channel.add_message_listener(listener.clone(), false);

    channel.send_message(message()).unwrap();
    transport.raise_on_receive(message().into());

    assert_eq!(transport.sent(), vec![Envelope::Message(replacement.clone())]);
    assert_eq!(listener.last.lock().unwrap().clone(), Some(replacement));
}

#[test]
fn test_removed_module_no_longer_runs() {
    let (transport, channel) = established();
    let swallow: Arc<dyn ChannelModule<Message>> = Stage::new(true);
    channel.message_modules().add(swallow.clone());
    assert!(channel.message_modules().remove(&swallow));

    channel.send_message(message()).unwrap();
    assert_eq!(transport.sent_count(), 1);
}

// =============================================================================
// Listener Dispatch Tests
// =============================================================================

#[test]
fn test_listener_registered_twice_receives_once() {
    let (transport, channel) = established();
    let listener = Counter::<Command>::new();

    assert!(channel.add_command_listener(listener.clone(), false));
    assert!(!channel.add_command_listener(listener.clone(), true));

    transport.raise_on_receive(command().into());
    transport.raise_on_receive(command().into());
    assert_eq!(listener.count(), 2);
}

#[test]
fn test_one_shot_and_persistent_listeners() {
    let (transport, channel) = established();
    let one_shot = Counter::<Message>::new();
    let persistent = Counter::<Message>::new();
    channel.add_message_listener(one_shot.clone(), true);
    channel.add_message_listener(persistent.clone(), false);

    transport.raise_on_receive(message().into());
    transport.raise_on_receive(message().into());

    assert_eq!(one_shot.count(), 1);
    assert_eq!(persistent.count(), 2);
}

#[test]
fn test_many_listeners_many_envelopes() {
    let (transport, channel) = established();
    let envelopes = random_count();
    let listeners: Vec<_> = (0..random_count())
        .map(|_| Counter::<Notification>::new())
        .collect();
    for listener in &listeners {
        channel.add_notification_listener(listener.clone(), false);
    }

    for _ in 0..envelopes {
        transport.raise_on_receive(notification().into());
    }

    for listener in &listeners {
        assert_eq!(listener.count(), envelopes);
    }
}

#[test]
fn test_removed_listener_not_called() {
    let (transport, channel) = established();
    let listener = Counter::<Message>::new();
    let handle: Arc<dyn EnvelopeListener<Message>> = listener.clone();
    channel.add_message_listener(handle.clone(), false);
    assert!(channel.remove_message_listener(&handle));

    transport.raise_on_receive(message().into());
    assert_eq!(listener.count(), 0);
}

#[test]
fn test_enqueued_session_listener_fires_once() {
    let (transport, channel) = established();
    let listener = Counter::<Session>::new();
    channel.enqueue_session_listener(listener.clone());

    let mut session = Session::new(SessionState::Established);
    session.header.id = Some("session-1".to_string());
    transport.raise_on_receive(session.clone().into());
    transport.raise_on_receive(session.into());

    assert_eq!(listener.count(), 1);
}

// =============================================================================
// Recipient Filling Tests
// =============================================================================

#[test]
fn test_missing_recipients_filled_from_session() {
    let (transport, channel) = channel_in(
        SessionState::Established,
        ChannelConfig::default().with_fill_envelope_recipients(true),
    );
    let listener = Counter::<Message>::new();
    channel.add_message_listener(listener.clone(), true);

    let mut incoming = message();
    incoming.header.from = None;
    incoming.header.to = None;
    incoming.header.pp = Some(Node::parse("relay@example.org/1").unwrap());
    transport.raise_on_receive(incoming.into());

    let received = listener.last.lock().unwrap().clone().unwrap();
    assert_eq!(received.header.from, Some(remote_node()));
    assert_eq!(received.header.to, Some(local_node()));
    assert_eq!(received.header.pp, None);
}

#[test]
fn test_recipients_untouched_when_filling_disabled() {
    let (transport, channel) = established();
    let listener = Counter::<Message>::new();
    channel.add_message_listener(listener.clone(), true);

    let mut incoming = message();
    incoming.header.from = None;
    incoming.header.to = None;
    transport.raise_on_receive(incoming.into());

    let received = listener.last.lock().unwrap().clone().unwrap();
    assert_eq!(received.header.from, None);
    assert_eq!(received.header.to, None);
}

// =============================================================================
// Ping Tests
// =============================================================================

#[test]
fn test_ping_auto_reply() {
    let (transport, channel) = channel_in(
        SessionState::Established,
        ChannelConfig::default().with_auto_reply_pings(true),
    );
    let listener = Counter::<Command>::new();
    channel.add_command_listener(listener.clone(), false);

    let mut ping = Command::ping_request();
    ping.header.from = Some(remote_node());
    transport.raise_on_receive(ping.clone().into());

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    match &sent[0] {
        Envelope::Command(reply) => {
            assert_eq!(reply.header.id, ping.header.id);
            assert_eq!(reply.header.to, Some(remote_node()));
            assert_eq!(reply.status, Some(CommandStatus::Success));
            assert_eq!(reply.media_type.as_deref(), Some(PING_MEDIA_TYPE));
        }
        other => panic!("expected a command, got {:?}", other),
    }
    assert_eq!(listener.count(), 0);
}

#[test]
fn test_other_get_commands_are_dispatched() {
    let (transport, channel) = established();
    let listener = Counter::<Command>::new();
    channel.add_command_listener(listener.clone(), false);

    transport.raise_on_receive(command().into());
    assert_eq!(transport.sent_count(), 0);
    assert_eq!(listener.count(), 1);
}

// =============================================================================
// Session Transition Tests
// =============================================================================

#[test]
fn test_received_session_updates_state_before_dispatch() {
    let (transport, channel) = channel_in(SessionState::Authenticating, ChannelConfig::default());
    let observed = Arc::new(Mutex::new(None));
    let handle = channel.downgrade();
    let o = observed.clone();
    channel.add_session_listener(
        Arc::new(move |_: &Session| {
            let channel = handle.upgrade().unwrap();
            *o.lock().unwrap() = Some((channel.state(), channel.local_node()));
        }),
        true,
    );

    let mut established = Session::new(SessionState::Established);
    established.header.id = Some("session-2".to_string());
    established.header.from = Some(remote_node());
    established.header.to = Some(Node::parse("alice@example.org/work").unwrap());
    transport.raise_on_receive(established.into());

    let (state, local) = observed.lock().unwrap().clone().unwrap();
    assert_eq!(state, SessionState::Established);
    assert_eq!(local.unwrap().to_string(), "alice@example.org/work");
    assert_eq!(channel.session_id().as_deref(), Some("session-2"));
}

#[test]
fn test_concurrent_sessions_dispatched_in_arrival_order() {
    let (transport, channel) = channel_in(SessionState::Authenticating, ChannelConfig::default());
    let observed = Arc::new(Mutex::new(Vec::new()));
    let handle = channel.downgrade();
    let o = observed.clone();
    let first_call = AtomicBool::new(true);
    channel.add_session_listener(
        Arc::new(move |session: &Session| {
            if first_call.swap(false, Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(200));
            }
            let state = handle.upgrade().map(|c| c.state());
            o.lock().unwrap().push((session.state, state));
        }),
        false,
    );

    let t = transport.clone();
    let worker = thread::spawn(move || {
        t.raise_on_receive(Session::new(SessionState::Established).into());
    });
    thread::sleep(Duration::from_millis(50));
    transport.raise_on_receive(Session::new(SessionState::Failed).into());
    worker.join().unwrap();

    assert_eq!(
        observed.lock().unwrap().clone(),
        vec![
            (SessionState::Established, Some(SessionState::Established)),
            (SessionState::Failed, Some(SessionState::Failed)),
        ]
    );
}

#[test]
fn test_session_listener_may_reenter_channel() {
    let (transport, channel) = channel_in(SessionState::Negotiating, ChannelConfig::default());
    let handle = channel.downgrade();
    let nested = Counter::<Session>::new();
    let n = nested.clone();
    channel.enqueue_session_listener(Arc::new(move |_: &Session| {
        let channel = handle.upgrade().unwrap();
        channel.add_session_listener(n.clone(), true);
        channel
            .receive_envelope(Session::new(SessionState::Established).into())
            .unwrap();
    }));

    transport.raise_on_receive(Session::new(SessionState::Authenticating).into());

    assert_eq!(nested.count(), 1);
    assert_eq!(channel.state(), SessionState::Established);
}

#[test]
fn test_finished_and_failed_sessions_close_transport() {
    for state in [SessionState::Finished, SessionState::Failed] {
        let (transport, channel) = established();
        transport.raise_on_receive(Session::new(state).into());

        assert_eq!(transport.close_count(), 1);
        assert!(!transport.is_connected());
        assert_eq!(channel.state(), state);
    }
}

#[test]
fn test_sends_after_close_report_closed_transport() {
    let (transport, channel) = established();
    transport.raise_on_receive(Session::new(SessionState::Finished).into());

    // The state guard fires first once the session is finished.
    assert!(matches!(
        channel.send_message(message()),
        Err(ChannelError::InvalidState { .. })
    ));
    assert!(matches!(
        channel.send_session(Session::new(SessionState::New)),
        Err(ChannelError::Transport(_))
    ));
}

//! Automatic `received` notifications.

use protocol::{Event, Message, Notification};

use crate::channel::WeakChannel;
use crate::module::ChannelModule;

/// Receive-side message module that acknowledges every message carrying an
/// id and a sender with a `received` notification.
pub struct NotifyReceiptModule {
    channel: WeakChannel,
}

impl NotifyReceiptModule {
    pub fn new(channel: WeakChannel) -> Self {
        Self { channel }
    }
}

impl ChannelModule<Message> for NotifyReceiptModule {
    fn on_receiving(&self, envelope: Message) -> Option<Message> {
        if let (Some(id), Some(from)) = (&envelope.header.id, &envelope.header.from) {
            if let Some(channel) = self.channel.upgrade() {
                let mut notification = Notification::new(id.clone(), Event::Received);
                notification.header.to = Some(from.clone());
                if let Err(e) = channel.send_notification(notification) {
                    tracing::warn!(error = %e, message_id = %id, "failed to notify receipt");
                }
            }
        }
        Some(envelope)
    }
}

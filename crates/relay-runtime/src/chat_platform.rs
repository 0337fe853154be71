//! Chat-platform capability consumed by the relay.

use async_trait::async_trait;

use crate::config_store::ChannelId;
use crate::relay_error::DeliveryError;

#[derive(Debug, Clone, PartialEq, Eq)]
/// A new message observed on any chat the relay account can see.
pub struct InboundMessage {
    pub chat_id: i64,
    pub chat_username: Option<String>,
    pub message_id: i64,
    pub sender_id: Option<i64>,
    pub text: Option<String>,
}

impl InboundMessage {
    pub fn is_from(&self, channel: &ChannelId) -> bool {
        channel.matches_chat(self.chat_id, self.chat_username.as_deref())
    }
}

#[async_trait]
/// Operations the relay needs from the chat platform.
pub trait ChatPlatform: Send + Sync {
    /// Waits for the next batch of new messages.
    async fn poll_messages(&self) -> Result<Vec<InboundMessage>, DeliveryError>;

    /// Re-delivers `message` to `destination`, keeping its attachments.
    async fn forward_message(
        &self,
        destination: &ChannelId,
        message: &InboundMessage,
    ) -> Result<(), DeliveryError>;

    async fn send_message(&self, destination: &ChannelId, text: &str) -> Result<(), DeliveryError>;

    /// Answers in the chat `origin` came from, threaded to it.
    async fn reply(&self, origin: &InboundMessage, text: &str) -> Result<(), DeliveryError>;
}

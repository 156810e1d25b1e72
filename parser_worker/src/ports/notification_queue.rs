use std::time::Duration;

use async_trait::async_trait;

use crate::helper::error_chain_fmt;

/// Opaque handle used to acknowledge or release a received message
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AckToken(pub u64);

#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub body: Vec<u8>,
    pub ack_token: AckToken,
}

/// Queue delivering object storage notifications at least once
///
/// A received message that is neither acknowledged nor released is delivered again later.
#[async_trait]
pub trait NotificationQueue: Send + Sync {
    /// Waits up to `wait` for at least one message, returning at most `max_messages`
    ///
    /// An empty list is returned when nothing arrived in time.
    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<QueueMessage>, NotificationQueueError>;

    /// Removes the message from the queue for good
    async fn ack(&self, ack_token: &AckToken) -> Result<(), NotificationQueueError>;

    /// Hands the message back to the queue so it can be delivered again later
    async fn release(&self, ack_token: &AckToken) -> Result<(), NotificationQueueError>;
}

#[derive(thiserror::Error)]
pub enum NotificationQueueError {
    #[error("The notification queue is not initialized: {0}")]
    NotInitialized(String),

    #[error("Unknown acknowledgement token {0:?}")]
    UnknownAckToken(AckToken),

    #[error("The notification queue backend failed")]
    BackendError(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl std::fmt::Debug for NotificationQueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

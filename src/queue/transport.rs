use async_trait::async_trait;

use super::task::TaskEnvelope;

/// One claimed message. `attempts` counts this delivery and doubles as the
/// lease token: settling a delivery whose lease was taken over fails.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: i64,
    pub body: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackOutcome {
    Requeued,
    DeadLettered,
}

#[derive(thiserror::Error, Debug)]
pub enum QueueError {
    #[error("queue backend failure")]
    Backend(#[from] sqlx::Error),
    #[error("failed to encode task: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("delivery {0} is no longer leased to this consumer")]
    LeaseLost(i64),
}

/// Durable at-least-once channel between the request path and the consumer.
#[async_trait]
pub trait TaskTransport: Send + Sync {
    /// Returns once the message is durably stored.
    async fn publish(&self, envelope: &TaskEnvelope) -> Result<i64, QueueError>;

    /// Like [`publish`](Self::publish), but returns `None` without storing
    /// anything while a ready or in-flight message carries the same `key`.
    async fn publish_unique(&self, envelope: &TaskEnvelope, key: &str) -> Result<Option<i64>, QueueError>;

    /// Drops a message that no consumer has claimed yet. Returns false when
    /// it was already claimed or settled.
    async fn withdraw(&self, id: i64) -> Result<bool, QueueError>;

    /// Claims the oldest ready message, or one whose lease has expired
    /// because its consumer never settled it.
    async fn receive(&self) -> Result<Option<Delivery>, QueueError>;

    /// Removes the message for good.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Puts the message back unless it has used `max_attempts` deliveries,
    /// in which case it is dead-lettered.
    async fn nack(&self, delivery: &Delivery, error: &str, max_attempts: u32) -> Result<NackOutcome, QueueError>;

    /// Dead-letters the message without requeue.
    async fn reject(&self, delivery: &Delivery, error: &str) -> Result<(), QueueError>;

    /// Returns messages claimed by a previous process to the ready state.
    async fn recover(&self) -> Result<u64, QueueError>;
}

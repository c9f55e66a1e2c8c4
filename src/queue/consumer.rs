use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::task::{TaskEnvelope, TaskKind};
use super::transport::{Delivery, NackOutcome, QueueError, TaskTransport};
use super::QueueConfig;

/// How a handler failed. `Invalid` is never retried.
#[derive(thiserror::Error, Debug)]
pub enum TaskError {
    #[error("invalid task: {0}")]
    Invalid(String),
    #[error("transient failure: {0}")]
    Transient(String),
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, payload: Value) -> Result<(), TaskError>;
}

/// Maps task kinds to handlers.
#[derive(Default, Clone)]
pub struct TaskRouter {
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
}

impl TaskRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, kind: TaskKind, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub async fn dispatch(&self, envelope: TaskEnvelope) -> Result<(), TaskError> {
        let kind = envelope
            .kind()
            .ok_or_else(|| TaskError::Invalid(format!("unknown task type '{}'", envelope.task_type)))?;
        let handler = self
            .handlers
            .get(&kind)
            .ok_or_else(|| TaskError::Invalid(format!("no handler registered for '{}'", kind.as_str())))?;
        handler.handle(envelope.payload).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Nothing was ready.
    Idle,
    Acked,
    Requeued,
    DeadLettered,
}

/// Single consumer, one delivery at a time.
#[derive(Clone)]
pub struct TaskConsumer {
    transport: Arc<dyn TaskTransport>,
    router: Arc<TaskRouter>,
    config: QueueConfig,
}

impl TaskConsumer {
    pub fn new(transport: Arc<dyn TaskTransport>, router: TaskRouter, config: QueueConfig) -> Self {
        Self {
            transport,
            router: Arc::new(router),
            config,
        }
    }

    /// Claims at most one delivery and settles it.
    pub async fn process_next(&self) -> Result<ProcessOutcome, QueueError> {
        let Some(delivery) = self.transport.receive().await? else {
            return Ok(ProcessOutcome::Idle);
        };

        let envelope = match TaskEnvelope::from_json(&delivery.body) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(delivery_id = delivery.id, error = %err, "unparseable task envelope, dead-lettering");
                self.transport.reject(&delivery, &format!("unparseable envelope: {err}")).await?;
                return Ok(ProcessOutcome::DeadLettered);
            }
        };

        let task_type = envelope.task_type.clone();
        match self.router.dispatch(envelope).await {
            Ok(()) => {
                self.transport.ack(&delivery).await?;
                tracing::debug!(delivery_id = delivery.id, task_type = %task_type, "task acknowledged");
                Ok(ProcessOutcome::Acked)
            }
            Err(TaskError::Invalid(reason)) => {
                tracing::warn!(delivery_id = delivery.id, task_type = %task_type, reason = %reason, "invalid task, dead-lettering");
                self.transport.reject(&delivery, &reason).await?;
                Ok(ProcessOutcome::DeadLettered)
            }
            Err(TaskError::Transient(reason)) => self.retry(&delivery, &task_type, &reason).await,
        }
    }

    async fn retry(&self, delivery: &Delivery, task_type: &str, reason: &str) -> Result<ProcessOutcome, QueueError> {
        match self.transport.nack(delivery, reason, self.config.max_attempts).await? {
            NackOutcome::Requeued => {
                tracing::warn!(
                    delivery_id = delivery.id,
                    task_type = %task_type,
                    attempts = delivery.attempts,
                    reason = %reason,
                    "task failed, requeued"
                );
                Ok(ProcessOutcome::Requeued)
            }
            NackOutcome::DeadLettered => {
                tracing::error!(
                    delivery_id = delivery.id,
                    task_type = %task_type,
                    attempts = delivery.attempts,
                    reason = %reason,
                    "task exhausted its attempts, dead-lettered"
                );
                Ok(ProcessOutcome::DeadLettered)
            }
        }
    }

    /// Runs until `shutdown` flips to true. The flag is only checked between
    /// deliveries, so a handler that started always finishes and is settled.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(queue = %self.config.name, "task consumer started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let idle = match self.process_next().await {
                Ok(ProcessOutcome::Idle) => true,
                Ok(_) => false,
                Err(QueueError::LeaseLost(delivery_id)) => {
                    tracing::warn!(queue = %self.config.name, delivery_id, "lease expired before settlement, task will be redelivered");
                    false
                }
                Err(err) => {
                    tracing::error!(queue = %self.config.name, error = %err, "task queue unavailable");
                    true
                }
            };

            if idle {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
        }

        tracing::info!(queue = %self.config.name, "task consumer stopped");
    }

    pub fn spawn(self) -> ConsumerHandle {
        let (tx, rx) = watch::channel(false);
        let join = tokio::spawn(self.run(rx));
        ConsumerHandle { shutdown: tx, join }
    }
}

pub struct ConsumerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ConsumerHandle {
    /// Stops taking new deliveries and waits for the current one.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.join.await {
            tracing::error!(error = %err, "task consumer panicked");
        }
    }
}

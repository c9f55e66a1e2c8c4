//! Durable task queue between the request path and background persistence.

use std::time::Duration;

use crate::errors::AppError;

pub mod consumer;
pub mod handlers;
pub mod sqlite;
pub mod task;
pub mod transport;

pub use consumer::{ConsumerHandle, ProcessOutcome, TaskConsumer, TaskError, TaskHandler, TaskRouter};
pub use sqlite::{SqliteTaskQueue, DEFAULT_LEASE};
pub use task::{TaskEnvelope, TaskKind};
pub use transport::{Delivery, NackOutcome, QueueError, TaskTransport};

pub const DEFAULT_QUEUE_NAME: &str = "task-queue";

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub name: String,
    pub max_attempts: u32,
    pub poll_interval: Duration,
    /// How long a received message stays claimed before another receive may
    /// take it over.
    pub lease_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_QUEUE_NAME.to_string(),
            max_attempts: 5,
            poll_interval: Duration::from_millis(500),
            lease_timeout: DEFAULT_LEASE,
        }
    }
}

impl QueueConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();

        let name = std::env::var("QUEUE_NAME")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.name);

        let max_attempts = std::env::var("QUEUE_MAX_ATTEMPTS")
            .map(|val| val.parse::<u32>())
            .unwrap_or(Ok(defaults.max_attempts))
            .map_err(|_| AppError::configuration("QUEUE_MAX_ATTEMPTS must be a positive integer"))?;
        if max_attempts == 0 {
            return Err(AppError::configuration("QUEUE_MAX_ATTEMPTS must be at least 1"));
        }

        let poll_ms = std::env::var("QUEUE_POLL_INTERVAL_MS")
            .map(|val| val.parse::<u64>())
            .unwrap_or(Ok(defaults.poll_interval.as_millis() as u64))
            .map_err(|_| AppError::configuration("QUEUE_POLL_INTERVAL_MS must be an integer"))?;

        let lease_secs = std::env::var("QUEUE_LEASE_SECS")
            .map(|val| val.parse::<u64>())
            .unwrap_or(Ok(defaults.lease_timeout.as_secs()))
            .map_err(|_| AppError::configuration("QUEUE_LEASE_SECS must be an integer"))?;
        if lease_secs == 0 {
            return Err(AppError::configuration("QUEUE_LEASE_SECS must be at least 1"));
        }

        Ok(Self {
            name,
            max_attempts,
            poll_interval: Duration::from_millis(poll_ms),
            lease_timeout: Duration::from_secs(lease_secs),
        })
    }
}

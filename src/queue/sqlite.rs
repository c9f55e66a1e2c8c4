use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::task::TaskEnvelope;
use super::transport::{Delivery, NackOutcome, QueueError, TaskTransport};
use crate::utils::{db_timestamp, utc_now};

pub const DEFAULT_LEASE: Duration = Duration::from_secs(30);

/// Queue stored in the `task_queue` table. Several logical queues can share
/// the table; each instance only sees rows with its own name.
///
/// A received message is leased until `now + lease`. If its consumer never
/// settles it, the next `receive` after expiry claims it again. Acked rows
/// are deleted.
#[derive(Clone)]
pub struct SqliteTaskQueue {
    pool: SqlitePool,
    queue: String,
    lease: chrono::Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueDepth {
    pub ready: i64,
    pub inflight: i64,
    pub dead: i64,
}

#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub id: i64,
    pub task_type: String,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl SqliteTaskQueue {
    pub fn new(pool: SqlitePool, queue: impl Into<String>) -> Self {
        Self {
            pool,
            queue: queue.into(),
            lease: lease_span(DEFAULT_LEASE),
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease_span(lease);
        self
    }

    /// Rows still stored for this queue, whatever their state.
    pub async fn stored(&self) -> Result<i64, QueueError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM task_queue WHERE queue = ?")
            .bind(&self.queue)
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    pub fn name(&self) -> &str {
        &self.queue
    }

    /// Publishes a raw body. Used for envelopes that do not parse, which the
    /// consumer must still be able to dead-letter.
    pub async fn publish_raw(&self, task_type: &str, body: &str) -> Result<i64, QueueError> {
        let now = db_timestamp(utc_now());
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO task_queue (queue, task_type, body, status, attempts, enqueued_at, updated_at) \
             VALUES (?, ?, ?, 'ready', 0, ?, ?) RETURNING id",
        )
        .bind(&self.queue)
        .bind(task_type)
        .bind(body)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Moves the message out of `inflight` only while `delivery` still holds
    /// its lease.
    async fn settle(&self, delivery: &Delivery, status: &str, error: Option<&str>) -> Result<(), QueueError> {
        let result = sqlx::query(
            "UPDATE task_queue SET status = ?, last_error = COALESCE(?, last_error), lease_expires_at = NULL, updated_at = ? \
             WHERE id = ? AND status = 'inflight' AND attempts = ?",
        )
        .bind(status)
        .bind(error)
        .bind(db_timestamp(utc_now()))
        .bind(delivery.id)
        .bind(i64::from(delivery.attempts))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::LeaseLost(delivery.id));
        }
        Ok(())
    }

    pub async fn depth(&self) -> Result<QueueDepth, QueueError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM task_queue WHERE queue = ? GROUP BY status")
            .bind(&self.queue)
            .fetch_all(&self.pool)
            .await?;

        let mut depth = QueueDepth::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let n: i64 = row.try_get("n")?;
            match status.as_str() {
                "ready" => depth.ready = n,
                "inflight" => depth.inflight = n,
                "dead" => depth.dead = n,
                _ => {}
            }
        }
        Ok(depth)
    }

    pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>, QueueError> {
        let rows = sqlx::query(
            "SELECT id, task_type, attempts, last_error FROM task_queue WHERE queue = ? AND status = 'dead' ORDER BY id",
        )
        .bind(&self.queue)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<DeadLetter, QueueError> {
                let attempts: i64 = row.try_get("attempts")?;
                Ok(DeadLetter {
                    id: row.try_get("id")?,
                    task_type: row.try_get("task_type")?,
                    attempts: attempts.max(0) as u32,
                    last_error: row.try_get("last_error")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl TaskTransport for SqliteTaskQueue {
    async fn publish(&self, envelope: &TaskEnvelope) -> Result<i64, QueueError> {
        let body = envelope.to_json()?;
        let id = self.publish_raw(&envelope.task_type, &body).await?;
        tracing::debug!(queue = %self.queue, delivery_id = id, task_type = %envelope.task_type, "task published");
        Ok(id)
    }

    async fn publish_unique(&self, envelope: &TaskEnvelope, key: &str) -> Result<Option<i64>, QueueError> {
        let body = envelope.to_json()?;
        let now = db_timestamp(utc_now());
        let id: Option<i64> = sqlx::query_scalar(
            "INSERT OR IGNORE INTO task_queue (queue, task_type, body, status, attempts, dedupe_key, enqueued_at, updated_at) \
             VALUES (?, ?, ?, 'ready', 0, ?, ?, ?) RETURNING id",
        )
        .bind(&self.queue)
        .bind(&envelope.task_type)
        .bind(&body)
        .bind(key)
        .bind(&now)
        .bind(&now)
        .fetch_optional(&self.pool)
        .await?;

        match id {
            Some(id) => tracing::debug!(queue = %self.queue, delivery_id = id, task_type = %envelope.task_type, "task published"),
            None => tracing::debug!(queue = %self.queue, dedupe_key = %key, "live task with the same key already queued"),
        }
        Ok(id)
    }

    async fn withdraw(&self, id: i64) -> Result<bool, QueueError> {
        let result = sqlx::query("DELETE FROM task_queue WHERE id = ? AND queue = ? AND status = 'ready'")
            .bind(id)
            .bind(&self.queue)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn receive(&self) -> Result<Option<Delivery>, QueueError> {
        let now = utc_now();
        let stamp = db_timestamp(now);
        let row = sqlx::query(
            "UPDATE task_queue SET status = 'inflight', attempts = attempts + 1, lease_expires_at = ?, updated_at = ? \
             WHERE id = (SELECT id FROM task_queue WHERE queue = ? \
                 AND (status = 'ready' OR (status = 'inflight' AND lease_expires_at < ?)) \
                 ORDER BY id LIMIT 1) \
             RETURNING id, body, attempts",
        )
        .bind(db_timestamp(now.checked_add_signed(self.lease).unwrap_or(DateTime::<Utc>::MAX_UTC)))
        .bind(&stamp)
        .bind(&self.queue)
        .bind(&stamp)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| delivery_from_row(&row)).transpose()
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let result = sqlx::query("DELETE FROM task_queue WHERE id = ? AND status = 'inflight' AND attempts = ?")
            .bind(delivery.id)
            .bind(i64::from(delivery.attempts))
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::LeaseLost(delivery.id));
        }
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, error: &str, max_attempts: u32) -> Result<NackOutcome, QueueError> {
        if delivery.attempts >= max_attempts {
            self.settle(delivery, "dead", Some(error)).await?;
            return Ok(NackOutcome::DeadLettered);
        }
        self.settle(delivery, "ready", Some(error)).await?;
        Ok(NackOutcome::Requeued)
    }

    async fn reject(&self, delivery: &Delivery, error: &str) -> Result<(), QueueError> {
        self.settle(delivery, "dead", Some(error)).await
    }

    async fn recover(&self) -> Result<u64, QueueError> {
        let result = sqlx::query(
            "UPDATE task_queue SET status = 'ready', lease_expires_at = NULL, updated_at = ? WHERE queue = ? AND status = 'inflight'",
        )
        .bind(db_timestamp(utc_now()))
        .bind(&self.queue)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

fn delivery_from_row(row: &SqliteRow) -> Result<Delivery, QueueError> {
    let attempts: i64 = row.try_get("attempts")?;
    Ok(Delivery {
        id: row.try_get("id")?,
        body: row.try_get("body")?,
        attempts: attempts.max(0) as u32,
    })
}

fn lease_span(lease: Duration) -> chrono::Duration {
    chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::days(365))
}

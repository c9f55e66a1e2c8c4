use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use uuid::Uuid;

pub mod loggable;
pub use loggable::{Loggable, Severity};

use crate::utils::db_timestamp;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent<T> {
    pub id: Uuid,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
    pub tenant_id: Option<Uuid>,
    pub actor_id: Option<Uuid>,
    pub subject_id: Option<Uuid>,
    pub payload: T,
}

impl<T> DomainEvent<T> {
    pub fn new(name: String, tenant_id: Option<Uuid>, actor_id: Option<Uuid>, subject_id: Option<Uuid>, payload: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            occurred_at: Utc::now(),
            tenant_id,
            actor_id,
            subject_id,
            payload,
        }
    }
}

pub type EventBus = broadcast::Sender<Value>;

pub fn init_event_bus() -> (EventBus, broadcast::Receiver<Value>) {
    broadcast::channel(1024)
}

/// Caller details attached to an activity entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn from_headers(headers: &axum::http::HeaderMap) -> Self {
        let ip = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .map(|s| s.trim().to_string())
            .or_else(|| {
                headers
                    .get("x-real-ip")
                    .and_then(|v| v.to_str().ok())
                    .map(String::from)
            });

        let user_agent = headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        Self { ip, user_agent }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityPayload {
    #[serde(rename = "new")]
    pub current: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<RequestContext>,
    pub severity: Severity,
}

/// Who did what, where.
#[derive(Debug, Clone, Copy)]
pub struct Actor {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
}

/// Publishes `<entity>.<action>` on the bus. Never fails the caller: a
/// missing listener or a serialization problem only loses the log entry.
pub fn log_activity_with_context<T: Loggable>(
    event_bus: &EventBus,
    action: &str,
    actor: Actor,
    entity: &T,
    old_entity: Option<&T>,
    context: Option<RequestContext>,
) {
    let name = format!("{}.{}", T::entity_type(), action);

    let payload = ActivityPayload {
        current: serde_json::to_value(entity).unwrap_or_default(),
        old: old_entity.map(|e| serde_json::to_value(e).unwrap_or_default()),
        context,
        severity: entity.severity_for_action(action),
    };

    let event = DomainEvent::new(
        name,
        Some(actor.tenant_id),
        Some(actor.user_id),
        Some(entity.subject_id()),
        serde_json::to_value(&payload).unwrap_or_default(),
    );

    if let Ok(value) = serde_json::to_value(&event) {
        let _ = event_bus.send(value);
    }
}

fn describe(name: &str) -> &'static str {
    match name {
        "role.created" => "Custom role created",
        "role.permissions_updated" => "Role permissions updated",
        "role.enabled" => "Role enabled",
        "role.disabled" => "Role disabled",
        "role.deleted" => "Custom role deleted",
        "escalation.approved" => "Role request approved",
        "escalation.rejected" => "Role request rejected",
        "application_key.created" => "Application key issued",
        "application_key.revoked" => "Application key revoked",
        "user.role_assigned" => "Role assigned to user",
        _ => "System event",
    }
}

async fn record(pool: &SqlitePool, event: &Value) -> Result<(), sqlx::Error> {
    let text = |key: &str| event.get(key).and_then(Value::as_str);
    let uuid = |key: &str| text(key).and_then(|s| Uuid::parse_str(s).ok()).map(|u| u.to_string());

    let name = text("name").unwrap_or("unknown");
    let severity = event
        .get("payload")
        .and_then(|p| p.get("severity"))
        .and_then(Value::as_str)
        .unwrap_or(Severity::Important.as_str());
    let occurred_at = text("occurred_at")
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    sqlx::query(
        "INSERT INTO activity_log (id, event_name, description, actor_id, subject_id, tenant_id, occurred_at, properties, severity) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(name)
    .bind(describe(name))
    .bind(uuid("actor_id"))
    .bind(uuid("subject_id"))
    .bind(uuid("tenant_id"))
    .bind(db_timestamp(occurred_at))
    .bind(event.to_string())
    .bind(severity)
    .execute(pool)
    .await?;

    Ok(())
}

/// Projects bus events into `activity_log` until every sender is gone.
pub async fn start_activity_listener(mut rx: broadcast::Receiver<Value>, pool: SqlitePool) {
    tracing::info!("activity listener started");
    loop {
        match rx.recv().await {
            Ok(event) => {
                if let Err(err) = record(&pool, &event).await {
                    tracing::error!(error = %err, "failed to save activity log");
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "activity listener lagged, events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    tracing::info!("activity listener stopped");
}

use sqlx::SqlitePool;
use uuid::Uuid;

use super::users::grant_role_in;
use super::{StoreError, StoreResult};
use crate::db::row_parsers::escalation_from_row;
use crate::models::escalation::{normalize_email, EscalationRequest, EscalationStatus, PendingEscalation};
use crate::models::pagination::PageParams;
use crate::utils::{db_timestamp, utc_now};

const ESCALATION_COLUMNS: &str =
    "id, tenant_id, user_email, current_role, requested_role, status, action, requested_at, resolved_at, resolved_by";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Same id already stored, i.e. a redelivery.
    AlreadyExists,
    /// Another unresolved request holds the (tenant, user, role) slot.
    DuplicateUnresolved,
}

#[derive(Clone)]
pub struct EscalationStore {
    pool: SqlitePool,
}

impl EscalationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert_pending(&self, pending: &PendingEscalation) -> StoreResult<InsertOutcome> {
        let result = sqlx::query(
            "INSERT INTO escalation_requests (id, tenant_id, user_email, current_role, requested_role, status, action, requested_at) \
             VALUES (?, ?, ?, ?, ?, 'pending', 0, ?) \
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(pending.id.to_string())
        .bind(pending.tenant_id.to_string())
        .bind(normalize_email(&pending.user_email))
        .bind(&pending.current_role)
        .bind(&pending.requested_role)
        .bind(db_timestamp(pending.requested_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => Ok(InsertOutcome::AlreadyExists),
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(err) => match StoreError::classify(err, "escalation request") {
                StoreError::UniqueViolation(_) => Ok(InsertOutcome::DuplicateUnresolved),
                other => Err(other),
            },
        }
    }

    pub async fn find_unresolved(
        &self,
        tenant_id: Uuid,
        user_email: &str,
        requested_role: &str,
    ) -> StoreResult<Option<EscalationRequest>> {
        let sql = format!(
            "SELECT {ESCALATION_COLUMNS} FROM escalation_requests \
             WHERE tenant_id = ? AND user_email = ? AND requested_role = ? AND action = 0"
        );
        let row = sqlx::query(&sql)
            .bind(tenant_id.to_string())
            .bind(normalize_email(user_email))
            .bind(requested_role)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(escalation_from_row).transpose()
    }

    /// Tenant-scoped: a request of another tenant is reported as missing.
    pub async fn get(&self, tenant_id: Uuid, id: Uuid) -> StoreResult<EscalationRequest> {
        let sql = format!("SELECT {ESCALATION_COLUMNS} FROM escalation_requests WHERE id = ? AND tenant_id = ?");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .bind(tenant_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound("role request not found".into()))?;
        escalation_from_row(&row)
    }

    /// Pending first, then newest first.
    pub async fn list(
        &self,
        tenant_id: Uuid,
        status: Option<EscalationStatus>,
        page: PageParams,
    ) -> StoreResult<(Vec<EscalationRequest>, i64)> {
        let filter = if status.is_some() { " AND status = ?" } else { "" };

        let count_sql = format!("SELECT COUNT(*) FROM escalation_requests WHERE tenant_id = ?{filter}");
        let mut count = sqlx::query_scalar::<_, i64>(&count_sql).bind(tenant_id.to_string());
        if let Some(status) = status {
            count = count.bind(status.as_str());
        }
        let total = count.fetch_one(&self.pool).await?;

        let sql = format!(
            "SELECT {ESCALATION_COLUMNS} FROM escalation_requests WHERE tenant_id = ?{filter} \
             ORDER BY CASE status WHEN 'pending' THEN 0 ELSE 1 END, requested_at DESC LIMIT ? OFFSET ?"
        );
        let mut query = sqlx::query(&sql).bind(tenant_id.to_string());
        if let Some(status) = status {
            query = query.bind(status.as_str());
        }
        let rows = query
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;

        let items = rows.iter().map(escalation_from_row).collect::<StoreResult<Vec<_>>>()?;
        Ok((items, total))
    }

    pub async fn list_for_user(&self, tenant_id: Uuid, user_email: &str) -> StoreResult<Vec<EscalationRequest>> {
        let sql = format!(
            "SELECT {ESCALATION_COLUMNS} FROM escalation_requests \
             WHERE tenant_id = ? AND user_email = ? ORDER BY requested_at DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(tenant_id.to_string())
            .bind(normalize_email(user_email))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(escalation_from_row).collect()
    }

    /// Marks a pending request rejected. One conditional update, so a
    /// concurrent approve and reject cannot both succeed.
    pub async fn reject(&self, tenant_id: Uuid, id: Uuid, actor: Uuid) -> StoreResult<EscalationRequest> {
        let mut tx = self.pool.begin().await?;
        resolve_in(&mut tx, tenant_id, id, EscalationStatus::Rejected, actor).await?;
        tx.commit().await?;
        self.get(tenant_id, id).await
    }

    /// Marks a pending request approved and adds the role to the user in the
    /// same commit.
    pub async fn approve_and_grant(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        actor: Uuid,
        user_id: Uuid,
        role_name: &str,
    ) -> StoreResult<EscalationRequest> {
        let mut tx = self.pool.begin().await?;
        resolve_in(&mut tx, tenant_id, id, EscalationStatus::Approved, actor).await?;

        grant_role_in(&mut tx, user_id, role_name).await?;

        tx.commit().await?;
        self.get(tenant_id, id).await
    }
}

async fn resolve_in(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    tenant_id: Uuid,
    id: Uuid,
    status: EscalationStatus,
    actor: Uuid,
) -> StoreResult<()> {
    let result = sqlx::query(
        "UPDATE escalation_requests SET status = ?, action = 1, resolved_at = ?, resolved_by = ? \
         WHERE id = ? AND tenant_id = ? AND action = 0",
    )
    .bind(status.as_str())
    .bind(db_timestamp(utc_now()))
    .bind(actor.to_string())
    .bind(id.to_string())
    .bind(tenant_id.to_string())
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 1 {
        return Ok(());
    }

    let exists: Option<i64> = sqlx::query_scalar("SELECT action FROM escalation_requests WHERE id = ? AND tenant_id = ?")
        .bind(id.to_string())
        .bind(tenant_id.to_string())
        .fetch_optional(&mut **tx)
        .await?;

    Err(match exists {
        Some(_) => StoreError::VersionConflict("the request is already processed".into()),
        None => StoreError::NotFound("role request not found".into()),
    })
}

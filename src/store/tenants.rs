use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{parse_uuid, StoreError, StoreResult};
use crate::authz::TenantResolver;
use crate::db::row_parsers::{application_key_from_row, parse_datetime};
use crate::models::pagination::PageParams;
use crate::models::tenant::{ApplicationKey, IssuedApplicationKey, Tenant, DEFAULT_KEY_NAME};
use crate::utils::{db_timestamp, generate_application_key, hash_application_key, utc_now};

const KEY_COLUMNS: &str = "id, tenant_id, name, is_active, expires_at, created_at";

#[derive(Clone)]
pub struct TenantStore {
    pool: SqlitePool,
}

impl TenantStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates a tenant together with its first application key.
    pub async fn create(&self, name: &str, expires_at: Option<DateTime<Utc>>) -> StoreResult<IssuedApplicationKey> {
        let tenant = Tenant {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: utc_now(),
        };
        let key = generate_application_key();

        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO tenants (id, name, created_at) VALUES (?, ?, ?)")
            .bind(tenant.id.to_string())
            .bind(&tenant.name)
            .bind(db_timestamp(tenant.created_at))
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::classify(e, "tenant"))?;

        insert_key(&mut tx, tenant.id, DEFAULT_KEY_NAME, &key, expires_at).await?;
        tx.commit().await?;

        Ok(IssuedApplicationKey {
            tenant,
            application_key: key,
        })
    }

    /// Issues another key for an existing tenant. Returns the stored metadata
    /// and the plaintext key, which is not kept.
    pub async fn issue_key(
        &self,
        tenant_id: Uuid,
        name: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> StoreResult<(ApplicationKey, String)> {
        let key = generate_application_key();
        let mut tx = self.pool.begin().await?;
        let key_id = insert_key(&mut tx, tenant_id, name, &key, expires_at).await?;
        tx.commit().await?;

        let stored = self.get_key(tenant_id, key_id).await?;
        Ok((stored, key))
    }

    pub async fn get_key(&self, tenant_id: Uuid, key_id: Uuid) -> StoreResult<ApplicationKey> {
        let sql = format!("SELECT {KEY_COLUMNS} FROM application_keys WHERE id = ? AND tenant_id = ?");
        let row = sqlx::query(&sql)
            .bind(key_id.to_string())
            .bind(tenant_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound("application key not found".into()))?;
        application_key_from_row(&row)
    }

    /// Newest first, revoked keys included.
    pub async fn list_keys(&self, tenant_id: Uuid, page: PageParams) -> StoreResult<(Vec<ApplicationKey>, i64)> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM application_keys WHERE tenant_id = ?")
            .bind(tenant_id.to_string())
            .fetch_one(&self.pool)
            .await?;

        let sql = format!(
            "SELECT {KEY_COLUMNS} FROM application_keys WHERE tenant_id = ? \
             ORDER BY created_at DESC, name LIMIT ? OFFSET ?"
        );
        let rows = sqlx::query(&sql)
            .bind(tenant_id.to_string())
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;

        let keys = rows.iter().map(application_key_from_row).collect::<StoreResult<Vec<_>>>()?;
        Ok((keys, total))
    }

    /// Deactivates a key of the tenant. Revoking twice is a conflict.
    pub async fn revoke_key(&self, tenant_id: Uuid, key_id: Uuid) -> StoreResult<ApplicationKey> {
        let sql = format!(
            "UPDATE application_keys SET is_active = 0 WHERE id = ? AND tenant_id = ? AND is_active = 1 \
             RETURNING {KEY_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(key_id.to_string())
            .bind(tenant_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => application_key_from_row(&row),
            None => {
                self.get_key(tenant_id, key_id).await?;
                Err(StoreError::VersionConflict("application key is already revoked".into()))
            }
        }
    }

    pub async fn deactivate_key(&self, key: &str) -> StoreResult<()> {
        let result = sqlx::query("UPDATE application_keys SET is_active = 0 WHERE key_hash = ?")
            .bind(hash_application_key(key))
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("application key not found".into()));
        }
        Ok(())
    }

    /// Tenant for an active, unexpired key.
    pub async fn resolve(&self, key: &str) -> StoreResult<Option<Uuid>> {
        let row: Option<(String, i64, Option<String>)> =
            sqlx::query_as("SELECT tenant_id, is_active, expires_at FROM application_keys WHERE key_hash = ?")
                .bind(hash_application_key(key))
                .fetch_optional(&self.pool)
                .await?;

        let Some((tenant_id, is_active, expires_at)) = row else {
            return Ok(None);
        };

        if is_active == 0 {
            return Ok(None);
        }
        if let Some(expires_at) = expires_at {
            if parse_datetime(&expires_at)? <= utc_now() {
                return Ok(None);
            }
        }

        Ok(Some(parse_uuid(&tenant_id, "application_keys.tenant_id")?))
    }
}

async fn insert_key(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    tenant_id: Uuid,
    name: &str,
    key: &str,
    expires_at: Option<DateTime<Utc>>,
) -> StoreResult<Uuid> {
    let key_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO application_keys (key_hash, id, tenant_id, name, is_active, expires_at, created_at) \
         VALUES (?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(hash_application_key(key))
    .bind(key_id.to_string())
    .bind(tenant_id.to_string())
    .bind(name)
    .bind(expires_at.map(db_timestamp))
    .bind(db_timestamp(utc_now()))
    .execute(&mut **tx)
    .await
    .map_err(|e| StoreError::classify(e, "application key"))?;
    Ok(key_id)
}

#[async_trait]
impl TenantResolver for TenantStore {
    async fn resolve_tenant(&self, application_key: &str) -> StoreResult<Option<Uuid>> {
        self.resolve(application_key).await
    }
}

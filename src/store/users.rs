use sqlx::SqlitePool;
use uuid::Uuid;

use super::{StoreError, StoreResult};
use crate::db::row_parsers::db_user_from_row;
use crate::models::escalation::normalize_email;
use crate::models::user::User;
use crate::utils::{db_timestamp, utc_now};

const USER_COLUMNS: &str = "id, tenant_id, name, email, created_at";

/// Tenant-scoped user directory. Role membership is a set of role names.
#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, tenant_id: Uuid, name: &str, email: &str, roles: &[String]) -> StoreResult<User> {
        let id = Uuid::new_v4();
        let now = utc_now();
        let email = normalize_email(email);

        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO users (id, tenant_id, name, email, created_at) VALUES (?, ?, ?, ?, ?)")
            .bind(id.to_string())
            .bind(tenant_id.to_string())
            .bind(name)
            .bind(&email)
            .bind(db_timestamp(now))
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::classify(e, "user"))?;

        for role in roles {
            grant_role_in(&mut tx, id, role).await?;
        }

        tx.commit().await?;
        self.get(tenant_id, id).await
    }

    pub async fn get(&self, tenant_id: Uuid, user_id: Uuid) -> StoreResult<User> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ? AND tenant_id = ?");
        let row = sqlx::query(&sql)
            .bind(user_id.to_string())
            .bind(tenant_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound("user not found".into()))?;

        let user = db_user_from_row(&row)?;
        let roles = self.roles(user.id).await?;
        Ok(user.with_roles(roles))
    }

    pub async fn find_by_email(&self, tenant_id: Uuid, email: &str) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE tenant_id = ? AND email = ?");
        let row = sqlx::query(&sql)
            .bind(tenant_id.to_string())
            .bind(normalize_email(email))
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let user = db_user_from_row(&row)?;
                let roles = self.roles(user.id).await?;
                Ok(Some(user.with_roles(roles)))
            }
            None => Ok(None),
        }
    }

    /// Grants a role to a user of the tenant. Returns false when the user
    /// already held it.
    pub async fn grant_role(&self, tenant_id: Uuid, user_id: Uuid, role_name: &str) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<String> = sqlx::query_scalar("SELECT id FROM users WHERE id = ? AND tenant_id = ?")
            .bind(user_id.to_string())
            .bind(tenant_id.to_string())
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(StoreError::NotFound("user not found".into()));
        }

        let granted = grant_role_in(&mut tx, user_id, role_name).await?;
        tx.commit().await?;
        Ok(granted)
    }

    pub async fn roles(&self, user_id: Uuid) -> StoreResult<Vec<String>> {
        let roles = sqlx::query_scalar("SELECT role_name FROM user_roles WHERE user_id = ? ORDER BY role_name")
            .bind(user_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        Ok(roles)
    }
}

/// The one place role membership is written. Idempotent: returns false when
/// the membership already existed.
pub(crate) async fn grant_role_in(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    user_id: Uuid,
    role_name: &str,
) -> StoreResult<bool> {
    let result = sqlx::query("INSERT OR IGNORE INTO user_roles (user_id, role_name, granted_at) VALUES (?, ?, ?)")
        .bind(user_id.to_string())
        .bind(role_name)
        .bind(db_timestamp(utc_now()))
        .execute(&mut **tx)
        .await
        .map_err(|e| StoreError::classify(e, "user role"))?;
    Ok(result.rows_affected() > 0)
}

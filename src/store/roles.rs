use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{parse_uuid, StoreError, StoreResult};
use crate::authz::{PermissionSource, SYSTEM_TENANT_ID};
use crate::db::row_parsers::db_role_from_row;
use crate::models::pagination::PageParams;
use crate::models::permission::PermissionSet;
use crate::models::role::{DbRole, Role, RoleFilter, RoleStatusFilter, RoleTypeFilter};
use crate::utils::{db_timestamp, utc_now};

const ROLE_COLUMNS: &str =
    "role_id, tenant_id, name, display_name, description, role_type, enabled, created_at, updated_at";

/// A permission set together with the version its next write must present.
#[derive(Debug, Clone)]
pub struct StoredPermissionSet {
    pub role_id: Uuid,
    pub tenant_id: Uuid,
    pub version: i64,
    pub set: PermissionSet,
}

#[derive(Debug, Clone)]
pub struct NewRole<'a> {
    pub tenant_id: Uuid,
    pub name: &'a str,
    pub display_name: &'a str,
    pub description: Option<&'a str>,
    pub permission_set: &'a PermissionSet,
}

#[derive(Clone)]
pub struct RoleStore {
    pool: SqlitePool,
}

fn to_role(row: &SqliteRow) -> StoreResult<Role> {
    let db: DbRole = db_role_from_row(row)?;
    Role::try_from(db).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn routes_json(set: &PermissionSet) -> StoreResult<String> {
    serde_json::to_string(&set.literal_routes()).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn blob_json(set: &PermissionSet) -> StoreResult<String> {
    serde_json::to_string(set).map_err(|e| StoreError::Corrupt(e.to_string()))
}

impl RoleStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts the role row and its permission mapping in one transaction.
    /// Name and display name uniqueness per tenant come from the schema.
    pub async fn create_custom(&self, new: NewRole<'_>) -> StoreResult<Role> {
        let role_id = Uuid::new_v4();
        let now = db_timestamp(utc_now());
        let blob = blob_json(new.permission_set)?;
        let routes = routes_json(new.permission_set)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO roles (role_id, tenant_id, name, display_name, description, role_type, enabled, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, 'custom', 1, ?, ?)",
        )
        .bind(role_id.to_string())
        .bind(new.tenant_id.to_string())
        .bind(new.name)
        .bind(new.display_name)
        .bind(new.description)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::classify(e, "role"))?;

        sqlx::query(
            "INSERT INTO route_roles (role_id, tenant_id, role_name, permissions, routes, version, updated_at) \
             VALUES (?, ?, ?, ?, ?, 1, ?)",
        )
        .bind(role_id.to_string())
        .bind(new.tenant_id.to_string())
        .bind(new.name)
        .bind(&blob)
        .bind(&routes)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::classify(e, "role permissions"))?;

        tx.commit().await?;

        tracing::debug!(tenant_id = %new.tenant_id, role_id = %role_id, name = %new.name, "custom role created");
        self.find(new.tenant_id, role_id).await
    }

    /// A role visible to the tenant: its own custom roles plus system roles.
    pub async fn find(&self, tenant_id: Uuid, role_id: Uuid) -> StoreResult<Role> {
        let sql = format!("SELECT {ROLE_COLUMNS} FROM roles WHERE role_id = ? AND tenant_id IN (?, ?)");
        let row = sqlx::query(&sql)
            .bind(role_id.to_string())
            .bind(tenant_id.to_string())
            .bind(SYSTEM_TENANT_ID.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound("role not found".into()))?;
        to_role(&row)
    }

    pub async fn find_by_name(&self, tenant_id: Uuid, name: &str) -> StoreResult<Option<Role>> {
        let sql = format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE name = ? AND tenant_id IN (?, ?) \
             ORDER BY CASE role_type WHEN 'default' THEN 0 ELSE 1 END LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(name)
            .bind(tenant_id.to_string())
            .bind(SYSTEM_TENANT_ID.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(to_role).transpose()
    }

    pub async fn list(&self, tenant_id: Uuid, filter: RoleFilter, page: PageParams) -> StoreResult<(Vec<Role>, i64)> {
        let mut clauses = vec!["tenant_id IN (?, ?)"];
        match filter.role_type {
            RoleTypeFilter::Default => clauses.push("role_type = 'default'"),
            RoleTypeFilter::Custom => clauses.push("role_type = 'custom'"),
            RoleTypeFilter::All => {}
        }
        match filter.status {
            RoleStatusFilter::Active => clauses.push("enabled = 1"),
            RoleStatusFilter::Inactive => clauses.push("enabled = 0"),
            RoleStatusFilter::All => {}
        }
        let where_clause = clauses.join(" AND ");

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM roles WHERE {where_clause}"))
            .bind(tenant_id.to_string())
            .bind(SYSTEM_TENANT_ID.to_string())
            .fetch_one(&self.pool)
            .await?;

        let sql = format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE {where_clause} \
             ORDER BY CASE role_type WHEN 'default' THEN 0 ELSE 1 END, name LIMIT ? OFFSET ?"
        );
        let rows = sqlx::query(&sql)
            .bind(tenant_id.to_string())
            .bind(SYSTEM_TENANT_ID.to_string())
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;

        let roles = rows.iter().map(to_role).collect::<StoreResult<Vec<_>>>()?;
        Ok((roles, total))
    }

    /// Flips `enabled` only if it currently holds the opposite value.
    /// Zero affected rows means the role is missing or already in that state.
    pub async fn set_enabled(&self, tenant_id: Uuid, role_id: Uuid, enabled: bool) -> StoreResult<Role> {
        let result = sqlx::query(
            "UPDATE roles SET enabled = ?, updated_at = ? \
             WHERE role_id = ? AND tenant_id = ? AND role_type = 'custom' AND enabled = ?",
        )
        .bind(enabled)
        .bind(db_timestamp(utc_now()))
        .bind(role_id.to_string())
        .bind(tenant_id.to_string())
        .bind(!enabled)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let current = self.find_custom(tenant_id, role_id).await?;
            let state = if current.enabled { "enabled" } else { "disabled" };
            return Err(StoreError::VersionConflict(format!("role is already {state}")));
        }

        self.find(tenant_id, role_id).await
    }

    pub async fn delete(&self, tenant_id: Uuid, role_id: Uuid) -> StoreResult<Role> {
        let role = self.find_custom(tenant_id, role_id).await?;

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("DELETE FROM roles WHERE role_id = ? AND tenant_id = ? AND role_type = 'custom'")
            .bind(role_id.to_string())
            .bind(tenant_id.to_string())
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("role not found".into()));
        }

        sqlx::query("DELETE FROM route_roles WHERE role_id = ? AND tenant_id = ?")
            .bind(role_id.to_string())
            .bind(tenant_id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(role)
    }

    async fn find_custom(&self, tenant_id: Uuid, role_id: Uuid) -> StoreResult<Role> {
        let sql = format!("SELECT {ROLE_COLUMNS} FROM roles WHERE role_id = ? AND tenant_id = ? AND role_type = 'custom'");
        let row = sqlx::query(&sql)
            .bind(role_id.to_string())
            .bind(tenant_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound("role not found".into()))?;
        to_role(&row)
    }

    pub async fn load_permission_set(&self, tenant_id: Uuid, role_id: Uuid) -> StoreResult<StoredPermissionSet> {
        let row = sqlx::query(
            "SELECT role_id, tenant_id, permissions, version FROM route_roles WHERE role_id = ? AND tenant_id IN (?, ?)",
        )
        .bind(role_id.to_string())
        .bind(tenant_id.to_string())
        .bind(SYSTEM_TENANT_ID.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound("role permissions not found".into()))?;

        let role_id_s: String = row.try_get("role_id")?;
        let tenant_id_s: String = row.try_get("tenant_id")?;
        let blob: String = row.try_get("permissions")?;
        let version: i64 = row.try_get("version")?;

        let set = PermissionSet::from_blob(&blob)
            .map_err(|e| StoreError::Corrupt(format!("permission set for role {role_id_s}: {e}")))?;

        Ok(StoredPermissionSet {
            role_id: parse_uuid(&role_id_s, "route_roles.role_id")?,
            tenant_id: parse_uuid(&tenant_id_s, "route_roles.tenant_id")?,
            version,
            set,
        })
    }

    /// Writes a whole permission set if the stored version still equals
    /// `expected_version`, and optionally the role's display details, as one
    /// commit. Returns the new version.
    pub async fn update_permissions(
        &self,
        tenant_id: Uuid,
        role_id: Uuid,
        expected_version: i64,
        set: &PermissionSet,
        display_name: Option<&str>,
        description: Option<&str>,
    ) -> StoreResult<i64> {
        let now = db_timestamp(utc_now());
        let blob = blob_json(set)?;
        let routes = routes_json(set)?;

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE route_roles SET permissions = ?, routes = ?, version = version + 1, updated_at = ? \
             WHERE role_id = ? AND tenant_id = ? AND version = ?",
        )
        .bind(&blob)
        .bind(&routes)
        .bind(&now)
        .bind(role_id.to_string())
        .bind(tenant_id.to_string())
        .bind(expected_version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let exists: Option<i64> =
                sqlx::query_scalar("SELECT version FROM route_roles WHERE role_id = ? AND tenant_id = ?")
                    .bind(role_id.to_string())
                    .bind(tenant_id.to_string())
                    .fetch_optional(&mut *tx)
                    .await?;
            return Err(match exists {
                Some(_) => StoreError::VersionConflict("role permissions were modified concurrently".into()),
                None => StoreError::NotFound("role not found".into()),
            });
        }

        if display_name.is_some() || description.is_some() {
            sqlx::query(
                "UPDATE roles SET display_name = COALESCE(?, display_name), description = COALESCE(?, description), updated_at = ? \
                 WHERE role_id = ? AND tenant_id = ? AND role_type = 'custom'",
            )
            .bind(display_name)
            .bind(description)
            .bind(&now)
            .bind(role_id.to_string())
            .bind(tenant_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::classify(e, "role display name"))?;
        }

        tx.commit().await?;
        Ok(expected_version + 1)
    }
}

#[async_trait]
impl PermissionSource for RoleStore {
    async fn permission_set(&self, tenant_id: Uuid, role_id: Uuid) -> StoreResult<Option<PermissionSet>> {
        match self.load_permission_set(tenant_id, role_id).await {
            Ok(stored) => Ok(Some(stored.set)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

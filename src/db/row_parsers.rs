use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::models::escalation::{EscalationRequest, EscalationStatus};
use crate::models::role::DbRole;
use crate::models::tenant::ApplicationKey;
use crate::models::user::DbUser;
use crate::store::StoreError;

pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
    let s = s.trim();

    // RFC3339 (what the repositories write)
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // SQLite CURRENT_TIMESTAMP, used by seeded rows
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    if let Ok(naive_date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let ndt = naive_date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| StoreError::Corrupt("invalid datetime: date out of range".to_string()))?;
        return Ok(Utc.from_utc_datetime(&ndt));
    }

    Err(StoreError::Corrupt(format!("invalid datetime: {}", s)))
}

fn parse_opt_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    match s {
        Some(s) if !s.trim().is_empty() => Ok(Some(parse_datetime(&s)?)),
        _ => Ok(None),
    }
}

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Corrupt(format!("missing {}: {}", name, e)))
}

fn uuid_column(row: &SqliteRow, name: &str) -> Result<Uuid, StoreError> {
    let raw: String = column(row, name)?;
    crate::store::parse_uuid(&raw, name)
}

pub fn db_role_from_row(row: &SqliteRow) -> Result<DbRole, StoreError> {
    let enabled: i64 = column(row, "enabled")?;
    let created_at_s: String = column(row, "created_at")?;
    let updated_at_s: String = column(row, "updated_at")?;

    Ok(DbRole {
        role_id: uuid_column(row, "role_id")?,
        tenant_id: uuid_column(row, "tenant_id")?,
        name: column(row, "name")?,
        display_name: column(row, "display_name")?,
        description: column(row, "description")?,
        role_type: column(row, "role_type")?,
        enabled: enabled != 0,
        created_at: parse_datetime(&created_at_s)?,
        updated_at: parse_datetime(&updated_at_s)?,
    })
}

pub fn db_user_from_row(row: &SqliteRow) -> Result<DbUser, StoreError> {
    let created_at_s: String = column(row, "created_at")?;

    Ok(DbUser {
        id: uuid_column(row, "id")?,
        tenant_id: uuid_column(row, "tenant_id")?,
        name: column(row, "name")?,
        email: column(row, "email")?,
        created_at: parse_datetime(&created_at_s)?,
    })
}

pub fn application_key_from_row(row: &SqliteRow) -> Result<ApplicationKey, StoreError> {
    let is_active: i64 = column(row, "is_active")?;
    let created_at_s: String = column(row, "created_at")?;
    let expires_at_s: Option<String> = column(row, "expires_at")?;

    Ok(ApplicationKey {
        key_id: uuid_column(row, "id")?,
        tenant_id: uuid_column(row, "tenant_id")?,
        name: column(row, "name")?,
        is_active: is_active != 0,
        expires_at: parse_opt_datetime(expires_at_s)?,
        created_at: parse_datetime(&created_at_s)?,
    })
}

pub fn escalation_from_row(row: &SqliteRow) -> Result<EscalationRequest, StoreError> {
    let status_s: String = column(row, "status")?;
    let status = EscalationStatus::parse(&status_s)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown escalation status '{}'", status_s)))?;
    let action: i64 = column(row, "action")?;
    let requested_at_s: String = column(row, "requested_at")?;
    let resolved_at_s: Option<String> = column(row, "resolved_at")?;
    let resolved_by_s: Option<String> = column(row, "resolved_by")?;

    let resolved_by = match resolved_by_s {
        Some(s) => Some(crate::store::parse_uuid(&s, "resolved_by")?),
        None => None,
    };

    Ok(EscalationRequest {
        id: uuid_column(row, "id")?,
        tenant_id: uuid_column(row, "tenant_id")?,
        user_email: column(row, "user_email")?,
        current_role: column(row, "current_role")?,
        requested_role: column(row, "requested_role")?,
        status,
        action: action != 0,
        requested_at: parse_datetime(&requested_at_s)?,
        resolved_at: parse_opt_datetime(resolved_at_s)?,
        resolved_by,
    })
}

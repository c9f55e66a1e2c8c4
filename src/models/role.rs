use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::errors::AppError;
use crate::events::{Loggable, Severity};
use crate::models::pagination::PageParams;
use crate::models::permission::{Permission, PermissionSet};

// =============================================================================
// ROLE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RoleType {
    /// Fixed, shared by every tenant.
    Default,
    /// Defined by one tenant.
    Custom,
}

impl RoleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleType::Default => "default",
            RoleType::Custom => "custom",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "default" => Some(RoleType::Default),
            "custom" => Some(RoleType::Custom),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Role {
    pub role_id: Uuid,
    pub tenant_id: Uuid,
    #[schema(example = "auditor")]
    pub name: String,
    #[schema(example = "Auditor")]
    pub display_name: String,
    pub description: String,
    pub role_type: RoleType,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    pub fn is_system(&self) -> bool {
        self.role_type == RoleType::Default
    }
}

impl Loggable for Role {
    fn entity_type() -> &'static str { "role" }
    fn subject_id(&self) -> Uuid { self.role_id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Clone)]
pub struct DbRole {
    pub role_id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    pub role_type: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbRole> for Role {
    type Error = AppError;

    fn try_from(db: DbRole) -> Result<Self, Self::Error> {
        let role_type = RoleType::parse(&db.role_type)
            .ok_or_else(|| AppError::internal(format!("unknown role_type '{}'", db.role_type)))?;

        Ok(Role {
            role_id: db.role_id,
            tenant_id: db.tenant_id,
            name: db.name,
            display_name: db.display_name,
            description: db.description.unwrap_or_default(),
            role_type,
            enabled: db.enabled,
            created_at: db.created_at,
            updated_at: db.updated_at,
        })
    }
}

// =============================================================================
// FILTERS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoleTypeFilter {
    Default,
    Custom,
    #[default]
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoleStatusFilter {
    Active,
    Inactive,
    #[default]
    All,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RoleFilter {
    pub role_type: RoleTypeFilter,
    pub status: RoleStatusFilter,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RoleListQuery {
    /// `default` (alias `system`), `custom` or `all`
    pub role_type: Option<String>,
    /// `active` (alias `enabled`), `inactive` (alias `disabled`) or `all`
    pub status: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl RoleListQuery {
    pub fn filter(&self) -> Result<RoleFilter, AppError> {
        let role_type = match self.role_type.as_deref().map(str::trim) {
            None | Some("") | Some("all") => RoleTypeFilter::All,
            Some("default") | Some("system") => RoleTypeFilter::Default,
            Some("custom") => RoleTypeFilter::Custom,
            Some(other) => {
                return Err(AppError::validation(format!("unknown role_type filter '{other}'")))
            }
        };

        let status = match self.status.as_deref().map(str::trim) {
            None | Some("") | Some("all") => RoleStatusFilter::All,
            Some("active") | Some("enabled") => RoleStatusFilter::Active,
            Some("inactive") | Some("disabled") => RoleStatusFilter::Inactive,
            Some(other) => return Err(AppError::validation(format!("unknown status filter '{other}'"))),
        };

        Ok(RoleFilter { role_type, status })
    }

    pub fn page(&self) -> PageParams {
        PageParams::new(self.page, self.page_size)
    }
}

// =============================================================================
// REQUESTS / RESPONSES
// =============================================================================

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleCreateRequest {
    #[schema(example = "auditor")]
    pub name: String,
    #[schema(example = "Auditor")]
    pub display_name: String,
    #[schema(example = "Read-only access to roles")]
    pub description: Option<String>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

impl RoleCreateRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(AppError::validation("name is required"));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        {
            return Err(AppError::validation(
                "name may only contain lowercase letters, digits, '_' and '-'",
            ));
        }
        if self.display_name.trim().is_empty() {
            return Err(AppError::validation("display_name is required"));
        }
        Ok(())
    }
}

/// Diff applied to a role's permission set, plus optional display details.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct PermissionsUpdateRequest {
    pub display_name: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub add_permissions: Vec<Permission>,
    #[serde(default)]
    pub remove_permissions: Vec<Permission>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RolePermissionsResponse {
    pub role_id: Uuid,
    pub version: i64,
    #[serde(flatten)]
    pub permission_set: PermissionSet,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RoleCreatedResponse {
    pub role: Role,
    pub permissions: Vec<Permission>,
}

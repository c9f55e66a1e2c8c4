use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;
use crate::events::{Loggable, Severity};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub email: String,
    /// Role names held by the user.
    pub roles: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn holds_role(&self, role_name: &str) -> bool {
        self.roles.iter().any(|r| r == role_name)
    }
}

#[derive(Debug, Clone)]
pub struct DbUser {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl DbUser {
    pub fn with_roles(self, roles: Vec<String>) -> User {
        User {
            id: self.id,
            tenant_id: self.tenant_id,
            name: self.name,
            email: self.email,
            roles,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UserRoleAssignRequest {
    #[schema(example = "moderator")]
    pub role: String,
}

impl UserRoleAssignRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.role.trim().is_empty() {
            return Err(AppError::validation("role is required"));
        }
        Ok(())
    }
}

/// Role membership of one user.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserRoles {
    pub user_id: Uuid,
    pub roles: Vec<String>,
}

impl From<&User> for UserRoles {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            roles: user.roles.clone(),
        }
    }
}

impl Loggable for UserRoles {
    fn entity_type() -> &'static str { "user" }
    fn subject_id(&self) -> Uuid { self.user_id }
    fn severity(&self) -> Severity { Severity::Critical }
}

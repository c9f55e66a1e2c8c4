use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::errors::AppError;
use crate::events::{Loggable, Severity};
use crate::models::pagination::PageParams;

/// Name given to the key issued together with a new tenant.
pub const DEFAULT_KEY_NAME: &str = "default";

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TenantResponse {
    pub tenant_id: Uuid,
}

/// Returned once, at creation; only the hash is stored.
#[derive(Debug, Clone)]
pub struct IssuedApplicationKey {
    pub tenant: Tenant,
    pub application_key: String,
}

/// Stored key metadata. The secret itself is never readable again.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApplicationKey {
    pub key_id: Uuid,
    #[serde(skip)]
    pub tenant_id: Uuid,
    #[schema(example = "ci-pipeline")]
    pub name: String,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Loggable for ApplicationKey {
    fn entity_type() -> &'static str { "application_key" }
    fn subject_id(&self) -> Uuid { self.key_id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ApplicationKeyCreateRequest {
    #[schema(example = "ci-pipeline")]
    pub name: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ApplicationKeyCreateRequest {
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), AppError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(AppError::validation("name is required"));
        }
        if name.len() > 64 {
            return Err(AppError::validation("name must be at most 64 characters"));
        }
        if matches!(self.expires_at, Some(at) if at <= now) {
            return Err(AppError::validation("expires_at must be in the future"));
        }
        Ok(())
    }
}

/// The only response that carries the plaintext key.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApplicationKeyCreated {
    pub key_id: Uuid,
    pub name: String,
    pub application_key: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ApplicationKeyListQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl ApplicationKeyListQuery {
    pub fn page(&self) -> PageParams {
        PageParams::new(self.page, self.page_size)
    }
}

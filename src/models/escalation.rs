use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::errors::AppError;
use crate::events::{Loggable, Severity};
use crate::models::pagination::PageParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EscalationStatus {
    Pending,
    Approved,
    Rejected,
}

impl EscalationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationStatus::Pending => "pending",
            EscalationStatus::Approved => "approved",
            EscalationStatus::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(EscalationStatus::Pending),
            "approved" => Some(EscalationStatus::Approved),
            "rejected" => Some(EscalationStatus::Rejected),
            _ => None,
        }
    }
}

/// A user's ask to be granted a role. `action` flips to true exactly once.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EscalationRequest {
    pub id: Uuid,
    pub tenant_id: Uuid,
    #[schema(example = "u@x.com")]
    pub user_email: String,
    #[schema(example = "user")]
    pub current_role: String,
    #[schema(example = "admin")]
    pub requested_role: String,
    pub status: EscalationStatus,
    pub action: bool,
    pub requested_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<Uuid>,
}

impl Loggable for EscalationRequest {
    fn entity_type() -> &'static str { "escalation" }
    fn subject_id(&self) -> Uuid { self.id }
    fn severity(&self) -> Severity { Severity::Critical }
}

/// A validated request waiting to be persisted. The id is assigned before
/// publishing so redelivery of the same task cannot create a second row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEscalation {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub user_email: String,
    pub current_role: String,
    pub requested_role: String,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct EscalationCreateRequest {
    #[schema(example = "u@x.com")]
    pub email: String,
    #[schema(example = "admin")]
    pub requested_role: String,
}

impl EscalationCreateRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.email.trim().is_empty() || !self.email.contains('@') {
            return Err(AppError::validation("a valid email is required"));
        }
        if self.requested_role.trim().is_empty() {
            return Err(AppError::validation("requested_role is required"));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EscalationAccepted {
    pub request_id: Uuid,
    pub status: EscalationStatus,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EscalationStatusResponse {
    pub id: Uuid,
    pub requested_role: String,
    pub status: EscalationStatus,
    pub action: bool,
    pub requested_at: DateTime<Utc>,
}

impl From<EscalationRequest> for EscalationStatusResponse {
    fn from(r: EscalationRequest) -> Self {
        Self {
            id: r.id,
            requested_role: r.requested_role,
            status: r.status,
            action: r.action,
            requested_at: r.requested_at,
        }
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct EscalationListQuery {
    /// `pending`, `approved` or `rejected`
    pub status: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl EscalationListQuery {
    pub fn status(&self) -> Result<Option<EscalationStatus>, AppError> {
        match self.status.as_deref().map(str::trim) {
            None | Some("") | Some("all") => Ok(None),
            Some(raw) => EscalationStatus::parse(raw)
                .map(Some)
                .ok_or_else(|| AppError::validation(format!("unknown status filter '{raw}'"))),
        }
    }

    pub fn page(&self) -> PageParams {
        PageParams::new(self.page, self.page_size)
    }
}

/// Normalised form used for storage and comparison.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Retention class of an activity log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Never trimmed.
    Critical,
    #[default]
    Important,
    Noise,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Important => "important",
            Severity::Noise => "noise",
        }
    }
}

/// Entities whose mutations land in the activity log as `<entity_type>.<action>`.
pub trait Loggable: Serialize + Send + Sync {
    fn entity_type() -> &'static str;

    fn subject_id(&self) -> Uuid;

    fn severity(&self) -> Severity {
        Severity::Important
    }

    /// Access-changing actions are always critical.
    fn severity_for_action(&self, action: &str) -> Severity {
        match action {
            "deleted" | "disabled" | "permissions_updated" | "approved" | "revoked" | "role_assigned" => {
                Severity::Critical
            }
            _ => self.severity(),
        }
    }
}

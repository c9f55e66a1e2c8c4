//! SQLite repositories.
//!
//! Every repository returns [`StoreError`], a closed set of kinds the
//! service layer switches on. Driver errors are classified once, here, by
//! their structured kind and never by message text.

use uuid::Uuid;

pub mod escalations;
pub mod roles;
pub mod tenants;
pub mod users;

pub use escalations::{EscalationStore, InsertOutcome};
pub use roles::{NewRole, RoleStore, StoredPermissionSet};
pub use tenants::TenantStore;
pub use users::UserStore;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    UniqueViolation(String),
    #[error("{0}")]
    VersionConflict(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("storage backend failure")]
    Backend(#[source] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    /// Classifies a driver error. `what` names the record for the caller.
    pub fn classify(err: sqlx::Error, what: &str) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StoreError::NotFound(format!("{what} not found")),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::UniqueViolation(format!("{what} already exists"))
            }
            _ => StoreError::Backend(err),
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::classify(err, "record")
    }
}

pub(crate) fn parse_uuid(raw: &str, column: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(raw).map_err(|e| StoreError::Corrupt(format!("invalid uuid in {column}: {e}")))
}

use async_trait::async_trait;
use serde_json::Value;

use super::consumer::{TaskError, TaskHandler};
use super::task::TaskKind;
use crate::models::escalation::PendingEscalation;
use crate::store::{EscalationStore, InsertOutcome, StoreError};

/// Persists a `create_message` task as a pending escalation request.
pub struct PersistEscalationHandler {
    store: EscalationStore,
}

impl PersistEscalationHandler {
    pub fn new(store: EscalationStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TaskHandler for PersistEscalationHandler {
    async fn handle(&self, payload: Value) -> Result<(), TaskError> {
        let pending: PendingEscalation = serde_path_to_error::deserialize(payload)
            .map_err(|err| TaskError::Invalid(format!("create_message payload at {}: {}", err.path(), err.inner())))?;

        match self.store.insert_pending(&pending).await {
            Ok(InsertOutcome::Inserted) => {
                tracing::info!(
                    request_id = %pending.id,
                    tenant_id = %pending.tenant_id,
                    requested_role = %pending.requested_role,
                    "role request persisted"
                );
                Ok(())
            }
            Ok(InsertOutcome::AlreadyExists) => {
                tracing::debug!(request_id = %pending.id, "role request already persisted, redelivery ignored");
                Ok(())
            }
            Ok(InsertOutcome::DuplicateUnresolved) => {
                tracing::warn!(
                    request_id = %pending.id,
                    tenant_id = %pending.tenant_id,
                    requested_role = %pending.requested_role,
                    "another unresolved request exists for this user and role, dropping"
                );
                Ok(())
            }
            Err(StoreError::Corrupt(reason)) => Err(TaskError::Invalid(reason)),
            Err(err) => Err(TaskError::Transient(err.to_string())),
        }
    }
}

/// Accepts task kinds that have no implementation yet so they do not pile
/// up as redeliveries.
pub struct ReservedTaskHandler {
    kind: TaskKind,
}

impl ReservedTaskHandler {
    pub fn new(kind: TaskKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl TaskHandler for ReservedTaskHandler {
    async fn handle(&self, _payload: Value) -> Result<(), TaskError> {
        tracing::info!(task_type = self.kind.as_str(), "reserved task kind received, acknowledging without action");
        Ok(())
    }
}

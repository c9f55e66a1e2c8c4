use async_trait::async_trait;

use crate::models::escalation::EscalationRequest;

/// Receives outcomes of role requests. Delivery is best effort: the
/// orchestrator ignores failures.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn escalation_resolved(&self, request: &EscalationRequest) -> anyhow::Result<()>;
}

/// Writes notices to the log instead of sending them.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn escalation_resolved(&self, request: &EscalationRequest) -> anyhow::Result<()> {
        tracing::info!(
            request_id = %request.id,
            tenant_id = %request.tenant_id,
            user_email = %request.user_email,
            requested_role = %request.requested_role,
            status = request.status.as_str(),
            "role request notice"
        );
        Ok(())
    }
}

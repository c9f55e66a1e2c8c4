use std::sync::Arc;

use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, Actor, EventBus, RequestContext};
use crate::models::escalation::{
    normalize_email, EscalationAccepted, EscalationCreateRequest, EscalationRequest, EscalationStatus,
    PendingEscalation,
};
use crate::models::pagination::{Page, PageParams};
use crate::models::user::User;
use crate::queue::{TaskEnvelope, TaskKind, TaskTransport};
use crate::services::grantable_role;
use crate::services::notify::Notifier;
use crate::store::{EscalationStore, RoleStore, StoreError, UserStore};
use crate::utils::utc_now;

/// Who is asking, as established by the authorization chain.
#[derive(Debug, Clone)]
pub struct Requester {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    /// Name of the role the presented token carries.
    pub role_name: String,
}

/// Role-escalation workflow: validates and enqueues new requests, and
/// resolves pending ones exactly once.
#[derive(Clone)]
pub struct EscalationService {
    escalations: EscalationStore,
    users: UserStore,
    roles: RoleStore,
    queue: Arc<dyn TaskTransport>,
    notifier: Arc<dyn Notifier>,
    events: EventBus,
}

impl EscalationService {
    pub fn new(
        escalations: EscalationStore,
        users: UserStore,
        roles: RoleStore,
        queue: Arc<dyn TaskTransport>,
        notifier: Arc<dyn Notifier>,
        events: EventBus,
    ) -> Self {
        Self {
            escalations,
            users,
            roles,
            queue,
            notifier,
            events,
        }
    }

    /// Checks the guards and publishes a `create_message` task. The row is
    /// written later by the queue consumer; the returned id is final.
    pub async fn create(&self, requester: &Requester, request: EscalationCreateRequest) -> AppResult<EscalationAccepted> {
        request.validate()?;
        let requested_role = request.requested_role.trim().to_string();

        let user = self.requester(requester).await?;
        if normalize_email(&request.email) != normalize_email(&user.email) {
            return Err(AppError::validation("email does not match the authenticated user"));
        }

        if requester.role_name == requested_role || user.holds_role(&requested_role) {
            return Err(AppError::conflict(format!("user already holds role '{requested_role}'")));
        }

        let pending = PendingEscalation {
            id: Uuid::new_v4(),
            tenant_id: requester.tenant_id,
            user_email: user.email.clone(),
            current_role: requester.role_name.clone(),
            requested_role,
            requested_at: utc_now(),
        };
        let envelope = TaskEnvelope::new(TaskKind::CreateMessage, &pending)
            .map_err(|e| AppError::internal(format!("encode role request: {e}")))?;

        // A queued request holds the dedupe key until the consumer has stored
        // its row, so between the two checks no unresolved request is missed.
        let delivery_id = self
            .queue
            .publish_unique(&envelope, &dedupe_key(&pending))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, tenant_id = %pending.tenant_id, "failed to publish role request");
                AppError::queue(e.to_string())
            })?
            .ok_or_else(duplicate_request)?;

        let stored = self
            .escalations
            .find_unresolved(pending.tenant_id, &pending.user_email, &pending.requested_role)
            .await;
        if !matches!(stored, Ok(None)) {
            self.withdraw(delivery_id).await;
            stored?;
            return Err(duplicate_request());
        }

        tracing::info!(
            request_id = %pending.id,
            tenant_id = %pending.tenant_id,
            requested_role = %pending.requested_role,
            delivery_id,
            "role request queued"
        );

        Ok(EscalationAccepted {
            request_id: pending.id,
            status: EscalationStatus::Pending,
        })
    }

    pub async fn list_own(&self, requester: &Requester) -> AppResult<Vec<EscalationRequest>> {
        let user = self.requester(requester).await?;
        Ok(self.escalations.list_for_user(requester.tenant_id, &user.email).await?)
    }

    pub async fn get(&self, tenant_id: Uuid, id: Uuid) -> AppResult<EscalationRequest> {
        Ok(self.escalations.get(tenant_id, id).await?)
    }

    pub async fn list(
        &self,
        tenant_id: Uuid,
        status: Option<EscalationStatus>,
        page: PageParams,
    ) -> AppResult<Page<EscalationRequest>> {
        let (items, total) = self.escalations.list(tenant_id, status, page).await?;
        Ok(Page::new(items, page, total))
    }

    pub async fn approve(&self, actor: Actor, id: Uuid, context: Option<RequestContext>) -> AppResult<EscalationRequest> {
        let request = self.unresolved(actor.tenant_id, id).await?;

        let role_name = grantable_role(&self.roles, actor.tenant_id, &request.requested_role).await?;
        let user = self
            .users
            .find_by_email(actor.tenant_id, &request.user_email)
            .await?
            .ok_or_else(|| AppError::bad_request("the requesting user no longer exists"))?;

        let resolved = self
            .escalations
            .approve_and_grant(actor.tenant_id, id, actor.user_id, user.id, &role_name)
            .await?;

        tracing::info!(
            request_id = %id,
            tenant_id = %actor.tenant_id,
            user_id = %user.id,
            role = %role_name,
            "role request approved"
        );
        self.finish(actor, "approved", &request, &resolved, context).await;
        Ok(resolved)
    }

    pub async fn reject(&self, actor: Actor, id: Uuid, context: Option<RequestContext>) -> AppResult<EscalationRequest> {
        let request = self.unresolved(actor.tenant_id, id).await?;
        let resolved = self.escalations.reject(actor.tenant_id, id, actor.user_id).await?;

        tracing::info!(request_id = %id, tenant_id = %actor.tenant_id, "role request rejected");
        self.finish(actor, "rejected", &request, &resolved, context).await;
        Ok(resolved)
    }

    async fn requester(&self, requester: &Requester) -> AppResult<User> {
        match self.users.get(requester.tenant_id, requester.user_id).await {
            Ok(user) => Ok(user),
            Err(StoreError::NotFound(_)) => Err(AppError::unauthorized("authenticated user not found")),
            Err(err) => Err(err.into()),
        }
    }

    /// Best effort: a message the consumer already claimed is dropped by the
    /// handler as a duplicate.
    async fn withdraw(&self, delivery_id: i64) {
        match self.queue.withdraw(delivery_id).await {
            Ok(true) => {}
            Ok(false) => tracing::debug!(delivery_id, "duplicate role request already claimed"),
            Err(err) => tracing::warn!(delivery_id, error = %err, "failed to withdraw duplicate role request"),
        }
    }

    /// Early guard for a readable error; the store update repeats the check
    /// atomically.
    async fn unresolved(&self, tenant_id: Uuid, id: Uuid) -> AppResult<EscalationRequest> {
        let request = self.escalations.get(tenant_id, id).await?;
        if request.action {
            return Err(AppError::conflict("the request is already processed"));
        }
        Ok(request)
    }

    async fn finish(
        &self,
        actor: Actor,
        action: &str,
        before: &EscalationRequest,
        after: &EscalationRequest,
        context: Option<RequestContext>,
    ) {
        let notifier = Arc::clone(&self.notifier);
        let resolved = after.clone();
        tokio::spawn(async move {
            if let Err(err) = notifier.escalation_resolved(&resolved).await {
                tracing::warn!(request_id = %resolved.id, error = %err, "role request notice failed");
            }
        });
        log_activity_with_context(&self.events, action, actor, after, Some(before), context);
    }
}

fn dedupe_key(pending: &PendingEscalation) -> String {
    format!("{}/{}/{}", pending.tenant_id, pending.user_email, pending.requested_role)
}

fn duplicate_request() -> AppError {
    AppError::conflict("an unresolved request for this role already exists")
}

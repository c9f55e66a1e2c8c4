use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, Actor, EventBus, RequestContext};
use crate::models::pagination::{Page, PageParams};
use crate::models::tenant::{ApplicationKey, ApplicationKeyCreateRequest, ApplicationKeyCreated};
use crate::store::{StoreError, TenantStore};
use crate::utils::utc_now;

/// Application keys of the caller's own tenant.
#[derive(Clone)]
pub struct ApplicationKeyService {
    tenants: TenantStore,
    events: EventBus,
}

impl ApplicationKeyService {
    pub fn new(tenants: TenantStore, events: EventBus) -> Self {
        Self { tenants, events }
    }

    pub async fn list(&self, tenant_id: Uuid, page: PageParams) -> AppResult<Page<ApplicationKey>> {
        let (items, total) = self.tenants.list_keys(tenant_id, page).await?;
        Ok(Page::new(items, page, total))
    }

    pub async fn create(
        &self,
        actor: Actor,
        request: ApplicationKeyCreateRequest,
        context: Option<RequestContext>,
    ) -> AppResult<ApplicationKeyCreated> {
        request.validate(utc_now())?;
        let name = request.name.trim();

        let (key, secret) = self
            .tenants
            .issue_key(actor.tenant_id, name, request.expires_at)
            .await
            .map_err(|err| match err {
                StoreError::UniqueViolation(_) => AppError::conflict(format!("an application key named '{name}' already exists")),
                other => other.into(),
            })?;

        tracing::info!(tenant_id = %actor.tenant_id, key_id = %key.key_id, name = %key.name, "application key issued");
        log_activity_with_context(&self.events, "created", actor, &key, None, context);

        Ok(ApplicationKeyCreated {
            key_id: key.key_id,
            name: key.name,
            application_key: secret,
            expires_at: key.expires_at,
        })
    }

    /// A revoked key stops resolving at once. Revoking the key the request
    /// itself came in with is allowed.
    pub async fn revoke(&self, actor: Actor, key_id: Uuid, context: Option<RequestContext>) -> AppResult<()> {
        let before = self.tenants.get_key(actor.tenant_id, key_id).await?;
        let revoked = self.tenants.revoke_key(actor.tenant_id, key_id).await?;

        tracing::info!(tenant_id = %actor.tenant_id, key_id = %key_id, "application key revoked");
        log_activity_with_context(&self.events, "revoked", actor, &revoked, Some(&before), context);
        Ok(())
    }
}

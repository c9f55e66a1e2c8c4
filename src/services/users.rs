use uuid::Uuid;

use crate::errors::AppResult;
use crate::events::{log_activity_with_context, Actor, EventBus, RequestContext};
use crate::models::user::{UserRoleAssignRequest, UserRoles};
use crate::services::grantable_role;
use crate::store::{RoleStore, UserStore};

/// Direct role assignment by a tenant administrator, outside the request
/// workflow. Writes membership through the same path approvals use.
#[derive(Clone)]
pub struct UserRoleService {
    users: UserStore,
    roles: RoleStore,
    events: EventBus,
}

impl UserRoleService {
    pub fn new(users: UserStore, roles: RoleStore, events: EventBus) -> Self {
        Self { users, roles, events }
    }

    pub async fn assign(
        &self,
        actor: Actor,
        user_id: Uuid,
        request: UserRoleAssignRequest,
        context: Option<RequestContext>,
    ) -> AppResult<UserRoles> {
        request.validate()?;

        let before = UserRoles::from(&self.users.get(actor.tenant_id, user_id).await?);
        let role_name = grantable_role(&self.roles, actor.tenant_id, request.role.trim()).await?;

        if !self.users.grant_role(actor.tenant_id, user_id, &role_name).await? {
            tracing::debug!(tenant_id = %actor.tenant_id, user_id = %user_id, role = %role_name, "role already held");
            return Ok(before);
        }

        let after = UserRoles::from(&self.users.get(actor.tenant_id, user_id).await?);
        tracing::info!(tenant_id = %actor.tenant_id, user_id = %user_id, role = %role_name, "role assigned");
        log_activity_with_context(&self.events, "role_assigned", actor, &after, Some(&before), context);
        Ok(after)
    }
}

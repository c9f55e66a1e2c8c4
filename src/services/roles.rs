use uuid::Uuid;

use crate::authz::{is_system_role, system_role_id};
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, Actor, EventBus, RequestContext};
use crate::models::pagination::{Page, PageParams};
use crate::models::permission::{normalize_all, PermissionSet, RoleInfo, CUSTOM_ROLE_PRIORITY};
use crate::models::role::{
    PermissionsUpdateRequest, Role, RoleCreateRequest, RoleFilter, RolePermissionsResponse, RoleType,
};
use crate::store::{NewRole, RoleStore, StoreError};

/// Custom role lifecycle. System roles are readable but never mutated.
#[derive(Clone)]
pub struct RoleService {
    roles: RoleStore,
    events: EventBus,
}

fn system_role_immutable() -> AppError {
    AppError::conflict("system roles cannot be modified")
}

impl RoleService {
    pub fn new(roles: RoleStore, events: EventBus) -> Self {
        Self { roles, events }
    }

    pub fn store(&self) -> &RoleStore {
        &self.roles
    }

    pub async fn list(&self, tenant_id: Uuid, filter: RoleFilter, page: PageParams) -> AppResult<Page<Role>> {
        let (items, total) = self.roles.list(tenant_id, filter, page).await?;
        Ok(Page::new(items, page, total))
    }

    pub async fn create(
        &self,
        actor: Actor,
        request: RoleCreateRequest,
        context: Option<RequestContext>,
    ) -> AppResult<(Role, PermissionSet)> {
        request.validate()?;
        let name = request.name.trim().to_string();
        let display_name = request.display_name.trim().to_string();

        if system_role_id(&name).is_some() {
            return Err(AppError::conflict(format!("'{name}' is a reserved system role name")));
        }

        let permissions = normalize_all(request.permissions)?;
        let info = RoleInfo {
            name: name.clone(),
            display_name: display_name.clone(),
            description: request.description.clone().unwrap_or_default(),
            role_type: RoleType::Custom.as_str().to_string(),
            priority: CUSTOM_ROLE_PRIORITY,
            is_system: false,
        };
        // the diff merge drops structural duplicates from the request
        let (set, _) = PermissionSet::new(info, Vec::new()).with_diff(&permissions, &[]);

        let role = self
            .roles
            .create_custom(NewRole {
                tenant_id: actor.tenant_id,
                name: &name,
                display_name: &display_name,
                description: request.description.as_deref(),
                permission_set: &set,
            })
            .await
            .map_err(|err| match err {
                StoreError::UniqueViolation(_) => {
                    AppError::conflict("a role with this name or display name already exists")
                }
                other => other.into(),
            })?;

        tracing::info!(tenant_id = %actor.tenant_id, role_id = %role.role_id, name = %role.name, "custom role created");
        log_activity_with_context(&self.events, "created", actor, &role, None, context);

        Ok((role, set))
    }

    pub async fn permissions(&self, tenant_id: Uuid, role_id: Uuid) -> AppResult<RolePermissionsResponse> {
        let stored = self.roles.load_permission_set(tenant_id, role_id).await?;
        Ok(RolePermissionsResponse {
            role_id: stored.role_id,
            version: stored.version,
            permission_set: stored.set,
        })
    }

    /// Applies removals then additions and writes the merged set once,
    /// guarded by the version read at the start.
    pub async fn update_permissions(
        &self,
        actor: Actor,
        role_id: Uuid,
        request: PermissionsUpdateRequest,
        context: Option<RequestContext>,
    ) -> AppResult<RolePermissionsResponse> {
        if is_system_role(role_id) {
            return Err(system_role_immutable());
        }
        let before = self.roles.find(actor.tenant_id, role_id).await?;
        if before.is_system() {
            return Err(system_role_immutable());
        }

        let display_name = request.display_name.as_deref().map(str::trim);
        if display_name == Some("") {
            return Err(AppError::validation("display_name must not be empty"));
        }
        let add = normalize_all(request.add_permissions)?;
        let remove = normalize_all(request.remove_permissions)?;

        let stored = self.roles.load_permission_set(actor.tenant_id, role_id).await?;
        let (mut merged, summary) = stored.set.with_diff(&add, &remove);
        if let Some(display_name) = display_name {
            merged.role_info.display_name = display_name.to_string();
        }
        if let Some(description) = request.description.as_deref() {
            merged.role_info.description = description.to_string();
        }

        let version = self
            .roles
            .update_permissions(
                actor.tenant_id,
                role_id,
                stored.version,
                &merged,
                display_name,
                request.description.as_deref(),
            )
            .await
            .map_err(|err| match err {
                StoreError::UniqueViolation(_) => AppError::conflict("a role with this display name already exists"),
                other => other.into(),
            })?;

        tracing::info!(
            tenant_id = %actor.tenant_id,
            role_id = %role_id,
            added = summary.added,
            removed = summary.removed,
            version,
            "role permissions updated"
        );
        let after = self.roles.find(actor.tenant_id, role_id).await?;
        log_activity_with_context(&self.events, "permissions_updated", actor, &after, Some(&before), context);

        Ok(RolePermissionsResponse {
            role_id,
            version,
            permission_set: merged,
        })
    }

    /// Disabling does not revoke tokens already issued for the role.
    pub async fn set_enabled(
        &self,
        actor: Actor,
        role_id: Uuid,
        enabled: bool,
        context: Option<RequestContext>,
    ) -> AppResult<Role> {
        if is_system_role(role_id) {
            return Err(system_role_immutable());
        }

        let role = self.roles.set_enabled(actor.tenant_id, role_id, enabled).await?;
        let action = if enabled { "enabled" } else { "disabled" };

        tracing::info!(tenant_id = %actor.tenant_id, role_id = %role_id, action, "role status changed");
        log_activity_with_context(&self.events, action, actor, &role, None, context);
        Ok(role)
    }

    pub async fn delete(&self, actor: Actor, role_id: Uuid, context: Option<RequestContext>) -> AppResult<()> {
        if is_system_role(role_id) {
            return Err(system_role_immutable());
        }

        let role = self.roles.delete(actor.tenant_id, role_id).await?;

        tracing::info!(tenant_id = %actor.tenant_id, role_id = %role_id, name = %role.name, "custom role deleted");
        log_activity_with_context(&self.events, "deleted", actor, &role, None, context);
        Ok(())
    }
}

//! Business operations sitting between the HTTP handlers and the stores.

use uuid::Uuid;

use crate::authz::system_role_id;
use crate::errors::{AppError, AppResult};
use crate::models::role::RoleType;
use crate::store::RoleStore;

pub mod escalation;
pub mod keys;
pub mod notify;
pub mod roles;
pub mod users;

pub use escalation::{EscalationService, Requester};
pub use keys::ApplicationKeyService;
pub use notify::{LogNotifier, Notifier};
pub use roles::RoleService;
pub use users::UserRoleService;

/// Resolves the role name a grant should record. System role names grant
/// directly; a custom role must exist in the tenant and be enabled.
pub(crate) async fn grantable_role(roles: &RoleStore, tenant_id: Uuid, name: &str) -> AppResult<String> {
    if system_role_id(name).is_some() {
        return Ok(name.to_string());
    }

    match roles.find_by_name(tenant_id, name).await? {
        Some(role) if role.role_type == RoleType::Custom && role.enabled => Ok(role.name),
        Some(_) => Err(AppError::bad_request(format!("role '{name}' cannot be granted"))),
        None => Err(AppError::bad_request(format!("role '{name}' does not exist"))),
    }
}

//! Authorization: route-template matching, the three-stage decision engine
//! and the axum middleware that runs it.
//!
//! Stages, each independently failable:
//! - tenant key -> tenant id
//! - bearer credential -> verified claims
//! - claims.role_id -> permission set -> match (method, path)

mod context;
mod engine;
pub mod matcher;
pub mod middleware;

pub use context::{AuthContext, RoleContext, TenantContext};
pub use engine::DecisionEngine;
pub use matcher::{matches, PermissionMatcher, RouteTemplate};

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::AppError;
use crate::jwt::Claims;
use crate::models::permission::PermissionSet;
use crate::store::StoreResult;

/// Tenant that owns the shared system roles.
pub const SYSTEM_TENANT_ID: Uuid = Uuid::from_u128(0);

/// Well-known system roles. Ids are fixed and seeded by migration.
pub mod roles {
    use uuid::{uuid, Uuid};

    pub const ADMIN: &str = "admin";
    pub const USER: &str = "user";
    pub const MODERATOR: &str = "moderator";
    pub const GUEST: &str = "guest";

    pub const ADMIN_ID: Uuid = uuid!("f47ac10b-58cc-4372-a567-0e02b2c3d479");
    pub const USER_ID: Uuid = uuid!("6ba7b810-9dad-11d1-80b4-00c04fd430c8");
    pub const MODERATOR_ID: Uuid = uuid!("1b9d6bcd-bbfd-4b2d-9b5d-ab8dfbbd4bed");
    pub const GUEST_ID: Uuid = uuid!("550e8400-e29b-41d4-a716-446655440000");

    pub const SYSTEM: [(&str, Uuid); 4] = [
        (ADMIN, ADMIN_ID),
        (USER, USER_ID),
        (MODERATOR, MODERATOR_ID),
        (GUEST, GUEST_ID),
    ];
}

pub fn is_system_role(role_id: Uuid) -> bool {
    roles::SYSTEM.iter().any(|(_, id)| *id == role_id)
}

pub fn system_role_id(name: &str) -> Option<Uuid> {
    roles::SYSTEM.iter().find(|(n, _)| *n == name).map(|(_, id)| *id)
}

/// Resolves an application key to the tenant it belongs to.
#[async_trait]
pub trait TenantResolver: Send + Sync {
    async fn resolve_tenant(&self, application_key: &str) -> StoreResult<Option<Uuid>>;
}

/// Verifies a bearer credential (signature, expiry) and yields its claims.
pub trait IdentityVerifier: Send + Sync {
    fn verify_identity(&self, credential: &str) -> Result<Claims, AppError>;
}

/// Loads the permission set attached to a role, as seen from a tenant.
#[async_trait]
pub trait PermissionSource: Send + Sync {
    async fn permission_set(&self, tenant_id: Uuid, role_id: Uuid) -> StoreResult<Option<PermissionSet>>;
}

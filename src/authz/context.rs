use uuid::Uuid;

use crate::models::permission::Permission;

/// Published by the tenant-key stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantContext {
    pub tenant_id: Uuid,
}

/// Published by the identity stage. Read-only once built.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub role_id: Uuid,
    pub tenant_id: Uuid,
    /// Raw bearer credential as presented.
    pub token: String,
}

/// Published by the permission stage.
#[derive(Debug, Clone)]
pub struct RoleContext {
    pub role_id: Uuid,
    pub role_name: String,
    pub granted_by: Permission,
}

macro_rules! extension_extractor {
    ($ty:ty, $stage:literal) => {
        #[axum::async_trait]
        impl<S: Send + Sync> axum::extract::FromRequestParts<S> for $ty {
            type Rejection = crate::errors::AppError;

            async fn from_request_parts(
                parts: &mut axum::http::request::Parts,
                _state: &S,
            ) -> Result<Self, Self::Rejection> {
                parts
                    .extensions
                    .get::<$ty>()
                    .cloned()
                    .ok_or_else(|| crate::errors::AppError::unauthorized(concat!($stage, " stage has not run")))
            }
        }
    };
}

extension_extractor!(TenantContext, "tenant key");
extension_extractor!(AuthContext, "identity");
extension_extractor!(RoleContext, "permission");

use std::sync::Arc;

use super::context::{AuthContext, RoleContext, TenantContext};
use super::matcher::PermissionMatcher;
use super::{IdentityVerifier, PermissionSource, TenantResolver};
use crate::errors::{AppError, AppResult};
use crate::jwt::ACCESS_TOKEN;

/// Runs the three authorization stages. Each stage is callable on its own so
/// a route can stop after the key check or after identity verification.
#[derive(Clone)]
pub struct DecisionEngine {
    tenants: Arc<dyn TenantResolver>,
    identity: Arc<dyn IdentityVerifier>,
    permissions: Arc<dyn PermissionSource>,
}

impl DecisionEngine {
    pub fn new(
        tenants: Arc<dyn TenantResolver>,
        identity: Arc<dyn IdentityVerifier>,
        permissions: Arc<dyn PermissionSource>,
    ) -> Self {
        Self {
            tenants,
            identity,
            permissions,
        }
    }

    pub async fn resolve_tenant(&self, application_key: Option<&str>) -> AppResult<TenantContext> {
        let key = application_key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AppError::unauthorized("application key missing"))?;

        match self.tenants.resolve_tenant(key).await {
            Ok(Some(tenant_id)) => Ok(TenantContext { tenant_id }),
            Ok(None) => {
                tracing::debug!("unknown or inactive application key");
                Err(AppError::unauthorized("invalid application key"))
            }
            Err(err) => {
                tracing::error!(error = %err, "application key lookup failed");
                Err(AppError::internal(format!("application key lookup failed: {err}")))
            }
        }
    }

    pub fn verify_identity(&self, tenant: &TenantContext, credential: Option<&str>) -> AppResult<AuthContext> {
        let token = credential.ok_or_else(|| AppError::unauthorized("Authorization header missing"))?;
        let claims = self.identity.verify_identity(token)?;

        if claims.token_type != ACCESS_TOKEN {
            tracing::debug!(token_type = %claims.token_type, "non-access token presented");
            return Err(AppError::unauthorized("access token required"));
        }

        if claims.tenant_id != tenant.tenant_id {
            tracing::warn!(
                tenant_id = %tenant.tenant_id,
                token_tenant_id = %claims.tenant_id,
                user_id = %claims.sub,
                "token issued for another tenant"
            );
            return Err(AppError::unauthorized("token does not belong to this tenant"));
        }

        Ok(AuthContext {
            user_id: claims.sub,
            role_id: claims.role_id,
            tenant_id: claims.tenant_id,
            token: token.to_string(),
        })
    }

    pub async fn authorize(&self, auth: &AuthContext, method: &str, path: &str) -> AppResult<RoleContext> {
        let set = match self.permissions.permission_set(auth.tenant_id, auth.role_id).await {
            Ok(Some(set)) => set,
            Ok(None) => {
                tracing::debug!(
                    tenant_id = %auth.tenant_id,
                    role_id = %auth.role_id,
                    "no permission mapping for role"
                );
                return Err(AppError::forbidden("role has no permissions"));
            }
            Err(err) => {
                tracing::error!(
                    tenant_id = %auth.tenant_id,
                    role_id = %auth.role_id,
                    error = %err,
                    "failed to load permission set"
                );
                return Err(AppError::internal(format!("failed to load permission set: {err}")));
            }
        };

        let matcher = PermissionMatcher::new(&set);
        match matcher.find(method, path) {
            Some(permission) => {
                tracing::debug!(
                    role_id = %auth.role_id,
                    method = %method,
                    path = %path,
                    route = %permission.route,
                    "permission match"
                );
                Ok(RoleContext {
                    role_id: auth.role_id,
                    role_name: set.role_info.name.clone(),
                    granted_by: permission.clone(),
                })
            }
            None => {
                tracing::debug!(
                    role_id = %auth.role_id,
                    method = %method,
                    path = %path,
                    "permission denied"
                );
                Err(AppError::forbidden(format!("{method} {path} is not permitted for this role")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use uuid::Uuid;

    use super::*;
    use crate::jwt::JwtConfig;
    use crate::models::permission::{Permission, PermissionSet, RoleInfo};
    use crate::store::{StoreError, StoreResult};

    struct Keys(HashMap<String, Uuid>);

    #[async_trait]
    impl TenantResolver for Keys {
        async fn resolve_tenant(&self, key: &str) -> StoreResult<Option<Uuid>> {
            Ok(self.0.get(key).copied())
        }
    }

    struct Sets {
        sets: HashMap<Uuid, PermissionSet>,
        broken: Option<Uuid>,
    }

    #[async_trait]
    impl PermissionSource for Sets {
        async fn permission_set(&self, _tenant: Uuid, role_id: Uuid) -> StoreResult<Option<PermissionSet>> {
            if self.broken == Some(role_id) {
                return Err(StoreError::Backend(sqlx::Error::PoolClosed));
            }
            Ok(self.sets.get(&role_id).cloned())
        }
    }

    struct Fixture {
        engine: DecisionEngine,
        jwt: JwtConfig,
        tenant: Uuid,
        reader: Uuid,
        broken: Uuid,
    }

    fn fixture() -> Fixture {
        let tenant = Uuid::new_v4();
        let reader = Uuid::new_v4();
        let broken = Uuid::new_v4();
        let jwt = JwtConfig::new("engine-secret", 1);

        let set = PermissionSet::new(
            RoleInfo {
                name: "reader".into(),
                display_name: "Reader".into(),
                description: String::new(),
                role_type: "custom".into(),
                priority: 50,
                is_system: false,
            },
            vec![Permission::new("/messages/:message_id", &["GET"], "")],
        );

        let engine = DecisionEngine::new(
            Arc::new(Keys(HashMap::from([("good-key".to_string(), tenant)]))),
            Arc::new(jwt.clone()),
            Arc::new(Sets {
                sets: HashMap::from([(reader, set)]),
                broken: Some(broken),
            }),
        );

        Fixture {
            engine,
            jwt,
            tenant,
            reader,
            broken,
        }
    }

    fn auth(f: &Fixture, role_id: Uuid) -> AuthContext {
        AuthContext {
            user_id: Uuid::new_v4(),
            role_id,
            tenant_id: f.tenant,
            token: String::new(),
        }
    }

    #[tokio::test]
    async fn tenant_stage_requires_known_key() {
        let f = fixture();

        assert!(matches!(f.engine.resolve_tenant(None).await, Err(AppError::Unauthorized(_))));
        assert!(matches!(f.engine.resolve_tenant(Some("  ")).await, Err(AppError::Unauthorized(_))));
        assert!(matches!(f.engine.resolve_tenant(Some("bad")).await, Err(AppError::Unauthorized(_))));

        let ctx = f.engine.resolve_tenant(Some("good-key")).await.unwrap();
        assert_eq!(ctx.tenant_id, f.tenant);
    }

    #[tokio::test]
    async fn identity_stage_checks_tenant_and_token_type() {
        let f = fixture();
        let tenant = TenantContext { tenant_id: f.tenant };
        let user = Uuid::new_v4();

        let token = f.jwt.encode(user, f.reader, f.tenant).unwrap();
        let ctx = f.engine.verify_identity(&tenant, Some(&token)).unwrap();
        assert_eq!(ctx.user_id, user);
        assert_eq!(ctx.role_id, f.reader);

        let foreign = f.jwt.encode(user, f.reader, Uuid::new_v4()).unwrap();
        assert!(matches!(f.engine.verify_identity(&tenant, Some(&foreign)), Err(AppError::Unauthorized(_))));

        let refresh = f.jwt.encode_typed(user, f.reader, f.tenant, "refresh").unwrap();
        assert!(matches!(f.engine.verify_identity(&tenant, Some(&refresh)), Err(AppError::Unauthorized(_))));

        assert!(matches!(f.engine.verify_identity(&tenant, None), Err(AppError::Unauthorized(_))));
        assert!(matches!(f.engine.verify_identity(&tenant, Some("garbage")), Err(AppError::Token(_))));
    }

    #[tokio::test]
    async fn permission_stage_allows_matching_route() {
        let f = fixture();
        let ctx = f.engine.authorize(&auth(&f, f.reader), "GET", "/messages/abc").await.unwrap();
        assert_eq!(ctx.role_name, "reader");
        assert_eq!(ctx.granted_by.route, "/messages/:message_id");
    }

    #[tokio::test]
    async fn permission_stage_distinguishes_deny_from_failure() {
        let f = fixture();

        let denied = f.engine.authorize(&auth(&f, f.reader), "DELETE", "/messages/abc").await;
        assert!(matches!(denied, Err(AppError::Forbidden(_))));

        let unmapped = f.engine.authorize(&auth(&f, Uuid::new_v4()), "GET", "/messages/abc").await;
        assert!(matches!(unmapped, Err(AppError::Forbidden(_))));

        let failed = f.engine.authorize(&auth(&f, f.broken), "GET", "/messages/abc").await;
        assert!(matches!(failed, Err(AppError::Internal(_))));
    }
}

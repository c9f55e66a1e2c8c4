use axum::extract::{OriginalUri, Query, Request, State};
use axum::middleware::{from_fn_with_state, Next};
use axum::response::Response;
use axum::Router;
use serde::Deserialize;

use super::context::{AuthContext, TenantContext};
use crate::app::AppState;
use crate::errors::AppError;

/// Which stages guard a group of routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chain {
    /// Tenant key only.
    AppKey,
    /// Tenant key and identity.
    Basic,
    /// Tenant key, identity and permission.
    Full,
}

/// Wraps every route of `router` with the stages of `chain`. Route layers
/// run outermost-last, so the tenant key check is added last.
pub fn guard(router: Router<AppState>, state: &AppState, chain: Chain) -> Router<AppState> {
    let router = match chain {
        Chain::Full => router.route_layer(from_fn_with_state(state.clone(), require_permission)),
        _ => router,
    };
    let router = match chain {
        Chain::Basic | Chain::Full => router.route_layer(from_fn_with_state(state.clone(), require_identity)),
        Chain::AppKey => router,
    };
    router.route_layer(from_fn_with_state(state.clone(), require_tenant_key))
}

#[derive(Debug, Deserialize)]
struct KeyQuery {
    application_key: Option<String>,
}

pub async fn require_tenant_key(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let key = Query::<KeyQuery>::try_from_uri(req.uri())
        .ok()
        .and_then(|Query(q)| q.application_key);

    let tenant = state.engine.resolve_tenant(key.as_deref()).await?;

    req.extensions_mut().insert(tenant);
    Ok(next.run(req).await)
}

pub async fn require_identity(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let tenant = *req
        .extensions()
        .get::<TenantContext>()
        .ok_or_else(|| AppError::internal("identity stage ran without a tenant context"))?;

    let credential = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);

    let auth = state.engine.verify_identity(&tenant, credential)?;
    req.extensions_mut().insert(auth);
    Ok(next.run(req).await)
}

pub async fn require_permission(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth = req
        .extensions()
        .get::<AuthContext>()
        .cloned()
        .ok_or_else(|| AppError::internal("permission stage ran without an auth context"))?;

    // match against the path as the client sent it, before any nesting
    let path = req
        .extensions()
        .get::<OriginalUri>()
        .map(|uri| uri.0.path().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let method = req.method().as_str().to_string();

    let role = state.engine.authorize(&auth, &method, &path).await?;
    req.extensions_mut().insert(role);
    Ok(next.run(req).await)
}

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{AuthContext, TenantContext};
use crate::errors::AppResult;
use crate::events::RequestContext;
use crate::extract::{AppJson, AppPath, AppQuery};
use crate::models::pagination::Page;
use crate::models::tenant::{
    ApplicationKey, ApplicationKeyCreateRequest, ApplicationKeyCreated, ApplicationKeyListQuery, TenantResponse,
};

use super::actor;

#[utoipa::path(
    get,
    path = "/api/tenant",
    tag = "Tenant",
    params(("application_key" = String, Query, description = "Tenant application key")),
    responses(
        (status = 200, description = "Tenant owning the application key", body = TenantResponse),
        (status = 401, description = "Missing or unknown application key")
    )
)]
pub async fn current_tenant(tenant: TenantContext) -> Json<TenantResponse> {
    Json(TenantResponse {
        tenant_id: tenant.tenant_id,
    })
}

#[utoipa::path(
    get,
    path = "/tenant/keys",
    tag = "Tenant",
    params(ApplicationKeyListQuery),
    responses(
        (status = 200, description = "Paginated application keys of the tenant, as `{items, meta}`. Secrets are never listed")
    )
)]
pub async fn list_keys(
    State(state): State<AppState>,
    tenant: TenantContext,
    AppQuery(query): AppQuery<ApplicationKeyListQuery>,
) -> AppResult<Json<Page<ApplicationKey>>> {
    let page = state.keys.list(tenant.tenant_id, query.page()).await?;
    Ok(Json(page))
}

#[utoipa::path(
    post,
    path = "/tenant/keys",
    tag = "Tenant",
    request_body = ApplicationKeyCreateRequest,
    responses(
        (status = 201, description = "Key issued; the plaintext key is only returned here", body = ApplicationKeyCreated),
        (status = 409, description = "A key with this name already exists"),
        (status = 422, description = "Missing name or expiry in the past")
    )
)]
pub async fn create_key(
    State(state): State<AppState>,
    auth: AuthContext,
    headers: HeaderMap,
    AppJson(payload): AppJson<ApplicationKeyCreateRequest>,
) -> AppResult<(StatusCode, Json<ApplicationKeyCreated>)> {
    let context = RequestContext::from_headers(&headers);
    let created = state.keys.create(actor(&auth), payload, Some(context)).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[utoipa::path(
    delete,
    path = "/tenant/keys/{key_id}",
    tag = "Tenant",
    params(("key_id" = Uuid, Path, description = "Application key id")),
    responses(
        (status = 204, description = "Key revoked"),
        (status = 404, description = "Key not found in this tenant"),
        (status = 409, description = "Key already revoked")
    )
)]
pub async fn revoke_key(
    State(state): State<AppState>,
    auth: AuthContext,
    headers: HeaderMap,
    AppPath(key_id): AppPath<Uuid>,
) -> AppResult<StatusCode> {
    let context = RequestContext::from_headers(&headers);
    state.keys.revoke(actor(&auth), key_id, Some(context)).await?;
    Ok(StatusCode::NO_CONTENT)
}

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{AuthContext, TenantContext};
use crate::errors::AppResult;
use crate::extract::{AppJson, AppPath, AppQuery};
use crate::events::RequestContext;
use crate::models::pagination::Page;
use crate::models::role::{
    PermissionsUpdateRequest, Role, RoleCreateRequest, RoleCreatedResponse, RoleListQuery, RolePermissionsResponse,
};

use super::actor;

#[utoipa::path(
    get,
    path = "/roles",
    tag = "Roles",
    params(RoleListQuery),
    responses(
        (status = 200, description = "Paginated roles visible to the tenant, as `{items, meta}`"),
        (status = 422, description = "Unknown filter value")
    )
)]
pub async fn list_roles(
    State(state): State<AppState>,
    tenant: TenantContext,
    AppQuery(query): AppQuery<RoleListQuery>,
) -> AppResult<Json<Page<Role>>> {
    let filter = query.filter()?;
    let page = state.roles.list(tenant.tenant_id, filter, query.page()).await?;
    Ok(Json(page))
}

#[utoipa::path(
    post,
    path = "/roles",
    tag = "Roles",
    request_body = RoleCreateRequest,
    responses(
        (status = 201, description = "Custom role created", body = RoleCreatedResponse),
        (status = 409, description = "Name already taken or reserved"),
        (status = 422, description = "Invalid role or permission")
    )
)]
pub async fn create_role(
    State(state): State<AppState>,
    auth: AuthContext,
    headers: HeaderMap,
    AppJson(payload): AppJson<RoleCreateRequest>,
) -> AppResult<(StatusCode, Json<RoleCreatedResponse>)> {
    let context = RequestContext::from_headers(&headers);
    let (role, set) = state.roles.create(actor(&auth), payload, Some(context)).await?;

    Ok((
        StatusCode::CREATED,
        Json(RoleCreatedResponse {
            role,
            permissions: set.permissions,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/roles/{role_id}/permissions",
    tag = "Roles",
    params(("role_id" = Uuid, Path, description = "Role id")),
    responses(
        (status = 200, description = "Permission set of the role", body = RolePermissionsResponse),
        (status = 404, description = "Role not found")
    )
)]
pub async fn get_permissions(
    State(state): State<AppState>,
    tenant: TenantContext,
    AppPath(role_id): AppPath<Uuid>,
) -> AppResult<Json<RolePermissionsResponse>> {
    let permissions = state.roles.permissions(tenant.tenant_id, role_id).await?;
    Ok(Json(permissions))
}

#[utoipa::path(
    put,
    path = "/roles/{role_id}/permissions",
    tag = "Roles",
    params(("role_id" = Uuid, Path, description = "Role id")),
    request_body = PermissionsUpdateRequest,
    responses(
        (status = 200, description = "Merged permission set", body = RolePermissionsResponse),
        (status = 404, description = "Role not found"),
        (status = 409, description = "System role, or the set changed concurrently")
    )
)]
pub async fn update_permissions(
    State(state): State<AppState>,
    auth: AuthContext,
    headers: HeaderMap,
    AppPath(role_id): AppPath<Uuid>,
    AppJson(payload): AppJson<PermissionsUpdateRequest>,
) -> AppResult<Json<RolePermissionsResponse>> {
    let context = RequestContext::from_headers(&headers);
    let updated = state
        .roles
        .update_permissions(actor(&auth), role_id, payload, Some(context))
        .await?;
    Ok(Json(updated))
}

#[utoipa::path(
    put,
    path = "/roles/{role_id}/enable",
    tag = "Roles",
    params(("role_id" = Uuid, Path, description = "Role id")),
    responses(
        (status = 200, description = "Role enabled", body = Role),
        (status = 409, description = "System role or already enabled")
    )
)]
pub async fn enable_role(
    State(state): State<AppState>,
    auth: AuthContext,
    headers: HeaderMap,
    AppPath(role_id): AppPath<Uuid>,
) -> AppResult<Json<Role>> {
    let context = RequestContext::from_headers(&headers);
    let role = state.roles.set_enabled(actor(&auth), role_id, true, Some(context)).await?;
    Ok(Json(role))
}

#[utoipa::path(
    put,
    path = "/roles/{role_id}/disable",
    tag = "Roles",
    params(("role_id" = Uuid, Path, description = "Role id")),
    responses(
        (status = 200, description = "Role disabled", body = Role),
        (status = 409, description = "System role or already disabled")
    )
)]
pub async fn disable_role(
    State(state): State<AppState>,
    auth: AuthContext,
    headers: HeaderMap,
    AppPath(role_id): AppPath<Uuid>,
) -> AppResult<Json<Role>> {
    let context = RequestContext::from_headers(&headers);
    let role = state.roles.set_enabled(actor(&auth), role_id, false, Some(context)).await?;
    Ok(Json(role))
}

#[utoipa::path(
    delete,
    path = "/roles/{role_id}",
    tag = "Roles",
    params(("role_id" = Uuid, Path, description = "Role id")),
    responses(
        (status = 204, description = "Custom role deleted"),
        (status = 404, description = "Role not found"),
        (status = 409, description = "System role")
    )
)]
pub async fn delete_role(
    State(state): State<AppState>,
    auth: AuthContext,
    headers: HeaderMap,
    AppPath(role_id): AppPath<Uuid>,
) -> AppResult<StatusCode> {
    let context = RequestContext::from_headers(&headers);
    state.roles.delete(actor(&auth), role_id, Some(context)).await?;
    Ok(StatusCode::NO_CONTENT)
}

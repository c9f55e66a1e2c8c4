use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{AuthContext, RoleContext, TenantContext};
use crate::errors::AppResult;
use crate::extract::{AppJson, AppPath, AppQuery};
use crate::events::RequestContext;
use crate::models::escalation::{
    EscalationAccepted, EscalationCreateRequest, EscalationListQuery, EscalationRequest, EscalationStatusResponse,
};
use crate::models::pagination::Page;
use crate::services::Requester;

use super::actor;

fn requester(auth: &AuthContext, role: &RoleContext) -> Requester {
    Requester {
        tenant_id: auth.tenant_id,
        user_id: auth.user_id,
        role_name: role.role_name.clone(),
    }
}

#[utoipa::path(
    post,
    path = "/messages",
    tag = "Role requests",
    request_body = EscalationCreateRequest,
    responses(
        (status = 202, description = "Request queued for persistence", body = EscalationAccepted),
        (status = 409, description = "Role already held or an unresolved request exists"),
        (status = 422, description = "Malformed request or email mismatch"),
        (status = 500, description = "Queue unavailable")
    )
)]
pub async fn create_request(
    State(state): State<AppState>,
    auth: AuthContext,
    role: RoleContext,
    AppJson(payload): AppJson<EscalationCreateRequest>,
) -> AppResult<(StatusCode, Json<EscalationAccepted>)> {
    let accepted = state.escalations.create(&requester(&auth, &role), payload).await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

#[utoipa::path(
    get,
    path = "/messages",
    tag = "Role requests",
    responses((status = 200, description = "Requests submitted by the caller", body = [EscalationStatusResponse]))
)]
pub async fn list_own_requests(
    State(state): State<AppState>,
    auth: AuthContext,
    role: RoleContext,
) -> AppResult<Json<Vec<EscalationStatusResponse>>> {
    let requests = state.escalations.list_own(&requester(&auth, &role)).await?;
    Ok(Json(requests.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    get,
    path = "/messages/{message_id}",
    tag = "Role requests",
    params(("message_id" = Uuid, Path, description = "Request id")),
    responses(
        (status = 200, description = "Request status", body = EscalationStatusResponse),
        (status = 404, description = "Request not found in this tenant")
    )
)]
pub async fn get_request_status(
    State(state): State<AppState>,
    tenant: TenantContext,
    AppPath(message_id): AppPath<Uuid>,
) -> AppResult<Json<EscalationStatusResponse>> {
    let request = state.escalations.get(tenant.tenant_id, message_id).await?;
    Ok(Json(request.into()))
}

#[utoipa::path(
    get,
    path = "/tenant/messages",
    tag = "Role requests",
    params(EscalationListQuery),
    responses(
        (status = 200, description = "Paginated requests of the tenant, pending first, as `{items, meta}`"),
        (status = 422, description = "Unknown status filter")
    )
)]
pub async fn list_tenant_requests(
    State(state): State<AppState>,
    tenant: TenantContext,
    AppQuery(query): AppQuery<EscalationListQuery>,
) -> AppResult<Json<Page<EscalationRequest>>> {
    let status = query.status()?;
    let page = state.escalations.list(tenant.tenant_id, status, query.page()).await?;
    Ok(Json(page))
}

#[utoipa::path(
    put,
    path = "/tenant/messages/{message_id}/approve",
    tag = "Role requests",
    params(("message_id" = Uuid, Path, description = "Request id")),
    responses(
        (status = 200, description = "Request approved and role granted", body = EscalationRequest),
        (status = 400, description = "Role or user can no longer be resolved"),
        (status = 404, description = "Request not found in this tenant"),
        (status = 409, description = "Request already processed")
    )
)]
pub async fn approve_request(
    State(state): State<AppState>,
    auth: AuthContext,
    headers: HeaderMap,
    AppPath(message_id): AppPath<Uuid>,
) -> AppResult<Json<EscalationRequest>> {
    let context = RequestContext::from_headers(&headers);
    let resolved = state.escalations.approve(actor(&auth), message_id, Some(context)).await?;
    Ok(Json(resolved))
}

#[utoipa::path(
    put,
    path = "/tenant/messages/{message_id}/reject",
    tag = "Role requests",
    params(("message_id" = Uuid, Path, description = "Request id")),
    responses(
        (status = 200, description = "Request rejected", body = EscalationRequest),
        (status = 404, description = "Request not found in this tenant"),
        (status = 409, description = "Request already processed")
    )
)]
pub async fn reject_request(
    State(state): State<AppState>,
    auth: AuthContext,
    headers: HeaderMap,
    AppPath(message_id): AppPath<Uuid>,
) -> AppResult<Json<EscalationRequest>> {
    let context = RequestContext::from_headers(&headers);
    let resolved = state.escalations.reject(actor(&auth), message_id, Some(context)).await?;
    Ok(Json(resolved))
}

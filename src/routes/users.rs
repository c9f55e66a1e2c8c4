use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::AuthContext;
use crate::errors::AppResult;
use crate::events::RequestContext;
use crate::extract::{AppJson, AppPath};
use crate::models::user::{UserRoleAssignRequest, UserRoles};

use super::actor;

#[utoipa::path(
    put,
    path = "/users/{user_id}/roles",
    tag = "Users",
    params(("user_id" = Uuid, Path, description = "User id")),
    request_body = UserRoleAssignRequest,
    responses(
        (status = 200, description = "Roles held by the user after the grant", body = UserRoles),
        (status = 400, description = "Role does not exist or cannot be granted"),
        (status = 404, description = "User not found in this tenant")
    )
)]
pub async fn assign_role(
    State(state): State<AppState>,
    auth: AuthContext,
    headers: HeaderMap,
    AppPath(user_id): AppPath<Uuid>,
    AppJson(payload): AppJson<UserRoleAssignRequest>,
) -> AppResult<Json<UserRoles>> {
    let context = RequestContext::from_headers(&headers);
    let roles = state.user_roles.assign(actor(&auth), user_id, payload, Some(context)).await?;
    Ok(Json(roles))
}

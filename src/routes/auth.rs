use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::authz::AuthContext;

/// Identity established from the bearer token.
#[derive(Debug, Serialize, ToSchema)]
pub struct VerifyResponse {
    pub user_id: Uuid,
    pub role_id: Uuid,
    pub tenant_id: Uuid,
}

#[utoipa::path(
    get,
    path = "/auth/verify",
    tag = "Auth",
    params(("application_key" = String, Query, description = "Tenant application key")),
    responses(
        (status = 200, description = "Token is valid for this tenant", body = VerifyResponse),
        (status = 401, description = "Missing, invalid or foreign token")
    )
)]
pub async fn verify(auth: AuthContext) -> Json<VerifyResponse> {
    Json(VerifyResponse {
        user_id: auth.user_id,
        role_id: auth.role_id,
        tenant_id: auth.tenant_id,
    })
}

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use sqlx::query_scalar;
use utoipa::ToSchema;

use crate::app::AppState;
use crate::errors::AppResult;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub db_ok: bool,
    pub db_error: Option<String>,
    /// Messages waiting in the task queue, when it can be read.
    pub queue_ready: Option<i64>,
}

#[utoipa::path(
    get,
    path = "/api/health",
    tag = "Health",
    responses((status = 200, description = "Health check", body = HealthResponse))
)]
pub async fn health(State(state): State<AppState>) -> AppResult<Json<HealthResponse>> {
    let db_check = query_scalar::<_, i64>("SELECT 1").fetch_one(&state.pool).await;
    let queue_ready = state.task_queue.depth().await.ok().map(|depth| depth.ready);

    match db_check {
        Ok(_) => Ok(Json(HealthResponse { status: "ok", db_ok: true, db_error: None, queue_ready })),
        Err(e) => {
            tracing::error!(error = %e, "health check database query failed");
            Ok(Json(HealthResponse { status: "degraded", db_ok: false, db_error: Some("database unavailable".into()), queue_ready }))
        }
    }
}

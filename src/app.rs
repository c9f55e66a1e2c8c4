use std::sync::Arc;

use axum::http::Method;
use axum::routing::{get, put};
use axum::Router;
use serde_json::Value;
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::authz::middleware::{guard, Chain};
use crate::authz::DecisionEngine;
use crate::errors::AppError;
use crate::events::{init_event_bus, start_activity_listener, EventBus};
use crate::jwt::JwtConfig;
use crate::queue::handlers::{PersistEscalationHandler, ReservedTaskHandler};
use crate::queue::{QueueConfig, SqliteTaskQueue, TaskConsumer, TaskKind, TaskRouter};
use crate::routes::{auth, escalations, health, roles, tenant, users};
use crate::services::{ApplicationKeyService, EscalationService, LogNotifier, RoleService, UserRoleService};
use crate::store::{EscalationStore, RoleStore, TenantStore, UserStore};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub engine: DecisionEngine,
    pub roles: RoleService,
    pub escalations: EscalationService,
    pub keys: ApplicationKeyService,
    pub user_roles: UserRoleService,
    pub users: UserStore,
    pub tenants: TenantStore,
    pub task_queue: SqliteTaskQueue,
    pub queue_config: QueueConfig,
    pub event_bus: EventBus,
}

impl AppState {
    /// Wires stores, services and the decision engine around one pool. The
    /// returned receiver is the activity log's end of the event bus.
    pub fn new(pool: SqlitePool, jwt: JwtConfig, queue_config: QueueConfig) -> (Self, broadcast::Receiver<Value>) {
        let (event_bus, event_rx) = init_event_bus();
        let jwt = Arc::new(jwt);

        let role_store = RoleStore::new(pool.clone());
        let users = UserStore::new(pool.clone());
        let tenants = TenantStore::new(pool.clone());
        let task_queue = SqliteTaskQueue::new(pool.clone(), queue_config.name.clone()).with_lease(queue_config.lease_timeout);

        let engine = DecisionEngine::new(
            Arc::new(tenants.clone()),
            jwt.clone(),
            Arc::new(role_store.clone()),
        );
        let roles = RoleService::new(role_store.clone(), event_bus.clone());
        let keys = ApplicationKeyService::new(tenants.clone(), event_bus.clone());
        let user_roles = UserRoleService::new(users.clone(), role_store.clone(), event_bus.clone());
        let escalations = EscalationService::new(
            EscalationStore::new(pool.clone()),
            users.clone(),
            role_store,
            Arc::new(task_queue.clone()),
            Arc::new(LogNotifier),
            event_bus.clone(),
        );

        let state = Self {
            pool,
            jwt,
            engine,
            roles,
            escalations,
            keys,
            user_roles,
            users,
            tenants,
            task_queue,
            queue_config,
            event_bus,
        };
        (state, event_rx)
    }

    /// Background consumer for this state's queue with every task kind routed.
    pub fn task_consumer(&self) -> TaskConsumer {
        let router = TaskRouter::new()
            .register(
                TaskKind::CreateMessage,
                Arc::new(PersistEscalationHandler::new(EscalationStore::new(self.pool.clone()))),
            )
            .register(TaskKind::SendEmail, Arc::new(ReservedTaskHandler::new(TaskKind::SendEmail)))
            .register(TaskKind::CleanupTokens, Arc::new(ReservedTaskHandler::new(TaskKind::CleanupTokens)));

        TaskConsumer::new(Arc::new(self.task_queue.clone()), router, self.queue_config.clone())
    }
}

/// Reads configuration from the environment, builds the state and starts
/// the activity log listener.
pub async fn build_state(pool: SqlitePool) -> Result<AppState, AppError> {
    let jwt_config = JwtConfig::from_env()?;
    let queue_config = QueueConfig::from_env()?;
    let (state, event_rx) = AppState::new(pool, jwt_config, queue_config);

    tokio::spawn(start_activity_listener(event_rx, state.pool.clone()));
    Ok(state)
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let state = build_state(pool).await?;
    Ok(create_router(state))
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let public_routes = Router::new().route("/api/health", get(health::health));

    let tenant_routes = guard(
        Router::new().route("/api/tenant", get(tenant::current_tenant)),
        &state,
        Chain::AppKey,
    );

    let identity_routes = guard(Router::new().route("/auth/verify", get(auth::verify)), &state, Chain::Basic);

    let role_routes = Router::new()
        .route("/roles", get(roles::list_roles).post(roles::create_role))
        .route("/roles/:role_id", axum::routing::delete(roles::delete_role))
        .route(
            "/roles/:role_id/permissions",
            get(roles::get_permissions).put(roles::update_permissions),
        )
        .route("/roles/:role_id/enable", put(roles::enable_role))
        .route("/roles/:role_id/disable", put(roles::disable_role));

    let request_routes = Router::new()
        .route(
            "/messages",
            get(escalations::list_own_requests).post(escalations::create_request),
        )
        .route("/messages/:message_id", get(escalations::get_request_status))
        .route("/tenant/messages", get(escalations::list_tenant_requests))
        .route("/tenant/messages/:message_id/approve", put(escalations::approve_request))
        .route("/tenant/messages/:message_id/reject", put(escalations::reject_request));

    let admin_routes = Router::new()
        .route("/tenant/keys", get(tenant::list_keys).post(tenant::create_key))
        .route("/tenant/keys/:key_id", axum::routing::delete(tenant::revoke_key))
        .route("/users/:user_id/roles", put(users::assign_role));

    let protected_routes = guard(
        role_routes.merge(request_routes).merge(admin_routes),
        &state,
        Chain::Full,
    );

    Router::new()
        .merge(public_routes)
        .merge(tenant_routes)
        .merge(identity_routes)
        .merge(protected_routes)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

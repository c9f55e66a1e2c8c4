#![allow(dead_code)]

use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use sqlx::SqlitePool;
use tempfile::TempDir;
use tower::ServiceExt; // for `oneshot`
use uuid::Uuid;

use rolegate::models::user::User;
use rolegate::queue::ProcessOutcome;
use rolegate::store::TenantStore;
use rolegate::{build_state, create_router, AppState};

pub const JWT_SECRET: &str = "test-secret";

/// A migrated throwaway database, the app built on it and one tenant.
pub struct TestApp {
    // dropped last; the database file lives in here
    _dir: TempDir,
    pub pool: SqlitePool,
    pub state: AppState,
    pub router: Router,
    pub tenant_id: Uuid,
    pub app_key: String,
}

pub async fn migrated_pool(dir: &TempDir) -> Result<SqlitePool> {
    let db_path = dir.path().join("test.db");
    let pool = rolegate::db::connect(&format!("sqlite://{}", db_path.display())).await?;

    let migrator = sqlx::migrate::Migrator::new(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"))
        .await?;
    migrator.run(&pool).await?;
    Ok(pool)
}

pub async fn setup() -> Result<TestApp> {
    let dir = tempfile::tempdir().context("failed to create tempdir")?;
    let pool = migrated_pool(&dir).await?;

    std::env::set_var("JWT_SECRET", JWT_SECRET);
    let state = build_state(pool.clone()).await?;
    let router = create_router(state.clone());

    let issued = TenantStore::new(pool.clone()).create("acme", None).await?;

    Ok(TestApp {
        _dir: dir,
        pool,
        state,
        router,
        tenant_id: issued.tenant.id,
        app_key: issued.application_key,
    })
}

impl TestApp {
    pub async fn user(&self, email: &str, roles: &[&str]) -> Result<User> {
        let roles: Vec<String> = roles.iter().map(|r| r.to_string()).collect();
        Ok(self.state.users.create(self.tenant_id, "Test User", email, &roles).await?)
    }

    pub fn token(&self, user_id: Uuid, role_id: Uuid) -> Result<String> {
        Ok(self.state.jwt.encode(user_id, role_id, self.tenant_id)?)
    }

    /// Appends this tenant's application key to `path`.
    pub fn uri(&self, path: &str) -> String {
        let sep = if path.contains('?') { '&' } else { '?' };
        format!("{path}{sep}application_key={}", self.app_key)
    }

    pub async fn send(&self, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Result<(StatusCode, Value)> {
        let (status, _, value) = match body {
            Some(body) => self.send_raw(method, uri, token, "application/json", &body.to_string()).await?,
            None => self.dispatch(self.request(method, uri, token).body(Body::empty())?).await?,
        };
        Ok((status, value))
    }

    /// Sends `body` as is. Also returns the response content type, so tests
    /// can check that failures keep the JSON error body.
    pub async fn send_raw(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        content_type: &str,
        body: &str,
    ) -> Result<(StatusCode, Option<String>, Value)> {
        let req = self
            .request(method, uri, token)
            .header("content-type", content_type)
            .body(Body::from(body.to_string()))?;
        self.dispatch(req).await
    }

    fn request(&self, method: &str, uri: &str, token: Option<&str>) -> axum::http::request::Builder {
        let builder = Request::builder().method(method).uri(uri);
        match token {
            Some(token) => builder.header("authorization", format!("Bearer {token}")),
            None => builder,
        }
    }

    async fn dispatch(&self, req: Request<Body>) -> Result<(StatusCode, Option<String>, Value)> {
        let resp = self.router.clone().oneshot(req).await?;
        let status = resp.status();
        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let bytes = body::to_bytes(resp.into_body(), usize::MAX).await?;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).with_context(|| format!("non-JSON body: {}", String::from_utf8_lossy(&bytes)))?
        };
        Ok((status, content_type, value))
    }

    /// Runs the task consumer until the queue has nothing ready.
    pub async fn drain_queue(&self) -> Result<usize> {
        let consumer = self.state.task_consumer();
        let mut processed = 0;
        while consumer.process_next().await? != ProcessOutcome::Idle {
            processed += 1;
        }
        Ok(processed)
    }
}

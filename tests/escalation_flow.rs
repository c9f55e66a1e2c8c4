mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::http::StatusCode;
use serde_json::{json, Value};
use uuid::Uuid;

use rolegate::authz::roles::{ADMIN_ID, USER_ID};
use rolegate::errors::AppError;
use rolegate::events::Actor;
use rolegate::models::escalation::{EscalationCreateRequest, EscalationRequest, EscalationStatus};
use rolegate::services::{EscalationService, Notifier, Requester};
use rolegate::store::{EscalationStore, RoleStore, TenantStore};

fn items(page: &Value) -> Vec<Value> {
    page.get("items").and_then(Value::as_array).cloned().unwrap_or_default()
}

#[tokio::test]
async fn request_is_queued_listed_approved_once() -> Result<()> {
    let app = common::setup().await?;
    let member = app.user("u@x.com", &["user"]).await?;
    let admin = app.user("boss@x.com", &["admin"]).await?;
    let member_token = app.token(member.id, USER_ID)?;
    let admin_token = app.token(admin.id, ADMIN_ID)?;

    let (status, accepted) = app
        .send(
            "POST",
            &app.uri("/messages"),
            Some(&member_token),
            Some(json!({"email": "u@x.com", "requested_role": "admin"})),
        )
        .await?;
    assert_eq!(status, StatusCode::ACCEPTED, "{accepted}");
    assert_eq!(accepted["status"], "pending");
    let request_id = accepted["request_id"].as_str().context("missing request_id")?.to_string();

    // persisted by the background consumer, not the request path
    let (_, page) = app.send("GET", &app.uri("/tenant/messages"), Some(&admin_token), None).await?;
    assert!(items(&page).is_empty());
    assert_eq!(app.drain_queue().await?, 1);

    let (status, page) = app
        .send("GET", &app.uri("/tenant/messages?status=pending"), Some(&admin_token), None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    let pending = items(&page);
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0]["user_email"], "u@x.com");
    assert_eq!(pending[0]["requested_role"], "admin");
    assert_eq!(pending[0]["current_role"], "user");
    assert_eq!(page["meta"]["total_items"], 1);

    let approve = app.uri(&format!("/tenant/messages/{request_id}/approve"));
    let (status, resolved) = app.send("PUT", &approve, Some(&admin_token), None).await?;
    assert_eq!(status, StatusCode::OK, "{resolved}");
    assert_eq!(resolved["status"], "approved");
    assert_eq!(resolved["action"], true);
    assert_eq!(resolved["resolved_by"], admin.id.to_string());

    let granted = app.state.users.get(app.tenant_id, member.id).await?;
    assert!(granted.holds_role("admin"));
    assert!(granted.holds_role("user"));

    let (status, body) = app.send("PUT", &approve, Some(&admin_token), None).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let reject = app.uri(&format!("/tenant/messages/{request_id}/reject"));
    let (status, _) = app.send("PUT", &reject, Some(&admin_token), None).await?;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, own) = app
        .send("GET", &app.uri(&format!("/messages/{request_id}")), Some(&member_token), None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(own["status"], "approved");

    Ok(())
}

#[tokio::test]
async fn duplicate_unresolved_request_conflicts_until_resolved() -> Result<()> {
    let app = common::setup().await?;
    let member = app.user("dup@x.com", &["user"]).await?;
    let admin = app.user("boss@x.com", &["admin"]).await?;
    let token = app.token(member.id, USER_ID)?;
    let admin_token = app.token(admin.id, ADMIN_ID)?;
    let body = json!({"email": "dup@x.com", "requested_role": "moderator"});

    let (status, first) = app.send("POST", &app.uri("/messages"), Some(&token), Some(body.clone())).await?;
    assert_eq!(status, StatusCode::ACCEPTED);
    app.drain_queue().await?;

    let (status, err) = app.send("POST", &app.uri("/messages"), Some(&token), Some(body.clone())).await?;
    assert_eq!(status, StatusCode::CONFLICT, "{err}");

    let id = first["request_id"].as_str().context("missing request_id")?;
    let (status, rejected) = app
        .send("PUT", &app.uri(&format!("/tenant/messages/{id}/reject")), Some(&admin_token), None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rejected["status"], "rejected");
    assert!(!app.state.users.get(app.tenant_id, member.id).await?.holds_role("moderator"));

    let (status, _) = app.send("POST", &app.uri("/messages"), Some(&token), Some(body)).await?;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (_, own) = app.send("GET", &app.uri("/messages"), Some(&token), None).await?;
    assert_eq!(own.as_array().map(Vec::len), Some(1), "second request is not persisted yet");
    app.drain_queue().await?;
    let (_, own) = app.send("GET", &app.uri("/messages"), Some(&token), None).await?;
    assert_eq!(own.as_array().map(Vec::len), Some(2));

    Ok(())
}

#[tokio::test]
async fn create_guards() -> Result<()> {
    let app = common::setup().await?;
    let member = app.user("me@x.com", &["user", "moderator"]).await?;
    let token = app.token(member.id, USER_ID)?;

    let (status, _) = app
        .send(
            "POST",
            &app.uri("/messages"),
            Some(&token),
            Some(json!({"email": "someone-else@x.com", "requested_role": "admin"})),
        )
        .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = app
        .send(
            "POST",
            &app.uri("/messages"),
            Some(&token),
            Some(json!({"email": "ME@x.com", "requested_role": "moderator"})),
        )
        .await?;
    assert_eq!(status, StatusCode::CONFLICT, "role already held");

    let (status, _) = app
        .send(
            "POST",
            &app.uri("/messages"),
            Some(&token),
            Some(json!({"email": "me@x.com", "requested_role": ""})),
        )
        .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    assert_eq!(app.drain_queue().await?, 0);
    Ok(())
}

#[tokio::test]
async fn approval_of_unknown_role_is_bad_request_and_leaves_request_pending() -> Result<()> {
    let app = common::setup().await?;
    let member = app.user("ghost@x.com", &["user"]).await?;
    let admin = app.user("boss@x.com", &["admin"]).await?;
    let token = app.token(member.id, USER_ID)?;
    let admin_token = app.token(admin.id, ADMIN_ID)?;

    let (_, accepted) = app
        .send(
            "POST",
            &app.uri("/messages"),
            Some(&token),
            Some(json!({"email": "ghost@x.com", "requested_role": "wizard"})),
        )
        .await?;
    app.drain_queue().await?;
    let id = accepted["request_id"].as_str().context("missing request_id")?;

    let (status, _) = app
        .send("PUT", &app.uri(&format!("/tenant/messages/{id}/approve")), Some(&admin_token), None)
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, current) = app.send("GET", &app.uri(&format!("/messages/{id}")), Some(&token), None).await?;
    assert_eq!(current["status"], "pending");
    assert_eq!(current["action"], false);
    Ok(())
}

#[tokio::test]
async fn requests_are_invisible_to_other_tenants() -> Result<()> {
    let app = common::setup().await?;
    let member = app.user("u@x.com", &["user"]).await?;
    let token = app.token(member.id, USER_ID)?;

    let (_, accepted) = app
        .send(
            "POST",
            &app.uri("/messages"),
            Some(&token),
            Some(json!({"email": "u@x.com", "requested_role": "admin"})),
        )
        .await?;
    app.drain_queue().await?;
    let id = accepted["request_id"].as_str().context("missing request_id")?;

    let other = TenantStore::new(app.pool.clone()).create("globex", None).await?;
    let other_admin = app
        .state
        .users
        .create(other.tenant.id, "Other Admin", "admin@globex.com", &["admin".to_string()])
        .await?;
    let other_token = app.state.jwt.encode(other_admin.id, ADMIN_ID, other.tenant.id)?;
    let other_uri = |path: &str| format!("{path}?application_key={}", other.application_key);

    let (status, _) = app
        .send("PUT", &other_uri(&format!("/tenant/messages/{id}/approve")), Some(&other_token), None)
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, page) = app.send("GET", &other_uri("/tenant/messages"), Some(&other_token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(items(&page).is_empty());

    assert!(!app.state.users.get(app.tenant_id, member.id).await?.holds_role("admin"));
    Ok(())
}

#[tokio::test]
async fn second_request_before_the_first_is_stored_conflicts() -> Result<()> {
    let app = common::setup().await?;
    let member = app.user("early@x.com", &["user"]).await?;
    let token = app.token(member.id, USER_ID)?;
    let body = json!({"email": "early@x.com", "requested_role": "admin"});

    let (status, first) = app.send("POST", &app.uri("/messages"), Some(&token), Some(body.clone())).await?;
    assert_eq!(status, StatusCode::ACCEPTED);
    let (status, err) = app.send("POST", &app.uri("/messages"), Some(&token), Some(body)).await?;
    assert_eq!(status, StatusCode::CONFLICT, "{err}");
    assert_eq!(err["message"], "an unresolved request for this role already exists");

    // a different role is a different slot
    let (status, _) = app
        .send(
            "POST",
            &app.uri("/messages"),
            Some(&token),
            Some(json!({"email": "early@x.com", "requested_role": "moderator"})),
        )
        .await?;
    assert_eq!(status, StatusCode::ACCEPTED);

    assert_eq!(app.drain_queue().await?, 2);
    let id = first["request_id"].as_str().context("missing request_id")?;
    let (status, current) = app.send("GET", &app.uri(&format!("/messages/{id}")), Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(current["status"], "pending");
    Ok(())
}

fn admin_request(email: &str) -> EscalationCreateRequest {
    EscalationCreateRequest {
        email: email.into(),
        requested_role: "admin".into(),
    }
}

#[tokio::test]
async fn only_a_missing_user_is_unauthorized() -> Result<()> {
    let app = common::setup().await?;
    let member = app.user("u@x.com", &["user"]).await?;

    let stranger = Requester { tenant_id: app.tenant_id, user_id: Uuid::new_v4(), role_name: "user".into() };
    let err = app.state.escalations.create(&stranger, admin_request("u@x.com")).await.unwrap_err();
    assert!(matches!(err, AppError::Unauthorized(_)), "{err:?}");

    let requester = Requester { tenant_id: app.tenant_id, user_id: member.id, role_name: "user".into() };
    app.pool.close().await;
    let err = app.state.escalations.create(&requester, admin_request("u@x.com")).await.unwrap_err();
    assert!(matches!(err, AppError::Database(_)), "{err:?}");
    assert!(err.status().is_server_error());
    Ok(())
}

/// Never answers.
struct Stalled;

#[async_trait]
impl Notifier for Stalled {
    async fn escalation_resolved(&self, _request: &EscalationRequest) -> anyhow::Result<()> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

#[tokio::test]
async fn resolution_does_not_wait_for_the_notifier() -> Result<()> {
    let app = common::setup().await?;
    let member = app.user("u@x.com", &["user"]).await?;
    let admin = app.user("boss@x.com", &["admin"]).await?;
    let service = EscalationService::new(
        EscalationStore::new(app.pool.clone()),
        app.state.users.clone(),
        RoleStore::new(app.pool.clone()),
        Arc::new(app.state.task_queue.clone()),
        Arc::new(Stalled),
        app.state.event_bus.clone(),
    );

    let requester = Requester { tenant_id: app.tenant_id, user_id: member.id, role_name: "user".into() };
    let accepted = service.create(&requester, admin_request("u@x.com")).await?;
    app.drain_queue().await?;

    let actor = Actor { tenant_id: app.tenant_id, user_id: admin.id };
    let resolved = tokio::time::timeout(Duration::from_secs(2), service.approve(actor, accepted.request_id, None)).await??;
    assert_eq!(resolved.status, EscalationStatus::Approved);
    Ok(())
}

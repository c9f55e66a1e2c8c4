mod common;

use anyhow::{Context, Result};
use axum::http::StatusCode;
use serde_json::{json, Value};
use uuid::Uuid;

use rolegate::authz::roles::{ADMIN_ID, GUEST_ID, MODERATOR_ID, USER_ID};
use rolegate::models::permission::Permission;
use rolegate::store::StoreError;

async fn admin_token(app: &common::TestApp) -> Result<String> {
    let admin = app.user("admin@x.com", &["admin"]).await?;
    app.token(admin.id, ADMIN_ID)
}

async fn create_auditor(app: &common::TestApp, token: &str) -> Result<Uuid> {
    let (status, body) = app
        .send(
            "POST",
            &app.uri("/roles"),
            Some(token),
            Some(json!({
                "name": "auditor",
                "display_name": "Auditor",
                "description": "Reads roles",
                "permissions": [
                    {"route": "/roles", "methods": ["get"], "description": "list roles"},
                    {"route": " /roles ", "methods": ["GET", "get"], "description": "duplicate after normalising"}
                ]
            })),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let role_id = body["role"]["role_id"].as_str().context("missing role_id")?;
    Ok(role_id.parse()?)
}

fn routes(set: &Value) -> Vec<(String, Vec<String>)> {
    set["permissions"]
        .as_array()
        .map(|perms| {
            perms
                .iter()
                .map(|p| {
                    let methods = p["methods"]
                        .as_array()
                        .map(|m| m.iter().filter_map(Value::as_str).map(String::from).collect())
                        .unwrap_or_default();
                    (p["route"].as_str().unwrap_or_default().to_string(), methods)
                })
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn create_normalises_and_rejects_duplicates() -> Result<()> {
    let app = common::setup().await?;
    let token = admin_token(&app).await?;
    let role_id = create_auditor(&app, &token).await?;

    let (status, set) = app
        .send("GET", &app.uri(&format!("/roles/{role_id}/permissions")), Some(&token), None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(routes(&set), vec![("/roles".to_string(), vec!["GET".to_string()])]);
    assert_eq!(set["role_info"]["role_type"], "custom");
    assert_eq!(set["role_info"]["priority"], 50);
    assert_eq!(set["role_info"]["is_system"], false);
    assert_eq!(set["version"], 1);

    let (status, _) = app
        .send(
            "POST",
            &app.uri("/roles"),
            Some(&token),
            Some(json!({"name": "auditor", "display_name": "Another"})),
        )
        .await?;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .send(
            "POST",
            &app.uri("/roles"),
            Some(&token),
            Some(json!({"name": "admin", "display_name": "Shadow admin"})),
        )
        .await?;
    assert_eq!(status, StatusCode::CONFLICT, "system names are reserved");

    let (status, _) = app
        .send(
            "POST",
            &app.uri("/roles"),
            Some(&token),
            Some(json!({"name": "Bad Name", "display_name": "x"})),
        )
        .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = app
        .send(
            "POST",
            &app.uri("/roles"),
            Some(&token),
            Some(json!({"name": "nomethods", "display_name": "No methods", "permissions": [{"route": "/roles", "methods": []}]})),
        )
        .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    Ok(())
}

#[tokio::test]
async fn diff_update_removes_then_adds_in_one_write() -> Result<()> {
    let app = common::setup().await?;
    let token = admin_token(&app).await?;
    let role_id = create_auditor(&app, &token).await?;
    let uri = app.uri(&format!("/roles/{role_id}/permissions"));

    let (status, updated) = app
        .send(
            "PUT",
            &uri,
            Some(&token),
            Some(json!({
                "display_name": "Senior auditor",
                "add_permissions": [
                    {"route": "/roles/:role_id/permissions", "methods": ["GET"]},
                    {"route": "/roles", "methods": ["GET"]}
                ],
                "remove_permissions": [
                    {"route": "/tenant/messages", "methods": ["GET"]}
                ]
            })),
        )
        .await?;
    assert_eq!(status, StatusCode::OK, "{updated}");
    assert_eq!(updated["version"], 2);
    assert_eq!(updated["role_info"]["display_name"], "Senior auditor");
    assert_eq!(
        routes(&updated),
        vec![
            ("/roles".to_string(), vec!["GET".to_string()]),
            ("/roles/:role_id/permissions".to_string(), vec!["GET".to_string()]),
        ]
    );

    // method order does not matter when matching a removal
    let (status, updated) = app
        .send(
            "PUT",
            &uri,
            Some(&token),
            Some(json!({
                "remove_permissions": [{"route": "/roles", "methods": ["get"]}],
                "add_permissions": [{"route": "/messages", "methods": ["POST", "GET"]}]
            })),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["version"], 3);
    let after = routes(&updated);
    assert_eq!(after.len(), 2);
    assert!(after.iter().all(|(route, _)| route != "/roles"));

    let role = app.state.roles.store().find(app.tenant_id, role_id).await?;
    assert_eq!(role.display_name, "Senior auditor");
    Ok(())
}

#[tokio::test]
async fn stale_version_is_rejected_without_writing() -> Result<()> {
    let app = common::setup().await?;
    let token = admin_token(&app).await?;
    let role_id = create_auditor(&app, &token).await?;
    let store = app.state.roles.store();

    let stored = store.load_permission_set(app.tenant_id, role_id).await?;
    let (grown, _) = stored
        .set
        .with_diff(&[Permission::new("/messages", &["GET"], "read")], &[]);
    let version = store
        .update_permissions(app.tenant_id, role_id, stored.version, &grown, None, None)
        .await?;
    assert_eq!(version, stored.version + 1);

    let (shrunk, _) = stored.set.with_diff(&[], &[Permission::new("/roles", &["GET"], "")]);
    let err = store
        .update_permissions(app.tenant_id, role_id, stored.version, &shrunk, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::VersionConflict(_)), "{err:?}");

    let current = store.load_permission_set(app.tenant_id, role_id).await?;
    assert_eq!(current.version, version);
    assert_eq!(current.set.permissions.len(), 2);
    Ok(())
}

#[tokio::test]
async fn system_roles_are_immutable() -> Result<()> {
    let app = common::setup().await?;
    let token = admin_token(&app).await?;

    for role_id in [ADMIN_ID, USER_ID, MODERATOR_ID, GUEST_ID] {
        let before = app.state.roles.store().load_permission_set(app.tenant_id, role_id).await?;

        let attempts = [
            ("PUT", format!("/roles/{role_id}/disable"), None),
            ("PUT", format!("/roles/{role_id}/enable"), None),
            ("DELETE", format!("/roles/{role_id}"), None),
            (
                "PUT",
                format!("/roles/{role_id}/permissions"),
                Some(json!({"add_permissions": [{"route": "/anything", "methods": ["GET"]}]})),
            ),
        ];
        for (method, path, body) in attempts {
            let (status, err) = app.send(method, &app.uri(&path), Some(&token), body).await?;
            assert_eq!(status, StatusCode::CONFLICT, "{method} {path}: {err}");
        }

        let after = app.state.roles.store().load_permission_set(app.tenant_id, role_id).await?;
        assert_eq!(after.version, before.version);
        assert_eq!(serde_json::to_value(&after.set)?, serde_json::to_value(&before.set)?);
        assert!(app.state.roles.store().find(app.tenant_id, role_id).await?.enabled);
    }
    Ok(())
}

#[tokio::test]
async fn enable_disable_delete_and_list_filters() -> Result<()> {
    let app = common::setup().await?;
    let token = admin_token(&app).await?;
    let role_id = create_auditor(&app, &token).await?;

    let (status, role) = app
        .send("PUT", &app.uri(&format!("/roles/{role_id}/disable")), Some(&token), None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(role["enabled"], false);

    let (status, _) = app
        .send("PUT", &app.uri(&format!("/roles/{role_id}/disable")), Some(&token), None)
        .await?;
    assert_eq!(status, StatusCode::CONFLICT, "already disabled");

    let (status, page) = app.send("GET", &app.uri("/roles"), Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["meta"]["total_items"], 5);
    let names: Vec<&str> = page["items"]
        .as_array()
        .context("items")?
        .iter()
        .filter_map(|r| r["name"].as_str())
        .collect();
    assert_eq!(names.last(), Some(&"auditor"), "system roles are listed first");

    let (_, page) = app
        .send("GET", &app.uri("/roles?role_type=custom&status=inactive"), Some(&token), None)
        .await?;
    assert_eq!(page["meta"]["total_items"], 1);
    assert_eq!(page["items"][0]["name"], "auditor");

    let (_, page) = app
        .send("GET", &app.uri("/roles?role_type=system&page_size=2"), Some(&token), None)
        .await?;
    assert_eq!(page["meta"]["total_items"], 4);
    assert_eq!(page["meta"]["total_pages"], 2);
    assert_eq!(page["items"].as_array().map(Vec::len), Some(2));

    let (status, _) = app
        .send("GET", &app.uri("/roles?status=sideways"), Some(&token), None)
        .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, role) = app
        .send("PUT", &app.uri(&format!("/roles/{role_id}/enable")), Some(&token), None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(role["enabled"], true);

    let (status, _) = app
        .send("DELETE", &app.uri(&format!("/roles/{role_id}")), Some(&token), None)
        .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app
        .send("GET", &app.uri(&format!("/roles/{role_id}/permissions")), Some(&token), None)
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .send("DELETE", &app.uri(&format!("/roles/{role_id}")), Some(&token), None)
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn role_mutations_land_in_the_activity_log() -> Result<()> {
    let app = common::setup().await?;
    let token = admin_token(&app).await?;
    let role_id = create_auditor(&app, &token).await?;
    app.send("PUT", &app.uri(&format!("/roles/{role_id}/disable")), Some(&token), None)
        .await?;

    // the listener writes asynchronously
    let mut names: Vec<(String, String)> = Vec::new();
    for _ in 0..50 {
        names = sqlx::query_as("SELECT event_name, severity FROM activity_log WHERE subject_id = ? ORDER BY occurred_at")
            .bind(role_id.to_string())
            .fetch_all(&app.pool)
            .await?;
        if names.len() == 2 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    assert_eq!(
        names,
        vec![
            ("role.created".to_string(), "critical".to_string()),
            ("role.disabled".to_string(), "critical".to_string()),
        ]
    );
    Ok(())
}

use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::models;
use crate::routes;

#[derive(OpenApi)]
#[openapi(
	paths(
		routes::health::health,
		routes::tenant::current_tenant,
		routes::tenant::list_keys,
		routes::tenant::create_key,
		routes::tenant::revoke_key,
		routes::users::assign_role,
		routes::auth::verify,
		routes::roles::list_roles,
		routes::roles::create_role,
		routes::roles::get_permissions,
		routes::roles::update_permissions,
		routes::roles::enable_role,
		routes::roles::disable_role,
		routes::roles::delete_role,
		routes::escalations::create_request,
		routes::escalations::list_own_requests,
		routes::escalations::get_request_status,
		routes::escalations::list_tenant_requests,
		routes::escalations::approve_request,
		routes::escalations::reject_request
	),
	components(
		schemas(
			routes::health::HealthResponse,
			routes::auth::VerifyResponse,
			models::tenant::TenantResponse,
			models::tenant::ApplicationKey,
			models::tenant::ApplicationKeyCreateRequest,
			models::tenant::ApplicationKeyCreated,
			models::user::UserRoleAssignRequest,
			models::user::UserRoles,
			models::permission::Permission,
			models::permission::PermissionSet,
			models::permission::RoleInfo,
			models::pagination::PageMeta,
			models::role::Role,
			models::role::RoleType,
			models::role::RoleCreateRequest,
			models::role::RoleCreatedResponse,
			models::role::PermissionsUpdateRequest,
			models::role::RolePermissionsResponse,
			models::escalation::EscalationStatus,
			models::escalation::EscalationRequest,
			models::escalation::EscalationCreateRequest,
			models::escalation::EscalationAccepted,
			models::escalation::EscalationStatusResponse
		)
	),
	tags(
		(name = "Health", description = "Liveness"),
		(name = "Tenant", description = "Application key resolution and management"),
		(name = "Users", description = "Direct role assignment"),
		(name = "Auth", description = "Token verification"),
		(name = "Roles", description = "Role and permission management"),
		(name = "Role requests", description = "Role escalation workflow")
	)
)]
pub struct ApiDoc;

pub fn build_openapi(port: u16) -> anyhow::Result<utoipa::openapi::OpenApi> {
	let mut doc = serde_json::to_value(ApiDoc::openapi())?;

	ensure_security_components(&mut doc);
	apply_operation_security(&mut doc);
	ensure_servers(&mut doc, port);

	Ok(serde_json::from_value(doc)?)
}

pub fn swagger_routes(doc: utoipa::openapi::OpenApi) -> anyhow::Result<Router> {
	let swagger_config = utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
		.try_it_out_enabled(true)
		.persist_authorization(true);

	let doc_json = Arc::new(serde_json::to_value(&doc)?);

	let json_route = {
		let doc_json = Arc::clone(&doc_json);
		get(move || {
			let doc_json = Arc::clone(&doc_json);
			async move { Json((*doc_json).clone()) }
		})
	};

	Ok(Router::new()
		.route("/api-docs/openapi.json", json_route)
		.merge(SwaggerUi::new("/docs").config(swagger_config)))
}

fn ensure_security_components(doc: &mut Value) {
	let Some(root) = doc.as_object_mut() else {
		return;
	};
	let components = root.entry("components").or_insert_with(|| json!({}));
	let Some(components) = components.as_object_mut() else {
		return;
	};
	let schemes = components.entry("securitySchemes").or_insert_with(|| json!({}));
	if let Some(schemes) = schemes.as_object_mut() {
		schemes.entry("applicationKey").or_insert_with(|| {
			json!({"type": "apiKey", "in": "query", "name": "application_key"})
		});
		schemes.entry("bearerAuth").or_insert_with(|| {
			json!({"type": "http", "scheme": "bearer", "bearerFormat": "JWT"})
		});
	}
}

/// Security requirement for a path, mirroring the middleware chain that
/// guards it.
fn security_for(path: &str) -> Option<Value> {
	match path {
		"/api/health" => None,
		"/api/tenant" => Some(json!([{"applicationKey": []}])),
		_ => Some(json!([{"applicationKey": [], "bearerAuth": []}])),
	}
}

fn apply_operation_security(doc: &mut Value) {
	let Some(paths) = doc.get_mut("paths").and_then(Value::as_object_mut) else {
		return;
	};

	for (path, item) in paths.iter_mut() {
		let Some(security) = security_for(path) else {
			continue;
		};
		let Some(operations) = item.as_object_mut() else {
			continue;
		};
		for operation in operations.values_mut() {
			if let Some(operation) = operation.as_object_mut() {
				operation.entry("security").or_insert_with(|| security.clone());
			}
		}
	}
}

fn ensure_servers(doc: &mut Value, port: u16) {
	let server_url = format!("http://localhost:{port}");

	match doc.get_mut("servers") {
		Some(Value::Array(arr)) => {
			let has = arr.iter().any(|v| v.get("url").and_then(Value::as_str) == Some(server_url.as_str()));
			if !has {
				arr.push(json!({ "url": server_url }));
			}
		}
		_ => {
			doc["servers"] = json!([{ "url": server_url }]);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn protected_operations_carry_both_schemes() {
		let doc = serde_json::to_value(build_openapi(8000).unwrap()).unwrap();

		let approve = &doc["paths"]["/tenant/messages/{message_id}/approve"]["put"];
		assert_eq!(approve["security"], json!([{"applicationKey": [], "bearerAuth": []}]));

		let health = &doc["paths"]["/api/health"]["get"];
		assert!(health.get("security").is_none());

		assert_eq!(doc["components"]["securitySchemes"]["applicationKey"]["in"], "query");
		assert_eq!(doc["servers"][0]["url"], "http://localhost:8000");
	}
}

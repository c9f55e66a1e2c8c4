use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::AppError;

const ALLOWED_METHODS: [&str; 7] = ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

/// Priority stamped on tenant-defined roles; system roles carry their own.
pub const CUSTOM_ROLE_PRIORITY: i32 = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RoleInfo {
    #[schema(example = "auditor")]
    pub name: String,
    #[schema(example = "Auditor")]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[schema(example = "custom")]
    pub role_type: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub is_system: bool,
}

/// One grant: a route template plus the HTTP methods allowed on it.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Permission {
    #[schema(example = "/roles/:role_id/permissions")]
    pub route: String,
    #[schema(example = json!(["GET", "PUT"]))]
    pub methods: Vec<String>,
    #[serde(default)]
    pub description: String,
}

impl Permission {
    pub fn new(route: impl Into<String>, methods: &[&str], description: impl Into<String>) -> Self {
        Self {
            route: route.into(),
            methods: methods.iter().map(|m| m.to_string()).collect(),
            description: description.into(),
        }
    }

    /// Upper-cases and de-duplicates methods, rejecting anything that is not
    /// a plain HTTP method or a route that is not absolute.
    pub fn normalized(self) -> Result<Self, AppError> {
        let route = self.route.trim().to_string();
        if !route.starts_with('/') {
            return Err(AppError::validation(format!(
                "permission route '{}' must start with '/'",
                route
            )));
        }

        let mut seen = BTreeSet::new();
        let mut methods = Vec::with_capacity(self.methods.len());
        for method in self.methods {
            let method = method.trim().to_ascii_uppercase();
            if !ALLOWED_METHODS.contains(&method.as_str()) {
                return Err(AppError::validation(format!(
                    "unsupported HTTP method '{}' for route '{}'",
                    method, route
                )));
            }
            if seen.insert(method.clone()) {
                methods.push(method);
            }
        }

        if methods.is_empty() {
            return Err(AppError::validation(format!(
                "permission for route '{}' must list at least one method",
                route
            )));
        }

        Ok(Self {
            route,
            methods,
            description: self.description,
        })
    }

    /// Structural identity: same route and the same method set, in any order.
    pub fn same_grant(&self, other: &Permission) -> bool {
        if self.route != other.route {
            return false;
        }
        let mine: BTreeSet<&str> = self.methods.iter().map(String::as_str).collect();
        let theirs: BTreeSet<&str> = other.methods.iter().map(String::as_str).collect();
        mine == theirs
    }

    pub fn allows_method(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m.eq_ignore_ascii_case(method))
    }
}

pub fn normalize_all(permissions: Vec<Permission>) -> Result<Vec<Permission>, AppError> {
    permissions.into_iter().map(Permission::normalized).collect()
}

/// The serialized blob stored per role.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PermissionSet {
    pub role_info: RoleInfo,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

/// Outcome of merging a diff into a permission set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffSummary {
    pub removed: usize,
    pub added: usize,
}

impl PermissionSet {
    pub fn new(role_info: RoleInfo, permissions: Vec<Permission>) -> Self {
        Self {
            role_info,
            permissions,
        }
    }

    pub fn contains(&self, permission: &Permission) -> bool {
        self.permissions.iter().any(|p| p.same_grant(permission))
    }

    /// Removal first, then additions that are not already present. The
    /// caller persists the returned value in one write.
    pub fn with_diff(&self, add: &[Permission], remove: &[Permission]) -> (PermissionSet, DiffSummary) {
        let mut summary = DiffSummary::default();

        let mut permissions: Vec<Permission> = self
            .permissions
            .iter()
            .filter(|existing| {
                let drop = remove.iter().any(|r| existing.same_grant(r));
                if drop {
                    summary.removed += 1;
                }
                !drop
            })
            .cloned()
            .collect();

        for candidate in add {
            if !permissions.iter().any(|p| p.same_grant(candidate)) {
                permissions.push(candidate.clone());
                summary.added += 1;
            }
        }

        (
            PermissionSet {
                role_info: self.role_info.clone(),
                permissions,
            },
            summary,
        )
    }

    /// Literal routes kept in the legacy `routes` column.
    pub fn literal_routes(&self) -> Vec<String> {
        let mut routes: Vec<String> = self
            .permissions
            .iter()
            .filter(|p| !p.route.contains(':'))
            .map(|p| p.route.clone())
            .collect();
        routes.sort();
        routes.dedup();
        routes
    }

    pub fn to_blob(&self) -> Result<String, AppError> {
        serde_json::to_string(self)
            .map_err(|err| AppError::internal(format!("failed to serialize permission set: {err}")))
    }

    pub fn from_blob(blob: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(blob)
    }
}

//! Route-template permission matching.
//!
//! Templates use the router's own parameter syntax: a `:` followed by an
//! identifier matches one non-empty path segment. A template without
//! parameters only matches the identical path.

use std::collections::{HashMap, HashSet};

use regex::Regex;

use crate::models::permission::{Permission, PermissionSet};

/// A compiled route template.
#[derive(Debug, Clone)]
pub struct RouteTemplate {
    raw: String,
    pattern: Option<Regex>,
    literal_chars: usize,
    params: usize,
}

impl RouteTemplate {
    pub fn compile(raw: &str) -> Result<Self, regex::Error> {
        let segments = tokenize(raw);
        let params = segments.iter().filter(|s| matches!(s, Segment::Param)).count();
        let literal_chars = segments
            .iter()
            .map(|s| match s {
                Segment::Literal(text) => text.len(),
                Segment::Param => 0,
            })
            .sum();

        let pattern = if params == 0 {
            None
        } else {
            let mut source = String::with_capacity(raw.len() + 8);
            source.push('^');
            for segment in &segments {
                match segment {
                    Segment::Literal(text) => source.push_str(&regex::escape(text)),
                    Segment::Param => source.push_str("[^/]+"),
                }
            }
            source.push('$');
            Some(Regex::new(&source)?)
        };

        Ok(Self {
            raw: raw.to_string(),
            pattern,
            literal_chars,
            params,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_literal(&self) -> bool {
        self.pattern.is_none()
    }

    pub fn matches(&self, path: &str) -> bool {
        match &self.pattern {
            Some(re) => re.is_match(path),
            None => self.raw == path,
        }
    }
}

enum Segment<'a> {
    Literal(&'a str),
    Param,
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Splits a template into literal runs and `:ident` markers. A `:` that is
/// not followed by an identifier stays literal.
fn tokenize(raw: &str) -> Vec<Segment<'_>> {
    let bytes = raw.as_bytes();
    let mut out = Vec::new();
    let mut literal_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b':' && i + 1 < bytes.len() && is_ident_start(bytes[i + 1]) {
            if literal_start < i {
                out.push(Segment::Literal(&raw[literal_start..i]));
            }
            let mut end = i + 1;
            while end < bytes.len() && is_ident_continue(bytes[end]) {
                end += 1;
            }
            out.push(Segment::Param);
            i = end;
            literal_start = end;
        } else {
            i += 1;
        }
    }

    if literal_start < bytes.len() {
        out.push(Segment::Literal(&raw[literal_start..]));
    }
    out
}

/// Lookup structure built from one permission set.
///
/// Literal routes go into a per-method hash index. Parameterised templates go
/// into a per-method list ordered most specific first: more literal
/// characters, then fewer parameters, then registration order.
#[derive(Debug, Default)]
pub struct PermissionMatcher {
    exact: HashMap<String, HashSet<String>>,
    patterns: HashMap<String, Vec<(RouteTemplate, usize)>>,
    permissions: Vec<Permission>,
}

impl PermissionMatcher {
    pub fn new(set: &PermissionSet) -> Self {
        let mut matcher = PermissionMatcher::default();

        for (index, permission) in set.permissions.iter().enumerate() {
            let template = match RouteTemplate::compile(&permission.route) {
                Ok(t) => t,
                Err(err) => {
                    tracing::warn!(route = %permission.route, error = %err, "skipping uncompilable route template");
                    continue;
                }
            };

            for method in &permission.methods {
                let method = method.to_ascii_uppercase();
                if template.is_literal() {
                    matcher
                        .exact
                        .entry(method)
                        .or_default()
                        .insert(permission.route.clone());
                } else {
                    matcher
                        .patterns
                        .entry(method)
                        .or_default()
                        .push((template.clone(), index));
                }
            }
        }

        for list in matcher.patterns.values_mut() {
            // stable: ties keep registration order
            list.sort_by(|(a, _), (b, _)| {
                b.literal_chars
                    .cmp(&a.literal_chars)
                    .then(a.params.cmp(&b.params))
            });
        }

        matcher.permissions = set.permissions.clone();
        matcher
    }

    pub fn is_allowed(&self, method: &str, path: &str) -> bool {
        self.find(method, path).is_some()
    }

    /// The permission that grants `(method, path)`, if any.
    pub fn find(&self, method: &str, path: &str) -> Option<&Permission> {
        let method = method.to_ascii_uppercase();

        if let Some(routes) = self.exact.get(&method) {
            if routes.contains(path) {
                return self
                    .permissions
                    .iter()
                    .find(|p| p.route == path && p.allows_method(&method));
            }
        }

        self.patterns
            .get(&method)?
            .iter()
            .find(|(template, _)| template.matches(path))
            .and_then(|(_, index)| self.permissions.get(*index))
    }
}

/// One-shot check against a permission set.
pub fn matches(method: &str, path: &str, set: &PermissionSet) -> bool {
    PermissionMatcher::new(set).is_allowed(method, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::permission::{RoleInfo, CUSTOM_ROLE_PRIORITY};

    fn set(perms: Vec<Permission>) -> PermissionSet {
        PermissionSet::new(
            RoleInfo {
                name: "tester".into(),
                display_name: "Tester".into(),
                description: String::new(),
                role_type: "custom".into(),
                priority: CUSTOM_ROLE_PRIORITY,
                is_system: false,
            },
            perms,
        )
    }

    #[test]
    fn parameter_matches_one_segment() {
        let s = set(vec![Permission::new("/users/:id/roles", &["GET"], "")]);

        assert!(matches("GET", "/users/123/roles", &s));
        assert!(matches("GET", "/users/abc/roles", &s));
        assert!(!matches("GET", "/users/123/roles/extra", &s));
        assert!(!matches("GET", "/users//roles", &s));
        assert!(!matches("GET", "/users/a/b/roles", &s));
        assert!(!matches("POST", "/users/123/roles", &s));
    }

    #[test]
    fn literal_template_requires_exact_bytes() {
        let s = set(vec![Permission::new("/roles", &["GET"], "")]);

        assert!(matches("GET", "/roles", &s));
        assert!(!matches("GET", "/roles/", &s));
        assert!(!matches("GET", "/Roles", &s));
        assert!(!matches("GET", "/roles?x=1", &s));
    }

    #[test]
    fn literal_characters_are_escaped() {
        let s = set(vec![Permission::new("/files/:name.json", &["GET"], "")]);

        assert!(matches("GET", "/files/report.json", &s));
        assert!(!matches("GET", "/files/reportxjson", &s));
    }

    #[test]
    fn colon_without_identifier_is_literal() {
        let s = set(vec![Permission::new("/time/:", &["GET"], "")]);
        assert!(matches("GET", "/time/:", &s));
        assert!(!matches("GET", "/time/12", &s));
    }

    #[test]
    fn method_comparison_is_case_insensitive() {
        let s = set(vec![Permission::new("/roles/:role_id", &["delete"], "")]);
        assert!(matches("DELETE", "/roles/42", &s));
    }

    #[test]
    fn most_specific_template_wins() {
        let s = set(vec![
            Permission::new("/roles/:role_id/:action", &["PUT"], "generic"),
            Permission::new("/roles/:role_id/enable", &["PUT"], "specific"),
        ]);
        let matcher = PermissionMatcher::new(&s);

        let hit = matcher.find("PUT", "/roles/7/enable").unwrap();
        assert_eq!(hit.description, "specific");

        let hit = matcher.find("PUT", "/roles/7/disable").unwrap();
        assert_eq!(hit.description, "generic");
    }

    #[test]
    fn ties_keep_registration_order() {
        let s = set(vec![
            Permission::new("/a/:x", &["GET"], "first"),
            Permission::new("/a/:y", &["GET"], "second"),
        ]);
        let matcher = PermissionMatcher::new(&s);
        assert_eq!(matcher.find("GET", "/a/1").unwrap().description, "first");
    }

    #[test]
    fn empty_set_denies() {
        let s = set(vec![]);
        assert!(!matches("GET", "/", &s));
    }
}

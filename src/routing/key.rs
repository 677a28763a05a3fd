//! Route keys for breaker and limiter state.

use serde::Serialize;
use std::fmt;

/// Scope of a breaker or rate-limit window: a normalized route, optionally
/// narrowed to one client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RouteKey {
    route: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    client: Option<String>,
}

impl RouteKey {
    /// Key for a route template or raw request path.
    pub fn route(path: &str) -> Self {
        Self {
            route: normalize(path),
            client: None,
        }
    }

    /// Key for an outbound dependency (e.g. `downstream:storage-probe`).
    pub fn downstream(name: &str) -> Self {
        Self {
            route: format!("downstream:{}", name),
            client: None,
        }
    }

    /// Narrow this key to a single client.
    pub fn with_client(mut self, client: impl Into<String>) -> Self {
        let client = client.into();
        if !client.is_empty() {
            self.client = Some(client);
        }
        self
    }

    pub fn path(&self) -> &str {
        &self.route
    }

    pub fn client(&self) -> Option<&str> {
        self.client.as_deref()
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.client {
            Some(client) => write!(f, "{}#{}", self.route, client),
            None => f.write_str(&self.route),
        }
    }
}

fn normalize(path: &str) -> String {
    let segments: Vec<String> = path
        .split('?')
        .next()
        .unwrap_or_default()
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| {
            if looks_like_id(s) {
                ":id".to_string()
            } else {
                s.to_string()
            }
        })
        .collect();

    format!("/{}", segments.join("/"))
}

/// Numeric ids and uuid/hex tokens.
fn looks_like_id(segment: &str) -> bool {
    if segment.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    segment.len() >= 16 && segment.chars().all(|c| c.is_ascii_hexdigit() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        assert_eq!(RouteKey::route("/callbacks/scf/").path(), "/callbacks/scf");
        assert_eq!(RouteKey::route("callbacks//scf").path(), "/callbacks/scf");
        assert_eq!(RouteKey::route("/callbacks/scf?eventId=1").path(), "/callbacks/scf");
        assert_eq!(RouteKey::route("/").path(), "/");
    }

    #[test]
    fn test_id_segments_collapse() {
        assert_eq!(RouteKey::route("/tasks/12345/cancel").path(), "/tasks/:id/cancel");
        assert_eq!(
            RouteKey::route("/tasks/3f2c1a9e-8b7d-4c6e-9f10-aa11bb22cc33/cancel").path(),
            "/tasks/:id/cancel"
        );
        // Templates are left alone.
        assert_eq!(RouteKey::route("/tasks/{task_id}/cancel").path(), "/tasks/{task_id}/cancel");
    }

    #[test]
    fn test_client_scoping() {
        let base = RouteKey::route("/callbacks/scf");
        let scoped = base.clone().with_client("app-1");
        assert_ne!(base, scoped);
        assert_eq!(scoped.to_string(), "/callbacks/scf#app-1");
        assert_eq!(base.clone().with_client(""), base);
    }
}

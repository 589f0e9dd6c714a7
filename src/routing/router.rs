//! Route lookup.
//!
//! # Responsibilities
//! - Store compiled routes
//! - Look up the matching route for a normalized path
//! - Return matched route or explicit no-match
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - Longest prefix wins; O(n) scan is fine for typical route counts
//! - Targets are validated here, before any request can reach them

use thiserror::Error;
use url::Url;

use crate::config::validation::validate_target;
use crate::config::RouteConfig;
use crate::routing::matcher::{Matcher, PathPrefixMatcher};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("route '{route}': {reason}")]
    InvalidTarget { route: String, reason: String },

    #[error("route '{0}': path_prefix must start with '/'")]
    InvalidPrefix(String),
}

/// A compiled route.
#[derive(Debug, Clone)]
pub struct Route {
    pub name: String,
    pub target: Url,
    matcher: PathPrefixMatcher,
    authority: String,
    base_path: String,
}

impl Route {
    fn compile(config: RouteConfig) -> Result<Self, RouteError> {
        if !config.path_prefix.starts_with('/') {
            return Err(RouteError::InvalidPrefix(config.name));
        }
        let target = validate_target(&config.target_url).map_err(|reason| {
            RouteError::InvalidTarget {
                route: config.name.clone(),
                reason,
            }
        })?;

        // validate_target guarantees a host.
        let host = target.host_str().unwrap_or_default();
        let authority = match target.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let base_path = target.path().trim_end_matches('/').to_string();

        Ok(Self {
            name: config.name,
            matcher: PathPrefixMatcher::new(config.path_prefix),
            target,
            authority,
            base_path,
        })
    }

    pub fn prefix(&self) -> &str {
        self.matcher.prefix()
    }

    /// `host[:port]` of the target, used for the URI and the Host header.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn scheme(&self) -> &str {
        self.target.scheme()
    }

    /// Join the target's base path with the stripped request path.
    pub fn upstream_path(&self, stripped: &str) -> String {
        format!("{}{}", self.base_path, stripped)
    }
}

/// Result of a successful lookup.
#[derive(Debug, Clone)]
pub struct RouteMatch<'a> {
    pub route: &'a Route,
    /// Request path with the route prefix removed; never empty.
    pub stripped_path: String,
}

/// Immutable prefix router.
#[derive(Debug, Clone, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new(configs: Vec<RouteConfig>) -> Result<Self, RouteError> {
        let mut routes = configs
            .into_iter()
            .map(Route::compile)
            .collect::<Result<Vec<_>, _>>()?;

        // Longest prefix first
        routes.sort_by(|a, b| b.prefix().len().cmp(&a.prefix().len()));

        for route in &routes {
            tracing::debug!(route = %route.name, prefix = %route.prefix(), target = %route.target, "Route compiled");
        }
        Ok(Self { routes })
    }

    /// Find the route for `path`. `path` should already be normalized.
    pub fn match_path(&self, path: &str) -> Option<RouteMatch<'_>> {
        self.routes.iter().find_map(|route| {
            route.matcher.strip(path).map(|rest| RouteMatch {
                route,
                stripped_path: forwarded_rest(rest),
            })
        })
    }

    /// Pick the route with the normalized path, but forward the remainder of
    /// the path as the client sent it (trailing slashes and empty segments
    /// kept). If the raw path does not start with the chosen prefix, for
    /// example because it contained `..`, the normalized remainder is used.
    pub fn match_request(&self, normalized: &str, raw: &str) -> Option<RouteMatch<'_>> {
        let mut found = self.match_path(normalized)?;
        if let Some(rest) = found.route.matcher.strip(raw) {
            found.stripped_path = forwarded_rest(rest);
        }
        Some(found)
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }
}

fn forwarded_rest(rest: &str) -> String {
    if rest.is_empty() {
        "/".to_string()
    } else {
        rest.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServicesConfig;

    fn route(name: &str, prefix: &str, target: &str) -> RouteConfig {
        RouteConfig {
            name: name.into(),
            path_prefix: prefix.into(),
            target_url: target.into(),
        }
    }

    #[test]
    fn test_default_table() {
        let router = Router::new(ServicesConfig::default().default_routes()).unwrap();
        assert_eq!(router.routes().len(), 5);

        let m = router.match_path("/api/v1/orders/123").unwrap();
        assert_eq!(m.route.name, "orders");
        assert_eq!(m.stripped_path, "/123");

        let m = router.match_path("/api/v1/products/9").unwrap();
        assert_eq!(m.route.authority(), "localhost:8083");

        assert_eq!(router.match_path("/api/v1/orders").unwrap().stripped_path, "/");
        assert!(router.match_path("/api/v1/ordersX").is_none());
        assert!(router.match_path("/api/v2/orders").is_none());
    }

    #[test]
    fn test_longest_prefix_wins() {
        let router = Router::new(vec![
            route("api", "/api", "http://general:80"),
            route("orders", "/api/orders", "http://orders:80"),
        ])
        .unwrap();

        assert_eq!(router.match_path("/api/orders/1").unwrap().route.name, "orders");
        assert_eq!(router.match_path("/api/other").unwrap().route.name, "api");
    }

    #[test]
    fn test_invalid_target_rejected_at_construction() {
        let err = Router::new(vec![route("bad", "/bad", "ftp://files")]).unwrap_err();
        assert!(matches!(err, RouteError::InvalidTarget { route, .. } if route == "bad"));

        let err = Router::new(vec![route("bad", "nope", "http://ok")]).unwrap_err();
        assert_eq!(err, RouteError::InvalidPrefix("bad".into()));
    }

    #[test]
    fn test_upstream_path_joins_base() {
        let router = Router::new(vec![route("svc", "/svc", "https://svc.internal:8443/base/")]).unwrap();
        let m = router.match_path("/svc/items").unwrap();
        assert_eq!(m.route.scheme(), "https");
        assert_eq!(m.route.authority(), "svc.internal:8443");
        assert_eq!(m.route.upstream_path(&m.stripped_path), "/base/items");

        let plain = Router::new(vec![route("p", "/p", "http://p")]).unwrap();
        let m = plain.match_path("/p/").unwrap();
        assert_eq!(m.route.upstream_path(&m.stripped_path), "/");
    }

    #[test]
    fn test_raw_remainder_is_forwarded() {
        let router = Router::new(ServicesConfig::default().default_routes()).unwrap();

        let m = router.match_request("/api/v1/orders/123", "/api/v1/orders/123/").unwrap();
        assert_eq!(m.stripped_path, "/123/");

        let m = router.match_request("/api/v1/orders/a/b", "/api/v1/orders/a//b").unwrap();
        assert_eq!(m.stripped_path, "/a//b");

        let m = router.match_request("/api/v1/orders", "/api/v1/orders").unwrap();
        assert_eq!(m.stripped_path, "/");

        // Raw path resolves elsewhere after normalization.
        let m = router
            .match_request("/api/v1/payments/7", "/api/v1/orders/../payments/7")
            .unwrap();
        assert_eq!(m.route.name, "payments");
        assert_eq!(m.stripped_path, "/7");

        assert!(router.match_request("/api/v1/ordersX", "/api/v1/ordersX").is_none());
    }
}

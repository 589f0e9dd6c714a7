//! Route matching logic.
//!
//! # Responsibilities
//! - Match a normalized request path against a path prefix
//! - Return the remainder that is forwarded upstream
//!
//! # Design Decisions
//! - Path matching is case-sensitive
//! - Matching is segment aligned: `/api/v1/orders` matches `/api/v1/orders`
//!   and `/api/v1/orders/...`, never `/api/v1/ordersX`
//! - No regex to guarantee O(n) matching

/// Trait for matching request paths against conditions.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// The part of `path` left after the match, or `None` if it does not match.
    fn strip<'a>(&self, path: &'a str) -> Option<&'a str>;

    fn matches(&self, path: &str) -> bool {
        self.strip(path).is_some()
    }
}

/// Matches the request path prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPrefixMatcher {
    prefix: String,
}

impl PathPrefixMatcher {
    /// Create a new path prefix matcher. Trailing slashes are ignored, so
    /// `/api/v1/orders/` and `/api/v1/orders` are the same prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let trimmed = prefix.trim_end_matches('/');
        Self {
            prefix: trimmed.to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        if self.prefix.is_empty() {
            "/"
        } else {
            &self.prefix
        }
    }
}

impl Matcher for PathPrefixMatcher {
    fn strip<'a>(&self, path: &'a str) -> Option<&'a str> {
        let rest = path.strip_prefix(self.prefix.as_str())?;
        if rest.is_empty() || rest.starts_with('/') {
            Some(rest)
        } else {
            None
        }
    }
}

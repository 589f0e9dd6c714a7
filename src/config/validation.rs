//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate route targets before any request is dispatched against them
//! - Validate value ranges (quota > 0, window > 0)
//! - Detect conflicting routes
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::GatewayConfig;

/// Minimum length of the shared HMAC secret, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid bind address '{0}'")]
    BindAddress(String),

    #[error("auth.jwt_secret must be at least {MIN_SECRET_LEN} bytes")]
    WeakSecret,

    #[error("route '{route}': {reason}")]
    Target { route: String, reason: String },

    #[error("route '{0}': path_prefix must start with '/'")]
    Prefix(String),

    #[error("duplicate path_prefix '{0}'")]
    DuplicatePrefix(String),

    #[error("rate_limit.{0} must be greater than zero")]
    RateLimit(&'static str),
}

/// Check that a backend origin is usable: non-empty, parseable, http(s), with a host.
pub fn validate_target(target: &str) -> Result<Url, String> {
    if target.trim().is_empty() {
        return Err("target_url is empty".to_string());
    }
    let url = Url::parse(target).map_err(|e| format!("target_url '{target}' is invalid: {e}"))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(format!("target_url scheme '{other}' is not http or https")),
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(format!("target_url '{target}' has no host"));
    }
    Ok(url)
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.listener.bind_address.clone()));
    }

    if config.auth.jwt_secret.len() < MIN_SECRET_LEN {
        errors.push(ValidationError::WeakSecret);
    }

    let mut seen = HashSet::new();
    for route in config.effective_routes() {
        if let Err(reason) = validate_target(&route.target_url) {
            errors.push(ValidationError::Target {
                route: route.name.clone(),
                reason,
            });
        }
        if !route.path_prefix.starts_with('/') {
            errors.push(ValidationError::Prefix(route.name.clone()));
        }
        let key = route.path_prefix.trim_end_matches('/').to_string();
        if !seen.insert(key) {
            errors.push(ValidationError::DuplicatePrefix(route.path_prefix.clone()));
        }
    }

    if config.rate_limit.requests_per_window <= 0 {
        errors.push(ValidationError::RateLimit("requests_per_window"));
    }
    if config.rate_limit.window_secs <= 0 {
        errors.push(ValidationError::RateLimit("window_secs"));
    }
    if config.rate_limit.max_clients == 0 {
        errors.push(ValidationError::RateLimit("max_clients"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

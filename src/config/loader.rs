//! Configuration loading from disk and the environment.

use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value '{value}' for {var}")]
    Env { var: &'static str, value: String },

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file, then apply environment
/// overrides. With no path, defaults plus environment are used.
pub fn load_config(path: Option<&Path>) -> Result<GatewayConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        }
        None => GatewayConfig::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Overlay environment variables onto `config`. `lookup` abstracts the
/// environment so tests can supply their own.
pub fn apply_env_overrides<F>(config: &mut GatewayConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(secret) = get("JWT_SECRET") {
        config.auth.jwt_secret = secret;
    }
    if let Some(url) = get("ORDER_SERVICE_URL") {
        config.services.order_url = url;
    }
    if let Some(url) = get("PAYMENT_SERVICE_URL") {
        config.services.payment_url = url;
    }
    if let Some(url) = get("INVENTORY_SERVICE_URL") {
        config.services.inventory_url = url;
    }
    if let Some(url) = get("NOTIFICATION_SERVICE_URL") {
        config.services.notification_url = url;
    }

    if let Some(value) = get("RATE_LIMIT_REQUESTS_PER_MINUTE") {
        config.rate_limit.requests_per_window = value
            .trim()
            .parse()
            .map_err(|_| env_error("RATE_LIMIT_REQUESTS_PER_MINUTE", &value))?;
    }
    if let Some(value) = get("RATE_LIMIT_WINDOW_DURATION") {
        let window = parse_secs(&value)
            .ok_or_else(|| env_error("RATE_LIMIT_WINDOW_DURATION", &value))?;
        config.rate_limit.window_secs = window as i64;
    }
    if let Some(value) = get("PROXY_TIMEOUT") {
        let timeout = parse_secs(&value).ok_or_else(|| env_error("PROXY_TIMEOUT", &value))?;
        config.timeouts.proxy_secs = timeout as i64;
    }

    if let Some(value) = get("API_GATEWAY_PORT") {
        let port: u16 = value
            .trim()
            .parse()
            .map_err(|_| env_error("API_GATEWAY_PORT", &value))?;
        let mut addr = config
            .listener
            .bind_address
            .parse::<SocketAddr>()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));
        addr.set_port(port);
        config.listener.bind_address = addr.to_string();
    }

    Ok(())
}

fn env_error(var: &'static str, value: &str) -> ConfigError {
    ConfigError::Env {
        var,
        value: value.to_string(),
    }
}

/// Accepts plain seconds ("30") or a humantime duration ("1m", "500ms").
fn parse_secs(value: &str) -> Option<u64> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(secs);
    }
    humantime::parse_duration(value)
        .ok()
        .map(|d: Duration| d.as_secs())
}

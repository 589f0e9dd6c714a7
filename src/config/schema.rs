//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the API gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Identity reported by the health endpoint.
    pub service: ServiceInfo,

    /// Per-client rate limiting.
    pub rate_limit: RateLimitConfig,

    /// Bearer-token authentication.
    pub auth: AuthConfig,

    /// Backend service origins used by the default route table.
    pub services: ServicesConfig,

    /// Explicit route table. Replaces the default table when non-empty.
    pub routes: Vec<RouteConfig>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl GatewayConfig {
    /// Route table in effect: the explicit `routes` if any, otherwise the
    /// standard table derived from `services`.
    pub fn effective_routes(&self) -> Vec<RouteConfig> {
        if self.routes.is_empty() {
            self.services.default_routes()
        } else {
            self.routes.clone()
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceInfo {
    pub name: String,
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            name: "api-gateway".to_string(),
            version: "unknown".to_string(),
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests admitted per window for a single client.
    pub requests_per_window: i64,

    /// Window length in seconds.
    pub window_secs: i64,

    /// Upper bound on tracked clients.
    pub max_clients: usize,

    /// Interval of the background eviction sweep in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 100,
            window_secs: 60,
            max_clients: 10_000,
            sweep_interval_secs: 300,
        }
    }
}

/// Bearer-token authentication configuration.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared HMAC secret.
    pub jwt_secret: String,

    /// Paths that skip authentication (exact match after normalization).
    pub public_paths: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            public_paths: vec!["/health".to_string(), "/metrics".to_string()],
        }
    }
}

// Keeps the secret out of logs.
impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"<redacted>")
            .field("public_paths", &self.public_paths)
            .finish()
    }
}

/// Backend service origins.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServicesConfig {
    pub order_url: String,
    pub payment_url: String,
    pub inventory_url: String,
    pub notification_url: String,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            order_url: "http://localhost:8081".to_string(),
            payment_url: "http://localhost:8082".to_string(),
            inventory_url: "http://localhost:8083".to_string(),
            notification_url: "http://localhost:8084".to_string(),
        }
    }
}

impl ServicesConfig {
    /// The standard `/api/v1/*` route table. Products are served by the
    /// inventory service.
    pub fn default_routes(&self) -> Vec<RouteConfig> {
        [
            ("orders", "/api/v1/orders", &self.order_url),
            ("payments", "/api/v1/payments", &self.payment_url),
            ("inventory", "/api/v1/inventory", &self.inventory_url),
            ("products", "/api/v1/products", &self.inventory_url),
            ("notifications", "/api/v1/notifications", &self.notification_url),
        ]
        .into_iter()
        .map(|(name, prefix, target)| RouteConfig {
            name: name.to_string(),
            path_prefix: prefix.to_string(),
            target_url: target.clone(),
        })
        .collect()
    }
}

/// Route configuration mapping a path prefix to a backend origin.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RouteConfig {
    /// Route identifier for logging/metrics.
    pub name: String,

    /// Path prefix to match and strip.
    pub path_prefix: String,

    /// Backend origin, e.g. "http://orders:8080".
    pub target_url: String,
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Backend round-trip timeout in seconds. Zero or negative disables it.
    pub proxy_secs: i64,

    /// Drain deadline for in-flight requests on shutdown.
    pub shutdown_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            proxy_secs: 30,
            shutdown_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Expose `/metrics` and record into Prometheus.
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
            metrics_enabled: true,
        }
    }
}

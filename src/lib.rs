//! API gateway library: per-client rate limiting, bearer-token
//! authentication and prefix-based reverse proxying behind one HTTP entry
//! point.

pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod routing;
pub mod security;

pub use config::GatewayConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;

//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → rate_limit.rs (per-client token bucket)
//!     → auth.rs (bearer token, identity headers)
//!     → headers.rs (client IP, X-Forwarded-*, hop-by-hop stripping)
//!     → Pass to routing
//! ```
//!
//! # Design Decisions
//! - Fail closed: reject on any security check failure
//! - Identity headers from clients are never trusted

pub mod auth;
pub mod headers;
pub mod rate_limit;

pub use auth::{AuthRejection, Authenticator, AuthenticatedUser, Claims};
pub use rate_limit::RateLimiter;

//! Health reporting.
//!
//! # Data Flow
//! ```text
//! GET /health
//!     → dispatch (bypasses rate limiting and auth)
//!     → report.rs (service identity, version, uptime, timestamp)
//!     → JSON body
//! ```
//!
//! # Design Decisions
//! - Reports gateway liveness only; backends are not probed
//! - Uptime measured from reporter construction

pub mod report;

pub use report::{HealthDetails, HealthReporter, HealthStatus};

//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms via MetricsRecorder)
//!
//! Consumers:
//!     → stdout (JSON or pretty)
//!     → /metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows through all subsystems
//! - Metrics sink is injected, never global

pub mod logging;
pub mod metrics;

pub use metrics::{MetricsRecorder, NoopMetrics, PrometheusMetrics};

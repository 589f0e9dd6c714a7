//! Gateway liveness report.

use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ServiceInfo;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthDetails {
    pub version: String,
    /// Human-readable uptime, e.g. "1h 2m 3s".
    pub uptime: String,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub service: String,
    /// RFC 3339, UTC.
    pub timestamp: String,
    pub details: HealthDetails,
}

/// Builds health reports for one gateway instance.
#[derive(Debug, Clone)]
pub struct HealthReporter {
    service: String,
    version: String,
    started: Instant,
}

impl HealthReporter {
    pub fn new(info: &ServiceInfo) -> Self {
        let or_default = |value: &str, default: &str| {
            if value.trim().is_empty() {
                default.to_string()
            } else {
                value.to_string()
            }
        };
        Self {
            service: or_default(&info.name, "api-gateway"),
            version: or_default(&info.version, "unknown"),
            started: Instant::now(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn report(&self) -> HealthStatus {
        self.report_at(Utc::now(), self.uptime())
    }

    fn report_at(&self, now: DateTime<Utc>, uptime: Duration) -> HealthStatus {
        // Whole seconds keep the output stable and short.
        let uptime = Duration::from_secs(uptime.as_secs());
        HealthStatus {
            status: "healthy".to_string(),
            service: self.service.clone(),
            timestamp: now.to_rfc3339_opts(SecondsFormat::Secs, true),
            details: HealthDetails {
                version: self.version.clone(),
                uptime: humantime::format_duration(uptime).to_string(),
            },
        }
    }
}

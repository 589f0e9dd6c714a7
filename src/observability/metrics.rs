//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (requests, admission, auth, proxying)
//! - Render Prometheus text for the `/metrics` endpoint
//!
//! # Metrics
//! - `api_gateway_requests_total` (counter): requests by method, status
//! - `api_gateway_request_duration_seconds` (histogram): end-to-end latency
//! - `api_gateway_active_requests` (gauge): requests currently in flight
//! - `api_gateway_rate_limit_hits_total` (counter): admission decisions by `allowed`
//! - `api_gateway_rate_limited_requests_total` (counter): rejections
//! - `api_gateway_jwt_tokens_validated_total` (counter): auth outcomes by `result`
//! - `api_gateway_jwt_validation_duration_seconds` (histogram)
//! - `api_gateway_proxy_requests_total` (counter): by target_service, method, status_code
//! - `api_gateway_proxy_request_duration_seconds` (histogram)
//! - `api_gateway_proxy_errors_total` (counter): by target_service, error_type
//!
//! # Design Decisions
//! - Recording goes through the `MetricsRecorder` trait, injected into the
//!   server; nothing is installed as the process-global recorder
//! - The Prometheus implementation drives the `metrics` macros against its
//!   own local recorder, so several gateways can coexist in one process
//! - Histogram samples are buffered until drained, so a background task runs
//!   upkeep on a fixed cadence whether or not anyone scrapes `/metrics`

use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// How often buffered histogram samples are folded into their summaries.
pub const UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Sink for gateway measurements.
pub trait MetricsRecorder: Send + Sync {
    fn record_request(&self, method: &str, status: u16, elapsed: Duration);

    /// `delta` is +1 when a request enters the chain and -1 when it leaves.
    fn record_in_flight(&self, delta: f64);

    fn record_rate_limit(&self, allowed: bool);

    /// `result` is one of the authentication outcome categories or `success`.
    fn record_auth(&self, result: &str, elapsed: Duration);

    fn record_proxy_request(&self, service: &str, method: &str, status: u16, elapsed: Duration);

    fn record_proxy_error(&self, service: &str, error_type: &str);

    /// Exposition text, if this recorder supports it.
    fn render(&self) -> Option<String>;

    /// Stop any background work. Idempotent.
    fn close(&self) {}
}

/// Prometheus-backed recorder.
pub struct PrometheusMetrics {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
    close_tx: watch::Sender<bool>,
    upkeep: Mutex<Option<JoinHandle<()>>>,
}

impl PrometheusMetrics {
    /// Build a local recorder. Inside a tokio runtime this also spawns the
    /// upkeep task; outside one, samples are only drained on `render`.
    pub fn new() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let (close_tx, close_rx) = watch::channel(false);

        let upkeep = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => Some(runtime.spawn(upkeep_loop(handle.clone(), UPKEEP_INTERVAL, close_rx))),
            Err(_) => {
                tracing::debug!("No tokio runtime; metrics upkeep runs on render only");
                None
            }
        };

        let metrics = Self {
            recorder,
            handle,
            close_tx,
            upkeep: Mutex::new(upkeep),
        };
        metrics.describe();
        metrics
    }

    /// Close and wait for the upkeep task to finish.
    pub async fn shutdown(&self) {
        MetricsRecorder::close(self);
        let handle = self.upkeep.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Metrics upkeep task failed");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.close_tx.borrow()
    }

    fn describe(&self) {
        metrics::with_local_recorder(&self.recorder, || {
            describe_counter!("api_gateway_requests_total", "Total HTTP requests handled");
            describe_histogram!(
                "api_gateway_request_duration_seconds",
                Unit::Seconds,
                "End-to-end request latency"
            );
            describe_counter!(
                "api_gateway_rate_limit_hits_total",
                "Rate limiter decisions"
            );
            describe_counter!(
                "api_gateway_rate_limited_requests_total",
                "Requests rejected by the rate limiter"
            );
            describe_counter!(
                "api_gateway_jwt_tokens_validated_total",
                "Bearer token validation outcomes"
            );
            describe_histogram!(
                "api_gateway_jwt_validation_duration_seconds",
                Unit::Seconds,
                "Bearer token validation latency"
            );
            describe_counter!(
                "api_gateway_proxy_requests_total",
                "Requests forwarded to backend services"
            );
            describe_histogram!(
                "api_gateway_proxy_request_duration_seconds",
                Unit::Seconds,
                "Backend round-trip latency"
            );
            describe_counter!(
                "api_gateway_proxy_errors_total",
                "Failed backend round trips by error type"
            );
        });
    }
}

impl Default for PrometheusMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder for PrometheusMetrics {
    fn record_request(&self, method: &str, status: u16, elapsed: Duration) {
        let method = method.to_string();
        let status = status.to_string();
        metrics::with_local_recorder(&self.recorder, || {
            counter!("api_gateway_requests_total", "method" => method.clone(), "status" => status)
                .increment(1);
            histogram!("api_gateway_request_duration_seconds", "method" => method)
                .record(elapsed.as_secs_f64());
        });
    }

    fn record_in_flight(&self, delta: f64) {
        metrics::with_local_recorder(&self.recorder, || {
            gauge!("api_gateway_active_requests").increment(delta);
        });
    }

    fn record_rate_limit(&self, allowed: bool) {
        metrics::with_local_recorder(&self.recorder, || {
            counter!("api_gateway_rate_limit_hits_total", "allowed" => allowed.to_string())
                .increment(1);
            if !allowed {
                counter!("api_gateway_rate_limited_requests_total").increment(1);
            }
        });
    }

    fn record_auth(&self, result: &str, elapsed: Duration) {
        let result = result.to_string();
        metrics::with_local_recorder(&self.recorder, || {
            counter!("api_gateway_jwt_tokens_validated_total", "result" => result).increment(1);
            histogram!("api_gateway_jwt_validation_duration_seconds")
                .record(elapsed.as_secs_f64());
        });
    }

    fn record_proxy_request(&self, service: &str, method: &str, status: u16, elapsed: Duration) {
        let service = service.to_string();
        let method = method.to_string();
        let status = status.to_string();
        metrics::with_local_recorder(&self.recorder, || {
            counter!(
                "api_gateway_proxy_requests_total",
                "target_service" => service.clone(),
                "method" => method.clone(),
                "status_code" => status
            )
            .increment(1);
            histogram!(
                "api_gateway_proxy_request_duration_seconds",
                "target_service" => service,
                "method" => method
            )
            .record(elapsed.as_secs_f64());
        });
    }

    fn record_proxy_error(&self, service: &str, error_type: &str) {
        let service = service.to_string();
        let error_type = error_type.to_string();
        metrics::with_local_recorder(&self.recorder, || {
            counter!(
                "api_gateway_proxy_errors_total",
                "target_service" => service,
                "error_type" => error_type
            )
            .increment(1);
        });
    }

    fn render(&self) -> Option<String> {
        Some(self.handle.render())
    }

    fn close(&self) {
        if !self.close_tx.send_replace(true) {
            tracing::debug!("Metrics upkeep stopped");
        }
    }
}

impl Drop for PrometheusMetrics {
    fn drop(&mut self) {
        MetricsRecorder::close(self);
    }
}

async fn upkeep_loop(handle: PrometheusHandle, interval: Duration, mut close_rx: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => handle.run_upkeep(),
            _ = close_rx.changed() => break,
        }
    }
}

/// Recorder that discards everything. Used when metrics are disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsRecorder for NoopMetrics {
    fn record_request(&self, _: &str, _: u16, _: Duration) {}
    fn record_in_flight(&self, _: f64) {}
    fn record_rate_limit(&self, _: bool) {}
    fn record_auth(&self, _: &str, _: Duration) {}
    fn record_proxy_request(&self, _: &str, _: &str, _: u16, _: Duration) {}
    fn record_proxy_error(&self, _: &str, _: &str) {}

    fn render(&self) -> Option<String> {
        None
    }
}

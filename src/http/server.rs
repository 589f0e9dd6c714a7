//! HTTP server setup and request pipeline.
//!
//! # Responsibilities
//! - Create the Axum Router with the gateway middleware chain
//! - Expose `/metrics` outside the chain
//! - Dispatch requests to health, a proxied route, or 404
//! - Bind server to listener and drain on shutdown
//!
//! # Layer Order (outermost first)
//! ```text
//! set request-id → trace → propagate request-id
//!     ├─ GET /metrics
//!     └─ request metrics → rate limit → auth → dispatch
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::{validate_config, GatewayConfig, ValidationError};
use crate::health::HealthReporter;
use crate::http::proxy::ReverseProxy;
use crate::http::request::request_id;
use crate::http::response::ErrorEnvelope;
use crate::lifecycle::Shutdown;
use crate::observability::{MetricsRecorder, NoopMetrics, PrometheusMetrics};
use crate::routing::{RouteError, Router as ProxyRouter};
use crate::security::auth::{auth_middleware, normalize_path, AuthState, Authenticator};
use crate::security::headers::client_ip;
use crate::security::rate_limit::{rate_limit_middleware, RateLimitState, RateLimiter};

pub const HEALTH_PATH: &str = "/health";
pub const METRICS_PATH: &str = "/metrics";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid configuration: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "))]
    Config(Vec<ValidationError>),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Application state injected into the dispatch handler.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<ProxyRouter>,
    pub proxy: ReverseProxy,
    pub health: Arc<HealthReporter>,
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    config: GatewayConfig,
    limiter: Arc<RateLimiter>,
    metrics: Arc<dyn MetricsRecorder>,
}

impl HttpServer {
    /// Create a server with the default metrics sink: Prometheus, or a no-op
    /// recorder when metrics are disabled.
    pub fn new(config: GatewayConfig) -> Result<Self, ServerError> {
        let metrics: Arc<dyn MetricsRecorder> = if config.observability.metrics_enabled {
            Arc::new(PrometheusMetrics::new())
        } else {
            Arc::new(NoopMetrics)
        };
        Self::with_metrics(config, metrics)
    }

    /// Create a server that records into `metrics`.
    pub fn with_metrics(
        config: GatewayConfig,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> Result<Self, ServerError> {
        validate_config(&config).map_err(ServerError::Config)?;

        // Initialize subsystems
        let proxy_router = Arc::new(ProxyRouter::new(config.effective_routes())?);
        let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let authenticator = Arc::new(Authenticator::new(&config.auth));

        let state = AppState {
            router: proxy_router,
            proxy: ReverseProxy::new(config.timeouts.proxy_secs, metrics.clone()),
            health: Arc::new(HealthReporter::new(&config.service)),
        };
        let rate_limit = RateLimitState {
            limiter: limiter.clone(),
            metrics: metrics.clone(),
            exempt_path: HEALTH_PATH.to_string(),
        };
        let auth = AuthState {
            authenticator,
            metrics: metrics.clone(),
        };

        let router = Self::build_router(state, rate_limit, auth, metrics.clone());
        Ok(Self {
            router,
            config,
            limiter,
            metrics,
        })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(
        state: AppState,
        rate_limit: RateLimitState,
        auth: AuthState,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> Router {
        let chain = Router::new()
            .fallback(dispatch)
            .with_state(state)
            .layer(middleware::from_fn_with_state(auth, auth_middleware))
            .layer(middleware::from_fn_with_state(rate_limit, rate_limit_middleware))
            .layer(middleware::from_fn_with_state(metrics.clone(), track_request));

        Router::new()
            .route(METRICS_PATH, get(metrics_handler))
            .with_state(metrics)
            .merge(chain)
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
                tracing::info_span!(
                    "request",
                    method = %req.method(),
                    uri = %req.uri(),
                    request_id = request_id(req.headers()).unwrap_or("-"),
                )
            }))
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// The single entry point, for embedding or in-process testing.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn limiter(&self) -> Arc<RateLimiter> {
        self.limiter.clone()
    }

    pub fn metrics(&self) -> Arc<dyn MetricsRecorder> {
        self.metrics.clone()
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Serve on `listener` until `shutdown` resolves, then stop accepting and
    /// wait at most `drain` for in-flight requests. Requests still running at
    /// the deadline are not cancelled here; an embedding process that keeps
    /// running keeps serving them until their own proxy deadline. The rate
    /// limiter and the metrics upkeep are closed on the way out.
    pub async fn run<F>(
        self,
        listener: TcpListener,
        shutdown: F,
        drain: Duration,
    ) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let coordinator = Shutdown::new();
        let stop_accepting = coordinator.subscribe();
        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        // Serve with graceful shutdown
        let mut server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(stop_accepting.recv())
                .await
        });

        let result = tokio::select! {
            joined = &mut server => Some(joined),
            _ = shutdown => None,
        };

        let result = match result {
            Some(joined) => joined,
            None => {
                coordinator.trigger();
                tracing::info!(deadline = ?drain, "Shutdown requested, draining requests");
                match tokio::time::timeout(drain, &mut server).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        // Connection tasks are owned by `axum::serve`; they
                        // finish or fail on their own once the process exits.
                        tracing::warn!(deadline = ?drain, "Drain deadline exceeded, no longer waiting for in-flight requests");
                        server.abort();
                        Ok(Ok(()))
                    }
                }
            }
        };

        self.limiter.shutdown().await;
        self.metrics.close();

        match result {
            Ok(served) => served?,
            Err(e) => {
                tracing::error!(error = %e, "HTTP server task failed");
                return Err(std::io::Error::other(e).into());
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Health, then route match, then 404.
async fn dispatch(State(state): State<AppState>, request: Request<Body>) -> Response {
    let path = normalize_path(request.uri().path());

    if path == HEALTH_PATH {
        return Json(state.health.report()).into_response();
    }

    let Some(route_match) = state.router.match_request(&path, request.uri().path()) else {
        tracing::debug!(path = %request.uri().path(), "No route matched");
        return ErrorEnvelope::new(StatusCode::NOT_FOUND, "Not found")
            .with_code("NOT_FOUND")
            .with_request_id_from(request.headers())
            .into_response();
    };

    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = client_ip(request.headers(), remote);

    state.proxy.forward(request, &route_match, &client).await
}

async fn metrics_handler(State(metrics): State<Arc<dyn MetricsRecorder>>) -> Response {
    match metrics.render() {
        Some(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        None => ErrorEnvelope::new(StatusCode::NOT_FOUND, "Metrics disabled")
            .with_code("NOT_FOUND")
            .into_response(),
    }
}

/// Decrements the in-flight gauge even if the request future is dropped.
struct InFlight(Arc<dyn MetricsRecorder>);

impl InFlight {
    fn enter(metrics: Arc<dyn MetricsRecorder>) -> Self {
        metrics.record_in_flight(1.0);
        Self(metrics)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.record_in_flight(-1.0);
    }
}

async fn track_request(
    State(metrics): State<Arc<dyn MetricsRecorder>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let _in_flight = InFlight::enter(metrics.clone());

    let response = next.run(request).await;
    metrics.record_request(method.as_str(), response.status().as_u16(), start.elapsed());
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::validation::MIN_SECRET_LEN;
    use serde_json::Value;
    use tower::ServiceExt;

    fn config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.auth.jwt_secret = "k".repeat(MIN_SECRET_LEN);
        config
    }

    async fn send(router: Router, path: &str) -> (StatusCode, Value, Option<String>) {
        let response = router
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let id = response
            .headers()
            .get("x-request-id")
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body, id)
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let server = HttpServer::new(config()).unwrap();
        let (status, body, id) = send(server.router(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "api-gateway");
        assert!(id.is_some());
    }

    #[tokio::test]
    async fn test_protected_route_requires_token() {
        let server = HttpServer::new(config()).unwrap();
        let (status, body, id) = send(server.router(), "/api/v1/orders/1").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "missing_header");
        assert_eq!(body["error"], "Missing Authorization header");
        assert_eq!(body["request_id"].as_str(), id.as_deref());
    }

    #[tokio::test]
    async fn test_traversal_to_public_path_is_health() {
        let server = HttpServer::new(config()).unwrap();
        let (status, body, _) = send(server.router(), "/api/v1/orders/../../../health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_metrics_bypasses_chain() {
        let mut config = config();
        config.rate_limit.requests_per_window = 1;
        let server = HttpServer::new(config).unwrap();

        // Exhaust the single token for the anonymous client.
        let (status, _, _) = send(server.router(), "/api/v1/orders").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, body, _) = send(server.router(), "/api/v1/orders").await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"], "Rate limit exceeded");

        let response = server
            .router()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("api_gateway_rate_limited_requests_total 1"));
        assert!(text.contains("result=\"missing_header\""));
    }

    #[tokio::test]
    async fn test_metrics_disabled() {
        let mut config = config();
        config.observability.metrics_enabled = false;
        let server = HttpServer::new(config).unwrap();
        let (status, _, _) = send(server.router(), "/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = HttpServer::new(GatewayConfig::default()).err().unwrap();
        assert!(matches!(err, ServerError::Config(errors) if errors.contains(&ValidationError::WeakSecret)));
    }

    #[tokio::test]
    async fn test_run_stops_on_signal() {
        let server = HttpServer::new(config()).unwrap();
        let limiter = server.limiter();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        server
            .run(listener, async {}, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(limiter.is_closed());
    }
}

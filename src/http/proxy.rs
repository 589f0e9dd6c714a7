//! Request forwarding to backend services.
//!
//! # Responsibilities
//! - Rewrite the URI to the route target (strip prefix, join base path, keep query)
//! - Add forwarding headers, drop hop-by-hop headers, rewrite Host
//! - Enforce the per-request backend timeout
//! - Classify round-trip failures into status codes and error codes
//!
//! # Design Decisions
//! - No retries: every failure is terminal for the request
//! - One deadline per request, started when forwarding begins. It bounds the
//!   wait for response headers (504 on expiry) and every body frame after
//!   that; a body that outlives it is cut off with a stream error
//! - Classification inspects the io::Error chain first, then error text

use std::error::Error as StdError;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, HeaderValue, Request, StatusCode, Uri, Version},
    response::{IntoResponse, Response},
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use futures_util::{stream, StreamExt};
use thiserror::Error;
use tokio::time::Instant;

use crate::http::request::request_id;
use crate::http::response::{ErrorDetails, ErrorEnvelope, PROXY_FAILURE_MESSAGE};
use crate::observability::MetricsRecorder;
use crate::routing::RouteMatch;
use crate::security::headers::{apply_forwarding_headers, strip_hop_by_hop, ForwardedFor};

pub type HttpClient = Client<HttpConnector, Body>;

/// Failure categories surfaced to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyErrorKind {
    ServiceUnavailable,
    GatewayTimeout,
    InvalidHost,
    Other,
}

impl ProxyErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            ProxyErrorKind::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ProxyErrorKind::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
            ProxyErrorKind::InvalidHost | ProxyErrorKind::Other => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            ProxyErrorKind::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ProxyErrorKind::GatewayTimeout => "GATEWAY_TIMEOUT",
            ProxyErrorKind::InvalidHost => "INVALID_HOST",
            ProxyErrorKind::Other => "PROXY_ERROR",
        }
    }
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("backend did not respond within {0:?}")]
    Timeout(Duration),

    #[error("failed to build upstream request: {0}")]
    Request(#[from] axum::http::Error),

    #[error("upstream request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),
}

impl ProxyError {
    pub fn kind(&self) -> ProxyErrorKind {
        match self {
            ProxyError::Timeout(_) => ProxyErrorKind::GatewayTimeout,
            ProxyError::Request(_) => ProxyErrorKind::Other,
            ProxyError::Upstream(e) => classify(e),
        }
    }
}

/// Classify a round-trip failure by walking its source chain.
pub fn classify(err: &(dyn StdError + 'static)) -> ProxyErrorKind {
    let mut text = String::new();
    let mut current = Some(err);

    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            match io_err.kind() {
                io::ErrorKind::ConnectionRefused => return ProxyErrorKind::ServiceUnavailable,
                io::ErrorKind::TimedOut => return ProxyErrorKind::GatewayTimeout,
                _ => {}
            }
        }
        text.push_str(&e.to_string());
        text.push('\n');
        current = e.source();
    }

    classify_message(&text)
}

/// Text fallback for errors that carry no usable io::ErrorKind.
pub fn classify_message(message: &str) -> ProxyErrorKind {
    let message = message.to_lowercase();
    if message.contains("connection refused") {
        ProxyErrorKind::ServiceUnavailable
    } else if message.contains("timeout") || message.contains("timed out") {
        ProxyErrorKind::GatewayTimeout
    } else if ["no such host", "dns error", "failed to lookup address", "name or service not known"]
        .iter()
        .any(|needle| message.contains(needle))
    {
        ProxyErrorKind::InvalidHost
    } else {
        ProxyErrorKind::Other
    }
}

/// Forwards matched requests to their backend.
#[derive(Clone)]
pub struct ReverseProxy {
    client: HttpClient,
    timeout: Option<Duration>,
    metrics: Arc<dyn MetricsRecorder>,
}

impl ReverseProxy {
    /// `timeout_secs <= 0` disables the per-request timeout.
    pub fn new(timeout_secs: i64, metrics: Arc<dyn MetricsRecorder>) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        let timeout = u64::try_from(timeout_secs)
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);
        Self {
            client,
            timeout,
            metrics,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Forward `request` to the route in `route_match`. Never fails: backend
    /// errors become classified error responses.
    pub async fn forward(
        &self,
        request: Request<Body>,
        route_match: &RouteMatch<'_>,
        client_ip: &str,
    ) -> Response {
        let start = Instant::now();
        let deadline = self.timeout.map(|limit| start + limit);
        let route = route_match.route;
        let method = request.method().clone();
        let request_id = request_id(request.headers()).map(str::to_string);
        let mut target_url = route.target.to_string();

        let outcome = match self.build_upstream(request, route_match, client_ip) {
            Ok(upstream) => {
                target_url = upstream.uri().to_string();
                tracing::debug!(
                    request_id = ?request_id,
                    route = %route.name,
                    uri = %target_url,
                    "Forwarding request"
                );
                self.send(upstream, deadline).await
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(response) => {
                let status = response.status();
                self.metrics.record_proxy_request(
                    &route.name,
                    method.as_str(),
                    status.as_u16(),
                    start.elapsed(),
                );

                let (mut parts, body) = response.into_parts();
                strip_hop_by_hop(&mut parts.headers);
                let body = match (deadline, self.timeout) {
                    (Some(deadline), Some(limit)) => {
                        bounded_body(Body::new(body), deadline, limit, route.name.clone())
                    }
                    _ => Body::new(body),
                };
                Response::from_parts(parts, body)
            }
            Err(e) => {
                let kind = e.kind();
                self.metrics.record_proxy_error(&route.name, kind.code());
                tracing::error!(
                    request_id = ?request_id,
                    route = %route.name,
                    target = %target_url,
                    error = %e,
                    code = kind.code(),
                    "Proxy request failed"
                );

                ErrorEnvelope::new(kind.status(), PROXY_FAILURE_MESSAGE)
                    .with_code(kind.code())
                    .with_request_id(request_id)
                    .with_details(ErrorDetails {
                        target_url,
                        method: method.to_string(),
                    })
                    .into_response()
            }
        }
    }

    fn build_upstream(
        &self,
        request: Request<Body>,
        route_match: &RouteMatch<'_>,
        client_ip: &str,
    ) -> Result<Request<Body>, ProxyError> {
        let route = route_match.route;
        let (mut parts, body) = request.into_parts();

        // 1. Rewrite URI
        let mut path_and_query = route.upstream_path(&route_match.stripped_path);
        if let Some(query) = parts.uri.query() {
            path_and_query.push('?');
            path_and_query.push_str(query);
        }
        let uri = Uri::builder()
            .scheme(route.scheme())
            .authority(route.authority())
            .path_and_query(path_and_query)
            .build()?;

        // 2. Forwarding headers
        let original_path = parts.uri.path().to_string();
        let original_host = parts
            .headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| parts.uri.authority().map(|a| a.to_string()));
        let proto = parts.uri.scheme_str().unwrap_or("http").to_string();

        strip_hop_by_hop(&mut parts.headers);
        apply_forwarding_headers(
            &mut parts.headers,
            &ForwardedFor {
                client_ip,
                proto: &proto,
                original_host: original_host.as_deref(),
                original_path: &original_path,
            },
        );
        parts
            .headers
            .insert(header::HOST, HeaderValue::from_str(route.authority()).map_err(axum::http::Error::from)?);

        parts.uri = uri;
        parts.version = Version::HTTP_11;
        Ok(Request::from_parts(parts, body))
    }

    async fn send(
        &self,
        request: Request<Body>,
        deadline: Option<Instant>,
    ) -> Result<hyper::Response<hyper::body::Incoming>, ProxyError> {
        let call = self.client.request(request);
        match (deadline, self.timeout) {
            (Some(deadline), Some(limit)) => tokio::time::timeout_at(deadline, call)
                .await
                .map_err(|_| ProxyError::Timeout(limit))?
                .map_err(ProxyError::from),
            _ => call.await.map_err(ProxyError::from),
        }
    }
}

/// Re-stream `body`, failing the stream if a frame has not arrived by
/// `deadline`. Trailers are not carried over.
fn bounded_body(body: Body, deadline: Instant, limit: Duration, route: String) -> Body {
    let frames = body.into_data_stream();
    let bounded = stream::unfold(Some(frames), move |state| {
        let route = route.clone();
        async move {
            let mut frames = state?;
            match tokio::time::timeout_at(deadline, frames.next()).await {
                Ok(Some(frame)) => Some((frame, Some(frames))),
                Ok(None) => None,
                Err(_) => {
                    tracing::warn!(route = %route, deadline = ?limit, "Backend response body exceeded deadline");
                    Some((Err(axum::Error::new(ProxyError::Timeout(limit))), None))
                }
            }
        }
    });
    Body::from_stream(bounded)
}

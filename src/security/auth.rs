//! Bearer-token authentication.
//!
//! # Responsibilities
//! - Exempt public paths (exact match after lexical normalization)
//! - Verify HMAC-signed tokens against the shared secret
//! - Propagate identity to backends (X-User-* headers) and to later
//!   middleware (request extensions)
//!
//! # Design Decisions
//! - Only the HMAC family is accepted; the token header's algorithm is
//!   checked before the signature so asymmetric or unsigned tokens never
//!   reach verification
//! - `exp` is mandatory and checked with zero leeway
//! - Prefix matching is never used for public paths

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::{Extensions, HeaderMap, HeaderName, HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::AuthConfig;
use crate::http::response::ErrorEnvelope;
use crate::observability::MetricsRecorder;

pub const X_USER_ID: HeaderName = HeaderName::from_static("x-user-id");
pub const X_USER_EMAIL: HeaderName = HeaderName::from_static("x-user-email");
pub const X_USER_ROLE: HeaderName = HeaderName::from_static("x-user-role");

const HMAC_ALGORITHMS: [Algorithm; 3] = [Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

/// Identity carried by a verified token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role: String,
    pub exp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
}

impl Claims {
    fn header_values(&self) -> Option<[(HeaderName, HeaderValue); 3]> {
        Some([
            (X_USER_ID, HeaderValue::from_str(&self.user_id).ok()?),
            (X_USER_EMAIL, HeaderValue::from_str(&self.email).ok()?),
            (X_USER_ROLE, HeaderValue::from_str(&self.role).ok()?),
        ])
    }
}

/// Typed extension slot holding the verified claims.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub Claims);

impl AuthenticatedUser {
    pub fn from_extensions(extensions: &Extensions) -> Option<&Claims> {
        extensions.get::<AuthenticatedUser>().map(|user| &user.0)
    }
}

/// Why a request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthRejection {
    #[error("Missing Authorization header")]
    MissingHeader,
    #[error("Invalid Authorization header format")]
    InvalidFormat,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Invalid token claims")]
    InvalidClaims,
}

impl AuthRejection {
    /// Stable category used in the response `code` and in metrics.
    pub fn category(&self) -> &'static str {
        match self {
            AuthRejection::MissingHeader => "missing_header",
            AuthRejection::InvalidFormat => "invalid_format",
            AuthRejection::InvalidToken => "invalid_token",
            AuthRejection::InvalidClaims => "invalid_claims",
        }
    }
}

impl From<AuthRejection> for ErrorEnvelope {
    fn from(rejection: AuthRejection) -> Self {
        ErrorEnvelope::new(StatusCode::UNAUTHORIZED, rejection.to_string())
            .with_code(rejection.category())
    }
}

/// Resolve `.` and `..`, collapse duplicate slashes, force a leading slash
/// and drop any trailing slash. `..` never climbs above the root.
pub fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    format!("/{}", segments.join("/"))
}

/// Stateless bearer-token verifier.
pub struct Authenticator {
    key: DecodingKey,
    validation: Validation,
    public_paths: HashSet<String>,
}

impl Authenticator {
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = HMAC_ALGORITHMS.to_vec();
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
            public_paths: config.public_paths.iter().map(|p| normalize_path(p)).collect(),
        }
    }

    pub fn is_public_path(&self, path: &str) -> bool {
        self.public_paths.contains(&normalize_path(path))
    }

    /// Run the full validation sequence against the request headers.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<Claims, AuthRejection> {
        let value = headers
            .get(header::AUTHORIZATION)
            .ok_or(AuthRejection::MissingHeader)?;
        let value = value.to_str().map_err(|_| AuthRejection::InvalidFormat)?;

        // Only the scheme is checked here; whatever follows it is the token.
        let token = value
            .strip_prefix("Bearer ")
            .ok_or(AuthRejection::InvalidFormat)?;

        self.verify(token)
    }

    /// Verify a raw token: algorithm family, signature, expiry, then claims.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthRejection> {
        let header = decode_header(token).map_err(|e| {
            tracing::debug!(error = %e, "Malformed token header");
            AuthRejection::InvalidToken
        })?;
        if !HMAC_ALGORITHMS.contains(&header.alg) {
            tracing::debug!(alg = ?header.alg, "Rejected non-HMAC token");
            return Err(AuthRejection::InvalidToken);
        }

        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            tracing::debug!(error = %e, "Token verification failed");
            AuthRejection::InvalidToken
        })?;

        let claims = data.claims;
        if claims.user_id.is_empty() || claims.email.is_empty() || claims.role.is_empty() {
            return Err(AuthRejection::InvalidClaims);
        }
        Ok(claims)
    }
}

/// State for [`auth_middleware`].
#[derive(Clone)]
pub struct AuthState {
    pub authenticator: Arc<Authenticator>,
    pub metrics: Arc<dyn MetricsRecorder>,
}

/// Middleware that gates every non-public path behind a valid bearer token.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    // Identity headers are only ever set by the gateway.
    for name in [X_USER_ID, X_USER_EMAIL, X_USER_ROLE] {
        request.headers_mut().remove(name);
    }

    if state.authenticator.is_public_path(request.uri().path()) {
        return next.run(request).await;
    }

    let start = Instant::now();
    let outcome = state
        .authenticator
        .authenticate(request.headers())
        .and_then(|claims| {
            let values = claims.header_values().ok_or(AuthRejection::InvalidClaims)?;
            Ok((claims, values))
        });

    match outcome {
        Ok((claims, values)) => {
            state.metrics.record_auth("success", start.elapsed());
            tracing::debug!(user_id = %claims.user_id, role = %claims.role, "Authenticated");

            for (name, value) in values {
                request.headers_mut().insert(name, value);
            }
            request.extensions_mut().insert(AuthenticatedUser(claims));
            next.run(request).await
        }
        Err(rejection) => {
            state.metrics.record_auth(rejection.category(), start.elapsed());
            tracing::warn!(
                path = %request.uri().path(),
                reason = rejection.category(),
                "Authentication failed"
            );
            ErrorEnvelope::from(rejection)
                .with_request_id_from(request.headers())
                .into_response()
        }
    }
}

//! Header manipulation for forwarded requests.
//!
//! # Responsibilities
//! - Resolve the apparent client for rate limiting and forwarding
//! - Add X-Forwarded-For, X-Real-IP, X-Forwarded-Proto, X-Forwarded-Host, X-Original-Path
//! - Strip hop-by-hop headers
//!
//! # Design Decisions
//! - Preserve the existing X-Forwarded-For chain, append only when the
//!   resolved client is not already its first hop
//! - X-Real-IP is set only when the client did not send one
//! - Rate-limit keys take headers verbatim; forwarding validates IP syntax

use std::net::{IpAddr, SocketAddr};

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub const X_ORIGINAL_PATH: HeaderName = HeaderName::from_static("x-original-path");

pub const UNKNOWN_CLIENT: &str = "unknown";

/// Headers that apply to a single connection and must not be forwarded.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn first_forwarded_hop(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, &X_FORWARDED_FOR)
        .and_then(|chain| chain.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
}

/// Rate-limit key: first X-Forwarded-For hop, then X-Real-IP, then the
/// socket address without its port, else `unknown`.
pub fn client_key(headers: &HeaderMap, remote: Option<SocketAddr>) -> String {
    first_forwarded_hop(headers)
        .or_else(|| header_str(headers, &X_REAL_IP))
        .map(str::to_string)
        .or_else(|| remote.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

/// Client IP for forwarding. Same precedence as [`client_key`], but each
/// candidate must be a syntactically valid IP address.
pub fn client_ip(headers: &HeaderMap, remote: Option<SocketAddr>) -> String {
    let parse = |candidate: &str| candidate.parse::<IpAddr>().ok();

    first_forwarded_hop(headers)
        .and_then(parse)
        .or_else(|| header_str(headers, &X_REAL_IP).and_then(parse))
        .or_else(|| remote.map(|addr| addr.ip()))
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// What the gateway knows about the inbound request when forwarding it.
#[derive(Debug, Clone)]
pub struct ForwardedFor<'a> {
    pub client_ip: &'a str,
    pub proto: &'a str,
    pub original_host: Option<&'a str>,
    pub original_path: &'a str,
}

/// Apply the forwarding headers to an outbound request.
pub fn apply_forwarding_headers(headers: &mut HeaderMap, fwd: &ForwardedFor<'_>) {
    if fwd.client_ip != UNKNOWN_CLIENT {
        let chain = match header_str(headers, &X_FORWARDED_FOR) {
            Some(existing) if first_forwarded_hop(headers) == Some(fwd.client_ip) => {
                existing.to_string()
            }
            Some(existing) => format!("{existing}, {}", fwd.client_ip),
            None => fwd.client_ip.to_string(),
        };
        set(headers, X_FORWARDED_FOR, &chain);

        if !headers.contains_key(&X_REAL_IP) {
            set(headers, X_REAL_IP, fwd.client_ip);
        }
    }

    set(headers, X_FORWARDED_PROTO, fwd.proto);
    if let Some(host) = fwd.original_host {
        set(headers, X_FORWARDED_HOST, host);
    }
    set(headers, X_ORIGINAL_PATH, fwd.original_path);
}

fn set(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => tracing::debug!(header = %name, "Skipping unrepresentable header value"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.append(*k, HeaderValue::from_static(v));
        }
        map
    }

    fn remote() -> Option<SocketAddr> {
        Some("192.0.2.7:51234".parse().unwrap())
    }

    #[test]
    fn test_client_key_precedence() {
        let h = headers(&[("x-forwarded-for", " 203.0.113.5, 10.0.0.1"), ("x-real-ip", "198.51.100.1")]);
        assert_eq!(client_key(&h, remote()), "203.0.113.5");

        let h = headers(&[("x-real-ip", "198.51.100.1")]);
        assert_eq!(client_key(&h, remote()), "198.51.100.1");

        assert_eq!(client_key(&HeaderMap::new(), remote()), "192.0.2.7");
        assert_eq!(client_key(&HeaderMap::new(), None), "unknown");
    }

    #[test]
    fn test_client_key_does_not_validate() {
        let h = headers(&[("x-forwarded-for", "not-an-ip")]);
        assert_eq!(client_key(&h, remote()), "not-an-ip");
    }

    #[test]
    fn test_client_ip_skips_invalid_candidates() {
        let h = headers(&[("x-forwarded-for", "garbage"), ("x-real-ip", "2001:db8::1")]);
        assert_eq!(client_ip(&h, remote()), "2001:db8::1");

        let h = headers(&[("x-forwarded-for", "garbage"), ("x-real-ip", "also-garbage")]);
        assert_eq!(client_ip(&h, remote()), "192.0.2.7");
        assert_eq!(client_ip(&h, None), "unknown");
    }

    #[test]
    fn test_forwarding_headers_fresh_request() {
        let mut h = HeaderMap::new();
        apply_forwarding_headers(
            &mut h,
            &ForwardedFor {
                client_ip: "192.0.2.7",
                proto: "http",
                original_host: Some("gateway.local"),
                original_path: "/api/v1/orders/42",
            },
        );
        assert_eq!(h["x-forwarded-for"], "192.0.2.7");
        assert_eq!(h["x-real-ip"], "192.0.2.7");
        assert_eq!(h["x-forwarded-proto"], "http");
        assert_eq!(h["x-forwarded-host"], "gateway.local");
        assert_eq!(h["x-original-path"], "/api/v1/orders/42");
    }

    #[test]
    fn test_forwarding_preserves_chain() {
        let mut h = headers(&[("x-forwarded-for", "203.0.113.5, 10.0.0.1"), ("x-real-ip", "203.0.113.9")]);
        let fwd = ForwardedFor {
            client_ip: "203.0.113.5",
            proto: "https",
            original_host: None,
            original_path: "/",
        };
        apply_forwarding_headers(&mut h, &fwd);
        assert_eq!(h["x-forwarded-for"], "203.0.113.5, 10.0.0.1");
        assert_eq!(h["x-real-ip"], "203.0.113.9");

        let mut h = headers(&[("x-forwarded-for", "garbage")]);
        let fwd = ForwardedFor { client_ip: "192.0.2.7", ..fwd };
        apply_forwarding_headers(&mut h, &fwd);
        assert_eq!(h["x-forwarded-for"], "garbage, 192.0.2.7");
    }

    #[test]
    fn test_strip_hop_by_hop() {
        let mut h = headers(&[
            ("connection", "keep-alive, x-secret-hop"),
            ("keep-alive", "timeout=5"),
            ("x-secret-hop", "1"),
            ("transfer-encoding", "chunked"),
            ("authorization", "Bearer abc"),
        ]);
        strip_hop_by_hop(&mut h);
        assert_eq!(h.len(), 1);
        assert!(h.contains_key("authorization"));
    }
}

//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware chain, dispatch)
//!     → request.rs (request ID)
//!     → [routing layer picks the route]
//!     → proxy.rs (rewrite, forward, classify failures)
//!     → response.rs (error envelopes)
//!     → Send to client
//! ```

pub mod proxy;
pub mod request;
pub mod response;
pub mod server;

pub use proxy::{ProxyError, ProxyErrorKind, ReverseProxy};
pub use request::X_REQUEST_ID;
pub use response::ErrorEnvelope;
pub use server::{HttpServer, ServerError};

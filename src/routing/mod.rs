//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request path (already normalized)
//!     → router.rs (route lookup, longest prefix first)
//!     → matcher.rs (segment-aligned prefix match + strip)
//!     → Return: RouteMatch (route + stripped path) or no match
//!
//! Route Compilation (at startup):
//!     RouteConfig[]
//!     → Validate targets
//!     → Sort by prefix length
//!     → Freeze as immutable Router
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always matches same route

pub mod matcher;
pub mod router;

pub use router::{Route, RouteError, RouteMatch, Router};

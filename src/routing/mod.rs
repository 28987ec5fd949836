//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route registration:
//!     RouteOptions.url
//!     → matcher.rs (compile pattern once)
//!
//! Per request, inside a route pipeline:
//!     raw target "/users/42?expand=posts"
//!     → query.rs (split path / query)
//!     → matcher.rs (match path, extract params)
//!     → Params or no match (context filtered out of that route)
//! ```
//!
//! # Design Decisions
//! - Patterns compiled at registration, immutable afterwards
//! - No regex in the hot path
//! - No precedence between routes: every registration matches independently

pub mod matcher;
pub mod query;

pub use matcher::{Params, PathMatcher, PatternError, TrailingSlash};
pub use query::{split_target, Query, QueryValue};

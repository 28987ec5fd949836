//! Reactive request dispatch.
//!
//! One listener, any number of independently subscribed routes. Every
//! inbound request is multicast to every route; each route runs it through
//! its own composable pipeline (body parsing, query splitting, parameter
//! extraction, method filtering, response injection) and whatever survives
//! reaches the route's subscriber, which answers with `send`.
//!
//! ```text
//!                 ┌────────────┐
//!   TCP ─► hyper ─┤  EventBus  ├─┬─► pipeline (route A) ─► handler ─┐
//!                 └────────────┘ ├─► pipeline (route B) ─► handler ─┤
//!                                └─► ...                            │
//!                                                                   ▼
//!   client ◄──────────────── shared ResponseHandle (first send wins)
//! ```

pub mod bus;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod pipeline;
pub mod routing;

#[cfg(test)]
pub(crate) mod testing;

pub use crate::config::ServerConfig;
pub use crate::dispatch::{create_server, RouteStream, Server, ServerBuilder};
pub use crate::error::DispatchError;
pub use crate::http::{Payload, SendError};
pub use crate::lifecycle::Shutdown;
pub use crate::pipeline::{DispatchContext, ParseType, RouteOptions, Stage, TransformChain};

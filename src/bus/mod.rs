//! The event bus: one listener in, many route subscriptions out.
//!
//! ```text
//! TcpListener ──► HttpServer (one task per connection)
//!                     │  DispatchContext + shared ResponseHandle
//!                     ▼
//!                 EventBus::publish ──► subscriber 1 (route A pipeline)
//!                                  ├──► subscriber 2 (route B pipeline)
//!                                  └──► ...
//! ```

pub mod broadcaster;

pub use broadcaster::{BusHandle, EventBus, SubscriberId, Subscription};

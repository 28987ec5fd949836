//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (hyper HTTP/1, one exchange per request)
//!     → request.rs (request id, head, shared once-read body)
//!     → [event bus → route pipelines]
//!     → send.rs (payload encoding, exactly-once send)
//!     → response.rs (shared sink back to the waiting exchange)
//! ```

pub mod request;
pub mod response;
pub mod send;
pub mod server;

pub use request::{BodyError, RequestBody, RequestHead, RequestId, X_REQUEST_ID};
pub use response::{ResponseHandle, ResponseSink};
pub use send::{Payload, PayloadBody, Responder, SendError};
pub use server::{ExchangeError, HttpServer};

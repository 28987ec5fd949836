//! Observability: `tracing` subscriber setup.
//!
//! Library code only emits events with structured fields (`request_id`,
//! `route`, `stage`, `method`, `path`); the binary decides where they go.

pub mod logging;

pub use logging::init_logging;

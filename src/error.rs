//! Crate-level error type.

use crate::config::ConfigError;
use crate::net::ListenerError;
use crate::routing::PatternError;

/// Errors surfaced by server creation and route registration.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid route pattern: {0}")]
    Pattern(#[from] PatternError),
}

//! Engine lifecycle errors.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors returned by [`Engine`](crate::Engine) lifecycle calls.
///
/// Per-probe failures are never reported here; they are recorded in the
/// round results.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The target did not resolve to an address.
    #[error("failed to resolve target '{target}': {source}")]
    Resolution {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// The network handle could not be opened.
    #[error("failed to open connection: {0}")]
    Connection(#[source] std::io::Error),

    /// The network handle failed to close cleanly.
    #[error("failed to close connection: {0}")]
    HandleClose(#[source] std::io::Error),

    /// `start` was called on an engine that is not stopped.
    #[error("engine is already running")]
    AlreadyRunning,

    /// `stop` was called on an engine that is not running.
    #[error("engine is not running")]
    NotRunning,

    /// The engine configuration is invalid.
    #[error("invalid engine config: {0}")]
    InvalidConfig(#[from] ConfigError),
}

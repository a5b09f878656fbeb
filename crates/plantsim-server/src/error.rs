//! Error types for the server binary.
//!
//! [`ServerError`] is the top-level error type that wraps all possible
//! failure modes during startup, serving, and shutdown.

/// Top-level error for the server binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: plantsim_core::ConfigError,
    },

    /// The server could not be started.
    #[error("lifecycle error: {source}")]
    Lifecycle {
        /// The underlying lifecycle error.
        #[from]
        source: plantsim_core::LifecycleError,
    },

    /// The monitor session could not be opened.
    #[error("connection error: {source}")]
    Connection {
        /// The underlying connection error.
        #[from]
        source: plantsim_core::ConnectionError,
    },

    /// Installing the Ctrl-C handler failed.
    #[error("signal error: {source}")]
    Signal {
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A background task panicked or was cancelled.
    #[error("task error: {source}")]
    Task {
        /// The underlying join error.
        #[from]
        source: tokio::task::JoinError,
    },

    /// The final status could not be rendered.
    #[error("status encoding error: {source}")]
    Status {
        /// The underlying JSON error.
        #[from]
        source: serde_json::Error,
    },
}

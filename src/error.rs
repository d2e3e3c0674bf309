//! Errors surfaced to the host.
//!
//! Only setup and environment-level failures land here. A single fetch call
//! never produces one of these: construction failures become a synthetic
//! 500 result delivered to the script callback.

use std::path::PathBuf;
use std::time::Duration;

/// Host-facing error for bridge setup and script environments.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The bridge was built without a request handler.
    #[error("a request handler is required to enable fetch")]
    MissingHandler,
    /// The polyfill bundle could not be read from disk.
    #[error("failed to load polyfill bundle {}: {source}", path.display())]
    Polyfill {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Registering the native binding or running the bundle failed.
    #[error("fetch bootstrap failed: {0}")]
    Bootstrap(String),
    /// The event loop has stopped and no longer accepts work.
    #[error("event loop is not running")]
    LoopStopped,
    /// The script engine itself could not be created or driven.
    #[error("script engine error: {0}")]
    Engine(String),
    /// A script threw, rejected, or failed to compile.
    #[error("script failed: {0}")]
    Script(String),
    /// A script did not settle within the host's deadline.
    #[error("script timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    /// A script result could not be read back as JSON.
    #[error("invalid script result: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

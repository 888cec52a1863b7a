//! Error taxonomy for watch registration and event delivery

use crate::registry::WatchHandle;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced to callers of `watch` / `subscribe`
#[derive(Debug, Error)]
pub enum WatchError {
    /// Malformed path argument
    #[error("invalid watch path {path:?}: {reason}")]
    InvalidPath { path: PathBuf, reason: &'static str },

    /// The path already has a watch of its own
    #[error("path {path:?} is already watched (handle {handle})")]
    AlreadyWatched { path: PathBuf, handle: WatchHandle },

    /// The active backend cannot watch recursively
    #[error("backend '{backend}' does not support recursive watches")]
    RecursiveUnsupported { backend: &'static str },

    /// `watch` called before a consumer was installed
    #[error("no consumer installed; call subscribe() before watching")]
    NoConsumer,

    /// A consumer is already installed for this engine
    #[error("a consumer is already installed for this watcher")]
    ConsumerAlreadySet,

    /// The OS refused the watch
    #[error("failed to watch {path:?}: {message}")]
    Registration {
        path: PathBuf,
        /// OS error code, when the OS reported one
        code: Option<i32>,
        message: String,
    },
}

impl WatchError {
    /// Build a registration failure from an I/O error
    pub fn registration(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        WatchError::Registration {
            path: path.into(),
            code: err.raw_os_error(),
            message: err.to_string(),
        }
    }

    /// Whether the caller passed bad arguments (as opposed to the OS refusing)
    pub fn is_validation(&self) -> bool {
        !matches!(self, WatchError::Registration { .. })
    }

    /// Negative sentinel for embedding layers that speak integer handles
    ///
    /// Registration failures carry `-code`; everything else is `-1`.
    pub fn sentinel(&self) -> i32 {
        match self {
            WatchError::Registration {
                code: Some(code), ..
            } if *code > 0 => -code,
            _ => -1,
        }
    }
}

/// Hand-off to the consumer failed; the event is discarded
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// The consumer side of the channel is gone
    #[error("consumer disconnected")]
    Disconnected,

    /// The engine started stopping while the hand-off was blocked
    #[error("delivery aborted by shutdown")]
    Aborted,
}

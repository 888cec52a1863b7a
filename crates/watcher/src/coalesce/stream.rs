//! Native stream abstraction
//!
//! The coalescing backend never talks to the OS directly. It asks a
//! `StreamFactory` for one stream covering every watched path and receives
//! raw notifications through a `BatchSender`. Rebuilding on each
//! registration change means asking the factory for a fresh stream.
//!
//! A path the OS refuses does not fail the whole stream: watched
//! directories can vanish between rebuilds. The stream starts over the
//! rest and hands the refusals back through `NativeStream::take_refused`.

use super::flags::RawNotification;
use crossbeam_channel::Sender;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Inbound side of the dispatch thread; one message per OS callback
pub type BatchSender = Sender<Vec<RawNotification>>;

#[derive(Debug, Error)]
pub enum StreamError {
    /// The OS refused one of the paths
    #[error("cannot watch {path:?}: {source}")]
    Path {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    /// The stream itself could not be created or released
    #[error("native stream failure: {0}")]
    Native(#[from] notify::Error),
}

impl StreamError {
    /// OS error code, when the OS reported one
    pub fn os_code(&self) -> Option<i32> {
        let source = match self {
            StreamError::Path { source, .. } => source,
            StreamError::Native(source) => source,
        };
        crate::platform::os_code(source)
    }

    /// Path the OS refused, for per-path failures
    pub fn path(&self) -> Option<&Path> {
        match self {
            StreamError::Path { path, .. } => Some(path),
            StreamError::Native(_) => None,
        }
    }
}

/// A running native stream
pub trait NativeStream: Send {
    /// Stop and release the stream; no notification is sent afterwards
    fn stop(&mut self) -> Result<(), StreamError>;

    /// Paths left out of this stream because the OS refused them
    fn take_refused(&mut self) -> Vec<StreamError> {
        Vec::new()
    }
}

/// Creates and starts native streams
pub trait StreamFactory: Send + Sync {
    /// Start one stream over `paths`, forwarding notifications to `sink`
    ///
    /// Per-path refusals are reported by the returned stream; an error
    /// here means nothing is left running.
    fn start(
        &self,
        paths: &[PathBuf],
        sink: BatchSender,
    ) -> Result<Box<dyn NativeStream>, StreamError>;
}

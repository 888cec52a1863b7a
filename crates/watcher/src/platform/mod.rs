//! Backend selection
//!
//! Exactly one backend runs per engine session. `create_backend` picks it
//! from the configuration: the coalescing backend (one shared native
//! stream) or the generic backend (one native watch per path, multiplexed
//! by `notify`).

pub mod generic;

pub use generic::GenericBackend;

use crate::coalesce::CoalescingBackend;
use crate::config::{BackendKind, WatcherConfig};
use pathwatcher_core::{Backend, WatchError};
use std::path::Path;

/// Create the configured backend
///
/// `path` is the watch that triggered session start; it is only used to
/// attribute an initialization failure.
pub fn create_backend(config: &WatcherConfig, path: &Path) -> Result<Box<dyn Backend>, WatchError> {
    match config.backend.resolve() {
        BackendKind::Coalescing => Ok(Box::new(CoalescingBackend::new(config.coalesce_latency()))),
        _ => {
            let backend = GenericBackend::new(config.rename_window())
                .map_err(|e| registration_error(path, &e))?;
            Ok(Box::new(backend))
        }
    }
}

/// OS error code carried by a notify error, if any
pub(crate) fn os_code(err: &notify::Error) -> Option<i32> {
    match &err.kind {
        notify::ErrorKind::Io(io) => io.raw_os_error(),
        _ => None,
    }
}

/// Map a notify failure onto a registration error for `path`
pub(crate) fn registration_error(path: &Path, err: &notify::Error) -> WatchError {
    match &err.kind {
        notify::ErrorKind::Io(io) => WatchError::registration(path, io),
        _ => WatchError::Registration {
            path: path.to_path_buf(),
            code: None,
            message: err.to_string(),
        },
    }
}

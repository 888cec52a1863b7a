//! Handle↔path bookkeeping
//!
//! The registry owns handle allocation and the bidirectional table between
//! handles and watched paths. Both directions sit behind their own locks,
//! separate from the listener's shutdown lock, so registration never waits
//! on an in-flight notification.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::SystemTime;

/// Opaque identifier of one watch
///
/// Allocated from a monotonic counter owned by one registry and never reused
/// while that registry is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct WatchHandle(i32);

impl WatchHandle {
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    pub const fn as_raw(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registered path plus the moment we started watching it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedPath {
    /// Normalized absolute path
    pub path: PathBuf,
    /// Registration time, used to discard activity that predates the watch
    pub started_at: SystemTime,
    /// Whether the watch covers descendants beyond immediate children
    pub recursive: bool,
}

impl WatchedPath {
    pub fn new(path: impl Into<PathBuf>, started_at: SystemTime) -> Self {
        Self {
            path: path.into(),
            started_at,
            recursive: false,
        }
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }
}

/// Thread-safe bidirectional handle↔path table
pub struct WatchRegistry {
    /// Next handle to hand out
    next_handle: AtomicI32,
    /// handle -> watched path
    paths: Mutex<HashMap<WatchHandle, WatchedPath>>,
    /// path -> handle
    handles: Mutex<HashMap<PathBuf, WatchHandle>>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self {
            next_handle: AtomicI32::new(1),
            paths: Mutex::new(HashMap::new()),
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Reserve a fresh handle
    pub fn allocate(&self) -> WatchHandle {
        WatchHandle(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    /// Correlate a handle with a watched path
    pub fn add(&self, watched: WatchedPath, handle: WatchHandle) {
        let path = watched.path.clone();
        self.paths.lock().insert(handle, watched);
        self.handles.lock().insert(path, handle);
    }

    /// Forget a handle, returning what it pointed at
    ///
    /// Unknown handles are a no-op: backends may drop watches on their own,
    /// e.g. when the watched directory itself disappears.
    pub fn remove(&self, handle: WatchHandle) -> Option<WatchedPath> {
        let removed = self.paths.lock().remove(&handle)?;

        let mut handles = self.handles.lock();
        if handles.get(&removed.path) == Some(&handle) {
            handles.remove(&removed.path);
        }

        Some(removed)
    }

    /// Look up the watched path for a handle
    pub fn get(&self, handle: WatchHandle) -> Option<WatchedPath> {
        self.paths.lock().get(&handle).cloned()
    }

    pub fn has_path(&self, path: &Path) -> bool {
        self.handles.lock().contains_key(path)
    }

    pub fn handle_for(&self, path: &Path) -> Option<WatchHandle> {
        self.handles.lock().get(path).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.paths.lock().len()
    }

    /// Snapshot of every live handle
    pub fn handles(&self) -> Vec<WatchHandle> {
        let mut handles: Vec<_> = self.paths.lock().keys().copied().collect();
        handles.sort_unstable();
        handles
    }

    /// Drop every entry, returning the handles that were live
    pub fn clear(&self) -> Vec<WatchHandle> {
        let drained: Vec<_> = self.paths.lock().drain().map(|(h, _)| h).collect();
        self.handles.lock().clear();
        drained
    }
}

impl Default for WatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WatchRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchRegistry")
            .field("next_handle", &self.next_handle.load(Ordering::Relaxed))
            .field("watches", &self.len())
            .finish()
    }
}

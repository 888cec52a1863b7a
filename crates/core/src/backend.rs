//! Capability interface implemented by platform backends
//!
//! A backend turns OS notifications into `(handle, dir, filename, action)`
//! calls on a `FileActionListener`. Exactly one backend is active per engine
//! session; which one is decided at construction.

use crate::error::WatchError;
use crate::event::Action;
use crate::registry::WatchHandle;
use serde::Serialize;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Receiver of raw per-handle notifications
pub trait FileActionListener: Send + Sync {
    /// Called from backend threads for every matched raw action
    ///
    /// `dir` and `filename` rebuild the affected path; `old_filename` is set
    /// for renames and lives in the same `dir`.
    fn handle_file_action(
        &self,
        handle: WatchHandle,
        dir: &Path,
        filename: &OsStr,
        action: Action,
        old_filename: Option<&OsStr>,
    );
}

/// Platform backend: `add_watch` / `remove_watch` plus capabilities
pub trait Backend: Send + Sync {
    /// Short name for logs and diagnostics
    fn name(&self) -> &'static str;

    /// Whether `add_watch(.., recursive = true, ..)` is honored
    fn supports_recursive(&self) -> bool;

    /// Whether this backend is known to re-report activity that predates a
    /// watch's registration
    fn reports_pre_watch_activity(&self) -> bool {
        false
    }

    /// Start delivering notifications for `path` under `handle`
    fn add_watch(
        &self,
        handle: WatchHandle,
        path: &Path,
        recursive: bool,
        listener: Arc<dyn FileActionListener>,
    ) -> Result<(), WatchError>;

    /// Stop delivering notifications for `handle`; unknown handles are ignored
    fn remove_watch(&self, handle: WatchHandle);

    /// Current counters
    fn diagnostics(&self) -> DiagnosticsSnapshot;
}

/// Live counters kept by a backend
#[derive(Debug, Default)]
pub struct BackendDiagnostics {
    batches: AtomicU64,
    notifications: AtomicU64,
    unmatched: AtomicU64,
    dropped_signals: AtomicU64,
    stream_starts: AtomicU64,
    skipped_paths: AtomicU64,
}

impl BackendDiagnostics {
    pub fn record_batch(&self, notifications: usize) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.notifications
            .fetch_add(notifications as u64, Ordering::Relaxed);
    }

    pub fn record_unmatched(&self) {
        self.unmatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_signal(&self) {
        self.dropped_signals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stream_start(&self) {
        self.stream_starts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped_path(&self) {
        self.skipped_paths.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            batches: self.batches.load(Ordering::Relaxed),
            notifications: self.notifications.load(Ordering::Relaxed),
            unmatched: self.unmatched.load(Ordering::Relaxed),
            dropped_signals: self.dropped_signals.load(Ordering::Relaxed),
            stream_starts: self.stream_starts.load(Ordering::Relaxed),
            skipped_paths: self.skipped_paths.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of `BackendDiagnostics`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiagnosticsSnapshot {
    /// Batches received from the OS
    pub batches: u64,
    /// Raw notifications received
    pub notifications: u64,
    /// Notifications with no matching watch
    pub unmatched: u64,
    /// Dropped-events / must-rescan signals seen
    pub dropped_signals: u64,
    /// Native streams started (initial start plus rebuilds)
    pub stream_starts: u64,
    /// Watched paths the OS refused while rebuilding a stream
    pub skipped_paths: u64,
}

//! Central dispatch point between backends and the consumer
//!
//! Every raw notification from the active backend passes through
//! `EventListener::handle_file_action`, which:
//! 1. Bails out if shutdown was requested
//! 2. Serializes against `stop` through the shutdown lock
//! 3. Drops notifications for handles that were already removed
//! 4. Optionally drops activity predating the watch's registration
//! 5. Classifies the entry as the watch itself or a child
//! 6. Adds a second notification when a watched directory is deleted while
//!    its parent is watched too
//! 7. Hands the normalized event(s) to the consumer

use crate::backend::{Backend, FileActionListener};
use crate::delivery::EventSender;
use crate::event::{Action, EventKind, NormalizedEvent};
use crate::path::{join_entry, paths_equal};
use crate::registry::{WatchHandle, WatchRegistry, WatchedPath};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, trace};

/// Validates, normalizes and forwards raw notifications for one session
pub struct EventListener {
    registry: Arc<WatchRegistry>,
    sender: EventSender,
    /// Discard creations/modifications older than the watch (best-effort)
    filter_pre_watch: bool,
    /// One-shot; once set nothing is normalized or delivered
    shutting_down: AtomicBool,
    /// Raised before taking the shutdown lock so blocked hand-offs give up
    stop_requested: AtomicBool,
    shutdown_lock: Mutex<()>,
}

impl EventListener {
    pub fn new(registry: Arc<WatchRegistry>, sender: EventSender) -> Self {
        Self {
            registry,
            sender,
            filter_pre_watch: false,
            shutting_down: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            shutdown_lock: Mutex::new(()),
        }
    }

    /// Enable the registration-timestamp filter
    pub fn with_pre_watch_filter(mut self, enabled: bool) -> Self {
        self.filter_pre_watch = enabled;
        self
    }

    /// Correlate a handle with its path and start time
    pub fn add_path(&self, watched: WatchedPath, handle: WatchHandle) {
        trace!(%handle, path = %watched.path.display(), "listener tracking watch");
        self.registry.add(watched, handle);
    }

    /// Forget a handle; unknown handles are ignored
    pub fn remove_path(&self, handle: WatchHandle) -> Option<WatchedPath> {
        let removed = self.registry.remove(handle);
        if let Some(ref watched) = removed {
            trace!(%handle, path = %watched.path.display(), "listener dropped watch");
        }
        removed
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    fn is_stopping(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire) || self.is_shutting_down()
    }

    /// Mark the listener as shut down; idempotent
    ///
    /// Waits for an in-flight notification to finish (or abandon its
    /// hand-off) before returning.
    pub fn stop(&self) {
        if self.is_shutting_down() {
            return;
        }

        self.stop_requested.store(true, Ordering::Release);

        let _guard = self.shutdown_lock.lock();
        if self.is_shutting_down() {
            return;
        }
        self.shutting_down.store(true, Ordering::Release);
        debug!("event listener stopped");
    }

    /// Remove every registered watch from `backend`, then stop
    ///
    /// Afterwards the backend has no reason to call this listener again.
    /// The handles also leave the registry, which is shared with the owning
    /// engine and outlives this listener: its `len()` reads 0 afterwards.
    pub fn stop_with(&self, backend: &dyn Backend) {
        for handle in self.registry.handles() {
            backend.remove_watch(handle);
            self.registry.remove(handle);
        }
        self.stop();
    }

    fn dispatch(
        &self,
        handle: WatchHandle,
        dir: &Path,
        filename: &OsStr,
        action: Action,
        old_filename: Option<&OsStr>,
    ) {
        if self.is_stopping() {
            return;
        }

        // Hold off shutdown until this notification is handled
        let _guard = self.shutdown_lock.lock();
        if self.is_shutting_down() {
            return;
        }

        let watched = match self.registry.get(handle) {
            Some(watched) => watched,
            None => {
                // Watch was removed while this notification was in flight
                trace!(%handle, "dropping notification for removed watch");
                return;
            }
        };

        let new_path = join_entry(dir, filename);

        if self.filter_pre_watch && predates_watch(&new_path, action, watched.started_at) {
            trace!(path = %new_path.display(), ?action, "dropping activity older than watch");
            return;
        }

        let old_path = old_filename
            .filter(|name| !name.is_empty())
            .map(|name| dir.join(name));

        let is_self = paths_equal(&new_path, &watched.path);
        let mut events: SmallVec<[NormalizedEvent; 2]> = SmallVec::new();
        events.push(NormalizedEvent::new(
            EventKind::normalize(action, is_self),
            handle,
            new_path.clone(),
            old_path.clone(),
        ));

        // A directory watched both directly and through its parent: backends
        // report its deletion once, against the parent. The directory's own
        // watch is notified here.
        if action == Action::Delete {
            if let Some(second) = self
                .registry
                .handle_for(&new_path)
                .filter(|other| *other != handle)
            {
                events.push(NormalizedEvent::new(
                    EventKind::normalize(action, true),
                    second,
                    new_path,
                    old_path,
                ));
            }
        }

        for event in events {
            trace!(kind = %event.kind, handle = %event.handle, path = %event.new_path.display(), "delivering");
            if let Err(e) = self.sender.deliver(event, &self.stop_requested) {
                debug!("discarding event: {}", e);
                break;
            }
        }
    }
}

impl FileActionListener for EventListener {
    fn handle_file_action(
        &self,
        handle: WatchHandle,
        dir: &Path,
        filename: &OsStr,
        action: Action,
        old_filename: Option<&OsStr>,
    ) {
        self.dispatch(handle, dir, filename, action, old_filename);
    }
}

/// Whether a notification describes activity from before the watch started
///
/// Creations must have matching birth and modification seconds (otherwise
/// the file was written since it was created) and a birth time after
/// `started_at`; modifications must have an mtime after `started_at`. A
/// missing file is only expected for deletions.
fn predates_watch(path: &Path, action: Action, started_at: SystemTime) -> bool {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(_) => return action != Action::Delete,
    };

    match action {
        Action::Add => {
            let (Ok(born), Ok(modified)) = (metadata.created(), metadata.modified()) else {
                return false;
            };
            whole_seconds(born) != whole_seconds(modified) || predates(born, started_at)
        }
        Action::Modified => metadata
            .modified()
            .map(|modified| predates(modified, started_at))
            .unwrap_or(false),
        Action::Delete | Action::Moved => false,
    }
}

/// Compare at microsecond resolution
fn predates(file_time: SystemTime, started_at: SystemTime) -> bool {
    micros(file_time) < micros(started_at)
}

fn micros(time: SystemTime) -> u128 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros())
        .unwrap_or(0)
}

fn whole_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

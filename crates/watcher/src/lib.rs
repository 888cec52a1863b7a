//! File change notifications for Pathwatcher
//!
//! This crate provides the engine callers interact with:
//! - `PathWatcher`: register/unregister watches, one consumer per engine
//! - A coalescing backend multiplexing every watch onto one native stream
//! - A generic backend with one native watch per path
//! - TOML configuration
//!
//! The first `watch` on an idle engine starts a backend session; the
//! `unwatch` that removes the last watch tears it down. Handles stay unique
//! across sessions of one engine.

pub mod coalesce;
pub mod config;
pub mod platform;

pub use coalesce::CoalescingBackend;
pub use config::{BackendKind, ConfigError, WatcherConfig};
pub use pathwatcher_core::{
    Action, DiagnosticsSnapshot, EventKind, EventReceiver, NormalizedEvent, WatchError,
    WatchHandle,
};
pub use platform::GenericBackend;

use parking_lot::Mutex;
use pathwatcher_core::delivery::{self, EventSender};
use pathwatcher_core::path::normalize_watch_path;
use pathwatcher_core::{Backend, EventListener, WatchRegistry, WatchedPath};
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info};

/// One backend plus the listener feeding the consumer
struct Session {
    listener: Arc<EventListener>,
    backend: Box<dyn Backend>,
}

impl Session {
    /// Remove every watch from the backend, stop the listener, then release
    /// the backend
    fn teardown(self) {
        self.listener.stop_with(self.backend.as_ref());
        let name = self.backend.name();
        drop(self.backend);
        debug!(backend = name, "session torn down");
    }
}

/// Native file-change notification engine
pub struct PathWatcher {
    config: WatcherConfig,
    /// Lives as long as the engine so handles are never reused
    registry: Arc<WatchRegistry>,
    consumer: Mutex<Option<EventSender>>,
    session: Mutex<Option<Session>>,
}

impl PathWatcher {
    pub fn new(config: WatcherConfig) -> Self {
        Self {
            config,
            registry: Arc::new(WatchRegistry::new()),
            consumer: Mutex::new(None),
            session: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Install the single consumer and return its receiving end
    pub fn subscribe(&self) -> Result<EventReceiver, WatchError> {
        let mut consumer = self.consumer.lock();
        if consumer.is_some() {
            return Err(WatchError::ConsumerAlreadySet);
        }

        let (tx, rx) = delivery::channel(self.config.delivery_capacity.max(1));
        *consumer = Some(tx.with_poll_interval(self.config.delivery_poll_interval()));
        Ok(rx)
    }

    /// Start watching `path`
    ///
    /// `path` must be absolute; trailing separators are ignored. A path can
    /// only be watched once at a time.
    pub fn watch(&self, path: &Path, recursive: bool) -> Result<WatchHandle, WatchError> {
        // Taken before anything else so the pre-watch filter errs towards delivery
        let started_at = SystemTime::now();
        let path = normalize_watch_path(path)?;

        let sender = self
            .consumer
            .lock()
            .clone()
            .ok_or(WatchError::NoConsumer)?;

        let mut session = self.session.lock();
        let active: &Session = match &mut *session {
            Some(active) => active,
            idle @ None => idle.insert(self.start_session(sender, &path)?),
        };

        let result = self.register(active, &path, recursive, started_at);
        if result.is_err() && self.registry.is_empty() {
            // Nothing else is watched; don't keep OS resources around
            if let Some(idle) = session.take() {
                idle.teardown();
            }
        }
        result
    }

    fn start_session(&self, sender: EventSender, path: &Path) -> Result<Session, WatchError> {
        let backend = platform::create_backend(&self.config, path)?;
        let filter = self
            .config
            .filter_pre_watch_events
            .unwrap_or_else(|| backend.reports_pre_watch_activity());

        let listener = EventListener::new(self.registry.clone(), sender).with_pre_watch_filter(filter);
        info!(backend = backend.name(), filter_pre_watch = filter, "session started");

        Ok(Session {
            listener: Arc::new(listener),
            backend,
        })
    }

    fn register(
        &self,
        session: &Session,
        path: &Path,
        recursive: bool,
        started_at: SystemTime,
    ) -> Result<WatchHandle, WatchError> {
        if recursive && !session.backend.supports_recursive() {
            return Err(WatchError::RecursiveUnsupported {
                backend: session.backend.name(),
            });
        }

        if let Some(handle) = self.registry.handle_for(path) {
            return Err(WatchError::AlreadyWatched {
                path: path.to_path_buf(),
                handle,
            });
        }

        let handle = self.registry.allocate();
        session
            .backend
            .add_watch(handle, path, recursive, session.listener.clone())?;
        session.listener.add_path(
            WatchedPath::new(path, started_at).recursive(recursive),
            handle,
        );

        debug!(%handle, path = %path.display(), "watching");
        Ok(handle)
    }

    /// Stop watching `handle`; unknown handles are ignored
    ///
    /// Nothing new is normalized for `handle` once this returns; an event
    /// already mid hand-off may still arrive.
    pub fn unwatch(&self, handle: WatchHandle) {
        let mut session = self.session.lock();
        let Some(active) = session.as_ref() else {
            return;
        };
        if self.registry.get(handle).is_none() {
            return;
        }

        active.backend.remove_watch(handle);
        active.listener.remove_path(handle);
        debug!(%handle, "unwatched");

        if active.listener.is_empty() {
            if let Some(idle) = session.take() {
                idle.teardown();
            }
        }
    }

    /// Whether any watch is active
    pub fn is_watching(&self) -> bool {
        !self.registry.is_empty()
    }

    pub fn watch_count(&self) -> usize {
        self.registry.len()
    }

    /// Name of the running backend, if a session is active
    pub fn backend_name(&self) -> Option<&'static str> {
        self.session.lock().as_ref().map(|s| s.backend.name())
    }

    /// Counters of the running backend
    pub fn diagnostics(&self) -> Option<DiagnosticsSnapshot> {
        self.session.lock().as_ref().map(|s| s.backend.diagnostics())
    }
}

impl Default for PathWatcher {
    fn default() -> Self {
        Self::new(WatcherConfig::default())
    }
}

impl Drop for PathWatcher {
    fn drop(&mut self) {
        if let Some(session) = self.session.lock().take() {
            session.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn engine(kind: BackendKind) -> PathWatcher {
        PathWatcher::new(WatcherConfig::default().with_backend(kind))
    }

    #[test]
    fn test_watch_requires_consumer() {
        let temp_dir = TempDir::new().unwrap();
        let watcher = engine(BackendKind::Generic);
        let err = watcher.watch(temp_dir.path(), false).unwrap_err();
        assert!(matches!(err, WatchError::NoConsumer));
        assert!(watcher.backend_name().is_none());
    }

    #[test]
    fn test_single_consumer() {
        let watcher = engine(BackendKind::Generic);
        let _rx = watcher.subscribe().unwrap();
        assert!(matches!(
            watcher.subscribe(),
            Err(WatchError::ConsumerAlreadySet)
        ));
    }

    #[test]
    fn test_relative_path_rejected() {
        let watcher = engine(BackendKind::Generic);
        let _rx = watcher.subscribe().unwrap();
        let err = watcher.watch(Path::new("relative/dir"), false).unwrap_err();
        assert!(matches!(err, WatchError::InvalidPath { .. }));
        assert_eq!(err.sentinel(), -1);
    }

    #[test]
    fn test_duplicate_path_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let watcher = engine(BackendKind::Generic);
        let _rx = watcher.subscribe().unwrap();

        let handle = watcher.watch(temp_dir.path(), false).unwrap();
        let mut with_slash = temp_dir.path().as_os_str().to_os_string();
        with_slash.push("/");
        let err = watcher.watch(Path::new(&with_slash), false).unwrap_err();

        assert!(matches!(err, WatchError::AlreadyWatched { handle: h, .. } if h == handle));
        assert_eq!(watcher.watch_count(), 1);
    }

    #[test]
    fn test_session_lifecycle_and_unique_handles() {
        let temp_dir = TempDir::new().unwrap();
        let watcher = engine(BackendKind::Generic);
        let _rx = watcher.subscribe().unwrap();

        let first = watcher.watch(temp_dir.path(), false).unwrap();
        assert_eq!(watcher.backend_name(), Some("generic"));

        watcher.unwatch(WatchHandle::from_raw(999));
        assert!(watcher.is_watching());

        watcher.unwatch(first);
        assert!(!watcher.is_watching());
        assert!(watcher.backend_name().is_none());

        let second = watcher.watch(temp_dir.path(), false).unwrap();
        assert_ne!(first, second);
        assert_eq!(watcher.backend_name(), Some("generic"));
    }

    #[test]
    fn test_recursive_rejected_by_coalescing_backend() {
        let temp_dir = TempDir::new().unwrap();
        let watcher = engine(BackendKind::Coalescing);
        let _rx = watcher.subscribe().unwrap();

        let err = watcher.watch(temp_dir.path(), true).unwrap_err();
        assert!(matches!(err, WatchError::RecursiveUnsupported { .. }));
        // The failed first watch doesn't leave a session behind
        assert!(watcher.backend_name().is_none());
    }

    #[test]
    fn test_registration_failure_surfaces_os_error() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing");
        let watcher = engine(BackendKind::Generic);
        let _rx = watcher.subscribe().unwrap();

        let err = watcher.watch(&missing, false).unwrap_err();
        assert!(matches!(err, WatchError::Registration { .. }));
        assert!(!watcher.is_watching());
        assert!(watcher.backend_name().is_none());
    }
}

//! Coalescing backend
//!
//! Runs exactly one native stream over the union of every watched path and
//! does the per-watch routing in process. The stream is rebuilt on every
//! registration change: the new stream is started first and only swapped in
//! once it runs, so a failed rebuild leaves the previous stream untouched.
//!
//! A dedicated dispatch thread drains the stream's channel into batches
//! (one latency window at a time), routes each batch, and calls listeners
//! outside the route lock. Destruction raises `pending_destruction`, waits
//! for the in-flight batch to finish, then releases the stream.

pub mod flags;
pub mod notify_stream;
pub mod router;
pub mod stream;

pub use flags::{RawFlags, RawNotification};
pub use notify_stream::NotifyStreamFactory;
pub use router::{FileAction, Routes};
pub use stream::{BatchSender, NativeStream, StreamError, StreamFactory};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::{Condvar, Mutex};
use pathwatcher_core::path::path_exists;
use pathwatcher_core::{
    Backend, BackendDiagnostics, DiagnosticsSnapshot, FileActionListener, WatchError, WatchHandle,
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// How often an idle dispatch thread checks whether it should exit
const IDLE_POLL: Duration = Duration::from_millis(100);

/// FSEvents reports names in decomposed form
const PRECOMPOSE_NAMES: bool = cfg!(target_os = "macos");

/// State shared between the backend handle and its dispatch thread
struct Shared {
    routes: Mutex<Routes>,
    /// Cleared once destruction has waited out the in-flight batch
    valid: AtomicBool,
    /// Set first thing in destruction
    pending_destruction: AtomicBool,
    /// Raised while one batch is being handled
    processing: Mutex<bool>,
    processing_done: Condvar,
    diagnostics: BackendDiagnostics,
}

impl Shared {
    fn accepting(&self) -> bool {
        self.valid.load(Ordering::Acquire) && !self.pending_destruction.load(Ordering::Acquire)
    }

    /// Block until no batch is being handled
    fn wait_idle(&self) {
        let mut processing = self.processing.lock();
        while *processing {
            self.processing_done.wait(&mut processing);
        }
    }
}

/// Holds the processing flag for one batch; released on every exit path
struct ProcessingGuard<'a> {
    shared: &'a Shared,
}

impl<'a> ProcessingGuard<'a> {
    fn acquire(shared: &'a Shared) -> Option<Self> {
        let mut processing = shared.processing.lock();
        if *processing {
            return None;
        }
        *processing = true;
        Some(Self { shared })
    }
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        *self.shared.processing.lock() = false;
        self.shared.processing_done.notify_all();
    }
}

/// Backend multiplexing every watch onto one native stream
pub struct CoalescingBackend {
    shared: Arc<Shared>,
    factory: Box<dyn StreamFactory>,
    /// Active stream; locked only for the swap
    stream: Mutex<Option<Box<dyn NativeStream>>>,
    /// Serializes whole rebuilds against each other
    rebuild_lock: Mutex<()>,
    batch_tx: BatchSender,
    dispatcher: Option<JoinHandle<()>>,
}

impl CoalescingBackend {
    /// Backend over `notify` streams
    pub fn new(latency: Duration) -> Self {
        Self::with_factory(Box::new(NotifyStreamFactory::new()), latency)
    }

    /// Backend over streams built by `factory`
    pub fn with_factory(factory: Box<dyn StreamFactory>, latency: Duration) -> Self {
        let shared = Arc::new(Shared {
            routes: Mutex::new(Routes::default()),
            valid: AtomicBool::new(true),
            pending_destruction: AtomicBool::new(false),
            processing: Mutex::new(false),
            processing_done: Condvar::new(),
            diagnostics: BackendDiagnostics::default(),
        });

        let (batch_tx, batch_rx) = crossbeam_channel::unbounded();
        let dispatcher = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("pathwatcher-dispatch".into())
                .spawn(move || dispatch_loop(shared, batch_rx, latency))
        };

        let dispatcher = match dispatcher {
            Ok(handle) => Some(handle),
            Err(e) => {
                // Without a dispatcher nothing is ever delivered; registration still works
                warn!("failed to spawn dispatch thread: {}", e);
                None
            }
        };

        Self {
            shared,
            factory,
            stream: Mutex::new(None),
            rebuild_lock: Mutex::new(()),
            batch_tx,
            dispatcher,
        }
    }

    /// Start a stream over the current watch set and swap it in
    ///
    /// With no watches left the active stream is simply stopped. Paths the
    /// OS refuses are skipped, except `required`: refusing the path being
    /// added fails the rebuild and keeps the previous stream.
    fn rebuild(&self, required: Option<&Path>) -> Result<(), StreamError> {
        let paths = self.shared.routes.lock().paths();

        let next = if paths.is_empty() {
            None
        } else {
            let mut stream = self.factory.start(&paths, self.batch_tx.clone())?;
            for refused in stream.take_refused() {
                if required.is_some() && refused.path() == required {
                    if let Err(e) = stream.stop() {
                        warn!("failed to release rejected stream: {}", e);
                    }
                    return Err(refused);
                }
                debug!("skipping watched path: {}", refused);
                self.shared.diagnostics.record_skipped_path();
            }
            self.shared.diagnostics.record_stream_start();
            Some(stream)
        };

        let previous = std::mem::replace(&mut *self.stream.lock(), next);
        if let Some(mut previous) = previous {
            if let Err(e) = previous.stop() {
                warn!("failed to release previous stream: {}", e);
            }
        }

        debug!(paths = paths.len(), "stream rebuilt");
        Ok(())
    }
}

impl Backend for CoalescingBackend {
    fn name(&self) -> &'static str {
        "coalescing"
    }

    fn supports_recursive(&self) -> bool {
        false
    }

    fn reports_pre_watch_activity(&self) -> bool {
        cfg!(target_os = "macos")
    }

    fn add_watch(
        &self,
        handle: WatchHandle,
        path: &Path,
        recursive: bool,
        listener: Arc<dyn FileActionListener>,
    ) -> Result<(), WatchError> {
        if recursive {
            return Err(WatchError::RecursiveUnsupported {
                backend: self.name(),
            });
        }

        let _rebuild = self.rebuild_lock.lock();
        self.shared
            .routes
            .lock()
            .insert(handle, path.to_path_buf(), listener);

        if let Err(e) = self.rebuild(Some(path)) {
            self.shared.routes.lock().remove(handle);
            warn!(path = %path.display(), "stream rebuild failed: {}", e);
            return Err(WatchError::Registration {
                path: path.to_path_buf(),
                code: e.os_code(),
                message: e.to_string(),
            });
        }

        info!(%handle, path = %path.display(), "watch added");
        Ok(())
    }

    fn remove_watch(&self, handle: WatchHandle) {
        let _rebuild = self.rebuild_lock.lock();
        {
            let mut routes = self.shared.routes.lock();
            if !routes.contains(handle) {
                return;
            }
            routes.remove(handle);
        }

        if let Err(e) = self.rebuild(None) {
            // The old stream keeps running; the route is gone, so its
            // notifications for this path are unmatched from here on
            warn!(%handle, "stream rebuild after removal failed: {}", e);
        }
        info!(%handle, "watch removed");
    }

    fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.shared.diagnostics.snapshot()
    }
}

impl Drop for CoalescingBackend {
    fn drop(&mut self) {
        self.shared.pending_destruction.store(true, Ordering::Release);

        // Let the batch in flight finish before its resources go away
        self.shared.wait_idle();
        self.shared.valid.store(false, Ordering::Release);

        if let Some(mut stream) = self.stream.lock().take() {
            if let Err(e) = stream.stop() {
                warn!("failed to release stream during teardown: {}", e);
            }
        }

        if let Some(dispatcher) = self.dispatcher.take() {
            if dispatcher.join().is_err() {
                warn!("dispatch thread panicked");
            }
        }
        debug!("coalescing backend released");
    }
}

fn dispatch_loop(shared: Arc<Shared>, rx: Receiver<Vec<RawNotification>>, latency: Duration) {
    loop {
        let mut batch = match rx.recv_timeout(IDLE_POLL) {
            Ok(batch) => batch,
            Err(RecvTimeoutError::Timeout) => {
                if !shared.accepting() {
                    break;
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };

        // Everything arriving within one latency window is one batch
        let deadline = Instant::now() + latency;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(more) => batch.extend(more),
                Err(_) => break,
            }
        }

        if !shared.accepting() {
            break;
        }
        process_batch(&shared, &batch);
    }
    trace!("dispatch thread exiting");
}

fn process_batch(shared: &Shared, batch: &[RawNotification]) {
    let Some(_guard) = ProcessingGuard::acquire(shared) else {
        return;
    };
    // Destruction may have started between the dispatcher's check and the guard
    if !shared.accepting() {
        return;
    }

    shared.diagnostics.record_batch(batch.len());

    let (plan, calls) = {
        let routes = shared.routes.lock();
        let plan = router::route_batch(&routes, batch, path_exists);
        let calls = with_listeners(&routes, plan.actions.clone());
        (plan, calls)
    };

    for _ in 0..plan.unmatched {
        shared.diagnostics.record_unmatched();
    }
    if plan.dropped_signals > 0 {
        for _ in 0..plan.dropped_signals {
            shared.diagnostics.record_dropped_signal();
        }
        warn!(
            signals = plan.dropped_signals,
            "native stream dropped events; changes may be missing"
        );
    }

    if !deliver(shared, calls) {
        return;
    }

    if plan.changed_dirs.is_empty() {
        return;
    }

    let calls = {
        let routes = shared.routes.lock();
        let aggregated = router::aggregate(&routes, &plan.changed_dirs, &plan.actions);
        with_listeners(&routes, aggregated)
    };
    deliver(shared, calls);
}

fn with_listeners(
    routes: &Routes,
    actions: Vec<FileAction>,
) -> Vec<(Arc<dyn FileActionListener>, FileAction)> {
    actions
        .into_iter()
        .filter_map(|action| {
            let listener = routes.listener(action.handle)?;
            let action = if PRECOMPOSE_NAMES {
                action.precomposed()
            } else {
                action
            };
            Some((listener, action))
        })
        .collect()
}

/// Call listeners in order; false if destruction started midway
fn deliver(shared: &Shared, calls: Vec<(Arc<dyn FileActionListener>, FileAction)>) -> bool {
    for (listener, action) in calls {
        if shared.pending_destruction.load(Ordering::Acquire) {
            return false;
        }
        listener.handle_file_action(
            action.handle,
            &action.dir,
            &action.filename,
            action.action,
            action.old_filename.as_deref(),
        );
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use pathwatcher_core::Action;
    use std::ffi::{OsStr, OsString};
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    const LATENCY: Duration = Duration::from_millis(5);
    const SETTLE: Duration = Duration::from_millis(300);

    /// Stream factory driven by the test through the captured sender
    #[derive(Clone, Default)]
    struct Scripted {
        sink: Arc<Mutex<Option<BatchSender>>>,
        started: Arc<Mutex<Vec<Vec<PathBuf>>>>,
        stopped: Arc<AtomicUsize>,
        fail_next: Arc<AtomicBool>,
        /// Paths the OS would refuse, as if they had been deleted
        refuse: Arc<Mutex<Vec<PathBuf>>>,
    }

    impl Scripted {
        fn send(&self, batch: Vec<RawNotification>) {
            let sink = self.sink.lock().clone().expect("stream not started");
            sink.send(batch).unwrap();
        }
    }

    struct ScriptedStream {
        stopped: Arc<AtomicUsize>,
        refused: Vec<StreamError>,
    }

    impl NativeStream for ScriptedStream {
        fn stop(&mut self) -> Result<(), StreamError> {
            self.stopped.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn take_refused(&mut self) -> Vec<StreamError> {
            std::mem::take(&mut self.refused)
        }
    }

    impl StreamFactory for Scripted {
        fn start(
            &self,
            paths: &[PathBuf],
            sink: BatchSender,
        ) -> Result<Box<dyn NativeStream>, StreamError> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(StreamError::Native(notify::Error::generic("refused")));
            }
            let refuse = self.refuse.lock().clone();
            let refused = paths
                .iter()
                .filter(|path| refuse.contains(*path))
                .map(|path| StreamError::Path {
                    path: path.clone(),
                    source: notify::Error::path_not_found().add_path(path.clone()),
                })
                .collect();
            self.started.lock().push(paths.to_vec());
            *self.sink.lock() = Some(sink);
            Ok(Box::new(ScriptedStream {
                stopped: self.stopped.clone(),
                refused,
            }))
        }
    }

    type Call = (WatchHandle, PathBuf, OsString, Action, Option<OsString>);

    /// Records calls; optionally sleeps inside each call
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<Call>>,
        delay: Option<Duration>,
    }

    impl FileActionListener for Recorder {
        fn handle_file_action(
            &self,
            handle: WatchHandle,
            dir: &Path,
            filename: &OsStr,
            action: Action,
            old_filename: Option<&OsStr>,
        ) {
            if let Some(delay) = self.delay {
                thread::sleep(delay);
            }
            self.calls.lock().push((
                handle,
                dir.to_path_buf(),
                filename.to_os_string(),
                action,
                old_filename.map(OsStr::to_os_string),
            ));
        }
    }

    impl Recorder {
        fn wait_for(&self, count: usize) -> Vec<Call> {
            let deadline = Instant::now() + Duration::from_secs(5);
            while self.calls.lock().len() < count && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            thread::sleep(Duration::from_millis(30));
            self.calls.lock().clone()
        }
    }

    fn backend() -> (CoalescingBackend, Scripted) {
        let scripted = Scripted::default();
        let backend = CoalescingBackend::with_factory(Box::new(scripted.clone()), LATENCY);
        (backend, scripted)
    }

    fn h(raw: i32) -> WatchHandle {
        WatchHandle::from_raw(raw)
    }

    #[test]
    fn test_child_create_routed_to_parent_watch() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().to_path_buf();
        std::fs::write(dir.join("x.txt"), b"x").unwrap();

        let (backend, scripted) = backend();
        let recorder = Arc::new(Recorder::default());
        backend.add_watch(h(1), &dir, false, recorder.clone()).unwrap();

        scripted.send(vec![RawNotification::new(
            dir.join("x.txt"),
            RawFlags::ITEM_CREATED | RawFlags::IS_FILE,
            1,
        )]);

        let calls = recorder.wait_for(1);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, h(1));
        assert_eq!(calls[0].1, dir);
        assert_eq!(calls[0].2, OsString::from("x.txt"));
        assert_eq!(calls[0].3, Action::Add);
    }

    #[test]
    fn test_stale_create_filtered_by_disk_state() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().to_path_buf();

        let (backend, scripted) = backend();
        let recorder = Arc::new(Recorder::default());
        backend.add_watch(h(1), &dir, false, recorder.clone()).unwrap();

        scripted.send(vec![RawNotification::new(dir.join("ghost"), RawFlags::ITEM_CREATED, 1)]);

        thread::sleep(SETTLE);
        assert!(recorder.calls.lock().is_empty());
    }

    #[test]
    fn test_same_dir_rename_single_action() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().to_path_buf();
        std::fs::write(dir.join("y.txt"), b"y").unwrap();

        let (backend, scripted) = backend();
        let recorder = Arc::new(Recorder::default());
        backend.add_watch(h(1), &dir, false, recorder.clone()).unwrap();

        scripted.send(vec![
            RawNotification::new(dir.join("y.txt"), RawFlags::ITEM_RENAMED, 1).with_inode(77),
            RawNotification::new(dir.join("x.txt"), RawFlags::ITEM_RENAMED, 2).with_inode(77),
        ]);

        let calls = recorder.wait_for(1);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].3, Action::Moved);
        assert_eq!(calls[0].2, OsString::from("y.txt"));
        assert_eq!(calls[0].4, Some(OsString::from("x.txt")));
    }

    #[test]
    fn test_cross_dir_move_is_delete_and_create() {
        let temp_dir = TempDir::new().unwrap();
        let a = temp_dir.path().join("a");
        let b = temp_dir.path().join("b");
        std::fs::create_dir(&a).unwrap();
        std::fs::create_dir(&b).unwrap();
        std::fs::write(b.join("x"), b"x").unwrap();

        let (backend, scripted) = backend();
        let recorder = Arc::new(Recorder::default());
        backend.add_watch(h(1), &a, false, recorder.clone()).unwrap();
        backend.add_watch(h(2), &b, false, recorder.clone()).unwrap();

        scripted.send(vec![
            RawNotification::new(a.join("x"), RawFlags::ITEM_RENAMED, 1).with_inode(5),
            RawNotification::new(b.join("x"), RawFlags::ITEM_RENAMED, 2).with_inode(5),
        ]);

        recorder.wait_for(2);
        thread::sleep(SETTLE);
        let calls = recorder.calls.lock().clone();
        let summary: Vec<_> = calls.iter().map(|c| (c.0, c.1.clone(), c.2.clone(), c.3)).collect();
        assert_eq!(
            summary,
            vec![
                (h(1), a.clone(), OsString::from("x"), Action::Delete),
                (h(2), b.clone(), OsString::from("x"), Action::Add),
            ]
        );
    }

    #[test]
    fn test_deleted_watched_child_reported_once_to_parent() {
        let temp_dir = TempDir::new().unwrap();
        let parent = temp_dir.path().to_path_buf();
        let child = parent.join("b");

        let (backend, scripted) = backend();
        let recorder = Arc::new(Recorder::default());
        backend.add_watch(h(1), &parent, false, recorder.clone()).unwrap();
        // Registered even though it no longer exists; the scripted stream doesn't care
        backend.add_watch(h(2), &child, false, recorder.clone()).unwrap();

        // inotify: IN_DELETE|IN_ISDIR from the parent, IN_DELETE_SELF from the child
        scripted.send(vec![
            RawNotification::new(&child, RawFlags::ITEM_REMOVED | RawFlags::IS_DIR, 1),
            RawNotification::new(&child, RawFlags::ITEM_REMOVED | RawFlags::IS_FILE, 2),
        ]);

        recorder.wait_for(1);
        thread::sleep(SETTLE);
        let calls = recorder.calls.lock().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, h(1));
        assert_eq!(calls[0].3, Action::Delete);
    }

    #[test]
    fn test_every_registration_rebuilds_stream() {
        let (backend, scripted) = backend();
        let recorder = Arc::new(Recorder::default());

        backend.add_watch(h(1), Path::new("/a"), false, recorder.clone()).unwrap();
        backend.add_watch(h(2), Path::new("/b"), false, recorder.clone()).unwrap();
        backend.remove_watch(h(1));

        let started = scripted.started.lock().clone();
        assert_eq!(
            started,
            vec![
                vec![PathBuf::from("/a")],
                vec![PathBuf::from("/a"), PathBuf::from("/b")],
                vec![PathBuf::from("/b")],
            ]
        );
        // Each swap released the stream it replaced
        assert_eq!(scripted.stopped.load(Ordering::SeqCst), 2);
        assert_eq!(backend.diagnostics().stream_starts, 3);
    }

    #[test]
    fn test_failed_rebuild_keeps_previous_stream() {
        let (backend, scripted) = backend();
        let recorder = Arc::new(Recorder::default());
        backend.add_watch(h(1), Path::new("/a"), false, recorder.clone()).unwrap();

        scripted.fail_next.store(true, Ordering::SeqCst);
        let err = backend
            .add_watch(h(2), Path::new("/b"), false, recorder.clone())
            .unwrap_err();
        assert!(matches!(err, WatchError::Registration { .. }));

        assert_eq!(scripted.stopped.load(Ordering::SeqCst), 0);
        assert_eq!(backend.shared.routes.lock().paths(), vec![PathBuf::from("/a")]);
    }

    #[test]
    fn test_vanished_watch_does_not_block_registration() {
        let (backend, scripted) = backend();
        let recorder = Arc::new(Recorder::default());
        backend.add_watch(h(1), Path::new("/a"), false, recorder.clone()).unwrap();
        backend.add_watch(h(2), Path::new("/b"), false, recorder.clone()).unwrap();

        // /b is deleted out from under its watch
        scripted.refuse.lock().push(PathBuf::from("/b"));
        backend.add_watch(h(3), Path::new("/c"), false, recorder.clone()).unwrap();
        assert_eq!(backend.shared.routes.lock().len(), 3);

        // Removal still swaps the stream out
        backend.remove_watch(h(1));
        assert_eq!(scripted.stopped.load(Ordering::SeqCst), 3);
        assert_eq!(
            scripted.started.lock().last().cloned(),
            Some(vec![PathBuf::from("/b"), PathBuf::from("/c")])
        );

        let stats = backend.diagnostics();
        assert_eq!(stats.stream_starts, 4);
        assert_eq!(stats.skipped_paths, 2);
    }

    #[test]
    fn test_refused_new_path_fails_registration() {
        let (backend, scripted) = backend();
        let recorder = Arc::new(Recorder::default());
        backend.add_watch(h(1), Path::new("/a"), false, recorder.clone()).unwrap();

        scripted.refuse.lock().push(PathBuf::from("/gone"));
        let err = backend
            .add_watch(h(2), Path::new("/gone"), false, recorder.clone())
            .unwrap_err();
        match err {
            WatchError::Registration { path, message, .. } => {
                assert_eq!(path, PathBuf::from("/gone"));
                assert!(message.contains("/gone"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // The rejected stream was released and the previous one kept
        assert_eq!(scripted.stopped.load(Ordering::SeqCst), 1);
        assert!(backend.stream.lock().is_some());
        assert_eq!(backend.shared.routes.lock().paths(), vec![PathBuf::from("/a")]);
        assert_eq!(backend.diagnostics().stream_starts, 1);
    }

    #[test]
    fn test_removing_last_watch_stops_stream() {
        let (backend, scripted) = backend();
        let recorder = Arc::new(Recorder::default());
        backend.add_watch(h(1), Path::new("/a"), false, recorder).unwrap();

        backend.remove_watch(h(1));
        backend.remove_watch(h(1));
        backend.remove_watch(h(42));

        assert_eq!(scripted.stopped.load(Ordering::SeqCst), 1);
        assert_eq!(scripted.started.lock().len(), 1);
        assert!(backend.stream.lock().is_none());
    }

    #[test]
    fn test_recursive_rejected() {
        let (backend, _scripted) = backend();
        let err = backend
            .add_watch(h(1), Path::new("/a"), true, Arc::new(Recorder::default()))
            .unwrap_err();
        assert!(matches!(err, WatchError::RecursiveUnsupported { .. }));
    }

    #[test]
    fn test_unmatched_and_dropped_counted() {
        let (backend, scripted) = backend();
        let recorder = Arc::new(Recorder::default());
        backend.add_watch(h(1), Path::new("/a"), false, recorder).unwrap();

        scripted.send(vec![
            RawNotification::new("/elsewhere/x", RawFlags::ITEM_MODIFIED, 1),
            RawNotification::new("/a", RawFlags::KERNEL_DROPPED, 2),
        ]);

        let deadline = Instant::now() + Duration::from_secs(5);
        while backend.diagnostics().batches == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        let stats = backend.diagnostics();
        assert_eq!(stats.notifications, 2);
        assert_eq!(stats.unmatched, 1);
        assert_eq!(stats.dropped_signals, 1);
    }

    #[test]
    fn test_drop_waits_for_batch_in_flight() {
        let (backend, scripted) = backend();
        let recorder = Arc::new(Recorder {
            calls: Mutex::new(Vec::new()),
            delay: Some(Duration::from_millis(200)),
        });
        backend.add_watch(h(1), Path::new("/a"), false, recorder.clone()).unwrap();

        scripted.send(vec![RawNotification::new("/a/x", RawFlags::ITEM_MODIFIED, 1)]);

        // Wait for the dispatcher to pick the batch up
        let deadline = Instant::now() + Duration::from_secs(5);
        while !*backend.shared.processing.lock() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }

        let started = Instant::now();
        drop(backend);

        // The slow listener call completed before teardown returned
        assert_eq!(recorder.calls.lock().len(), 1);
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(scripted.stopped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_nothing_dispatched_after_drop() {
        let (backend, scripted) = backend();
        let recorder = Arc::new(Recorder::default());
        backend.add_watch(h(1), Path::new("/a"), false, recorder.clone()).unwrap();
        drop(backend);

        // The dispatcher is gone; the send may fail, and nothing is recorded
        if let Some(sink) = scripted.sink.lock().clone() {
            let _ = sink.send(vec![RawNotification::new("/a/x", RawFlags::ITEM_MODIFIED, 1)]);
        }
        thread::sleep(Duration::from_millis(50));
        assert!(recorder.calls.lock().is_empty());
    }
}

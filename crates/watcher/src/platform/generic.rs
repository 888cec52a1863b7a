//! Generic backend: one native watch per path
//!
//! `notify` already multiplexes many watches over one OS instance, so each
//! registration is a plain `watch()` call. A translator thread turns notify
//! events into listener calls:
//! - Routing: parent-directory watch, then exact path, then (recursive
//!   watches only) the nearest recursive ancestor
//! - Rename halves are stitched by tracker within a short window
//! - A directory watched alongside its parent is reported deleted once,
//!   though the OS signals it from both watches
//! - Access events are ignored
//!
//! Symlinked directories are followed when a recursive watch is set up;
//! notify does this itself while walking the tree.

use crossbeam_channel::{Receiver, RecvTimeoutError};
use dashmap::DashMap;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use pathwatcher_core::path::{file_name, parent_dir, path_exists, paths_equal};
use pathwatcher_core::{
    Action, Backend, BackendDiagnostics, DiagnosticsSnapshot, FileActionListener, WatchError,
    WatchHandle,
};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Trackers remembered after pairing, to ignore notify's trailing `Both`
const CONSUMED_TRACKERS: usize = 64;

struct Route {
    path: PathBuf,
    recursive: bool,
    listener: Arc<dyn FileActionListener>,
}

/// Routing tables shared with the translator thread
#[derive(Default)]
struct RouteTable {
    routes: DashMap<WatchHandle, Route>,
    by_path: DashMap<PathBuf, WatchHandle>,
    diagnostics: BackendDiagnostics,
    stopping: AtomicBool,
}

impl RouteTable {
    fn insert(&self, handle: WatchHandle, route: Route) {
        self.by_path.insert(route.path.clone(), handle);
        self.routes.insert(handle, route);
    }

    fn remove(&self, handle: WatchHandle) -> Option<Route> {
        let (_, route) = self.routes.remove(&handle)?;
        self.by_path.remove_if(&route.path, |_, h| *h == handle);
        Some(route)
    }

    /// Watch responsible for `path` and its listener
    fn resolve(&self, path: &Path) -> Option<(WatchHandle, Arc<dyn FileActionListener>)> {
        let lookup = |key: &Path, recursive_only: bool| {
            let handle = *self.by_path.get(key)?;
            let route = self.routes.get(&handle)?;
            if recursive_only && !route.recursive {
                return None;
            }
            Some((handle, route.listener.clone()))
        };

        if let Some(parent) = path.parent() {
            if let Some(found) = lookup(parent, false) {
                return Some(found);
            }
        }
        if let Some(found) = lookup(path, false) {
            return Some(found);
        }
        path.ancestors()
            .skip(2)
            .find_map(|ancestor| lookup(ancestor, true))
    }

    fn send(&self, path: &Path, action: Action) {
        match self.resolve(path) {
            Some((handle, listener)) => {
                trace!(%handle, path = %path.display(), ?action, "generic action");
                listener.handle_file_action(handle, parent_dir(path), file_name(path), action, None);
            }
            None => self.diagnostics.record_unmatched(),
        }
    }

    fn send_rename(&self, from: &Path, to: &Path) {
        if paths_equal(parent_dir(from), parent_dir(to)) {
            match self.resolve(to) {
                Some((handle, listener)) => listener.handle_file_action(
                    handle,
                    parent_dir(to),
                    file_name(to),
                    Action::Moved,
                    Some(file_name(from)),
                ),
                None => self.diagnostics.record_unmatched(),
            }
        } else {
            self.send(from, Action::Delete);
            self.send(to, Action::Add);
        }
    }
}

/// A `From` half waiting for its `To`
struct PendingRename {
    path: PathBuf,
    tracker: Option<usize>,
    since: Instant,
}

/// Turns notify events into listener calls
struct Translator {
    table: Arc<RouteTable>,
    window: Duration,
    pending: Vec<PendingRename>,
    consumed: VecDeque<usize>,
    /// Deletions already reported, so the second signal for one is dropped
    removed: Vec<(PathBuf, Instant)>,
}

impl Translator {
    fn new(table: Arc<RouteTable>, window: Duration) -> Self {
        Self {
            table,
            window,
            pending: Vec::new(),
            consumed: VecDeque::with_capacity(CONSUMED_TRACKERS),
            removed: Vec::new(),
        }
    }

    fn handle(&mut self, event: Event) {
        self.table.diagnostics.record_batch(1);

        if event.need_rescan() {
            self.table.diagnostics.record_dropped_signal();
            warn!("notify requested a rescan; changes may be missing");
            return;
        }

        let tracker = event.tracker();
        match event.kind {
            EventKind::Create(_) => {
                for path in &event.paths {
                    self.removed.retain(|(removed, _)| removed != path);
                    self.table.send(path, Action::Add);
                }
            }
            EventKind::Remove(_) => {
                for path in &event.paths {
                    let window = self.window;
                    let reported = self
                        .removed
                        .iter()
                        .any(|(removed, since)| removed == path && since.elapsed() < window);
                    if reported {
                        trace!(path = %path.display(), "deletion already reported");
                        continue;
                    }
                    self.removed.push((path.clone(), Instant::now()));
                    self.table.send(path, Action::Delete);
                }
            }
            EventKind::Modify(ModifyKind::Name(mode)) => self.rename(mode, tracker, &event.paths),
            EventKind::Modify(_) | EventKind::Any => {
                for path in &event.paths {
                    self.table.send(path, Action::Modified);
                }
            }
            EventKind::Access(_) | EventKind::Other => {}
        }
    }

    fn rename(&mut self, mode: RenameMode, tracker: Option<usize>, paths: &[PathBuf]) {
        match mode {
            RenameMode::From => {
                for path in paths {
                    self.pending.push(PendingRename {
                        path: path.clone(),
                        tracker,
                        since: Instant::now(),
                    });
                }
            }
            RenameMode::To => {
                for path in paths {
                    let partner = tracker.and_then(|t| {
                        let idx = self.pending.iter().position(|p| p.tracker == Some(t))?;
                        Some(self.pending.remove(idx))
                    });
                    match partner {
                        Some(from) => {
                            self.remember(tracker);
                            self.table.send_rename(&from.path, path);
                        }
                        // Moved in from outside every watch
                        None => self.table.send(path, Action::Add),
                    }
                }
            }
            RenameMode::Both => {
                if tracker.is_some_and(|t| self.consumed.contains(&t)) {
                    return;
                }
                if let [from, to] = paths {
                    if let Some(t) = tracker {
                        self.pending.retain(|p| p.tracker != Some(t));
                        self.remember(tracker);
                    }
                    self.table.send_rename(from, to);
                }
            }
            RenameMode::Any | RenameMode::Other => {
                for path in paths {
                    let action = if path_exists(path) {
                        Action::Add
                    } else {
                        Action::Delete
                    };
                    self.table.send(path, action);
                }
            }
        }
    }

    fn remember(&mut self, tracker: Option<usize>) {
        if let Some(t) = tracker {
            if self.consumed.len() == CONSUMED_TRACKERS {
                self.consumed.pop_front();
            }
            self.consumed.push_back(t);
        }
    }

    /// Report `From` halves whose partner never came as deletions
    fn expire(&mut self, now: Instant) {
        let window = self.window;
        let (expired, waiting): (Vec<_>, Vec<_>) = self
            .pending
            .drain(..)
            .partition(|p| now.duration_since(p.since) >= window);
        self.pending = waiting;
        for rename in expired {
            self.table.send(&rename.path, Action::Delete);
        }
        self.removed
            .retain(|(_, since)| now.duration_since(*since) < window);
    }

    /// Time until the oldest pending half expires
    fn next_deadline(&self, idle: Duration) -> Duration {
        self.pending
            .iter()
            .map(|p| (p.since + self.window).saturating_duration_since(Instant::now()))
            .min()
            .unwrap_or(idle)
    }
}

fn translate_loop(rx: Receiver<notify::Result<Event>>, mut translator: Translator) {
    const IDLE: Duration = Duration::from_millis(100);

    loop {
        match rx.recv_timeout(translator.next_deadline(IDLE)) {
            Ok(Ok(event)) => translator.handle(event),
            Ok(Err(e)) => warn!("notify error: {}", e),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if translator.table.stopping.load(Ordering::Acquire) {
            break;
        }
        translator.expire(Instant::now());
    }
    trace!("translator thread exiting");
}

/// Backend over one `notify` watcher
pub struct GenericBackend {
    watcher: Mutex<Option<RecommendedWatcher>>,
    table: Arc<RouteTable>,
    translator: Option<JoinHandle<()>>,
}

impl GenericBackend {
    /// `rename_window` bounds how long a rename's first half waits for its partner
    pub fn new(rename_window: Duration) -> notify::Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            let _ = tx.send(result);
        })?;

        let table = Arc::new(RouteTable::default());
        table.diagnostics.record_stream_start();

        let translator = Translator::new(table.clone(), rename_window);
        let translator = thread::Builder::new()
            .name("pathwatcher-generic".into())
            .spawn(move || translate_loop(rx, translator))
            .map_err(notify::Error::io)?;

        Ok(Self {
            watcher: Mutex::new(Some(watcher)),
            table,
            translator: Some(translator),
        })
    }
}

impl Backend for GenericBackend {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn supports_recursive(&self) -> bool {
        true
    }

    fn add_watch(
        &self,
        handle: WatchHandle,
        path: &Path,
        recursive: bool,
        listener: Arc<dyn FileActionListener>,
    ) -> Result<(), WatchError> {
        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };

        // Route first so nothing the OS reports right after watch() is lost
        self.table.insert(
            handle,
            Route {
                path: path.to_path_buf(),
                recursive,
                listener,
            },
        );

        let mut watcher = self.watcher.lock();
        let result = match watcher.as_mut() {
            Some(watcher) => watcher.watch(path, mode),
            None => Err(notify::Error::generic("backend is shutting down")),
        };

        if let Err(e) = result {
            self.table.remove(handle);
            return Err(super::registration_error(path, &e));
        }

        info!(%handle, path = %path.display(), recursive, "watch added");
        Ok(())
    }

    fn remove_watch(&self, handle: WatchHandle) {
        let Some(route) = self.table.remove(handle) else {
            return;
        };

        if let Some(watcher) = self.watcher.lock().as_mut() {
            if let Err(e) = watcher.unwatch(&route.path) {
                // The OS drops watches on its own when the directory goes away
                debug!(%handle, path = %route.path.display(), "unwatch failed: {}", e);
            }
        }
        info!(%handle, "watch removed");
    }

    fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.table.diagnostics.snapshot()
    }
}

impl Drop for GenericBackend {
    fn drop(&mut self) {
        self.table.stopping.store(true, Ordering::Release);
        drop(self.watcher.lock().take());

        if let Some(translator) = self.translator.take() {
            if translator.join().is_err() {
                warn!("translator thread panicked");
            }
        }
        debug!("generic backend released");
    }
}

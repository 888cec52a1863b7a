//! Native stream backed by `notify`
//!
//! One `RecommendedWatcher` over the whole watched set: a single FSEvents
//! stream on macOS, a single inotify instance on Linux. Notify events are
//! translated into FSEvents-style raw notifications. Rename halves carry
//! the notify rename tracker as their pairing key.

use super::flags::{RawFlags, RawNotification};
use super::stream::{BatchSender, NativeStream, StreamError, StreamFactory};
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Keys for split two-path renames, kept clear of real tracker values
const SYNTHETIC_KEY_BASE: u64 = 1 << 63;

/// Builds `notify`-backed streams
#[derive(Debug, Default)]
pub struct NotifyStreamFactory {
    /// Sequence ids shared by every stream this factory starts
    next_id: Arc<AtomicU64>,
}

impl NotifyStreamFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamFactory for NotifyStreamFactory {
    fn start(
        &self,
        paths: &[PathBuf],
        sink: BatchSender,
    ) -> Result<Box<dyn NativeStream>, StreamError> {
        let ids = self.next_id.clone();
        let handler = move |result: notify::Result<Event>| match result {
            Ok(event) => {
                let raws = translate(&event, &ids);
                if !raws.is_empty() {
                    // Dispatcher gone means the backend is shutting down
                    let _ = sink.send(raws);
                }
            }
            Err(e) => warn!("native stream error: {}", e),
        };

        let mut watcher = notify::recommended_watcher(handler)?;
        let mut refused = Vec::new();
        for path in paths {
            if let Err(source) = watcher.watch(path, RecursiveMode::NonRecursive) {
                debug!(path = %path.display(), "path refused by native stream: {}", source);
                refused.push(StreamError::Path {
                    path: path.clone(),
                    source,
                });
            }
        }

        debug!(
            paths = paths.len(),
            refused = refused.len(),
            "native stream started"
        );
        Ok(Box::new(NotifyStream {
            watcher: Some(watcher),
            refused,
        }))
    }
}

struct NotifyStream {
    watcher: Option<RecommendedWatcher>,
    refused: Vec<StreamError>,
}

impl NativeStream for NotifyStream {
    fn take_refused(&mut self) -> Vec<StreamError> {
        std::mem::take(&mut self.refused)
    }

    fn stop(&mut self) -> Result<(), StreamError> {
        if let Some(watcher) = self.watcher.take() {
            drop(watcher);
            debug!("native stream stopped");
        }
        Ok(())
    }
}

impl Drop for NotifyStream {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Translate one notify event into raw notifications
pub(crate) fn translate(event: &Event, ids: &AtomicU64) -> Vec<RawNotification> {
    let next_id = || ids.fetch_add(1, Ordering::Relaxed);

    if event.need_rescan() {
        let path = event.paths.first().cloned().unwrap_or_default();
        return vec![RawNotification::new(
            path,
            RawFlags::USER_DROPPED | RawFlags::MUST_SCAN_SUBDIRS,
            next_id(),
        )];
    }

    let tracker = event.tracker().map(|t| t as u64);

    let flags = match &event.kind {
        EventKind::Create(kind) => RawFlags::ITEM_CREATED | kind_flags_create(*kind),
        EventKind::Remove(kind) => RawFlags::ITEM_REMOVED | kind_flags_remove(*kind),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            // With a tracker the halves were already reported as From/To
            if tracker.is_some() || event.paths.len() != 2 {
                return Vec::new();
            }
            let id = next_id();
            let key = SYNTHETIC_KEY_BASE | id;
            return event
                .paths
                .iter()
                .map(|path| {
                    RawNotification::new(path.clone(), RawFlags::ITEM_RENAMED, id).with_inode(key)
                })
                .collect();
        }
        EventKind::Modify(ModifyKind::Name(_)) => RawFlags::ITEM_RENAMED,
        EventKind::Modify(ModifyKind::Metadata(_)) => RawFlags::INODE_META_MOD,
        EventKind::Modify(_) | EventKind::Any => RawFlags::ITEM_MODIFIED,
        EventKind::Access(_) | EventKind::Other => {
            trace!(?event.kind, "ignoring notify event");
            return Vec::new();
        }
    };

    event
        .paths
        .iter()
        .map(|path| {
            let raw = RawNotification::new(path.clone(), flags, next_id());
            match tracker {
                Some(key) if flags.is_rename() => raw.with_inode(key),
                _ => raw,
            }
        })
        .collect()
}

fn kind_flags_create(kind: CreateKind) -> RawFlags {
    match kind {
        CreateKind::File => RawFlags::IS_FILE,
        CreateKind::Folder => RawFlags::IS_DIR,
        _ => RawFlags::empty(),
    }
}

fn kind_flags_remove(kind: RemoveKind) -> RawFlags {
    match kind {
        RemoveKind::File => RawFlags::IS_FILE,
        RemoveKind::Folder => RawFlags::IS_DIR,
        _ => RawFlags::empty(),
    }
}

//! Batch routing for the coalescing backend
//!
//! Turns one batch of raw notifications into per-watch file actions:
//! - Matches each path to the watch on its parent directory, or failing
//!   that the watch on the path itself (never a deeper ancestor)
//! - Pairs consecutive rename halves sharing an inode
//! - Filters create/remove signals that disagree with the disk
//! - Collects directories whose listing changed for aggregation
//! - Precomposes names to NFC on request
//!
//! Everything here is synchronous and side-effect free apart from the
//! `exists` check, so the dispatch thread holds the route lock only while
//! planning and never while listeners run.

use super::flags::{RawFlags, RawNotification};
use ahash::{AHashMap, AHashSet};
use pathwatcher_core::path::{file_name, parent_dir, paths_equal};
use pathwatcher_core::{Action, FileActionListener, WatchHandle};
use std::collections::BTreeSet;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use unicode_normalization::{is_nfc, UnicodeNormalization};

/// Handle/path/listener tables for every live watch
#[derive(Default)]
pub struct Routes {
    handles_to_paths: AHashMap<WatchHandle, PathBuf>,
    paths_to_handles: AHashMap<PathBuf, WatchHandle>,
    handles_to_listeners: AHashMap<WatchHandle, Arc<dyn FileActionListener>>,
}

impl Routes {
    pub fn insert(
        &mut self,
        handle: WatchHandle,
        path: PathBuf,
        listener: Arc<dyn FileActionListener>,
    ) {
        self.paths_to_handles.insert(path.clone(), handle);
        self.handles_to_paths.insert(handle, path);
        self.handles_to_listeners.insert(handle, listener);
    }

    /// Drop a handle from all three tables, returning how many remain
    pub fn remove(&mut self, handle: WatchHandle) -> usize {
        if let Some(path) = self.handles_to_paths.remove(&handle) {
            if self.paths_to_handles.get(&path) == Some(&handle) {
                self.paths_to_handles.remove(&path);
            }
        }
        self.handles_to_listeners.remove(&handle);
        self.handles_to_paths.len()
    }

    pub fn contains(&self, handle: WatchHandle) -> bool {
        self.handles_to_paths.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.handles_to_paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles_to_paths.is_empty()
    }

    /// Every watched path, sorted, for building a stream
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self.handles_to_paths.values().cloned().collect();
        paths.sort();
        paths
    }

    pub fn listener(&self, handle: WatchHandle) -> Option<Arc<dyn FileActionListener>> {
        self.handles_to_listeners.get(&handle).cloned()
    }

    /// Watch registered on exactly `path`
    pub fn exact(&self, path: &Path) -> Option<WatchHandle> {
        self.paths_to_handles.get(path).copied()
    }

    /// Watch responsible for `path`: its parent directory first, then itself
    pub fn resolve(&self, path: &Path) -> Option<(WatchHandle, &Path)> {
        let lookup = |key: &Path| {
            self.paths_to_handles
                .get_key_value(key)
                .map(|(watched, handle)| (*handle, watched.as_path()))
        };
        path.parent().and_then(lookup).or_else(|| lookup(path))
    }
}

/// One call to make on a listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAction {
    pub handle: WatchHandle,
    pub dir: PathBuf,
    pub filename: OsString,
    pub action: Action,
    pub old_filename: Option<OsString>,
}

impl FileAction {
    fn new(handle: WatchHandle, path: &Path, action: Action) -> Self {
        Self {
            handle,
            dir: parent_dir(path).to_path_buf(),
            filename: file_name(path).to_os_string(),
            action,
            old_filename: None,
        }
    }

    fn moved(handle: WatchHandle, from: &Path, to: &Path) -> Self {
        Self {
            old_filename: Some(file_name(from).to_os_string()),
            ..Self::new(handle, to, Action::Moved)
        }
    }

    /// Full path of the affected entry
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.filename)
    }

    /// Same action with every name in precomposed (NFC) form
    ///
    /// HFS+ and APFS hand back decomposed names; listeners compare against
    /// what users typed, which is almost always precomposed.
    pub fn precomposed(self) -> Self {
        Self {
            dir: PathBuf::from(precompose(self.dir.as_os_str())),
            filename: precompose(&self.filename),
            old_filename: self.old_filename.as_deref().map(precompose),
            ..self
        }
    }
}

/// NFC form of `name`; names that aren't UTF-8 are left alone
fn precompose(name: &OsStr) -> OsString {
    match name.to_str() {
        Some(text) if !is_nfc(text) => text.nfc().collect::<String>().into(),
        _ => name.to_os_string(),
    }
}

/// Result of routing one batch
#[derive(Debug, Default)]
pub struct BatchPlan {
    /// Per-entry actions in batch order
    pub actions: Vec<FileAction>,
    /// Directories whose listing changed, pending aggregation
    pub changed_dirs: BTreeSet<PathBuf>,
    /// Raws that matched no watch
    pub unmatched: usize,
    /// Dropped-events / must-rescan signals seen
    pub dropped_signals: usize,
}

/// Plan per-entry actions for one batch
///
/// `exists` is consulted to filter stale create/remove signals and to
/// decide the direction of same-directory renames.
pub fn route_batch<F>(routes: &Routes, batch: &[RawNotification], exists: F) -> BatchPlan
where
    F: Fn(&Path) -> bool,
{
    let mut plan = BatchPlan::default();
    let mut seen: AHashSet<(&Path, RawFlags)> = AHashSet::new();

    let mut i = 0;
    while i < batch.len() {
        let raw = &batch[i];
        i += 1;

        if raw.flags.intersects(RawFlags::DROPPED) {
            plan.dropped_signals += 1;
        }
        if raw.flags.intersects(RawFlags::SKIP) {
            continue;
        }

        // The OS repeats some signals within one batch, sometimes from two
        // watches that disagree on the entry type
        if !raw.flags.is_rename() && !seen.insert((raw.path.as_path(), raw.flags.signal())) {
            continue;
        }

        let Some((handle, watch_path)) = routes.resolve(&raw.path) else {
            plan.unmatched += 1;
            continue;
        };

        let dir = parent_dir(&raw.path);
        if raw.flags.intersects(RawFlags::ENTRY_CHANGED) && !paths_equal(dir, watch_path) {
            plan.changed_dirs.insert(dir.to_path_buf());
        }

        if !raw.flags.is_rename() {
            add_mod_del(&mut plan, handle, raw.flags, &raw.path, &exists);
            continue;
        }

        match batch.get(i).filter(|next| raw.pairs_with(next)) {
            Some(next) => {
                i += 1;
                route_rename_pair(&mut plan, routes, handle, raw, next, &exists);

                let next_dir = parent_dir(&next.path);
                let next_watch = routes.resolve(&next.path).map(|(_, path)| path);
                if next.flags.intersects(RawFlags::ENTRY_CHANGED)
                    && next_watch.is_some_and(|watch| !paths_equal(next_dir, watch))
                {
                    plan.changed_dirs.insert(next_dir.to_path_buf());
                }
            }
            None if exists(&raw.path) => {
                // Moved in from somewhere we don't watch
                plan.actions.push(FileAction::new(handle, &raw.path, Action::Add));
                if raw.flags.is_modified() {
                    plan.actions.push(FileAction::new(handle, &raw.path, Action::Modified));
                }
            }
            None => {
                plan.actions.push(FileAction::new(handle, &raw.path, Action::Delete));
            }
        }
    }

    plan
}

fn route_rename_pair<F>(
    plan: &mut BatchPlan,
    routes: &Routes,
    handle: WatchHandle,
    first: &RawNotification,
    second: &RawNotification,
    exists: &F,
) where
    F: Fn(&Path) -> bool,
{
    if first.path == second.path {
        add_mod_del(plan, handle, second.flags, &second.path, exists);
        return;
    }

    let first_dir = parent_dir(&first.path);
    let second_dir = parent_dir(&second.path);

    if paths_equal(first_dir, second_dir) {
        let forward = !exists(&first.path)
            || first
                .path
                .as_os_str()
                .eq_ignore_ascii_case(second.path.as_os_str());
        let action = if forward {
            FileAction::moved(handle, &first.path, &second.path)
        } else {
            FileAction::moved(handle, &second.path, &first.path)
        };
        plan.actions.push(action);
        return;
    }

    // Across directories: a delete where it left, a create where it landed
    let (from, to) = if exists(&first.path) && !exists(&second.path) {
        (second, first)
    } else {
        (first, second)
    };

    match routes.resolve(&from.path) {
        Some((from_handle, _)) => {
            plan.actions
                .push(FileAction::new(from_handle, &from.path, Action::Delete));
        }
        None => plan.unmatched += 1,
    }

    match routes.resolve(&to.path) {
        Some((to_handle, _)) => {
            plan.actions
                .push(FileAction::new(to_handle, &to.path, Action::Add));
            if to.flags.is_modified() {
                plan.actions
                    .push(FileAction::new(to_handle, &to.path, Action::Modified));
            }
        }
        None => plan.unmatched += 1,
    }
}

fn add_mod_del<F>(plan: &mut BatchPlan, handle: WatchHandle, flags: RawFlags, path: &Path, exists: &F)
where
    F: Fn(&Path) -> bool,
{
    if flags.contains(RawFlags::ITEM_CREATED) && exists(path) {
        plan.actions.push(FileAction::new(handle, path, Action::Add));
    }

    if flags.is_modified() {
        plan.actions.push(FileAction::new(handle, path, Action::Modified));
    }

    if flags.contains(RawFlags::ITEM_REMOVED) && !exists(path) {
        plan.actions.push(FileAction::new(handle, path, Action::Delete));
    }
}

/// One `Modified` per changed directory that has a watch of its own
///
/// Skips directories for which the batch already produced the same change.
pub fn aggregate(
    routes: &Routes,
    changed_dirs: &BTreeSet<PathBuf>,
    emitted: &[FileAction],
) -> Vec<FileAction> {
    changed_dirs
        .iter()
        .filter_map(|dir| {
            let handle = routes.exact(dir)?;
            let duplicate = emitted.iter().any(|action| {
                action.handle == handle
                    && action.action == Action::Modified
                    && paths_equal(&action.path(), dir)
            });
            (!duplicate).then(|| FileAction::new(handle, dir, Action::Modified))
        })
        .collect()
}

//! Event normalization
//!
//! Backends report one of four raw actions per entry. The listener pairs the
//! action with whether the entry is the watched path itself, and this module
//! maps that pair onto the eight public event kinds.

use crate::registry::WatchHandle;
use serde::{Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};

/// Raw action reported by a backend for a single entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Entry was created
    Add,
    /// Entry was removed
    Delete,
    /// Entry content or metadata changed
    Modified,
    /// Entry was renamed (old filename travels alongside)
    Moved,
}

/// Public event kind delivered to the consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Create,
    Delete,
    Change,
    Rename,
    ChildCreate,
    ChildDelete,
    ChildChange,
    ChildRename,
}

impl EventKind {
    /// Map a raw action onto an event kind.
    ///
    /// The `child-` variants are chosen iff the entry is not the watched
    /// path itself.
    pub const fn normalize(action: Action, is_self: bool) -> Self {
        match (action, is_self) {
            (Action::Add, true) => EventKind::Create,
            (Action::Delete, true) => EventKind::Delete,
            (Action::Modified, true) => EventKind::Change,
            (Action::Moved, true) => EventKind::Rename,
            (Action::Add, false) => EventKind::ChildCreate,
            (Action::Delete, false) => EventKind::ChildDelete,
            (Action::Modified, false) => EventKind::ChildChange,
            (Action::Moved, false) => EventKind::ChildRename,
        }
    }

    /// Wire tag for this kind
    pub const fn as_str(&self) -> &'static str {
        match self {
            EventKind::Create => "create",
            EventKind::Delete => "delete",
            EventKind::Change => "change",
            EventKind::Rename => "rename",
            EventKind::ChildCreate => "child-create",
            EventKind::ChildDelete => "child-delete",
            EventKind::ChildChange => "child-change",
            EventKind::ChildRename => "child-rename",
        }
    }

    /// Whether this kind describes an entry inside the watched directory
    pub const fn is_child(&self) -> bool {
        matches!(
            self,
            EventKind::ChildCreate
                | EventKind::ChildDelete
                | EventKind::ChildChange
                | EventKind::ChildRename
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Platform-independent event handed to the consumer
///
/// Serializes as `{kind, handle, newPath, oldPath}` with `oldPath` set to an
/// empty string when the event is not a rename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedEvent {
    pub kind: EventKind,
    pub handle: WatchHandle,
    pub new_path: PathBuf,
    #[serde(serialize_with = "serialize_old_path")]
    pub old_path: Option<PathBuf>,
}

impl NormalizedEvent {
    pub fn new(
        kind: EventKind,
        handle: WatchHandle,
        new_path: PathBuf,
        old_path: Option<PathBuf>,
    ) -> Self {
        Self {
            kind,
            handle,
            new_path,
            old_path,
        }
    }

    /// Old path, or an empty path when this is not a rename
    pub fn old_path_or_empty(&self) -> &Path {
        self.old_path.as_deref().unwrap_or_else(|| Path::new(""))
    }
}

fn serialize_old_path<S>(old_path: &Option<PathBuf>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match old_path {
        Some(path) => serializer.serialize_str(&path.to_string_lossy()),
        None => serializer.serialize_str(""),
    }
}

//! Raw notification records fed to the coalescing router
//!
//! Flag bits follow the FSEvents layout so a native stream on macOS can
//! pass its flags through untouched; other streams synthesize them.

use std::path::PathBuf;

bitflags::bitflags! {
    /// Per-notification action flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RawFlags: u32 {
        const MUST_SCAN_SUBDIRS = 0x0000_0001;
        const USER_DROPPED = 0x0000_0002;
        const KERNEL_DROPPED = 0x0000_0004;
        const IDS_WRAPPED = 0x0000_0008;
        const HISTORY_DONE = 0x0000_0010;
        const ROOT_CHANGED = 0x0000_0020;
        const MOUNT = 0x0000_0040;
        const UNMOUNT = 0x0000_0080;
        const ITEM_CREATED = 0x0000_0100;
        const ITEM_REMOVED = 0x0000_0200;
        const INODE_META_MOD = 0x0000_0400;
        const ITEM_RENAMED = 0x0000_0800;
        const ITEM_MODIFIED = 0x0000_1000;
        const FINDER_INFO_MOD = 0x0000_2000;
        const ITEM_CHANGE_OWNER = 0x0000_4000;
        const ITEM_XATTR_MOD = 0x0000_8000;
        const IS_FILE = 0x0001_0000;
        const IS_DIR = 0x0002_0000;
        const IS_SYMLINK = 0x0004_0000;
    }
}

impl RawFlags {
    /// Anything counted as a content/metadata change
    pub const MODIFIED: RawFlags = RawFlags::ITEM_MODIFIED
        .union(RawFlags::FINDER_INFO_MOD)
        .union(RawFlags::INODE_META_MOD);

    /// Stream-level conditions that carry no per-entry meaning
    pub const SKIP: RawFlags = RawFlags::USER_DROPPED
        .union(RawFlags::KERNEL_DROPPED)
        .union(RawFlags::IDS_WRAPPED)
        .union(RawFlags::HISTORY_DONE)
        .union(RawFlags::MOUNT)
        .union(RawFlags::UNMOUNT)
        .union(RawFlags::ROOT_CHANGED);

    /// The OS lost events and the caller would have to rescan
    pub const DROPPED: RawFlags = RawFlags::USER_DROPPED
        .union(RawFlags::KERNEL_DROPPED)
        .union(RawFlags::MUST_SCAN_SUBDIRS);

    /// An entry appeared, vanished or moved inside its directory
    pub const ENTRY_CHANGED: RawFlags = RawFlags::ITEM_CREATED
        .union(RawFlags::ITEM_REMOVED)
        .union(RawFlags::ITEM_RENAMED);

    /// What kind of entry the signal is about, not what happened to it
    pub const ENTRY_TYPE: RawFlags = RawFlags::IS_FILE
        .union(RawFlags::IS_DIR)
        .union(RawFlags::IS_SYMLINK);

    /// The flags with the entry type stripped
    pub fn signal(&self) -> RawFlags {
        self.difference(RawFlags::ENTRY_TYPE)
    }

    pub fn is_rename(&self) -> bool {
        self.contains(RawFlags::ITEM_RENAMED)
    }

    pub fn is_modified(&self) -> bool {
        self.intersects(RawFlags::MODIFIED)
    }
}

/// One raw signal from the native stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNotification {
    pub path: PathBuf,
    pub flags: RawFlags,
    /// Stream sequence id
    pub id: u64,
    /// Pairing key for rename halves (inode, or the stream's rename cookie)
    pub inode: Option<u64>,
}

impl RawNotification {
    pub fn new(path: impl Into<PathBuf>, flags: RawFlags, id: u64) -> Self {
        Self {
            path: path.into(),
            flags,
            id,
            inode: None,
        }
    }

    pub fn with_inode(mut self, inode: u64) -> Self {
        self.inode = Some(inode);
        self
    }

    /// Whether `next` is the other half of this rename
    pub fn pairs_with(&self, next: &RawNotification) -> bool {
        self.flags.is_rename()
            && next.flags.is_rename()
            && self.inode.is_some()
            && self.inode == next.inode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composites() {
        assert!((RawFlags::ITEM_MODIFIED | RawFlags::IS_FILE).is_modified());
        assert!(RawFlags::INODE_META_MOD.is_modified());
        assert!(!RawFlags::ITEM_CREATED.is_modified());
        assert!(RawFlags::SKIP.contains(RawFlags::KERNEL_DROPPED));
        assert!(!RawFlags::SKIP.contains(RawFlags::MUST_SCAN_SUBDIRS));
    }

    #[test]
    fn test_rename_pairing_requires_shared_inode() {
        let a = RawNotification::new("/a/x", RawFlags::ITEM_RENAMED, 1).with_inode(7);
        let b = RawNotification::new("/a/y", RawFlags::ITEM_RENAMED, 2).with_inode(7);
        let c = RawNotification::new("/a/z", RawFlags::ITEM_RENAMED, 3).with_inode(8);
        let unkeyed = RawNotification::new("/a/w", RawFlags::ITEM_RENAMED, 4);

        assert!(a.pairs_with(&b));
        assert!(!b.pairs_with(&c));
        assert!(!unkeyed.pairs_with(&unkeyed.clone()));
    }
}

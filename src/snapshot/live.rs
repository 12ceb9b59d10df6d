use std::path::{Path, PathBuf};

use crate::blobstore::ShardLayout;
use crate::checksum::Checksum;
use crate::error::{Error, IoResultExt, Result};
use crate::fs::{self, EntryType, WalkEntry};
use crate::path::VolPath;
use crate::snapshot::{Snapshot, SnapshotItem};

/// the working tree of a volume, read as a snapshot source
///
/// a frozen tree holds only directories and symlinks into the blobstore;
/// anything else is reported rather than skipped.
#[derive(Debug, Clone)]
pub struct LiveTree {
    root: PathBuf,
    exclude: Vec<PathBuf>,
    layout: ShardLayout,
}

impl LiveTree {
    pub fn new(root: impl Into<PathBuf>, exclude: Vec<PathBuf>, layout: ShardLayout) -> Self {
        Self {
            root: root.into(),
            exclude,
            layout,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// walk below `base`, yielding entries with tree-relative paths
    fn entries(&self, base: &VolPath) -> impl Iterator<Item = Result<WalkEntry>> + '_ {
        let start = base.to_fs(&self.root);
        let base = base.clone();
        fs::walk(&start, &self.exclude).map(move |entry| {
            let mut entry = entry?;
            entry.path = base.join_path(&entry.path);
            Ok(entry)
        })
    }

    fn classify(&self, entry: WalkEntry) -> Result<SnapshotItem> {
        match entry.entry_type {
            EntryType::Directory => Ok(SnapshotItem::directory(entry.path)),
            EntryType::Symlink => match self.link_checksum(&entry.fs_path)? {
                Some(checksum) => Ok(SnapshotItem::link(entry.path, checksum)),
                None => Err(Error::TypeMismatch {
                    path: entry.fs_path,
                    found: "foreign symlink",
                }),
            },
            EntryType::Regular => Err(Error::TypeMismatch {
                path: entry.fs_path,
                found: "unfrozen regular file",
            }),
            EntryType::Other => Err(Error::TypeMismatch {
                path: entry.fs_path,
                found: "special file",
            }),
        }
    }

    /// checksum a symlink refers to, if its target is a blob location
    pub fn link_checksum(&self, link: &Path) -> Result<Option<Checksum>> {
        let target = std::fs::read_link(link).with_path(link)?;
        Ok(self.layout.from_suffix(&target))
    }

    /// lazily yield snapshot items in path order
    pub fn items(&self) -> impl Iterator<Item = Result<SnapshotItem>> + '_ {
        self.items_under(&VolPath::root())
    }

    /// items at or below `base`, with tree-relative paths
    pub fn items_under(&self, base: &VolPath) -> impl Iterator<Item = Result<SnapshotItem>> + '_ {
        self.entries(base)
            .map(move |entry| entry.and_then(|e| self.classify(e)))
    }

    /// snapshot of the whole tree
    pub fn snapshot(&self) -> Result<Snapshot> {
        let items = self.items().collect::<Result<Vec<_>>>()?;
        Snapshot::new(items)
    }

    /// regular files at or below `base`, which freeze turns into links
    pub fn files(&self, base: &VolPath) -> impl Iterator<Item = Result<(VolPath, PathBuf)>> + '_ {
        self.entries(base).filter_map(|entry| match entry {
            Ok(e) if e.entry_type == EntryType::Regular => Some(Ok((e.path, e.fs_path))),
            Ok(_) => None,
            Err(e) => Some(Err(e)),
        })
    }

    /// blob links at or below `base`
    pub fn links(
        &self,
        base: &VolPath,
    ) -> impl Iterator<Item = Result<(VolPath, PathBuf, Checksum)>> + '_ {
        self.entries(base).filter_map(move |entry| {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e)),
            };
            if entry.entry_type != EntryType::Symlink {
                return None;
            }
            match self.link_checksum(&entry.fs_path) {
                Ok(Some(c)) => Some(Ok((entry.path, entry.fs_path, c))),
                Ok(None) => None,
                Err(e) => Some(Err(e)),
            }
        })
    }
}

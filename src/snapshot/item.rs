use std::collections::BTreeSet;

use crate::checksum::Checksum;
use crate::error::{Error, Result};
use crate::path::VolPath;

/// what a snapshot records at a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKind {
    Directory,
    /// symlink into the blobstore
    Link(Checksum),
}

impl ItemKind {
    pub fn name(&self) -> &'static str {
        match self {
            ItemKind::Directory => "directory",
            ItemKind::Link(_) => "link",
        }
    }

    pub fn checksum(&self) -> Option<&Checksum> {
        match self {
            ItemKind::Directory => None,
            ItemKind::Link(c) => Some(c),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotItem {
    /// relative to the snapshot root, which is `/`
    pub path: VolPath,
    pub kind: ItemKind,
}

impl SnapshotItem {
    pub fn directory(path: VolPath) -> Self {
        Self {
            path,
            kind: ItemKind::Directory,
        }
    }

    pub fn link(path: VolPath, checksum: Checksum) -> Self {
        Self {
            path,
            kind: ItemKind::Link(checksum),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == ItemKind::Directory
    }
}

/// items sorted by path, root directory first, no duplicates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    items: Vec<SnapshotItem>,
}

impl Snapshot {
    /// validate and sort
    ///
    /// every non-root item must sit below a directory item of the snapshot.
    pub fn new(mut items: Vec<SnapshotItem>) -> Result<Self> {
        items.sort_by(|a, b| a.path.cmp(&b.path));

        match items.first() {
            Some(first) if first.path.is_root() && first.is_dir() => {}
            _ => return Err(Error::MissingRoot),
        }

        let mut dirs = BTreeSet::new();
        for pair in items.windows(2) {
            if pair[0].path == pair[1].path {
                return Err(Error::DuplicatePath(pair[0].path.to_string()));
            }
        }
        for item in &items {
            if let Some(parent) = item.path.parent() {
                if !dirs.contains(&parent) {
                    return Err(Error::InvalidPath(format!(
                        "{} has no parent directory in snapshot",
                        item.path
                    )));
                }
            }
            if item.is_dir() {
                dirs.insert(item.path.clone());
            }
        }

        Ok(Self { items })
    }

    /// snapshot holding only the root directory
    pub fn empty() -> Self {
        Self {
            items: vec![SnapshotItem::directory(VolPath::root())],
        }
    }

    pub fn items(&self) -> &[SnapshotItem] {
        &self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SnapshotItem> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// true when only the root directory is present
    pub fn is_empty(&self) -> bool {
        self.items.len() <= 1
    }

    pub fn get(&self, path: &VolPath) -> Option<&SnapshotItem> {
        self.items
            .binary_search_by(|item| item.path.cmp(path))
            .ok()
            .map(|i| &self.items[i])
    }

    /// checksums of all link items, with repeats
    pub fn checksums(&self) -> impl Iterator<Item = &Checksum> + '_ {
        self.items.iter().filter_map(|item| item.kind.checksum())
    }

    pub fn into_items(self) -> Vec<SnapshotItem> {
        self.items
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a SnapshotItem;
    type IntoIter = std::slice::Iter<'a, SnapshotItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

//! snapshot diff engine
//!
//! `Diff` merge-joins two path-sorted item sequences into the deltas that turn
//! the first tree's shape into the second's. deltas must be applied in the
//! order they are produced: parents come before children, and a removal at a
//! path whose type changed comes before its replacement.

use std::cmp::Ordering;
use std::iter::Peekable;
use std::path::Path;

use tracing::debug;

use crate::blobstore::LocalBlobstore;
use crate::checksum::Checksum;
use crate::error::Result;
use crate::fs::{self, EntryType};
use crate::path::VolPath;
use crate::snapshot::{ItemKind, Snapshot, SnapshotItem};

/// one step turning one tree shape into another
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delta {
    Removed(VolPath),
    Mkdir(VolPath),
    Mklink(VolPath, Checksum),
}

impl Delta {
    pub fn path(&self) -> &VolPath {
        match self {
            Delta::Removed(p) | Delta::Mkdir(p) | Delta::Mklink(p, _) => p,
        }
    }

    /// delta that creates `item` from nothing
    fn create(item: SnapshotItem) -> Self {
        match item.kind {
            ItemKind::Directory => Delta::Mkdir(item.path),
            ItemKind::Link(c) => Delta::Mklink(item.path, c),
        }
    }
}

impl std::fmt::Display for Delta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Delta::Removed(p) => write!(f, "removed {}", p),
            Delta::Mkdir(p) => write!(f, "mkdir   {}", p),
            Delta::Mklink(p, c) => write!(f, "mklink  {} -> {}", p, c),
        }
    }
}

/// lazy merge-join of two sorted item sequences
pub struct Diff<B: Iterator, A: Iterator> {
    before: Peekable<B>,
    after: Peekable<A>,
    /// creation half of a type change, emitted after its removal
    pending: Option<Delta>,
}

impl<B, A> Diff<B, A>
where
    B: Iterator<Item = SnapshotItem>,
    A: Iterator<Item = SnapshotItem>,
{
    pub fn new(before: B, after: A) -> Self {
        Self {
            before: before.peekable(),
            after: after.peekable(),
            pending: None,
        }
    }
}

impl<B, A> Iterator for Diff<B, A>
where
    B: Iterator<Item = SnapshotItem>,
    A: Iterator<Item = SnapshotItem>,
{
    type Item = Delta;

    fn next(&mut self) -> Option<Delta> {
        if let Some(delta) = self.pending.take() {
            return Some(delta);
        }
        loop {
            let ord = match (self.before.peek(), self.after.peek()) {
                (None, None) => return None,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(b), Some(a)) => b.path.cmp(&a.path),
            };
            match ord {
                Ordering::Less => {
                    let before = self.before.next()?;
                    return Some(Delta::Removed(before.path));
                }
                Ordering::Greater => {
                    let after = self.after.next()?;
                    return Some(Delta::create(after));
                }
                Ordering::Equal => {
                    let before = self.before.next()?;
                    let after = self.after.next()?;
                    match (before.kind, after.kind) {
                        (ItemKind::Directory, ItemKind::Directory) => continue,
                        (ItemKind::Link(old), ItemKind::Link(new)) if old == new => continue,
                        (ItemKind::Link(_), ItemKind::Link(new)) => {
                            return Some(Delta::Mklink(after.path, new))
                        }
                        // type change: remove first, then create
                        _ => {
                            self.pending = Some(Delta::create(after));
                            return Some(Delta::Removed(before.path));
                        }
                    }
                }
            }
        }
    }
}

/// deltas turning `before` into `after`
pub fn diff(before: &Snapshot, after: &Snapshot) -> Vec<Delta> {
    Diff::new(before.iter().cloned(), after.iter().cloned()).collect()
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ApplyStats {
    pub removed: usize,
    pub dirs: usize,
    pub links: usize,
}

/// where and how deltas are applied
pub struct ApplyContext<'a> {
    root: &'a Path,
    blobstore: &'a LocalBlobstore,
    terminus: VolPath,
    keep: Option<&'a Snapshot>,
}

impl<'a> ApplyContext<'a> {
    /// apply below `root`, pruning empty parents up to `root` itself
    pub fn new(root: &'a Path, blobstore: &'a LocalBlobstore) -> Self {
        Self {
            root,
            blobstore,
            terminus: VolPath::root(),
            keep: None,
        }
    }

    /// never prune at or above `terminus`
    pub fn with_terminus(mut self, terminus: VolPath) -> Self {
        self.terminus = terminus;
        self
    }

    /// never prune a directory `target` contains
    pub fn keeping(mut self, target: &'a Snapshot) -> Self {
        self.keep = Some(target);
        self
    }

    /// true if some ancestor of `path` is not a real directory, so nothing
    /// can exist at `path` within the tree
    fn detached(&self, path: &VolPath) -> Result<bool> {
        let mut ancestor = VolPath::root();
        for segment in path.segments().take(path.depth().saturating_sub(1)) {
            ancestor = ancestor.join(segment)?;
            if fs::entry_type(&ancestor.to_fs(self.root))? != Some(EntryType::Directory) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn prune_parents(&self, path: &VolPath) -> Result<()> {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == self.terminus || !dir.starts_with(&self.terminus) {
                break;
            }
            let kept = self
                .keep
                .and_then(|s| s.get(&dir))
                .map(SnapshotItem::is_dir)
                .unwrap_or(false);
            if kept {
                break;
            }
            if std::fs::remove_dir(dir.to_fs(self.root)).is_err() {
                break;
            }
            current = dir.parent();
        }
        Ok(())
    }
}

pub fn apply_delta(ctx: &ApplyContext<'_>, delta: &Delta) -> Result<()> {
    let path = delta.path();
    let fs_path = path.to_fs(ctx.root);
    match delta {
        Delta::Removed(_) => {
            if path.is_root() || ctx.detached(path)? {
                return Ok(());
            }
            fs::remove_tree(&fs_path)?;
            ctx.prune_parents(path)?;
        }
        Delta::Mkdir(_) => {
            match fs::entry_type(&fs_path)? {
                Some(EntryType::Directory) => {}
                Some(_) => {
                    fs::unlink(&fs_path)?;
                    fs::mkdir_recursive(&fs_path)?;
                }
                None => fs::mkdir_recursive(&fs_path)?,
            }
        }
        Delta::Mklink(_, checksum) => {
            if let Some(parent) = fs_path.parent() {
                fs::mkdir_recursive(parent)?;
            }
            ctx.blobstore.link_to_blob(&fs_path, checksum)?;
        }
    }
    debug!(%delta, "applied");
    Ok(())
}

/// apply deltas strictly in order
pub fn apply<'d>(
    ctx: &ApplyContext<'_>,
    deltas: impl IntoIterator<Item = &'d Delta>,
) -> Result<ApplyStats> {
    let mut stats = ApplyStats::default();
    for delta in deltas {
        apply_delta(ctx, delta)?;
        match delta {
            Delta::Removed(_) => stats.removed += 1,
            Delta::Mkdir(_) => stats.dirs += 1,
            Delta::Mklink(..) => stats.links += 1,
        }
    }
    Ok(stats)
}

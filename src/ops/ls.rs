use std::path::PathBuf;

use crate::checksum::Checksum;
use crate::error::{Error, IoResultExt, Result};
use crate::fs::{self, EntryType, TypeRegistry};
use crate::path::VolPath;
use crate::snapshot::LiveTree;
use crate::volume::{Volume, META_DIR};

/// ls entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LsEntry {
    pub path: VolPath,
    pub kind: EntryType,
    /// blob a link points at
    pub checksum: Option<Checksum>,
    /// content size, for files and links whose blob is stored
    pub size: Option<u64>,
    pub mime: Option<String>,
}

/// list the direct children of `subpath`
pub fn ls(volume: &Volume, subpath: &VolPath, types: &TypeRegistry) -> Result<Vec<LsEntry>> {
    let dir = subpath.to_fs(volume.root());
    if fs::entry_type(&dir)? != Some(EntryType::Directory) {
        return Err(Error::TypeMismatch {
            path: dir,
            found: "non-directory",
        });
    }

    let mut children = Vec::new();
    for entry in std::fs::read_dir(&dir).with_path(&dir)? {
        let entry = entry.with_path(&dir)?;
        let name = entry.file_name();
        if subpath.is_root() && name == META_DIR {
            continue;
        }
        children.push((name, entry.path()));
    }
    children.sort();

    let live = volume.live_tree();
    children
        .into_iter()
        .map(|(name, fs_path)| describe(volume, &live, types, subpath.join(&name)?, fs_path))
        .collect()
}

/// list everything below `subpath`, in path order
pub fn ls_recursive(
    volume: &Volume,
    subpath: &VolPath,
    types: &TypeRegistry,
) -> Result<Vec<LsEntry>> {
    let live = volume.live_tree();
    let start = subpath.to_fs(volume.root());
    let exclude = vec![volume.meta_path()];

    let mut entries = Vec::new();
    for entry in fs::walk(&start, &exclude) {
        let entry = entry?;
        if entry.path.is_root() {
            continue;
        }
        let path = subpath.join_path(&entry.path);
        entries.push(describe(volume, &live, types, path, entry.fs_path)?);
    }
    Ok(entries)
}

fn describe(
    volume: &Volume,
    live: &LiveTree,
    types: &TypeRegistry,
    path: VolPath,
    fs_path: PathBuf,
) -> Result<LsEntry> {
    let kind = fs::entry_type(&fs_path)?.unwrap_or(EntryType::Other);
    let mut entry = LsEntry {
        path,
        kind,
        checksum: None,
        size: None,
        mime: None,
    };
    match kind {
        EntryType::Regular => {
            entry.size = Some(std::fs::metadata(&fs_path).with_path(&fs_path)?.len());
            entry.mime = types.sniff(&fs_path)?;
        }
        EntryType::Symlink => {
            entry.checksum = live.link_checksum(&fs_path)?;
            let store = volume.blobstore();
            if let Some(checksum) = entry.checksum.filter(|c| store.exists(c)) {
                entry.size = Some(store.size(&checksum)?);
                // sniffing through the link keeps its name for extension fallback
                entry.mime = types.sniff(&fs_path)?;
            }
        }
        EntryType::Directory | EntryType::Other => {}
    }
    Ok(entry)
}

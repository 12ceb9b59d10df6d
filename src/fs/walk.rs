use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{walk_error, Error, Result};
use crate::fs::EntryType;
use crate::path::VolPath;

/// one entry produced by `walk`
#[derive(Debug, Clone)]
pub struct WalkEntry {
    /// path relative to the walked root (the root itself is `/`)
    pub path: VolPath,
    /// absolute filesystem path
    pub fs_path: PathBuf,
    pub entry_type: EntryType,
}

/// lazily walk `root` in `VolPath` order, skipping `exclude`d subtrees
///
/// siblings are visited sorted by name and parents before children, which is
/// exactly the segment-wise order of the resulting paths. symlinks are
/// reported, never followed.
pub fn walk<'a>(
    root: &Path,
    exclude: &'a [PathBuf],
) -> impl Iterator<Item = Result<WalkEntry>> + 'a {
    let root = root.to_path_buf();
    WalkDir::new(&root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(move |e| !exclude.iter().any(|x| x == e.path()))
        .map(move |entry| {
            let entry = entry.map_err(|e| walk_error(&root, e))?;
            let rel = entry
                .path()
                .strip_prefix(&root)
                .map_err(|_| Error::InvalidPath(entry.path().display().to_string()))?;
            let path = VolPath::from_fs(&Path::new("/").join(rel))?;
            Ok(WalkEntry {
                path,
                fs_path: entry.path().to_path_buf(),
                entry_type: EntryType::from_file_type(entry.file_type()),
            })
        })
}

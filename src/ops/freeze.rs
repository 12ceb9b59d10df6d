use std::path::PathBuf;

use rayon::prelude::*;
use tracing::{debug, info};

use crate::checksum::{checksum_file, Checksum};
use crate::error::{IoResultExt, Result};
use crate::path::VolPath;
use crate::volume::Volume;

#[derive(Debug, Default, Clone)]
pub struct FreezeOptions {
    /// only freeze below this path
    pub subpath: Option<VolPath>,
}

/// freeze statistics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FreezeStats {
    /// regular files turned into links
    pub files: usize,
    /// blobs newly added to the store
    pub imported: usize,
    /// files whose content was already stored
    pub duplicates: usize,
    /// total size of frozen files
    pub bytes: u64,
}

/// move regular files into the blobstore, leaving symlinks behind
pub fn freeze(volume: &Volume, opts: &FreezeOptions) -> Result<FreezeStats> {
    let _lock = volume.lock()?;
    freeze_locked(volume, opts)
}

/// freeze with the volume lock already held by the caller
pub(crate) fn freeze_locked(volume: &Volume, opts: &FreezeOptions) -> Result<FreezeStats> {
    let base = opts.subpath.clone().unwrap_or_else(VolPath::root);
    let live = volume.live_tree();
    let files = live.files(&base).collect::<Result<Vec<_>>>()?;

    // hashing is the expensive part; order does not matter here
    let hashed: Vec<(VolPath, PathBuf, Checksum, u64)> = files
        .into_par_iter()
        .map(|(path, fs_path)| {
            let checksum = checksum_file(&fs_path)?;
            let size = std::fs::symlink_metadata(&fs_path)
                .with_path(&fs_path)?
                .len();
            Ok((path, fs_path, checksum, size))
        })
        .collect::<Result<Vec<_>>>()?;

    let store = volume.blobstore();
    let mut stats = FreezeStats::default();
    for (path, fs_path, checksum, size) in hashed {
        let duplicate = store.import_via_link(&fs_path, &checksum)?;
        store.link_to_blob(&fs_path, &checksum)?;
        debug!(%path, %checksum, duplicate, "froze");

        stats.files += 1;
        stats.bytes += size;
        if duplicate {
            stats.duplicates += 1;
        } else {
            stats.imported += 1;
        }
    }

    info!(
        base = %base,
        files = stats.files,
        imported = stats.imported,
        duplicates = stats.duplicates,
        "freeze complete"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use tempfile::tempdir;

    #[test]
    fn test_freeze_dedups_and_links() {
        let dir = tempdir().unwrap();
        let volume = Volume::init(dir.path()).unwrap();
        let root = volume.root().to_path_buf();
        std::fs::create_dir(root.join("docs")).unwrap();
        std::fs::write(root.join("docs/a.txt"), b"same").unwrap();
        std::fs::write(root.join("b.txt"), b"same").unwrap();
        std::fs::write(root.join("c.txt"), b"other").unwrap();

        let stats = freeze(&volume, &FreezeOptions::default()).unwrap();
        assert_eq!(
            stats,
            FreezeStats {
                files: 3,
                imported: 2,
                duplicates: 1,
                bytes: 13,
            }
        );

        let store = volume.blobstore();
        let same = Checksum::of_bytes(b"same");
        assert!(root.join("docs/a.txt").symlink_metadata().unwrap().file_type().is_symlink());
        assert_eq!(store.checksum_of_link(&root.join("b.txt")).unwrap(), Some(same));
        assert!(store.verify_permissions(&same).unwrap());
        assert_eq!(std::fs::read(root.join("docs/a.txt")).unwrap(), b"same");

        // nothing left to do
        let again = freeze(&volume, &FreezeOptions::default()).unwrap();
        assert_eq!(again, FreezeStats::default());
    }

    #[test]
    fn test_freeze_subpath_only() {
        let dir = tempdir().unwrap();
        let volume = Volume::init(dir.path()).unwrap();
        let root = volume.root().to_path_buf();
        std::fs::create_dir(root.join("in")).unwrap();
        std::fs::write(root.join("in/x"), b"x").unwrap();
        std::fs::write(root.join("out"), b"y").unwrap();

        let opts = FreezeOptions {
            subpath: Some(VolPath::parse("/in").unwrap()),
        };
        assert_eq!(freeze(&volume, &opts).unwrap().files, 1);
        assert!(root.join("out").symlink_metadata().unwrap().is_file());
    }

    #[test]
    fn test_freeze_respects_lock() {
        let dir = tempdir().unwrap();
        let volume = Volume::init(dir.path()).unwrap();
        let _held = volume.lock().unwrap();
        assert!(matches!(
            freeze(&volume, &FreezeOptions::default()),
            Err(Error::LockContention)
        ));
    }
}

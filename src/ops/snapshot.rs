use tracing::info;

use crate::error::{Error, Result};
use crate::kv::validate_key;
use crate::ops::freeze::freeze_locked;
use crate::ops::FreezeOptions;
use crate::snapshot::Snapshot;
use crate::volume::Volume;

/// freeze the tree, then record it under `name`
pub fn snapshot_make(volume: &Volume, name: &str) -> Result<Snapshot> {
    validate_key(name)?;
    let _lock = volume.lock()?;

    let mut store = volume.snapshots()?;
    if store.exists(name)? {
        return Err(Error::SnapshotExists(name.to_string()));
    }

    let frozen = freeze_locked(volume, &FreezeOptions::default())?;
    let snapshot = volume.live_tree().snapshot()?;
    store.save(name, &snapshot)?;

    info!(name, items = snapshot.len(), frozen = frozen.files, "snapshot created");
    Ok(snapshot)
}

/// forget a snapshot; its blobs stay until gc
pub fn snapshot_delete(volume: &Volume, name: &str) -> Result<()> {
    let _lock = volume.lock()?;
    volume.snapshots()?.delete(name)?;
    info!(name, "snapshot deleted");
    Ok(())
}

/// snapshot names, sorted, optionally filtered by a glob pattern
pub fn snapshot_list(volume: &Volume, pattern: Option<&str>) -> Result<Vec<String>> {
    volume.snapshots()?.list(pattern)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::Checksum;
    use crate::path::VolPath;
    use tempfile::tempdir;

    #[test]
    fn test_make_list_delete() {
        let dir = tempdir().unwrap();
        let volume = Volume::init(dir.path()).unwrap();
        let root = volume.root().to_path_buf();
        std::fs::create_dir(root.join("d")).unwrap();
        std::fs::write(root.join("d/f"), b"content").unwrap();

        let snap = snapshot_make(&volume, "first").unwrap();
        assert_eq!(snap.len(), 3);
        let item = snap.get(&VolPath::parse("/d/f").unwrap()).unwrap();
        assert_eq!(item.kind.checksum(), Some(&Checksum::of_bytes(b"content")));
        // the metadata directory never shows up
        assert!(snap.get(&VolPath::parse("/.coldstore").unwrap()).is_none());

        assert!(matches!(
            snapshot_make(&volume, "first"),
            Err(Error::SnapshotExists(_))
        ));
        snapshot_make(&volume, "second").unwrap();
        assert_eq!(snapshot_list(&volume, None).unwrap(), vec!["first", "second"]);
        assert_eq!(snapshot_list(&volume, Some("s*")).unwrap(), vec!["second"]);

        snapshot_delete(&volume, "first").unwrap();
        assert_eq!(snapshot_list(&volume, None).unwrap(), vec!["second"]);
        assert!(volume.blobstore().exists(&Checksum::of_bytes(b"content")));
        assert!(matches!(
            snapshot_delete(&volume, "first"),
            Err(Error::SnapshotNotFound(_))
        ));
    }

    #[test]
    fn test_invalid_name() {
        let dir = tempdir().unwrap();
        let volume = Volume::init(dir.path()).unwrap();
        assert!(matches!(
            snapshot_make(&volume, "/abs"),
            Err(Error::InvalidName(_))
        ));
    }
}

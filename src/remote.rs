//! the far side of pull and push

use std::sync::Arc;

use crate::blobstore::{BlobSource, DirObjectStore, LocalBlobstore, ObjectStore, RemoteBlobstore};
use crate::checksum::Checksum;
use crate::config::{Remote, RemoteKind};
use crate::error::{Error, Result};
use crate::kv::ObjectKv;
use crate::retry::RetryPolicy;
use crate::snapshot::{Snapshot, SnapshotStore};
use crate::volume::{Volume, VolumeLock};

/// a remote: another volume, or an archive in an object storage bucket
///
/// in a bucket, blobs are `<prefix><hex>` keys and snapshot records live
/// below `<prefix>meta/snapshots/`.
pub enum RemoteVolume {
    Volume {
        volume: Volume,
        blobstore: LocalBlobstore,
    },
    Bucket {
        blobstore: RemoteBlobstore,
        snapshots: SnapshotStore<ObjectKv>,
    },
}

impl RemoteVolume {
    /// open a configured remote; bucket remotes use a directory-backed store
    pub fn open(remote: &Remote, retry: &RetryPolicy) -> Result<Self> {
        match remote.kind {
            RemoteKind::Volume => Ok(Self::from_volume(Volume::open(&remote.path)?)),
            RemoteKind::Bucket => {
                let bucket = remote.bucket.as_deref().ok_or_else(|| {
                    Error::InvalidName(format!("remote {} has no bucket", remote.name))
                })?;
                let store = Arc::new(DirObjectStore::new(&remote.path));
                Self::from_store(store, bucket, &remote.prefix, retry.clone())
            }
        }
    }

    pub fn from_volume(volume: Volume) -> Self {
        let blobstore = volume.blobstore();
        Self::Volume { volume, blobstore }
    }

    /// an archive in `bucket` of any object store
    pub fn from_store(
        store: Arc<dyn ObjectStore>,
        bucket: &str,
        prefix: &str,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let kv = ObjectKv::new(store.clone(), bucket, format!("{}meta/", prefix), retry.clone());
        Ok(Self::Bucket {
            blobstore: RemoteBlobstore::new(store, bucket, prefix, retry),
            snapshots: SnapshotStore::new(kv)?,
        })
    }

    /// the remote's blobs, as a fetch source
    pub fn blobs(&self) -> &dyn BlobSource {
        match self {
            Self::Volume { blobstore, .. } => blobstore,
            Self::Bucket { blobstore, .. } => blobstore,
        }
    }

    pub fn has_blob(&self, checksum: &Checksum) -> Result<bool> {
        self.blobs().has_blob(checksum)
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Volume { volume, .. } => format!("volume {}", volume.root().display()),
            Self::Bucket { blobstore, .. } => {
                format!("bucket {}/{}", blobstore.bucket(), blobstore.prefix())
            }
        }
    }

    pub fn load_snapshot(&self, name: &str) -> Result<Snapshot> {
        match self {
            Self::Volume { volume, .. } => volume.snapshots()?.load(name),
            Self::Bucket { snapshots, .. } => snapshots.load(name),
        }
    }

    pub fn has_snapshot(&self, name: &str) -> Result<bool> {
        match self {
            Self::Volume { volume, .. } => volume.snapshots()?.exists(name),
            Self::Bucket { snapshots, .. } => snapshots.exists(name),
        }
    }

    pub fn list_snapshots(&self, pattern: Option<&str>) -> Result<Vec<String>> {
        match self {
            Self::Volume { volume, .. } => volume.snapshots()?.list(pattern),
            Self::Bucket { snapshots, .. } => snapshots.list(pattern),
        }
    }

    /// lock a volume remote for a whole transfer; buckets have no lock
    pub fn lock(&self) -> Result<Option<VolumeLock>> {
        match self {
            Self::Volume { volume, .. } => volume.lock().map(Some),
            Self::Bucket { .. } => Ok(None),
        }
    }

    /// store a snapshot record remotely; the caller holds `lock()`
    pub fn save_snapshot(&mut self, name: &str, snapshot: &Snapshot) -> Result<()> {
        match self {
            Self::Volume { volume, .. } => volume.snapshots()?.save(name, snapshot),
            Self::Bucket { snapshots, .. } => snapshots.save(name, snapshot),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobstore::MemoryObjectStore;
    use crate::path::VolPath;
    use crate::snapshot::SnapshotItem;
    use std::io::Read;
    use tempfile::tempdir;

    fn sample() -> Snapshot {
        Snapshot::new(vec![
            SnapshotItem::directory(VolPath::root()),
            SnapshotItem::link(VolPath::parse("/f").unwrap(), Checksum::of_bytes(b"f")),
        ])
        .unwrap()
    }

    #[test]
    fn test_bucket_remote_keeps_records_apart_from_blobs() {
        let store = Arc::new(MemoryObjectStore::new());
        store.insert("b", &format!("v1/{}", Checksum::of_bytes(b"f")), b"f".to_vec());
        let mut remote =
            RemoteVolume::from_store(store.clone(), "b", "v1/", RetryPolicy::once()).unwrap();

        remote.save_snapshot("daily", &sample()).unwrap();
        assert!(store.object("b", "v1/meta/snapshots/daily").is_some());
        assert_eq!(remote.load_snapshot("daily").unwrap(), sample());
        assert_eq!(remote.list_snapshots(None).unwrap(), vec!["daily"]);

        // the record key is not mistaken for a blob
        let blobs: Vec<Checksum> = remote.blobs().list_blobs().map(|r| r.unwrap()).collect();
        assert_eq!(blobs, vec![Checksum::of_bytes(b"f")]);
        assert!(remote.describe().starts_with("bucket b/v1/"));
    }

    #[test]
    fn test_volume_remote() {
        let dir = tempdir().unwrap();
        let volume = Volume::init(&dir.path().join("far")).unwrap();
        let src = dir.path().join("f");
        std::fs::write(&src, b"f").unwrap();
        volume
            .blobstore()
            .import_via_copy(&src, &Checksum::of_bytes(b"f"))
            .unwrap();

        let mut remote =
            RemoteVolume::open(&Remote::volume("far", dir.path().join("far")), &RetryPolicy::once())
                .unwrap();
        remote.save_snapshot("s", &sample()).unwrap();
        assert!(remote.has_snapshot("s").unwrap());
        assert!(!remote.has_snapshot("t").unwrap());

        let mut content = Vec::new();
        remote
            .blobs()
            .open_blob(&Checksum::of_bytes(b"f"))
            .unwrap()
            .read_to_end(&mut content)
            .unwrap();
        assert_eq!(content, b"f");
    }

    #[test]
    fn test_bucket_remote_needs_bucket_name() {
        let mut remote = Remote::bucket("r", "/nonexistent", "b", "");
        remote.bucket = None;
        assert!(matches!(
            RemoteVolume::open(&remote, &RetryPolicy::once()),
            Err(Error::InvalidName(_))
        ));
    }
}

use std::fs::File;
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};
use tracing::info;

use crate::blobstore::LocalBlobstore;
use crate::config::{Config, MetadataBackend};
use crate::error::{Error, IoResultExt, Result};
use crate::kv::{KeyDb, KvStore, PyramidStore};
use crate::snapshot::{LiveTree, SnapshotStore};

/// name of the metadata directory at the top of every volume
pub const META_DIR: &str = ".coldstore";

/// a coldstore volume: a working tree plus its metadata directory
pub struct Volume {
    root: PathBuf,
    config: Config,
}

impl Volume {
    /// initialize a new volume at `root` with default configuration
    pub fn init(root: &Path) -> Result<Self> {
        Self::init_with(root, Config::default())
    }

    /// initialize a new volume at `root`, creating it if needed
    pub fn init_with(root: &Path, config: Config) -> Result<Self> {
        config.layout.validate()?;
        std::fs::create_dir_all(root).with_path(root)?;
        let root = root.canonicalize().with_path(root)?;

        let meta = root.join(META_DIR);
        let config_path = meta.join("config.toml");
        if config_path.exists() {
            return Err(Error::VolumeExists(root));
        }

        // create directory structure
        for dir in ["blobs", "keys", "index", "tmp"] {
            let path = meta.join(dir);
            std::fs::create_dir_all(&path).with_path(&path)?;
        }
        config.save(&config_path)?;
        info!(root = %root.display(), backend = ?config.metadata.backend, "initialized volume");

        Ok(Self { root, config })
    }

    /// open an existing volume
    pub fn open(root: &Path) -> Result<Self> {
        let root = root
            .canonicalize()
            .map_err(|_| Error::NoVolume(root.to_path_buf()))?;
        let config_path = root.join(META_DIR).join("config.toml");
        if !config_path.exists() {
            return Err(Error::NoVolume(root));
        }
        let config = Config::load(&config_path)?;
        Ok(Self { root, config })
    }

    /// open the volume containing `path`, searching upwards
    pub fn discover(path: &Path) -> Result<Self> {
        let start = path
            .canonicalize()
            .map_err(|_| Error::NoVolume(path.to_path_buf()))?;
        let mut current = Some(start.as_path());
        while let Some(dir) = current {
            if dir.join(META_DIR).join("config.toml").is_file() {
                return Self::open(dir);
            }
            current = dir.parent();
        }
        Err(Error::NoVolume(start))
    }

    /// volume root (canonical)
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// save configuration changes
    pub fn save_config(&self) -> Result<()> {
        self.config.save(&self.config_path())
    }

    pub fn meta_path(&self) -> PathBuf {
        self.root.join(META_DIR)
    }

    pub fn config_path(&self) -> PathBuf {
        self.meta_path().join("config.toml")
    }

    /// sharded blob tree
    pub fn blobs_path(&self) -> PathBuf {
        self.meta_path().join("blobs")
    }

    /// `KeyDb` metadata records
    pub fn keys_path(&self) -> PathBuf {
        self.meta_path().join("keys")
    }

    /// `PyramidStore` layers and manifest
    pub fn index_path(&self) -> PathBuf {
        self.meta_path().join("index")
    }

    /// scratch space for atomic writes, on the volume's filesystem
    pub fn tmp_path(&self) -> PathBuf {
        self.meta_path().join("tmp")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.meta_path().join(".lock")
    }

    pub fn blobstore(&self) -> LocalBlobstore {
        LocalBlobstore::new(self.blobs_path(), self.tmp_path(), self.config.layout.clone())
    }

    /// the working tree, minus the metadata directory
    pub fn live_tree(&self) -> LiveTree {
        LiveTree::new(
            &self.root,
            vec![self.meta_path()],
            self.config.layout.clone(),
        )
    }

    /// metadata store selected by `[metadata] backend`
    pub fn metadata(&self) -> Result<Box<dyn KvStore>> {
        Ok(match self.config.metadata.backend {
            MetadataBackend::KeyDb => Box::new(KeyDb::open(self.keys_path(), self.tmp_path())?),
            MetadataBackend::Pyramid => Box::new(PyramidStore::open(
                self.index_path(),
                self.tmp_path(),
                self.config.metadata.buffer_limit,
            )?),
        })
    }

    pub fn snapshots(&self) -> Result<SnapshotStore<Box<dyn KvStore>>> {
        SnapshotStore::new(self.metadata()?)
    }

    /// acquire exclusive lock on the volume
    /// returns a guard that releases the lock on drop
    pub fn lock(&self) -> Result<VolumeLock> {
        let lock_path = self.lock_path();
        let file = File::create(&lock_path).with_path(&lock_path)?;

        let flock = Flock::lock(file, FlockArg::LockExclusiveNonblock)
            .map_err(|_| Error::LockContention)?;

        Ok(VolumeLock { _flock: flock })
    }

    /// try to acquire exclusive lock, returning None if already locked
    pub fn try_lock(&self) -> Result<Option<VolumeLock>> {
        let lock_path = self.lock_path();
        let file = File::create(&lock_path).with_path(&lock_path)?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(flock) => Ok(Some(VolumeLock { _flock: flock })),
            Err((_, nix::errno::Errno::EWOULDBLOCK)) => Ok(None),
            Err(_) => Err(Error::LockContention),
        }
    }
}

/// guard that holds the volume lock until dropped
pub struct VolumeLock {
    _flock: Flock<File>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MetadataConfig, Remote};
    use crate::kv::KvStore;
    use tempfile::tempdir;

    #[test]
    fn test_volume_init() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("vol");
        let volume = Volume::init(&root).unwrap();

        let meta = root.join(META_DIR);
        for sub in ["blobs", "keys", "index", "tmp"] {
            assert!(meta.join(sub).is_dir(), "{} missing", sub);
        }
        assert!(meta.join("config.toml").is_file());
        assert_eq!(volume.root(), root.canonicalize().unwrap());
    }

    #[test]
    fn test_volume_init_already_exists() {
        let dir = tempdir().unwrap();
        Volume::init(dir.path()).unwrap();
        assert!(matches!(
            Volume::init(dir.path()),
            Err(Error::VolumeExists(_))
        ));
    }

    #[test]
    fn test_volume_open_not_found() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            Volume::open(&dir.path().join("nonexistent")),
            Err(Error::NoVolume(_))
        ));
        assert!(matches!(Volume::open(dir.path()), Err(Error::NoVolume(_))));
    }

    #[test]
    fn test_discover_from_subdirectory() {
        let dir = tempdir().unwrap();
        let volume = Volume::init(dir.path()).unwrap();
        let sub = dir.path().join("a/b");
        std::fs::create_dir_all(&sub).unwrap();
        assert_eq!(Volume::discover(&sub).unwrap().root(), volume.root());
    }

    #[test]
    fn test_volume_lock() {
        let dir = tempdir().unwrap();
        let volume = Volume::init(dir.path()).unwrap();

        let lock = volume.lock().unwrap();
        assert!(volume.try_lock().unwrap().is_none());
        assert!(matches!(volume.lock(), Err(Error::LockContention)));
        drop(lock);
        assert!(volume.try_lock().unwrap().is_some());
    }

    #[test]
    fn test_metadata_backend_selection() {
        let dir = tempdir().unwrap();
        let config = Config {
            metadata: MetadataConfig {
                backend: MetadataBackend::Pyramid,
                buffer_limit: 4,
            },
            ..Config::default()
        };
        let volume = Volume::init_with(dir.path(), config).unwrap();
        let mut kv = volume.metadata().unwrap();
        kv.write("k", b"v").unwrap();
        kv.sync().unwrap();
        assert!(volume.index_path().join("MANIFEST").is_file());
        assert!(std::fs::read_dir(volume.keys_path()).unwrap().next().is_none());
    }

    #[test]
    fn test_config_modification() {
        let dir = tempdir().unwrap();
        let mut volume = Volume::init(dir.path()).unwrap();
        volume
            .config_mut()
            .add_remote(Remote::volume("backup", "/srv/backup"))
            .unwrap();
        volume.save_config().unwrap();

        let reopened = Volume::open(dir.path()).unwrap();
        assert_eq!(reopened.config().remotes.len(), 1);
        assert_eq!(reopened.config().remotes[0].name, "backup");
    }
}

use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use tracing::debug;
use walkdir::WalkDir;

use crate::blobstore::{BlobSource, ShardLayout};
use crate::checksum::{checksum_file, Checksum, ChecksumHasher};
use crate::error::{walk_error, Error, IoResultExt, Result};
use crate::fs;
use crate::path::VolPath;

/// blob store on local disk
///
/// blobs are read-only files at `root/<layout path>`. imports hardlink the
/// source file into place; live-tree entries point back at blobs through
/// relative symlinks.
#[derive(Debug, Clone)]
pub struct LocalBlobstore {
    root: PathBuf,
    tmp: PathBuf,
    layout: ShardLayout,
}

impl LocalBlobstore {
    /// `tmp` must be on the same filesystem as `root`
    pub fn new(root: impl Into<PathBuf>, tmp: impl Into<PathBuf>, layout: ShardLayout) -> Self {
        Self {
            root: root.into(),
            tmp: tmp.into(),
            layout,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn layout(&self) -> &ShardLayout {
        &self.layout
    }

    /// filesystem path of a blob, whether or not it exists
    pub fn blob_path(&self, checksum: &Checksum) -> PathBuf {
        self.root.join(self.layout.to_relative(checksum))
    }

    pub fn exists(&self, checksum: &Checksum) -> bool {
        self.blob_path(checksum).is_file()
    }

    /// hardlink `path` into the store under `checksum`
    ///
    /// returns `true` if the blob was already present, in which case the
    /// stored blob is left untouched. the caller vouches that `checksum` is
    /// the content hash of `path`.
    pub fn import_via_link(&self, path: &Path, checksum: &Checksum) -> Result<bool> {
        if self.exists(checksum) {
            return Ok(true);
        }

        let dst = self.blob_path(checksum);
        match fs::hardlink(path, &dst) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(true),
            Err(e) if e.raw_os_error() == Some(Errno::EXDEV as i32) => {
                debug!(path = %path.display(), "cross-device import, copying");
                return self.import_via_copy(path, checksum);
            }
            Err(e) => {
                return Err(Error::Io {
                    path: dst,
                    source: e,
                })
            }
        }
        fs::set_readonly(&dst)?;
        debug!(%checksum, path = %path.display(), "imported blob");
        Ok(false)
    }

    /// copy `path` into the store under `checksum`, leaving the source alone
    ///
    /// the copy is verified against `checksum` before it becomes visible.
    pub fn import_via_copy(&self, path: &Path, checksum: &Checksum) -> Result<bool> {
        if self.exists(checksum) {
            return Ok(true);
        }
        let mut file = File::open(path).with_path(path)?;
        let stored = self.store_from_reader(&mut file, checksum)?;
        Ok(!stored)
    }

    /// replace `path` with a relative symlink to the blob
    pub fn link_to_blob(&self, path: &Path, checksum: &Checksum) -> Result<()> {
        if !self.exists(checksum) {
            return Err(Error::BlobNotFound(*checksum));
        }
        let target = self.link_target(path, checksum)?;
        fs::replace_with_symlink(path, &target)
    }

    /// relative symlink target leading from `link` to the blob
    pub fn link_target(&self, link: &Path, checksum: &Checksum) -> Result<PathBuf> {
        let blob = VolPath::from_fs(&self.blob_path(checksum))?;
        let parent = link
            .parent()
            .ok_or_else(|| Error::InvalidPath(link.display().to_string()))?;
        let from = VolPath::from_fs(parent)?;
        Ok(blob.relative_to(&from))
    }

    /// checksum a symlink points at, if its target decodes through the layout
    pub fn checksum_of_link(&self, link: &Path) -> Result<Option<Checksum>> {
        let target = std::fs::read_link(link).with_path(link)?;
        Ok(self.layout.from_suffix(&target))
    }

    /// copy a blob from another store; returns `false` if it was already here
    pub fn fetch_blob(&self, source: &dyn BlobSource, checksum: &Checksum) -> Result<bool> {
        if self.exists(checksum) {
            return Ok(false);
        }
        let mut reader = source.open_blob(checksum)?;
        self.store_from_reader(&mut reader, checksum)?;
        debug!(%checksum, from = %source.describe(), "fetched blob");
        Ok(true)
    }

    /// remove a blob; absent blobs are ignored
    pub fn delete_blob(&self, checksum: &Checksum) -> Result<()> {
        let path = self.blob_path(checksum);
        fs::unlink(&path)?;
        if let Some(parent) = path.parent() {
            fs::remove_empty_parents(parent, &self.root)?;
        }
        Ok(())
    }

    /// lazily enumerate stored blobs by decoding their paths
    pub fn blobs(&self) -> impl Iterator<Item = Result<Checksum>> + '_ {
        let depth = self.layout.depth();
        WalkDir::new(&self.root)
            .min_depth(depth)
            .max_depth(depth)
            .sort_by_file_name()
            .into_iter()
            .filter_map(move |entry| {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => return Some(Err(walk_error(&self.root, e))),
                };
                if !entry.file_type().is_file() {
                    return None;
                }
                let rel = entry.path().strip_prefix(&self.root).ok()?;
                self.layout.from_suffix(rel).map(Ok)
            })
    }

    /// recompute a blob's content hash
    pub fn checksum(&self, checksum: &Checksum) -> Result<Checksum> {
        let path = self.blob_path(checksum);
        if !path.is_file() {
            return Err(Error::BlobNotFound(*checksum));
        }
        checksum_file(&path)
    }

    /// true iff the blob carries no write permission
    pub fn verify_permissions(&self, checksum: &Checksum) -> Result<bool> {
        let path = self.blob_path(checksum);
        if !path.is_file() {
            return Err(Error::BlobNotFound(*checksum));
        }
        fs::is_readonly(&path)
    }

    pub fn size(&self, checksum: &Checksum) -> Result<u64> {
        let path = self.blob_path(checksum);
        let meta = std::fs::metadata(&path).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                Error::BlobNotFound(*checksum)
            } else {
                Error::Io {
                    path: path.clone(),
                    source: e,
                }
            }
        })?;
        Ok(meta.len())
    }

    /// write a stream into the store, verifying it hashes to `checksum`
    ///
    /// returns `false` if another writer placed the blob first.
    fn store_from_reader(&self, reader: &mut dyn Read, checksum: &Checksum) -> Result<bool> {
        let tmp_path = self.tmp.join(uuid::Uuid::new_v4().to_string());

        let mut hasher = ChecksumHasher::new();
        {
            let mut tmp_file = File::create(&tmp_path).with_path(&tmp_path)?;
            let mut buf = [0u8; 64 * 1024];
            loop {
                let n = match reader.read(&mut buf) {
                    Ok(n) => n,
                    Err(e) => {
                        let _ = std::fs::remove_file(&tmp_path);
                        return Err(Error::Io {
                            path: tmp_path,
                            source: e,
                        });
                    }
                };
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                tmp_file.write_all(&buf[..n]).with_path(&tmp_path)?;
            }
            tmp_file.sync_all().with_path(&tmp_path)?;
        }

        let actual = hasher.finalize();
        if actual != *checksum {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(Error::CorruptBlob {
                expected: *checksum,
                actual,
            });
        }

        let dst = self.blob_path(checksum);
        if dst.is_file() {
            std::fs::remove_file(&tmp_path).with_path(&tmp_path)?;
            return Ok(false);
        }
        fs::set_readonly(&tmp_path)?;
        let parent = dst
            .parent()
            .ok_or_else(|| Error::InvalidPath(dst.display().to_string()))?;
        fs::mkdir_recursive(parent)?;
        fs::rename(&tmp_path, &dst)?;
        fs::fsync_dir(parent)?;
        Ok(true)
    }
}

impl BlobSource for LocalBlobstore {
    fn has_blob(&self, checksum: &Checksum) -> Result<bool> {
        Ok(self.exists(checksum))
    }

    fn open_blob(&self, checksum: &Checksum) -> Result<Box<dyn Read + '_>> {
        let path = self.blob_path(checksum);
        let file = File::open(&path).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                Error::BlobNotFound(*checksum)
            } else {
                Error::Io {
                    path: path.clone(),
                    source: e,
                }
            }
        })?;
        Ok(Box::new(file))
    }

    fn list_blobs(&self) -> Box<dyn Iterator<Item = Result<Checksum>> + '_> {
        Box::new(self.blobs())
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}

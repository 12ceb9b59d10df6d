use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::blobstore::{BlobSource, ObjectStore};
use crate::checksum::Checksum;
use crate::error::{Error, IoResultExt, Result};
use crate::retry::{retry, RetryPolicy};

/// checksum and stored size of a remote blob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobStat {
    pub checksum: Checksum,
    pub size: u64,
}

/// blob store kept as flat `<prefix><hex>` keys in an object storage bucket
///
/// the remote side is an archive: blobs are added, never removed.
#[derive(Clone)]
pub struct RemoteBlobstore {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    prefix: String,
    retry: RetryPolicy,
}

impl RemoteBlobstore {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            prefix: prefix.into(),
            retry,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn key(&self, checksum: &Checksum) -> String {
        format!("{}{}", self.prefix, checksum.to_hex())
    }

    /// every blob under the prefix with its size
    ///
    /// keys that are not a lowercase hex checksum are skipped.
    pub fn blob_stats(&self) -> Result<Vec<BlobStat>> {
        let objects = self.store.list_keys(&self.bucket, &self.prefix)?;
        Ok(objects
            .into_iter()
            .filter_map(|obj| {
                let hex = obj.key.strip_prefix(&self.prefix)?;
                let checksum = Checksum::from_hex(hex).ok()?;
                Some(BlobStat {
                    checksum,
                    size: obj.size,
                })
            })
            .collect())
    }

    pub fn blobs(&self) -> Result<Vec<Checksum>> {
        Ok(self.blob_stats()?.into_iter().map(|s| s.checksum).collect())
    }

    pub fn exists(&self, checksum: &Checksum) -> Result<bool> {
        Ok(self
            .store
            .head_object(&self.bucket, &self.key(checksum))?
            .is_some())
    }

    /// stream a blob; `Error::BlobNotFound` if the key is absent
    pub fn read_handle(&self, checksum: &Checksum) -> Result<Box<dyn Read + Send>> {
        match self.store.get_object(&self.bucket, &self.key(checksum)) {
            Err(Error::KeyNotFound(_)) => Err(Error::BlobNotFound(*checksum)),
            other => other,
        }
    }

    /// upload the file at `path` as blob `checksum`
    ///
    /// puts are retried under the store's policy: a 2xx status is success,
    /// 429 and 5xx answers and transient errors are retried, any other
    /// status fails at once with `Error::RemoteStatus`. returns `false` when
    /// the retry budget ran out.
    pub fn upload(&self, checksum: &Checksum, path: &Path) -> Result<bool> {
        let key = self.key(checksum);
        let mut file = File::open(path).with_path(path)?;

        let status = retry(
            &self.retry,
            || -> Result<u16> {
                file.seek(SeekFrom::Start(0)).with_path(path)?;
                let status = self.store.put_object(&self.bucket, &key, &mut file)?;
                if (400..500).contains(&status) && status != 429 {
                    return Err(Error::RemoteStatus(status));
                }
                Ok(status)
            },
            |status| (200..300).contains(status),
            Error::is_transient,
        )?;

        match status {
            Some(status) => {
                debug!(%checksum, status, bucket = %self.bucket, "uploaded blob");
                Ok(true)
            }
            None => {
                warn!(%checksum, bucket = %self.bucket, "giving up on blob upload");
                Ok(false)
            }
        }
    }

    pub fn url(&self, checksum: &Checksum) -> String {
        self.store.url(&self.bucket, &self.key(checksum))
    }

    /// whether the stored object's ETag equals the blob checksum
    ///
    /// only meaningful for single-part uploads, where the ETag is the MD5.
    pub fn etag_matches(&self, checksum: &Checksum) -> Result<bool> {
        let head = self.store.head_object(&self.bucket, &self.key(checksum))?;
        Ok(head
            .map(|h| h.etag.trim_matches('"').eq_ignore_ascii_case(&checksum.to_hex()))
            .unwrap_or(false))
    }
}

impl BlobSource for RemoteBlobstore {
    fn has_blob(&self, checksum: &Checksum) -> Result<bool> {
        self.exists(checksum)
    }

    fn open_blob(&self, checksum: &Checksum) -> Result<Box<dyn Read + '_>> {
        let handle: Box<dyn Read> = self.read_handle(checksum)?;
        Ok(handle)
    }

    fn list_blobs(&self) -> Box<dyn Iterator<Item = Result<Checksum>> + '_> {
        match self.blobs() {
            Ok(blobs) => Box::new(blobs.into_iter().map(Ok)),
            Err(e) => Box::new(std::iter::once(Err(e))),
        }
    }

    fn describe(&self) -> String {
        format!("bucket {}/{}", self.bucket, self.prefix)
    }
}

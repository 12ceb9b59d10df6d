//! object storage backends
//!
//! the archive side of replication talks to an existing put/get/list/head
//! key-value blob API. `ObjectStore` is that API; two implementations ship
//! with the crate: a directory-backed store for mounted archives and an
//! in-process store with fault injection.

use std::collections::{BTreeMap, VecDeque};
use std::fs::{self, File};
use std::io::{Cursor, ErrorKind, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use walkdir::WalkDir;

use crate::checksum::{checksum_file, Checksum};
use crate::error::{walk_error, Error, IoResultExt, Result};

/// listing entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
}

/// result of a head request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHead {
    pub size: u64,
    /// hex MD5 of the content for single-part uploads
    pub etag: String,
}

pub trait ObjectStore: Send + Sync {
    /// keys under `prefix`, sorted
    fn list_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectInfo>>;

    /// stream an object; `Error::KeyNotFound` if absent
    fn get_object(&self, bucket: &str, key: &str) -> Result<Box<dyn Read + Send>>;

    /// store an object, returning the service's status code
    fn put_object(&self, bucket: &str, key: &str, body: &mut dyn Read) -> Result<u16>;

    /// object metadata, `None` if absent
    fn head_object(&self, bucket: &str, key: &str) -> Result<Option<ObjectHead>>;

    /// locator a client can fetch the object from
    fn url(&self, bucket: &str, key: &str) -> String;
}

/// reject keys that could escape a bucket directory
fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.starts_with('/') || key.contains('\0') {
        return Err(Error::InvalidName(format!("object key {:?}", key)));
    }
    for component in Path::new(key).components() {
        if !matches!(component, Component::Normal(_)) {
            return Err(Error::InvalidName(format!("object key {:?}", key)));
        }
    }
    Ok(())
}

/// buckets are directories below `root`, keys are relative paths
#[derive(Debug, Clone)]
pub struct DirObjectStore {
    root: PathBuf,
}

impl DirObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        validate_key(bucket)?;
        validate_key(key)?;
        Ok(self.root.join(bucket).join(key))
    }

    fn tmp_dir(&self) -> PathBuf {
        self.root.join(".tmp")
    }
}

impl ObjectStore for DirObjectStore {
    fn list_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectInfo>> {
        validate_key(bucket)?;
        let bucket_dir = self.root.join(bucket);
        if !bucket_dir.is_dir() {
            return Ok(vec![]);
        }

        let mut keys = Vec::new();
        for entry in WalkDir::new(&bucket_dir).min_depth(1) {
            let entry = entry.map_err(|e| walk_error(&bucket_dir, e))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&bucket_dir) else {
                continue;
            };
            let Some(key) = rel.to_str() else {
                continue;
            };
            if key.starts_with(prefix) {
                let size = entry.metadata().map_err(|e| walk_error(&bucket_dir, e))?.len();
                keys.push(ObjectInfo {
                    key: key.to_string(),
                    size,
                });
            }
        }
        keys.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(keys)
    }

    fn get_object(&self, bucket: &str, key: &str) -> Result<Box<dyn Read + Send>> {
        let path = self.object_path(bucket, key)?;
        match File::open(&path) {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::KeyNotFound(key.to_string())),
            Err(e) => Err(Error::Io { path, source: e }),
        }
    }

    fn put_object(&self, bucket: &str, key: &str, body: &mut dyn Read) -> Result<u16> {
        let path = self.object_path(bucket, key)?;
        let tmp_dir = self.tmp_dir();
        fs::create_dir_all(&tmp_dir).with_path(&tmp_dir)?;
        let tmp_path = tmp_dir.join(uuid::Uuid::new_v4().to_string());
        {
            let mut tmp_file = File::create(&tmp_path).with_path(&tmp_path)?;
            std::io::copy(body, &mut tmp_file).with_path(&tmp_path)?;
            tmp_file.flush().with_path(&tmp_path)?;
            tmp_file.sync_all().with_path(&tmp_path)?;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_path(parent)?;
        }
        fs::rename(&tmp_path, &path).with_path(&path)?;
        Ok(200)
    }

    fn head_object(&self, bucket: &str, key: &str) -> Result<Option<ObjectHead>> {
        let path = self.object_path(bucket, key)?;
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Ok(Some(ObjectHead {
                size: meta.len(),
                etag: checksum_file(&path)?.to_hex(),
            })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io { path, source: e }),
        }
    }

    fn url(&self, bucket: &str, key: &str) -> String {
        format!("file://{}", self.root.join(bucket).join(key).display())
    }
}

/// scripted failure for the next `put_object` calls of a `MemoryObjectStore`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutFault {
    /// fail with `Error::Remote`
    Error { transient: bool },
    /// answer with this status without storing anything
    Status(u16),
}

/// in-process object store
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<(String, String), Vec<u8>>>,
    faults: Mutex<VecDeque<PutFault>>,
    put_calls: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// queue faults consumed by subsequent puts, in order
    pub fn inject_put_faults(&self, faults: impl IntoIterator<Item = PutFault>) {
        self.faults.lock().extend(faults);
    }

    /// make the next `n` puts fail with an error
    pub fn fail_puts(&self, n: usize, transient: bool) {
        self.inject_put_faults(std::iter::repeat(PutFault::Error { transient }).take(n));
    }

    /// make the next `n` puts answer `status` without storing
    pub fn reject_puts(&self, n: usize, status: u16) {
        self.inject_put_faults(std::iter::repeat(PutFault::Status(status)).take(n));
    }

    /// number of `put_object` calls so far, failed ones included
    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    /// raw object bytes
    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// overwrite an object directly, bypassing faults
    pub fn insert(&self, bucket: &str, key: &str, data: Vec<u8>) {
        self.objects
            .lock()
            .insert((bucket.to_string(), key.to_string()), data);
    }
}

impl ObjectStore for MemoryObjectStore {
    fn list_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let objects = self.objects.lock();
        Ok(objects
            .iter()
            .filter(|((b, k), _)| b == bucket && k.starts_with(prefix))
            .map(|((_, k), v)| ObjectInfo {
                key: k.clone(),
                size: v.len() as u64,
            })
            .collect())
    }

    fn get_object(&self, bucket: &str, key: &str) -> Result<Box<dyn Read + Send>> {
        let data = self
            .object(bucket, key)
            .ok_or_else(|| Error::KeyNotFound(key.to_string()))?;
        Ok(Box::new(Cursor::new(data)))
    }

    fn put_object(&self, bucket: &str, key: &str, body: &mut dyn Read) -> Result<u16> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(fault) = self.faults.lock().pop_front() {
            return match fault {
                PutFault::Error { transient } => Err(Error::Remote {
                    message: format!("injected failure storing {}", key),
                    transient,
                }),
                PutFault::Status(status) => Ok(status),
            };
        }
        let mut data = Vec::new();
        body.read_to_end(&mut data).with_path(key)?;
        self.insert(bucket, key, data);
        Ok(200)
    }

    fn head_object(&self, bucket: &str, key: &str) -> Result<Option<ObjectHead>> {
        Ok(self.object(bucket, key).map(|data| ObjectHead {
            size: data.len() as u64,
            etag: Checksum::of_bytes(&data).to_hex(),
        }))
    }

    fn url(&self, bucket: &str, key: &str) -> String {
        format!("memory://{}/{}", bucket, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn exercise(store: &dyn ObjectStore) {
        assert!(store.list_keys("b", "").unwrap().is_empty());
        assert!(store.head_object("b", "p/k1").unwrap().is_none());
        assert!(matches!(
            store.get_object("b", "p/k1"),
            Err(Error::KeyNotFound(_))
        ));

        assert_eq!(store.put_object("b", "p/k1", &mut &b"one"[..]).unwrap(), 200);
        assert_eq!(store.put_object("b", "p/k2", &mut &b"two!"[..]).unwrap(), 200);
        assert_eq!(store.put_object("b", "q/k3", &mut &b"3"[..]).unwrap(), 200);
        assert_eq!(store.put_object("other", "p/k9", &mut &b"9"[..]).unwrap(), 200);

        let keys = store.list_keys("b", "p/").unwrap();
        assert_eq!(
            keys,
            vec![
                ObjectInfo {
                    key: "p/k1".into(),
                    size: 3
                },
                ObjectInfo {
                    key: "p/k2".into(),
                    size: 4
                },
            ]
        );

        let mut content = Vec::new();
        store
            .get_object("b", "p/k2")
            .unwrap()
            .read_to_end(&mut content)
            .unwrap();
        assert_eq!(content, b"two!");

        let head = store.head_object("b", "p/k1").unwrap().unwrap();
        assert_eq!(head.size, 3);
        assert_eq!(head.etag, Checksum::of_bytes(b"one").to_hex());
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemoryObjectStore::new());
    }

    #[test]
    fn test_dir_store() {
        let dir = tempdir().unwrap();
        let store = DirObjectStore::new(dir.path());
        exercise(&store);
        // temp area never shows up as a bucket key
        assert!(store.list_keys("b", "").unwrap().iter().all(|o| !o.key.contains(".tmp")));
        assert!(store.url("b", "p/k1").starts_with("file://"));
    }

    #[test]
    fn test_dir_store_rejects_escaping_keys() {
        let dir = tempdir().unwrap();
        let store = DirObjectStore::new(dir.path());
        assert!(store.put_object("b", "../evil", &mut &b"x"[..]).is_err());
        assert!(store.put_object("b", "/abs", &mut &b"x"[..]).is_err());
        assert!(store.get_object("..", "k").is_err());
    }

    #[test]
    fn test_memory_faults() {
        let store = MemoryObjectStore::new();
        store.inject_put_faults([PutFault::Error { transient: true }, PutFault::Status(503)]);

        let err = store.put_object("b", "k", &mut &b"x"[..]).unwrap_err();
        assert!(err.is_transient());
        assert_eq!(store.put_object("b", "k", &mut &b"x"[..]).unwrap(), 503);
        assert!(store.object("b", "k").is_none());
        assert_eq!(store.put_object("b", "k", &mut &b"x"[..]).unwrap(), 200);
        assert_eq!(store.object("b", "k").unwrap(), b"x");
        assert_eq!(store.put_calls(), 3);
    }
}

use std::io::Read;
use std::sync::Arc;

use tracing::warn;

use crate::blobstore::ObjectStore;
use crate::error::{Error, IoResultExt, Result};
use crate::kv::{validate_key, KvStore};
use crate::retry::{retry, RetryPolicy};

/// keys stored as objects under a prefix in an object storage bucket
///
/// the bucket is an archive: writes are retried under the policy, deletes
/// are refused.
pub struct ObjectKv {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    prefix: String,
    retry: RetryPolicy,
}

impl ObjectKv {
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

    fn object_key(&self, key: &str) -> Result<String> {
        validate_key(key)?;
        Ok(format!("{}{}", self.prefix, key))
    }
}

impl KvStore for ObjectKv {
    fn read(&self, key: &str) -> Result<Vec<u8>> {
        let object_key = self.object_key(key)?;
        let mut reader = match self.store.get_object(&self.bucket, &object_key) {
            Err(Error::KeyNotFound(_)) => return Err(Error::KeyNotFound(key.to_string())),
            other => other?,
        };
        let mut value = Vec::new();
        reader.read_to_end(&mut value).with_path(&object_key)?;
        Ok(value)
    }

    fn write(&mut self, key: &str, value: &[u8]) -> Result<()> {
        let object_key = self.object_key(key)?;
        let stored = retry(
            &self.retry,
            || -> Result<u16> {
                let status = self.store.put_object(&self.bucket, &object_key, &mut &value[..])?;
                if (400..500).contains(&status) && status != 429 {
                    return Err(Error::RemoteStatus(status));
                }
                Ok(status)
            },
            |status| (200..300).contains(status),
            Error::is_transient,
        )?;
        if stored.is_none() {
            warn!(key, bucket = %self.bucket, "giving up on metadata write");
            return Err(Error::RetriesExhausted(format!("writing {}", object_key)));
        }
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        Err(Error::Unsupported(format!(
            "deleting {} from archive bucket {}",
            key, self.bucket
        )))
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .store
            .list_keys(&self.bucket, &self.prefix)?
            .into_iter()
            .filter_map(|obj| obj.key.strip_prefix(&self.prefix).map(str::to_string))
            .filter(|key| validate_key(key).is_ok())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobstore::MemoryObjectStore;
    use std::time::Duration;

    fn setup() -> (Arc<MemoryObjectStore>, ObjectKv) {
        let store = Arc::new(MemoryObjectStore::new());
        let kv = ObjectKv::new(store.clone(), "b", "meta/", RetryPolicy::new(2, Duration::ZERO));
        (store, kv)
    }

    #[test]
    fn test_read_write_list() {
        let (store, mut kv) = setup();
        kv.write("snapshots/one", b"1").unwrap();
        kv.write("other", b"2").unwrap();
        store.insert("b", "elsewhere/x", b"3".to_vec());

        assert_eq!(kv.read("snapshots/one").unwrap(), b"1");
        assert_eq!(kv.list().unwrap(), vec!["other", "snapshots/one"]);
        assert!(matches!(kv.read("missing"), Err(Error::KeyNotFound(k)) if k == "missing"));
    }

    #[test]
    fn test_delete_unsupported() {
        let (_, mut kv) = setup();
        kv.write("k", b"v").unwrap();
        assert!(matches!(kv.delete("k"), Err(Error::Unsupported(_))));
        assert_eq!(kv.read("k").unwrap(), b"v");
    }

    #[test]
    fn test_write_retries_then_gives_up() {
        let (store, mut kv) = setup();
        store.reject_puts(1, 500);
        kv.write("k", b"v").unwrap();
        assert_eq!(store.put_calls(), 2);

        store.fail_puts(2, true);
        assert!(matches!(kv.write("j", b"v"), Err(Error::RetriesExhausted(_))));
    }
}

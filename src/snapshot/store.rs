use tracing::debug;

use crate::error::{Error, Result};
use crate::kv::{validate_key, KvStore, Window};
use crate::snapshot::{decode_snapshot, encode_snapshot, Snapshot};

const SNAPSHOT_PREFIX: &str = "snapshots";

/// named snapshot records in a metadata store
pub struct SnapshotStore<S> {
    kv: Window<S>,
}

impl<S: KvStore> SnapshotStore<S> {
    pub fn new(kv: S) -> Result<Self> {
        Ok(Self {
            kv: Window::new(kv, SNAPSHOT_PREFIX)?,
        })
    }

    /// persist a new snapshot; names are never overwritten
    pub fn save(&mut self, name: &str, snapshot: &Snapshot) -> Result<()> {
        validate_key(name)?;
        if self.kv.contains(name)? {
            return Err(Error::SnapshotExists(name.to_string()));
        }
        self.kv.write(name, &encode_snapshot(snapshot)?)?;
        self.kv.sync()?;
        debug!(name, items = snapshot.len(), "saved snapshot");
        Ok(())
    }

    pub fn load(&self, name: &str) -> Result<Snapshot> {
        match self.kv.read(name) {
            Ok(bytes) => decode_snapshot(&bytes),
            Err(Error::KeyNotFound(_)) => Err(Error::SnapshotNotFound(name.to_string())),
            Err(e) => Err(e),
        }
    }

    /// remove a snapshot record; blobs are untouched
    pub fn delete(&mut self, name: &str) -> Result<()> {
        match self.kv.delete(name) {
            Ok(()) => {}
            Err(Error::KeyNotFound(_)) => return Err(Error::SnapshotNotFound(name.to_string())),
            Err(e) => return Err(e),
        }
        self.kv.sync()?;
        debug!(name, "deleted snapshot");
        Ok(())
    }

    pub fn exists(&self, name: &str) -> Result<bool> {
        validate_key(name)?;
        self.kv.contains(name)
    }

    /// names, sorted, optionally filtered by a glob pattern
    pub fn list(&self, pattern: Option<&str>) -> Result<Vec<String>> {
        let names = self.kv.list()?;
        match pattern {
            None => Ok(names),
            Some(pattern) => {
                let glob =
                    glob::Pattern::new(pattern).map_err(|e| Error::InvalidName(e.to_string()))?;
                Ok(names.into_iter().filter(|n| glob.matches(n)).collect())
            }
        }
    }

    /// every stored snapshot, in name order
    pub fn load_all(&self) -> Result<Vec<(String, Snapshot)>> {
        self.list(None)?
            .into_iter()
            .map(|name| {
                let snapshot = self.load(&name)?;
                Ok((name, snapshot))
            })
            .collect()
    }

    pub fn into_inner(self) -> S {
        self.kv.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::Checksum;
    use crate::kv::{KeyDb, PyramidStore};
    use crate::path::VolPath;
    use crate::snapshot::SnapshotItem;
    use tempfile::tempdir;

    fn sample(content: &[u8]) -> Snapshot {
        Snapshot::new(vec![
            SnapshotItem::directory(VolPath::root()),
            SnapshotItem::link(VolPath::parse("/f").unwrap(), Checksum::of_bytes(content)),
        ])
        .unwrap()
    }

    fn exercise<S: KvStore>(mut store: SnapshotStore<S>) {
        store.save("daily/2024-01-01", &sample(b"1")).unwrap();
        store.save("daily/2024-01-02", &sample(b"2")).unwrap();
        store.save("weekly", &sample(b"3")).unwrap();

        assert!(matches!(
            store.save("weekly", &sample(b"x")),
            Err(Error::SnapshotExists(_))
        ));
        assert_eq!(store.load("daily/2024-01-02").unwrap(), sample(b"2"));
        assert!(store.exists("weekly").unwrap());
        assert_eq!(
            store.list(Some("daily/*")).unwrap(),
            vec!["daily/2024-01-01", "daily/2024-01-02"]
        );
        assert_eq!(store.load_all().unwrap().len(), 3);

        store.delete("weekly").unwrap();
        assert!(matches!(store.load("weekly"), Err(Error::SnapshotNotFound(_))));
        assert!(matches!(store.delete("weekly"), Err(Error::SnapshotNotFound(_))));
        assert!(matches!(store.save("../bad", &sample(b"x")), Err(Error::InvalidName(_))));
        assert!(store.list(Some("[")).is_err());
    }

    #[test]
    fn test_keydb_backed() {
        let dir = tempdir().unwrap();
        let db = KeyDb::open(dir.path().join("keys"), dir.path().join("tmp")).unwrap();
        exercise(SnapshotStore::new(db).unwrap());
    }

    #[test]
    fn test_pyramid_backed() {
        let dir = tempdir().unwrap();
        let db = PyramidStore::open(dir.path().join("index"), dir.path().join("tmp"), 2).unwrap();
        exercise(SnapshotStore::new(db).unwrap());

        // saves sync, so a reopened store sees them
        let db = PyramidStore::open(dir.path().join("index"), dir.path().join("tmp"), 2).unwrap();
        let store = SnapshotStore::new(db).unwrap();
        assert_eq!(store.list(None).unwrap().len(), 2);
    }

    #[test]
    fn test_boxed_backend() {
        let dir = tempdir().unwrap();
        let db: Box<dyn KvStore> =
            Box::new(KeyDb::open(dir.path().join("keys"), dir.path().join("tmp")).unwrap());
        exercise(SnapshotStore::new(db).unwrap());
    }
}

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{Error, IoResultExt, Result};
use crate::kv::{validate_key, KvStore};

const DIGEST_TAG: &str = "sha256:";

/// one file per key under a directory
///
/// each record is a `sha256:<hex>` digest line followed by the raw value;
/// reads verify the digest. writes go through `tmp` and are renamed into
/// place, so a record is either absent or complete.
#[derive(Debug, Clone)]
pub struct KeyDb {
    root: PathBuf,
    tmp: PathBuf,
}

impl KeyDb {
    /// open or create a store at `root`; `tmp` must share its filesystem
    pub fn open(root: impl Into<PathBuf>, tmp: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let tmp = tmp.into();
        fs::create_dir_all(&root).with_path(&root)?;
        fs::create_dir_all(&tmp).with_path(&tmp)?;
        Ok(Self { root, tmp })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn encode(value: &[u8]) -> Vec<u8> {
        let digest = hex::encode(Sha256::digest(value));
        let mut record = Vec::with_capacity(DIGEST_TAG.len() + digest.len() + 1 + value.len());
        record.extend_from_slice(DIGEST_TAG.as_bytes());
        record.extend_from_slice(digest.as_bytes());
        record.push(b'\n');
        record.extend_from_slice(value);
        record
    }

    fn decode(key: &str, record: &[u8]) -> Result<Vec<u8>> {
        let corrupt = || Error::CorruptRecord(key.to_string());
        let newline = record.iter().position(|&b| b == b'\n').ok_or_else(corrupt)?;
        let header = std::str::from_utf8(&record[..newline]).map_err(|_| corrupt())?;
        let expected = header.strip_prefix(DIGEST_TAG).ok_or_else(corrupt)?;
        let value = &record[newline + 1..];
        if hex::encode(Sha256::digest(value)) != expected {
            return Err(corrupt());
        }
        Ok(value.to_vec())
    }

    fn collect_keys(&self, dir: &Path, keys: &mut Vec<String>) -> Result<()> {
        for entry in fs::read_dir(dir).with_path(dir)? {
            let entry = entry.with_path(dir)?;
            let path = entry.path();
            let file_type = entry.file_type().with_path(&path)?;
            if file_type.is_dir() {
                self.collect_keys(&path, keys)?;
            } else if file_type.is_file() {
                if let Some(key) = path.strip_prefix(&self.root).ok().and_then(|p| p.to_str()) {
                    keys.push(key.to_string());
                }
            }
        }
        Ok(())
    }
}

impl KvStore for KeyDb {
    fn read(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.key_path(key)?;
        let record = match fs::read(&path) {
            Ok(record) => record,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::KeyNotFound(key.to_string()))
            }
            // a key shadowed by a directory of longer keys
            Err(_) if path.is_dir() => return Err(Error::KeyNotFound(key.to_string())),
            Err(e) => return Err(Error::Io { path, source: e }),
        };
        Self::decode(key, &record)
    }

    fn write(&mut self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.key_path(key)?;
        crate::fs::write_atomic(&path, &self.tmp, &Self::encode(value))
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        let path = self.key_path(key)?;
        if !path.is_file() {
            return Err(Error::KeyNotFound(key.to_string()));
        }
        fs::remove_file(&path).with_path(&path)?;
        if let Some(parent) = path.parent() {
            crate::fs::remove_empty_parents(parent, &self.root)?;
        }
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        if self.root.is_dir() {
            self.collect_keys(&self.root, &mut keys)?;
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open(dir: &Path) -> KeyDb {
        KeyDb::open(dir.join("keys"), dir.join("tmp")).unwrap()
    }

    #[test]
    fn test_write_read_overwrite() {
        let dir = tempdir().unwrap();
        let mut db = open(dir.path());

        db.write("a", b"first").unwrap();
        assert_eq!(db.read("a").unwrap(), b"first");
        db.write("a", b"second").unwrap();
        assert_eq!(db.read("a").unwrap(), b"second");

        // empty and binary values survive the header line
        db.write("empty", b"").unwrap();
        assert_eq!(db.read("empty").unwrap(), b"");
        db.write("bin", b"\n\0\n").unwrap();
        assert_eq!(db.read("bin").unwrap(), b"\n\0\n");
    }

    #[test]
    fn test_record_format() {
        let dir = tempdir().unwrap();
        let mut db = open(dir.path());
        db.write("k", b"hello").unwrap();

        let raw = fs::read_to_string(db.root().join("k")).unwrap();
        assert_eq!(
            raw,
            "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824\nhello"
        );
    }

    #[test]
    fn test_corruption_detected() {
        let dir = tempdir().unwrap();
        let mut db = open(dir.path());
        db.write("k", b"hello").unwrap();

        let path = db.root().join("k");
        let mut raw = fs::read(&path).unwrap();
        let last = raw.len() - 1;
        raw[last] = b'O';
        fs::write(&path, raw).unwrap();
        assert!(matches!(db.read("k"), Err(Error::CorruptRecord(_))));

        fs::write(&path, b"no header").unwrap();
        assert!(matches!(db.read("k"), Err(Error::CorruptRecord(_))));
    }

    #[test]
    fn test_hierarchical_keys() {
        let dir = tempdir().unwrap();
        let mut db = open(dir.path());
        db.write("snapshots/b", b"2").unwrap();
        db.write("snapshots/a", b"1").unwrap();
        db.write("top", b"t").unwrap();

        assert_eq!(db.list().unwrap(), vec!["snapshots/a", "snapshots/b", "top"]);
        assert!(matches!(db.read("snapshots"), Err(Error::KeyNotFound(_))));

        db.delete("snapshots/a").unwrap();
        db.delete("snapshots/b").unwrap();
        assert!(!db.root().join("snapshots").exists());
        assert_eq!(db.list().unwrap(), vec!["top"]);
    }

    #[test]
    fn test_missing_and_invalid_keys() {
        let dir = tempdir().unwrap();
        let mut db = open(dir.path());
        assert!(matches!(db.read("nope"), Err(Error::KeyNotFound(_))));
        assert!(matches!(db.delete("nope"), Err(Error::KeyNotFound(_))));
        assert!(matches!(db.write("../escape", b"x"), Err(Error::InvalidName(_))));
        assert!(matches!(db.read("/abs"), Err(Error::InvalidName(_))));
    }
}

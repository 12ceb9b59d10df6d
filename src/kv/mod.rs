//! key/value metadata stores
//!
//! snapshot records and other volume metadata live behind `KvStore`. which
//! implementation backs a volume is chosen by its `[metadata]` config.

mod keydb;
mod object;
mod pyramid;
mod pyramid_store;

pub use keydb::KeyDb;
pub use object::ObjectKv;
pub use pyramid::{Layer, Pyramid};
pub use pyramid_store::PyramidStore;

use crate::error::{Error, Result};

/// byte-valued store keyed by ref-style names
pub trait KvStore {
    /// value for `key`; `Error::KeyNotFound` if absent
    fn read(&self, key: &str) -> Result<Vec<u8>>;

    /// create or replace
    fn write(&mut self, key: &str, value: &[u8]) -> Result<()>;

    /// remove; `Error::KeyNotFound` if absent
    fn delete(&mut self, key: &str) -> Result<()>;

    /// all keys, sorted
    fn list(&self) -> Result<Vec<String>>;

    /// make preceding writes durable
    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn contains(&self, key: &str) -> Result<bool> {
        match self.read(key) {
            Ok(_) => Ok(true),
            Err(Error::KeyNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl<S: KvStore + ?Sized> KvStore for Box<S> {
    fn read(&self, key: &str) -> Result<Vec<u8>> {
        (**self).read(key)
    }

    fn write(&mut self, key: &str, value: &[u8]) -> Result<()> {
        (**self).write(key, value)
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        (**self).delete(key)
    }

    fn list(&self) -> Result<Vec<String>> {
        (**self).list()
    }

    fn sync(&mut self) -> Result<()> {
        (**self).sync()
    }

    fn contains(&self, key: &str) -> Result<bool> {
        (**self).contains(key)
    }
}

/// validate a key against ref name rules
///
/// keys may contain `/` for hierarchy, but no empty, `.` or `..` segments.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidName("empty key".into()));
    }
    if key.starts_with('/') || key.ends_with('/') {
        return Err(Error::InvalidName(format!(
            "key cannot start or end with '/': {}",
            key
        )));
    }
    if key.contains('\0') {
        return Err(Error::InvalidName(format!("key contains NUL: {:?}", key)));
    }
    for segment in key.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(Error::InvalidName(format!("invalid key segment in {}", key)));
        }
    }
    Ok(())
}

/// view of a store restricted to keys under `prefix`
///
/// keys passed in and listed out are relative to the prefix.
pub struct Window<S> {
    inner: S,
    prefix: String,
}

impl<S: KvStore> Window<S> {
    /// `prefix` is normalized to end with `/`
    pub fn new(inner: S, prefix: &str) -> Result<Self> {
        let trimmed = prefix.trim_end_matches('/');
        validate_key(trimmed)?;
        Ok(Self {
            inner,
            prefix: format!("{}/", trimmed),
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn full_key(&self, key: &str) -> Result<String> {
        validate_key(key)?;
        Ok(format!("{}{}", self.prefix, key))
    }

    fn local_error(&self, e: Error) -> Error {
        match e {
            Error::KeyNotFound(k) => Error::KeyNotFound(
                k.strip_prefix(&self.prefix).map(str::to_string).unwrap_or(k),
            ),
            other => other,
        }
    }
}

impl<S: KvStore> KvStore for Window<S> {
    fn read(&self, key: &str) -> Result<Vec<u8>> {
        let full = self.full_key(key)?;
        self.inner.read(&full).map_err(|e| self.local_error(e))
    }

    fn write(&mut self, key: &str, value: &[u8]) -> Result<()> {
        let full = self.full_key(key)?;
        self.inner.write(&full, value)
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        let full = self.full_key(key)?;
        self.inner.delete(&full).map_err(|e| self.local_error(e))
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self
            .inner
            .list()?
            .into_iter()
            .filter_map(|k| k.strip_prefix(&self.prefix).map(str::to_string))
            .collect())
    }

    fn sync(&mut self) -> Result<()> {
        self.inner.sync()
    }
}

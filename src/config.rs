use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::blobstore::ShardLayout;
use crate::error::{Error, IoResultExt, Result};
use crate::retry::RetryPolicy;

/// volume configuration stored in config.toml
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// blob sharding codec this volume was created with
    #[serde(default)]
    pub layout: ShardLayout,
    /// backing store for snapshot and key metadata
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// policy for remote object storage writes
    #[serde(default)]
    pub retry: RetryPolicy,
    /// configured remotes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remotes: Vec<Remote>,
}

impl Config {
    /// load config from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_path(path)?;
        let config: Config = toml::from_str(&content)?;
        config.layout.validate()?;
        Ok(config)
    }

    /// save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).with_path(path)?;
        Ok(())
    }

    /// add a remote
    pub fn add_remote(&mut self, remote: Remote) -> Result<()> {
        if self.remotes.iter().any(|r| r.name == remote.name) {
            return Err(Error::RemoteExists(remote.name));
        }
        if remote.kind == RemoteKind::Bucket && remote.bucket.is_none() {
            return Err(Error::InvalidName(format!(
                "bucket remote '{}' needs a bucket name",
                remote.name
            )));
        }
        self.remotes.push(remote);
        Ok(())
    }

    /// remove a remote
    pub fn remove_remote(&mut self, name: &str) -> Result<()> {
        let pos = self
            .remotes
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| Error::RemoteNotFound(name.to_string()))?;
        self.remotes.remove(pos);
        Ok(())
    }

    /// get remote by name
    pub fn get_remote(&self, name: &str) -> Option<&Remote> {
        self.remotes.iter().find(|r| r.name == name)
    }
}

/// which `KvStore` implementation holds the volume's metadata
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataBackend {
    /// one file per key
    #[default]
    KeyDb,
    /// layered sorted index
    Pyramid,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataConfig {
    #[serde(default)]
    pub backend: MetadataBackend,
    /// pyramid write buffer threshold (entries)
    #[serde(default = "default_buffer_limit")]
    pub buffer_limit: usize,
}

fn default_buffer_limit() -> usize {
    256
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            backend: MetadataBackend::default(),
            buffer_limit: default_buffer_limit(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteKind {
    /// another coldstore volume on a reachable filesystem
    Volume,
    /// an object storage bucket
    Bucket,
}

/// a configured remote
///
/// for `volume` remotes `path` is the volume root; for `bucket` remotes it is
/// the object store root and `bucket`/`prefix` locate the archive inside it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remote {
    pub name: String,
    pub kind: RemoteKind,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prefix: String,
}

impl Remote {
    pub fn volume(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            kind: RemoteKind::Volume,
            path: path.into(),
            bucket: None,
            prefix: String::new(),
        }
    }

    pub fn bucket(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: RemoteKind::Bucket,
            path: path.into(),
            bucket: Some(bucket.into()),
            prefix: prefix.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_config_toml_roundtrip() {
        let mut config = Config::default();
        config.metadata.backend = MetadataBackend::Pyramid;
        config.retry = RetryPolicy::new(3, Duration::from_millis(10));
        config
            .add_remote(Remote::volume("mirror", "/mnt/mirror"))
            .unwrap();
        config
            .add_remote(Remote::bucket("archive", "/srv/objects", "blobs", "vol1/"))
            .unwrap();

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed.layout, config.layout);
        assert_eq!(parsed.metadata, config.metadata);
        assert_eq!(parsed.retry, config.retry);
        assert_eq!(parsed.remotes, config.remotes);
    }

    #[test]
    fn test_config_add_remove_remote() {
        let mut config = Config::default();

        config.add_remote(Remote::volume("origin", "/a")).unwrap();
        assert_eq!(config.remotes.len(), 1);

        // duplicate should fail
        assert!(matches!(
            config.add_remote(Remote::volume("origin", "/b")),
            Err(Error::RemoteExists(_))
        ));

        let r = config.get_remote("origin").unwrap();
        assert_eq!(r.path, PathBuf::from("/a"));

        config.remove_remote("origin").unwrap();
        assert!(config.remotes.is_empty());
        assert!(matches!(
            config.remove_remote("origin"),
            Err(Error::RemoteNotFound(_))
        ));
    }

    #[test]
    fn test_bucket_remote_requires_bucket() {
        let mut config = Config::default();
        let mut remote = Remote::bucket("r", "/srv", "b", "");
        remote.bucket = None;
        assert!(config.add_remote(remote).is_err());
    }

    #[test]
    fn test_config_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.layout, ShardLayout::default());
        assert_eq!(config.metadata.backend, MetadataBackend::KeyDb);
        assert_eq!(config.metadata.buffer_limit, 256);
        assert!(config.remotes.is_empty());
    }

    #[test]
    fn test_config_load_rejects_bad_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[layout]\nversion = 1\nwidths = [16, 16]\n").unwrap();
        assert!(matches!(Config::load(&path), Err(Error::InvalidLayout(_))));
    }
}

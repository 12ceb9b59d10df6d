use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::codec;
use crate::error::{Error, IoResultExt, Result};
use crate::kv::{validate_key, KvStore, Layer, Pyramid};

const MANIFEST: &str = "MANIFEST";
const LAYER_PREFIX: &str = "layer-";

/// layer ids in lookup order, newest first
#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    layers: Vec<u64>,
}

#[derive(Serialize, Deserialize)]
struct LayerFile {
    id: u64,
    entries: Vec<(String, Option<Vec<u8>>)>,
}

/// `KvStore` over a `Pyramid` whose layers live as files in a directory
///
/// every layer is one `layer-<id>` file; `MANIFEST` names the live layers.
/// the write buffer stays in memory until `sync` or a threshold flush, after
/// which the manifest is replaced and unreferenced layer files are removed.
pub struct PyramidStore {
    dir: PathBuf,
    tmp: PathBuf,
    pyramid: Pyramid<String, Vec<u8>>,
    /// layer ids already on disk
    persisted: BTreeSet<u64>,
}

impl PyramidStore {
    pub fn open(
        dir: impl Into<PathBuf>,
        tmp: impl Into<PathBuf>,
        buffer_limit: usize,
    ) -> Result<Self> {
        let dir = dir.into();
        let tmp = tmp.into();
        fs::create_dir_all(&dir).with_path(&dir)?;
        fs::create_dir_all(&tmp).with_path(&tmp)?;

        let manifest = read_manifest(&dir)?;
        let mut layers = Vec::with_capacity(manifest.layers.len());
        for id in &manifest.layers {
            layers.push(read_layer(&dir, *id)?);
        }
        let persisted = manifest.layers.iter().copied().collect();
        debug!(dir = %dir.display(), layers = layers.len(), "opened pyramid store");

        Ok(Self {
            dir,
            tmp,
            pyramid: Pyramid::with_layers(buffer_limit, layers),
            persisted,
        })
    }

    pub fn pyramid(&self) -> &Pyramid<String, Vec<u8>> {
        &self.pyramid
    }

    /// write new layers, replace the manifest, drop retired layer files
    fn persist(&mut self) -> Result<()> {
        for layer in self.pyramid.layers() {
            if self.persisted.contains(&layer.id()) {
                continue;
            }
            let file = LayerFile {
                id: layer.id(),
                entries: layer.entries().to_vec(),
            };
            crate::fs::write_atomic(
                &layer_path(&self.dir, layer.id()),
                &self.tmp,
                &codec::encode(&file)?,
            )?;
        }

        let manifest = Manifest {
            layers: self.pyramid.layers().iter().map(Layer::id).collect(),
        };
        let content = toml::to_string_pretty(&manifest)?;
        crate::fs::write_atomic(&self.dir.join(MANIFEST), &self.tmp, content.as_bytes())?;

        let live: BTreeSet<u64> = manifest.layers.iter().copied().collect();
        for retired in self.persisted.difference(&live) {
            crate::fs::unlink(&layer_path(&self.dir, *retired))?;
        }
        // files from an interrupted persist never made it into a manifest
        for orphan in list_layer_files(&self.dir)? {
            if !live.contains(&orphan) {
                crate::fs::unlink(&layer_path(&self.dir, orphan))?;
            }
        }
        self.persisted = live;
        Ok(())
    }
}

fn layer_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{}{}", LAYER_PREFIX, id))
}

fn read_manifest(dir: &Path) -> Result<Manifest> {
    let path = dir.join(MANIFEST);
    match fs::read_to_string(&path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Manifest::default()),
        Err(e) => Err(Error::Io { path, source: e }),
    }
}

fn read_layer(dir: &Path, id: u64) -> Result<Layer<String, Vec<u8>>> {
    let path = layer_path(dir, id);
    let compressed = fs::read(&path).with_path(&path)?;
    let file: LayerFile = codec::decode(&compressed)?;
    if file.id != id {
        return Err(Error::CorruptRecord(format!(
            "{}: holds layer {}",
            path.display(),
            file.id
        )));
    }
    Layer::from_sorted(id, file.entries)
}

fn list_layer_files(dir: &Path) -> Result<Vec<u64>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir).with_path(dir)? {
        let entry = entry.with_path(dir)?;
        let name = entry.file_name();
        if let Some(id) = name
            .to_str()
            .and_then(|n| n.strip_prefix(LAYER_PREFIX))
            .and_then(|n| n.parse().ok())
        {
            ids.push(id);
        }
    }
    Ok(ids)
}

impl KvStore for PyramidStore {
    fn read(&self, key: &str) -> Result<Vec<u8>> {
        validate_key(key)?;
        self.pyramid.get(&key.to_string()).cloned()
    }

    fn write(&mut self, key: &str, value: &[u8]) -> Result<()> {
        validate_key(key)?;
        if self.pyramid.add(key.to_string(), value.to_vec()) {
            self.persist()?;
        }
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        validate_key(key)?;
        let key = key.to_string();
        if !self.pyramid.contains(&key) {
            return Err(Error::KeyNotFound(key));
        }
        if self.pyramid.remove(key) {
            self.persist()?;
        }
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self.pyramid.keys())
    }

    fn sync(&mut self) -> Result<()> {
        self.pyramid.flush();
        self.persist()
    }
}

//! checksum <-> relative path codec for the blob store

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::checksum::Checksum;
use crate::error::{Error, Result};

/// the only layout version this build reads and writes
pub const LAYOUT_VERSION: u32 = 1;

/// sharding scheme: leading hex chars split into fixed-width directory names,
/// the remainder becomes the file name
///
/// `widths = [3, 3, 3]` maps `0123456789abcdef0123456789abcdef` to
/// `012/345/678/9abcdef0123456789abcdef`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardLayout {
    pub version: u32,
    pub widths: Vec<usize>,
}

impl Default for ShardLayout {
    fn default() -> Self {
        Self {
            version: LAYOUT_VERSION,
            widths: vec![3, 3, 3],
        }
    }
}

impl ShardLayout {
    pub fn new(widths: Vec<usize>) -> Result<Self> {
        let layout = Self {
            version: LAYOUT_VERSION,
            widths,
        };
        layout.validate()?;
        Ok(layout)
    }

    /// reject layouts this build cannot decode unambiguously
    pub fn validate(&self) -> Result<()> {
        if self.version != LAYOUT_VERSION {
            return Err(Error::InvalidLayout(format!(
                "unsupported layout version {}",
                self.version
            )));
        }
        if self.widths.iter().any(|w| *w == 0) {
            return Err(Error::InvalidLayout("zero-width shard".to_string()));
        }
        let total: usize = self.widths.iter().sum();
        if total >= Checksum::HEX_LEN {
            return Err(Error::InvalidLayout(format!(
                "shard widths sum to {}, leaving no file name",
                total
            )));
        }
        Ok(())
    }

    /// number of path components a blob path has below the store root
    pub fn depth(&self) -> usize {
        self.widths.len() + 1
    }

    /// relative path of a blob below the store root
    pub fn to_relative(&self, checksum: &Checksum) -> PathBuf {
        let hex = checksum.to_hex();
        let mut path = PathBuf::new();
        let mut offset = 0;
        for width in &self.widths {
            path.push(&hex[offset..offset + width]);
            offset += width;
        }
        path.push(&hex[offset..]);
        path
    }

    /// recover a checksum from the trailing components of a blob or link path
    ///
    /// anything before the last `depth()` components is ignored, so this
    /// accepts absolute blob paths and relative symlink targets alike.
    pub fn from_suffix(&self, path: &Path) -> Option<Checksum> {
        let parts: Vec<&str> = path
            .components()
            .filter_map(|c| match c {
                Component::Normal(os) => Some(os.to_str()),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()?;

        if parts.len() < self.depth() {
            return None;
        }
        let tail = &parts[parts.len() - self.depth()..];

        for (part, width) in tail.iter().zip(self.widths.iter()) {
            if part.len() != *width {
                return None;
            }
        }
        let file_len = Checksum::HEX_LEN - self.widths.iter().sum::<usize>();
        if tail[tail.len() - 1].len() != file_len {
            return None;
        }

        let hex: String = tail.concat();
        if !hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return None;
        }
        Checksum::from_hex(&hex).ok()
    }
}

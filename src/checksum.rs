use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, IoResultExt, Result};

/// MD5 digest used for content addressing
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Checksum([u8; 16]);

impl Checksum {
    /// length of the hex representation
    pub const HEX_LEN: usize = 32;

    /// create from raw bytes
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// parse from a 32-char lowercase hex string
    ///
    /// uppercase is rejected so that a checksum has exactly one spelling.
    pub fn from_hex(s: &str) -> Result<Self> {
        let canonical = s
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if s.len() != Self::HEX_LEN || !canonical {
            return Err(Error::InvalidChecksum(s.to_string()));
        }
        let bytes = hex::decode(s).map_err(|_| Error::InvalidChecksum(s.to_string()))?;
        let mut arr = [0u8; 16];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// checksum of an in-memory buffer
    pub fn of_bytes(data: &[u8]) -> Self {
        Self(md5::compute(data).0)
    }

    /// get raw bytes
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// lowercase hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({})", &self.to_hex()[..12])
    }
}

impl std::str::FromStr for Checksum {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for Checksum {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Checksum {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// streaming hasher for large files
pub struct ChecksumHasher {
    ctx: md5::Context,
}

impl ChecksumHasher {
    pub fn new() -> Self {
        Self {
            ctx: md5::Context::new(),
        }
    }

    /// feed content bytes
    pub fn update(&mut self, data: &[u8]) {
        self.ctx.consume(data);
    }

    /// finalize and return checksum
    pub fn finalize(self) -> Checksum {
        Checksum(self.ctx.compute().0)
    }
}

impl Default for ChecksumHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// checksum everything a reader yields
pub fn checksum_reader<R: Read>(reader: &mut R, path: &Path) -> Result<Checksum> {
    let mut hasher = ChecksumHasher::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).with_path(path)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

/// checksum a file's content (follows symlinks)
pub fn checksum_file(path: &Path) -> Result<Checksum> {
    let mut file = File::open(path).with_path(path)?;
    checksum_reader(&mut file, path)
}

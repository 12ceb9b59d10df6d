//! normalized absolute path value type
//!
//! a `VolPath` is a sequence of segments. ordering compares segments, not the
//! joined string: `/a/+b` sorts before `/a+/b` because `"a" < "a+"`, while the
//! raw strings compare the other way round (`'+' < '/'`). every sorted
//! snapshot and the diff merge-join depend on this order.
//!
//! segments are raw bytes, as file names are on unix. text only appears at
//! the edges: `parse` takes a string, and `Display` renders lossily.

use std::ffi::OsStr;
use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::path::{Component, Path, PathBuf};

use serde::de::{self, Visitor};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VolPath {
    segments: Vec<Vec<u8>>,
}

impl VolPath {
    /// the root path `/`
    pub fn root() -> Self {
        Self::default()
    }

    /// parse an absolute slash-separated string, resolving `.` and `..`
    pub fn parse(s: &str) -> Result<Self> {
        Self::from_bytes(s.as_bytes())
    }

    /// parse an absolute slash-separated byte string
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        let shown = || String::from_utf8_lossy(raw).into_owned();
        if raw.first() != Some(&b'/') {
            return Err(Error::InvalidPath(format!("not absolute: {}", shown())));
        }
        let mut segments: Vec<Vec<u8>> = Vec::new();
        for seg in raw.split(|b| *b == b'/') {
            match seg {
                b"" | b"." => {}
                b".." => {
                    if segments.pop().is_none() {
                        return Err(Error::InvalidPath(format!("escapes root: {}", shown())));
                    }
                }
                _ => {
                    if seg.contains(&0) {
                        return Err(Error::InvalidPath(format!(
                            "contains null byte: {:?}",
                            shown()
                        )));
                    }
                    segments.push(seg.to_vec());
                }
            }
        }
        Ok(Self { segments })
    }

    /// convert an absolute filesystem path (lexically, no symlink resolution)
    pub fn from_fs(path: &Path) -> Result<Self> {
        if !path.is_absolute() {
            return Err(Error::InvalidPath(format!(
                "not absolute: {}",
                path.display()
            )));
        }
        let mut segments: Vec<Vec<u8>> = Vec::new();
        for component in path.components() {
            match component {
                Component::RootDir | Component::Prefix(_) | Component::CurDir => {}
                Component::ParentDir => {
                    if segments.pop().is_none() {
                        return Err(Error::InvalidPath(format!(
                            "escapes root: {}",
                            path.display()
                        )));
                    }
                }
                Component::Normal(os) => segments.push(os.as_bytes().to_vec()),
            }
        }
        Ok(Self { segments })
    }

    /// path segments, root first
    pub fn segments(&self) -> impl Iterator<Item = &OsStr> + '_ {
        self.segments.iter().map(|seg| OsStr::from_bytes(seg))
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// number of segments below root
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// final segment, `None` for the root
    pub fn name(&self) -> Option<&OsStr> {
        self.segments.last().map(|seg| OsStr::from_bytes(seg))
    }

    /// parent path, `None` for the root
    pub fn parent(&self) -> Option<VolPath> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// append a single segment
    pub fn join(&self, name: impl AsRef<OsStr>) -> Result<VolPath> {
        let name = name.as_ref().as_bytes();
        if name.is_empty() || name == b"." || name == b".." || name.contains(&b'/') || name.contains(&0)
        {
            return Err(Error::InvalidPath(format!(
                "invalid segment: {:?}",
                String::from_utf8_lossy(name)
            )));
        }
        let mut segments = self.segments.clone();
        segments.push(name.to_vec());
        Ok(Self { segments })
    }

    /// append every segment of `rel`, placing it below `self`
    pub fn join_path(&self, rel: &VolPath) -> VolPath {
        let mut segments = self.segments.clone();
        segments.extend(rel.segments.iter().cloned());
        Self { segments }
    }

    /// true if `self` equals `base` or lies below it
    pub fn starts_with(&self, base: &VolPath) -> bool {
        self.segments.len() >= base.segments.len()
            && self.segments[..base.segments.len()] == base.segments[..]
    }

    /// lexical relative path leading from directory `base` to `self`
    ///
    /// backtracks with `..` out of the part of `base` not shared with `self`
    pub fn relative_to(&self, base: &VolPath) -> PathBuf {
        let common = self
            .segments
            .iter()
            .zip(base.segments.iter())
            .take_while(|(a, b)| a == b)
            .count();

        let mut rel = PathBuf::new();
        for _ in common..base.segments.len() {
            rel.push("..");
        }
        for seg in &self.segments[common..] {
            rel.push(OsStr::from_bytes(seg));
        }
        if rel.as_os_str().is_empty() {
            rel.push(".");
        }
        rel
    }

    /// place this path below a filesystem directory
    pub fn to_fs(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        for seg in &self.segments {
            path.push(OsStr::from_bytes(seg));
        }
        path
    }

    /// absolute filesystem path with `/` as root
    pub fn to_path_buf(&self) -> PathBuf {
        self.to_fs(Path::new("/"))
    }

    /// the exact slash-joined bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        if self.segments.is_empty() {
            return b"/".to_vec();
        }
        let mut out = Vec::new();
        for seg in &self.segments {
            out.push(b'/');
            out.extend_from_slice(seg);
        }
        out
    }
}

impl fmt::Display for VolPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "/");
        }
        for seg in &self.segments {
            write!(f, "/{}", String::from_utf8_lossy(seg))?;
        }
        Ok(())
    }
}

impl fmt::Debug for VolPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VolPath({})", self)
    }
}

impl std::str::FromStr for VolPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// utf-8 paths serialize as strings, anything else as a byte string
impl Serialize for VolPath {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let bytes = self.to_bytes();
        match std::str::from_utf8(&bytes) {
            Ok(s) => serializer.serialize_str(s),
            Err(_) => serializer.serialize_bytes(&bytes),
        }
    }
}

struct VolPathVisitor;

impl<'de> Visitor<'de> for VolPathVisitor {
    type Value = VolPath;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an absolute path as a string or byte string")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<VolPath, E> {
        VolPath::parse(v).map_err(E::custom)
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> std::result::Result<VolPath, E> {
        VolPath::from_bytes(v).map_err(E::custom)
    }

    // formats without a byte type, json among them, write bytes as a sequence
    fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<VolPath, A::Error> {
        let mut bytes = Vec::new();
        while let Some(b) = seq.next_element::<u8>()? {
            bytes.push(b);
        }
        VolPath::from_bytes(&bytes).map_err(de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for VolPath {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_any(VolPathVisitor)
    }
}

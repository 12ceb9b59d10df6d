//! content type detection
//!
//! the registry is an ordinary value: build one, register what you need and
//! pass it to whoever sniffs. nothing is registered process-wide.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::{IoResultExt, Result};

/// bytes read from the start of a file for sniffing
const SNIFF_LEN: usize = 512;

struct MagicRule {
    offset: usize,
    magic: Vec<u8>,
    mime: String,
}

#[derive(Default)]
pub struct TypeRegistry {
    magic: Vec<MagicRule>,
    extensions: HashMap<String, String>,
}

impl TypeRegistry {
    /// empty registry, detects nothing but plain text
    pub fn new() -> Self {
        Self::default()
    }

    /// registry preloaded with common signatures
    pub fn with_defaults() -> Self {
        let mut reg = Self::new();
        reg.register_magic(0, b"\x89PNG\r\n\x1a\n", "image/png");
        reg.register_magic(0, b"\xff\xd8\xff", "image/jpeg");
        reg.register_magic(0, b"GIF87a", "image/gif");
        reg.register_magic(0, b"GIF89a", "image/gif");
        reg.register_magic(0, b"%PDF-", "application/pdf");
        reg.register_magic(0, b"PK\x03\x04", "application/zip");
        reg.register_magic(0, b"\x1f\x8b", "application/gzip");
        reg.register_magic(0, b"\x28\xb5\x2f\xfd", "application/zstd");
        reg.register_magic(0, b"\x7fELF", "application/x-elf");
        reg.register_magic(257, b"ustar", "application/x-tar");
        reg.register_magic(0, b"#!", "text/x-script");

        reg.register_extension("txt", "text/plain");
        reg.register_extension("md", "text/markdown");
        reg.register_extension("json", "application/json");
        reg.register_extension("toml", "application/toml");
        reg.register_extension("html", "text/html");
        reg.register_extension("csv", "text/csv");
        reg.register_extension("rs", "text/x-rust");
        reg
    }

    /// match `magic` at byte `offset`; earlier registrations win
    pub fn register_magic(&mut self, offset: usize, magic: &[u8], mime: &str) {
        self.magic.push(MagicRule {
            offset,
            magic: magic.to_vec(),
            mime: mime.to_string(),
        });
    }

    /// fallback by file extension (case-insensitive)
    pub fn register_extension(&mut self, ext: &str, mime: &str) {
        self.extensions
            .insert(ext.to_ascii_lowercase(), mime.to_string());
    }

    /// detect from leading content and an optional file name
    pub fn sniff_bytes(&self, head: &[u8], name: Option<&str>) -> Option<String> {
        for rule in &self.magic {
            let end = rule.offset + rule.magic.len();
            if head.len() >= end && head[rule.offset..end] == rule.magic[..] {
                return Some(rule.mime.clone());
            }
        }

        if let Some(ext) = name
            .and_then(|n| Path::new(n).extension())
            .and_then(|e| e.to_str())
        {
            if let Some(mime) = self.extensions.get(&ext.to_ascii_lowercase()) {
                return Some(mime.clone());
            }
        }

        if head.is_empty() {
            return None;
        }
        if !head.contains(&0) && looks_like_utf8(head) {
            return Some("text/plain".to_string());
        }
        None
    }

    /// detect a file's type, following symlinks to the content
    pub fn sniff(&self, path: &Path) -> Result<Option<String>> {
        let mut file = File::open(path).with_path(path)?;
        let mut head = Vec::with_capacity(SNIFF_LEN);
        (&mut file)
            .take(SNIFF_LEN as u64)
            .read_to_end(&mut head)
            .with_path(path)?;
        let name = path.file_name().and_then(|n| n.to_str());
        Ok(self.sniff_bytes(&head, name))
    }
}

/// valid utf-8, tolerating a multi-byte sequence cut off by the sniff window
fn looks_like_utf8(head: &[u8]) -> bool {
    match std::str::from_utf8(head) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none() && head.len() - e.valid_up_to() < 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_magic_detection() {
        let reg = TypeRegistry::with_defaults();
        assert_eq!(
            reg.sniff_bytes(b"\x89PNG\r\n\x1a\nrest", None).as_deref(),
            Some("image/png")
        );
        assert_eq!(
            reg.sniff_bytes(b"%PDF-1.7", Some("doc.bin")).as_deref(),
            Some("application/pdf")
        );
    }

    #[test]
    fn test_extension_fallback() {
        let reg = TypeRegistry::with_defaults();
        assert_eq!(
            reg.sniff_bytes(b"{\"a\": 1}", Some("data.JSON")).as_deref(),
            Some("application/json")
        );
    }

    #[test]
    fn test_text_and_binary() {
        let reg = TypeRegistry::new();
        assert_eq!(
            reg.sniff_bytes(b"just words", None).as_deref(),
            Some("text/plain")
        );
        assert_eq!(reg.sniff_bytes(b"\x00\x01\x02", None), None);
        assert_eq!(reg.sniff_bytes(b"", None), None);
        // truncated multi-byte char at the window edge
        assert_eq!(
            reg.sniff_bytes(&[b'a', 0xc3], None).as_deref(),
            Some("text/plain")
        );
    }

    #[test]
    fn test_registries_are_independent() {
        let mut a = TypeRegistry::new();
        a.register_magic(0, b"COLD", "application/x-cold");
        let b = TypeRegistry::new();
        assert_eq!(
            a.sniff_bytes(b"COLDxx", None).as_deref(),
            Some("application/x-cold")
        );
        assert_eq!(b.sniff_bytes(b"COLDxx", None).as_deref(), Some("text/plain"));
    }

    #[test]
    fn test_sniff_file_through_symlink() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("blob");
        std::fs::write(&target, b"\x7fELF\x02\x01").unwrap();
        let link = dir.path().join("prog");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let reg = TypeRegistry::with_defaults();
        assert_eq!(
            reg.sniff(&link).unwrap().as_deref(),
            Some("application/x-elf")
        );
    }
}

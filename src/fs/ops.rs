//! ensure-style filesystem primitives
//!
//! every helper here is idempotent where the operation allows it, so callers
//! can re-run an interrupted step without special casing.

use std::fs::{self, File, Permissions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use crate::error::{Error, IoResultExt, Result};

/// file type as seen without following symlinks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    Regular,
    Directory,
    Symlink,
    Other,
}

impl EntryType {
    pub fn from_file_type(ft: fs::FileType) -> Self {
        if ft.is_symlink() {
            EntryType::Symlink
        } else if ft.is_dir() {
            EntryType::Directory
        } else if ft.is_file() {
            EntryType::Regular
        } else {
            EntryType::Other
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EntryType::Regular => "regular file",
            EntryType::Directory => "directory",
            EntryType::Symlink => "symlink",
            EntryType::Other => "special file",
        }
    }
}

/// lstat a path, `None` if nothing is there
pub fn entry_type(path: &Path) -> Result<Option<EntryType>> {
    match fs::symlink_metadata(path) {
        Ok(meta) => Ok(Some(EntryType::from_file_type(meta.file_type()))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// true if anything (including a dangling symlink) exists at path
pub fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// true for a real directory, not a symlink to one
pub fn is_dir(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|m| m.file_type().is_dir())
        .unwrap_or(false)
}

pub fn is_link(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

pub fn mkdir_recursive(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_path(path)
}

/// hardlink `src` to `dst`, creating parent directories of `dst`
pub fn hardlink(src: &Path, dst: &Path) -> std::io::Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::hard_link(src, dst)
}

pub fn symlink(path: &Path, target: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, path).with_path(path)
}

/// atomically replace whatever file or link is at `path` with a symlink
///
/// the link is created under a temporary sibling name and renamed over the
/// destination, so readers never see the path missing. a real directory at
/// `path` cannot be renamed over and is removed first.
pub fn replace_with_symlink(path: &Path, target: &Path) -> Result<()> {
    if is_dir(path) {
        remove_tree(path)?;
    }
    let parent = path
        .parent()
        .ok_or_else(|| Error::InvalidPath(path.display().to_string()))?;
    let name = path
        .file_name()
        .ok_or_else(|| Error::InvalidPath(path.display().to_string()))?;
    let tmp = parent.join(format!(
        ".{}.{}",
        name.to_string_lossy(),
        uuid::Uuid::new_v4().simple()
    ));
    symlink(&tmp, target)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(Error::Io {
            path: path.to_path_buf(),
            source: e,
        });
    }
    Ok(())
}

/// remove a file or symlink; absent is fine
pub fn unlink(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

pub fn rename(from: &Path, to: &Path) -> Result<()> {
    fs::rename(from, to).with_path(to)
}

pub fn chmod(path: &Path, mode: u32) -> Result<()> {
    fs::set_permissions(path, Permissions::from_mode(mode)).with_path(path)
}

/// clear every write bit
pub fn set_readonly(path: &Path) -> Result<()> {
    let meta = fs::metadata(path).with_path(path)?;
    let mode = meta.permissions().mode() & 0o7777;
    chmod(path, mode & !0o222)
}

/// true if no write bit is set (follows symlinks)
pub fn is_readonly(path: &Path) -> Result<bool> {
    let meta = fs::metadata(path).with_path(path)?;
    Ok(meta.permissions().mode() & 0o222 == 0)
}

/// remove a file, symlink, or whole directory tree; absent is fine
pub fn remove_tree(path: &Path) -> Result<()> {
    match entry_type(path)? {
        None => Ok(()),
        Some(EntryType::Directory) => fs::remove_dir_all(path).with_path(path),
        Some(_) => unlink(path),
    }
}

/// remove empty directories from `start` upwards, never touching `terminus`
/// or anything outside it
pub fn remove_empty_parents(start: &Path, terminus: &Path) -> Result<usize> {
    let mut removed = 0;
    let mut current = Some(start);
    while let Some(dir) = current {
        if dir == terminus || !dir.starts_with(terminus) {
            break;
        }
        match fs::remove_dir(dir) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            // not empty (or not a directory): stop climbing
            Err(_) => break,
        }
        current = dir.parent();
    }
    Ok(removed)
}

/// fsync a directory
pub fn fsync_dir(path: &Path) -> Result<()> {
    let dir = File::open(path).with_path(path)?;
    dir.sync_all().with_path(path)?;
    Ok(())
}

/// write `data` to `path` via a temp file in `tmp_dir`: temp -> fsync -> rename
pub fn write_atomic(path: &Path, tmp_dir: &Path, data: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::InvalidPath(path.display().to_string()))?;
    fs::create_dir_all(parent).with_path(parent)?;
    fs::create_dir_all(tmp_dir).with_path(tmp_dir)?;

    let tmp_path = tmp_dir.join(uuid::Uuid::new_v4().to_string());
    {
        let mut tmp_file = File::create(&tmp_path).with_path(&tmp_path)?;
        tmp_file.write_all(data).with_path(&tmp_path)?;
        tmp_file.sync_all().with_path(&tmp_path)?;
    }
    fs::rename(&tmp_path, path).with_path(path)?;
    fsync_dir(parent)
}

//! coldstore - content-addressed, deduplicating file store
//!
//! a volume is an ordinary directory tree whose files have been *frozen*:
//! each file's content lives once in a checksum-keyed blobstore and the tree
//! keeps a relative symlink to it. the tree's shape can be recorded as a
//! named snapshot, restored later, and replicated to another volume or an
//! object storage bucket.
//!
//! # Core concepts
//!
//! - **Blob**: immutable, read-only file content named by its MD5 checksum
//! - **Snapshot**: the sorted list of directories and blob links of a tree
//! - **Delta**: one step (remove, mkdir, link) of a diff between two snapshots
//! - **Pyramid**: layered, merge-compacted key/value index for metadata
//!
//! # On-disk layout
//!
//! ```text
//! <root>/.coldstore/config.toml   layout, metadata backend, retry, remotes
//! <root>/.coldstore/blobs/        sharded blobs, e.g. abc/def/012/<23 hex>
//! <root>/.coldstore/keys/         KeyDb records
//! <root>/.coldstore/index/        PyramidStore layers and MANIFEST
//! <root>/.coldstore/tmp/          scratch space for atomic writes
//! ```
//!
//! # Example usage
//!
//! ```no_run
//! use coldstore::{ops, Volume};
//! use std::path::Path;
//!
//! let volume = Volume::init(Path::new("/srv/photos")).unwrap();
//! ops::snapshot_make(&volume, "2024-06-01").unwrap();
//!
//! // ... files change ...
//!
//! ops::restore(&volume, "2024-06-01", &ops::RestoreOptions::default()).unwrap();
//! ```

mod codec;
mod config;
mod error;
mod retry;
mod volume;

pub mod blobstore;
pub mod checksum;
pub mod diff;
pub mod fs;
pub mod gc;
pub mod kv;
pub mod ops;
pub mod path;
pub mod remote;
pub mod snapshot;

pub use checksum::{checksum_file, Checksum, ChecksumHasher};
pub use config::{Config, MetadataBackend, MetadataConfig, Remote, RemoteKind};
pub use diff::{apply, apply_delta, diff, ApplyContext, ApplyStats, Delta, Diff};
pub use error::{Error, IoResultExt, Result};
pub use path::VolPath;
pub use remote::RemoteVolume;
pub use retry::{retry, RetryPolicy};
pub use snapshot::{ItemKind, Snapshot, SnapshotItem};
pub use volume::{Volume, VolumeLock, META_DIR};

//! content-addressed blob storage
//!
//! blobs are immutable byte content keyed by their MD5 checksum. the local
//! store keeps them in a sharded directory tree (see `ShardLayout`); the
//! remote store keeps them as flat keys in an object storage bucket.

mod layout;
mod local;
mod object_store;
mod remote;

use std::io::Read;

use crate::checksum::Checksum;
use crate::error::Result;

pub use layout::{ShardLayout, LAYOUT_VERSION};
pub use local::LocalBlobstore;
pub use object_store::{
    DirObjectStore, MemoryObjectStore, ObjectHead, ObjectInfo, ObjectStore, PutFault,
};
pub use remote::{BlobStat, RemoteBlobstore};

/// read side shared by every blob backend
pub trait BlobSource {
    /// whether a blob is stored
    fn has_blob(&self, checksum: &Checksum) -> Result<bool>;

    /// stream a blob's content; `Error::BlobNotFound` if absent
    fn open_blob(&self, checksum: &Checksum) -> Result<Box<dyn Read + '_>>;

    /// lazily enumerate stored checksums
    fn list_blobs(&self) -> Box<dyn Iterator<Item = Result<Checksum>> + '_>;

    /// short human-readable location, for logs
    fn describe(&self) -> String;
}

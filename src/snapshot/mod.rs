//! snapshots: ordered views of a tree's shape
//!
//! a snapshot comes either from walking the live tree or from a stored
//! record; both yield the same sorted item sequence, which is what the diff
//! engine consumes.

mod item;
mod live;
mod record;
mod store;

pub use item::{ItemKind, Snapshot, SnapshotItem};
pub use live::LiveTree;
pub use record::{decode_snapshot, encode_snapshot, RecordItem, SnapshotRecord, RECORD_VERSION};
pub use store::SnapshotStore;

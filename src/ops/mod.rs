//! high-level operations on coldstore volumes
//!
//! every operation that mutates a volume holds its exclusive lock for the
//! whole call.

mod freeze;
mod fsck;
mod gc;
mod ls;
mod pull;
mod push;
mod restore;
mod snapshot;
mod thaw;

pub use freeze::{freeze, FreezeOptions, FreezeStats};
pub use fsck::{fsck, CorruptBlob, FsckReport, MissingBlob};
pub use gc::{gc, GcStats};
pub use ls::{ls, ls_recursive, LsEntry};
pub use pull::{pull, PullOptions, PullResult};
pub use push::{push, PushOptions, PushResult};
pub use restore::{restore, status, RestoreOptions, RestoreResult};
pub use snapshot::{snapshot_delete, snapshot_list, snapshot_make};
pub use thaw::thaw;

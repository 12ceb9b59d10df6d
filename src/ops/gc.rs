use tracing::{debug, info};

use crate::checksum::Checksum;
use crate::error::Result;
use crate::gc::reachable;
use crate::volume::Volume;

/// gc statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GcStats {
    pub blobs_scanned: usize,
    pub blobs_removed: usize,
    pub bytes_freed: u64,
    /// checksums referenced by the live tree or a snapshot
    pub reachable: usize,
    /// the deletion set, in checksum order; filled on dry runs too
    pub removed: Vec<Checksum>,
}

/// delete blobs no snapshot and no live link refers to
pub fn gc(volume: &Volume, dry_run: bool) -> Result<GcStats> {
    let _lock = volume.lock()?;

    // mark phase
    let keep = reachable(volume)?;

    // sweep phase; enumerate fully before deleting
    let store = volume.blobstore();
    let blobs = store.blobs().collect::<Result<Vec<Checksum>>>()?;
    let mut stats = GcStats {
        blobs_scanned: blobs.len(),
        reachable: keep.len(),
        ..GcStats::default()
    };

    for checksum in blobs.iter().filter(|c| !keep.contains(c)) {
        let size = store.size(checksum)?;
        if !dry_run {
            store.delete_blob(checksum)?;
        }
        debug!(%checksum, size, dry_run, "unreachable blob");
        stats.blobs_removed += 1;
        stats.bytes_freed += size;
        stats.removed.push(*checksum);
    }

    info!(
        scanned = stats.blobs_scanned,
        removed = stats.blobs_removed,
        bytes = stats.bytes_freed,
        dry_run,
        "gc complete"
    );
    Ok(stats)
}

use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::checksum::Checksum;
use crate::diff::{ApplyStats, Delta};
use crate::error::{Error, Result};
use crate::ops::restore::{check_target, restore_to};
use crate::remote::RemoteVolume;
use crate::volume::Volume;

#[derive(Debug, Default, Clone)]
pub struct PullOptions {
    /// fetch blobs and store the snapshot, but leave the tree alone
    pub fetch_only: bool,
    /// local name for the snapshot; defaults to the remote name
    pub save_as: Option<String>,
}

#[derive(Debug, Default)]
pub struct PullResult {
    /// blobs copied from the remote
    pub fetched: usize,
    /// blobs already stored locally
    pub present: usize,
    pub deltas: Vec<Delta>,
    pub stats: ApplyStats,
}

/// bring snapshot `name` over from `remote` and check it out
pub fn pull(
    volume: &Volume,
    remote: &RemoteVolume,
    name: &str,
    opts: &PullOptions,
) -> Result<PullResult> {
    let _lock = volume.lock()?;
    let snapshot = remote.load_snapshot(name)?;
    check_target(&snapshot)?;
    let local_name = opts.save_as.as_deref().unwrap_or(name);

    let store = volume.blobstore();
    let mut result = PullResult::default();
    let wanted: BTreeSet<Checksum> = snapshot.checksums().copied().collect();
    for checksum in &wanted {
        if store.fetch_blob(remote.blobs(), checksum)? {
            result.fetched += 1;
        } else {
            result.present += 1;
        }
    }
    debug!(
        from = %remote.describe(),
        fetched = result.fetched,
        present = result.present,
        "blobs in place"
    );

    let mut snapshots = volume.snapshots()?;
    if snapshots.exists(local_name)? {
        // pulling the same content twice is fine; a different one is not
        if snapshots.load(local_name)? != snapshot {
            return Err(Error::SnapshotExists(local_name.to_string()));
        }
    } else {
        snapshots.save(local_name, &snapshot)?;
    }

    if !opts.fetch_only {
        let applied = restore_to(volume, &snapshot, false)?;
        result.deltas = applied.deltas;
        result.stats = applied.stats;
    }

    info!(
        name,
        local_name,
        from = %remote.describe(),
        fetched = result.fetched,
        deltas = result.deltas.len(),
        "pull complete"
    );
    Ok(result)
}

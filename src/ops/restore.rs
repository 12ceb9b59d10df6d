use tracing::info;

use crate::blobstore::LocalBlobstore;
use crate::diff::{apply, diff, ApplyContext, ApplyStats, Delta};
use crate::error::{Error, Result};
use crate::path::VolPath;
use crate::snapshot::Snapshot;
use crate::volume::{Volume, META_DIR};

#[derive(Debug, Default, Clone)]
pub struct RestoreOptions {
    /// compute the deltas but leave the tree alone
    pub dry_run: bool,
}

#[derive(Debug, Default)]
pub struct RestoreResult {
    pub deltas: Vec<Delta>,
    pub stats: ApplyStats,
}

/// deltas that would turn the live tree into snapshot `name`
pub fn status(volume: &Volume, name: &str) -> Result<Vec<Delta>> {
    let target = volume.snapshots()?.load(name)?;
    let current = volume.live_tree().snapshot()?;
    Ok(diff(&current, &target))
}

/// make the live tree match snapshot `name`
///
/// every blob the snapshot links to must already be stored locally; nothing
/// is touched otherwise.
pub fn restore(volume: &Volume, name: &str, opts: &RestoreOptions) -> Result<RestoreResult> {
    let _lock = volume.lock()?;
    let target = volume.snapshots()?.load(name)?;
    let result = restore_to(volume, &target, opts.dry_run)?;
    info!(
        name,
        deltas = result.deltas.len(),
        removed = result.stats.removed,
        dirs = result.stats.dirs,
        links = result.stats.links,
        dry_run = opts.dry_run,
        "restore complete"
    );
    Ok(result)
}

/// diff the live tree against `target` and apply it; caller holds the lock
pub(crate) fn restore_to(
    volume: &Volume,
    target: &Snapshot,
    dry_run: bool,
) -> Result<RestoreResult> {
    check_target(target)?;
    let store = volume.blobstore();
    let current = volume.live_tree().snapshot()?;
    let deltas = diff(&current, target);
    ensure_blobs(&store, &deltas)?;

    if dry_run {
        return Ok(RestoreResult {
            deltas,
            stats: ApplyStats::default(),
        });
    }

    let ctx = ApplyContext::new(volume.root(), &store).keeping(target);
    let stats = apply(&ctx, &deltas)?;
    Ok(RestoreResult { deltas, stats })
}

/// a snapshot may never reach into the metadata directory
pub(crate) fn check_target(target: &Snapshot) -> Result<()> {
    let meta = VolPath::root().join(META_DIR)?;
    match target.iter().find(|item| item.path.starts_with(&meta)) {
        Some(item) => Err(Error::InvalidPath(item.path.to_string())),
        None => Ok(()),
    }
}

fn ensure_blobs(store: &LocalBlobstore, deltas: &[Delta]) -> Result<()> {
    for delta in deltas {
        if let Delta::Mklink(_, checksum) = delta {
            if !store.exists(checksum) {
                return Err(Error::BlobNotFound(*checksum));
            }
        }
    }
    Ok(())
}

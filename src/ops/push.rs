use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use crate::blobstore::LocalBlobstore;
use crate::checksum::Checksum;
use crate::error::{Error, Result};
use crate::remote::RemoteVolume;
use crate::volume::Volume;

#[derive(Debug, Default, Clone)]
pub struct PushOptions {
    /// report what would be sent without sending
    pub dry_run: bool,
}

#[derive(Debug, Default)]
pub struct PushResult {
    /// blobs sent (or, on a dry run, that would be)
    pub sent: Vec<Checksum>,
    /// blobs the remote already had
    pub skipped: usize,
    /// blobs that could not be sent
    pub failed: Vec<Checksum>,
    /// whether the snapshot record was stored remotely by this push
    pub snapshot_written: bool,
}

impl PushResult {
    pub fn is_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

/// send snapshot `name` and every blob it links to
///
/// the snapshot record is written last, and only if every blob made it.
pub fn push(
    volume: &Volume,
    remote: &mut RemoteVolume,
    name: &str,
    opts: &PushOptions,
) -> Result<PushResult> {
    let _lock = volume.lock()?;
    // a far volume stays locked until its record is written
    let _far_lock = remote.lock()?;
    let snapshot = volume.snapshots()?.load(name)?;
    let store = volume.blobstore();

    let wanted: BTreeSet<Checksum> = snapshot.checksums().copied().collect();
    let mut result = PushResult::default();
    for checksum in &wanted {
        if !store.exists(checksum) {
            return Err(Error::BlobNotFound(*checksum));
        }
        match send_blob(&store, remote, checksum, opts.dry_run)? {
            Sent::Sent => result.sent.push(*checksum),
            Sent::Skipped => result.skipped += 1,
            Sent::Failed => result.failed.push(*checksum),
        }
    }

    if !result.failed.is_empty() {
        warn!(
            name,
            to = %remote.describe(),
            failed = result.failed.len(),
            "blobs not sent, snapshot record withheld"
        );
        return Ok(result);
    }

    if !opts.dry_run {
        if remote.has_snapshot(name)? {
            if remote.load_snapshot(name)? != snapshot {
                return Err(Error::SnapshotExists(name.to_string()));
            }
        } else {
            remote.save_snapshot(name, &snapshot)?;
            result.snapshot_written = true;
        }
    }

    info!(
        name,
        to = %remote.describe(),
        sent = result.sent.len(),
        skipped = result.skipped,
        dry_run = opts.dry_run,
        "push complete"
    );
    Ok(result)
}

enum Sent {
    Sent,
    Skipped,
    Failed,
}

fn send_blob(
    store: &LocalBlobstore,
    remote: &RemoteVolume,
    checksum: &Checksum,
    dry_run: bool,
) -> Result<Sent> {
    match remote {
        RemoteVolume::Volume { blobstore, .. } => {
            if blobstore.exists(checksum) {
                return Ok(Sent::Skipped);
            }
            if !dry_run {
                blobstore.fetch_blob(store, checksum)?;
            }
            Ok(Sent::Sent)
        }
        RemoteVolume::Bucket { blobstore, .. } => {
            if blobstore.etag_matches(checksum)? {
                return Ok(Sent::Skipped);
            }
            if dry_run {
                return Ok(Sent::Sent);
            }
            match blobstore.upload(checksum, &store.blob_path(checksum)) {
                Ok(true) => Ok(Sent::Sent),
                Ok(false) => Ok(Sent::Failed),
                Err(e @ (Error::RemoteStatus(_) | Error::Remote { .. })) => {
                    debug!(%checksum, error = %e, "upload rejected");
                    Ok(Sent::Failed)
                }
                Err(e) => Err(e),
            }
        }
    }
}

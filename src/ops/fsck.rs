use std::collections::BTreeMap;

use rayon::prelude::*;
use tracing::{info, warn};

use crate::checksum::Checksum;
use crate::error::Result;
use crate::path::VolPath;
use crate::volume::Volume;

/// fsck report
#[derive(Debug, Default)]
pub struct FsckReport {
    /// blobs whose content was rehashed
    pub blobs_checked: usize,
    /// blobs whose content no longer matches their name
    pub corrupt: Vec<CorruptBlob>,
    /// blobs with a write bit set
    pub writable: Vec<Checksum>,
    /// blobs referenced but not stored
    pub missing: Vec<MissingBlob>,
}

impl FsckReport {
    pub fn is_ok(&self) -> bool {
        self.corrupt.is_empty() && self.writable.is_empty() && self.missing.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptBlob {
    pub expected: Checksum,
    pub actual: Checksum,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingBlob {
    pub checksum: Checksum,
    /// first referrer found, e.g. `live:/docs/a` or `snapshot daily:/docs/a`
    pub referenced_by: String,
}

/// verify every stored blob and every reference to one
///
/// problems are reported, never repaired.
pub fn fsck(volume: &Volume) -> Result<FsckReport> {
    let store = volume.blobstore();
    let blobs = store.blobs().collect::<Result<Vec<Checksum>>>()?;

    let audited = blobs
        .par_iter()
        .map(|checksum| {
            let actual = store.checksum(checksum)?;
            let readonly = store.verify_permissions(checksum)?;
            Ok((*checksum, actual, readonly))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut report = FsckReport {
        blobs_checked: audited.len(),
        ..FsckReport::default()
    };
    for (expected, actual, readonly) in audited {
        if expected != actual {
            warn!(%expected, %actual, "corrupt blob");
            report.corrupt.push(CorruptBlob { expected, actual });
        }
        if !readonly {
            warn!(checksum = %expected, "writable blob");
            report.writable.push(expected);
        }
    }

    let mut referenced: BTreeMap<Checksum, String> = BTreeMap::new();
    for link in volume.live_tree().links(&VolPath::root()) {
        let (path, _, checksum) = link?;
        referenced
            .entry(checksum)
            .or_insert_with(|| format!("live:{}", path));
    }
    for (name, snapshot) in volume.snapshots()?.load_all()? {
        for item in &snapshot {
            if let Some(checksum) = item.kind.checksum() {
                referenced
                    .entry(*checksum)
                    .or_insert_with(|| format!("snapshot {}:{}", name, item.path));
            }
        }
    }
    for (checksum, referenced_by) in referenced {
        if !store.exists(&checksum) {
            warn!(%checksum, %referenced_by, "missing blob");
            report.missing.push(MissingBlob {
                checksum,
                referenced_by,
            });
        }
    }

    info!(
        checked = report.blobs_checked,
        corrupt = report.corrupt.len(),
        writable = report.writable.len(),
        missing = report.missing.len(),
        "fsck complete"
    );
    Ok(report)
}

use std::path::Path;

use tracing::{debug, info};

use crate::blobstore::LocalBlobstore;
use crate::checksum::Checksum;
use crate::error::{Error, IoResultExt, Result};
use crate::fs;
use crate::path::VolPath;
use crate::volume::Volume;

const THAWED_MODE: u32 = 0o644;

/// replace blob links at or below `path` with writable copies
///
/// returns the number of links thawed. the blobs stay in the store.
pub fn thaw(volume: &Volume, path: &VolPath) -> Result<usize> {
    let _lock = volume.lock()?;
    let store = volume.blobstore();
    let live = volume.live_tree();
    let fs_path = path.to_fs(volume.root());

    let links = if fs::is_link(&fs_path) {
        match live.link_checksum(&fs_path)? {
            Some(checksum) => vec![(fs_path, checksum)],
            None => {
                return Err(Error::TypeMismatch {
                    path: fs_path,
                    found: "foreign symlink",
                })
            }
        }
    } else {
        live.links(path)
            .map(|r| r.map(|(_, fs_path, checksum)| (fs_path, checksum)))
            .collect::<Result<Vec<_>>>()?
    };

    for (link, checksum) in &links {
        thaw_link(&store, link, checksum)?;
        debug!(link = %link.display(), %checksum, "thawed");
    }
    info!(%path, links = links.len(), "thaw complete");
    Ok(links.len())
}

fn thaw_link(store: &LocalBlobstore, link: &Path, checksum: &Checksum) -> Result<()> {
    let blob = store.blob_path(checksum);
    if !blob.is_file() {
        return Err(Error::BlobNotFound(*checksum));
    }
    let parent = link
        .parent()
        .ok_or_else(|| Error::InvalidPath(link.display().to_string()))?;
    let name = link
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    // copy next to the link, then swap it in
    let tmp = parent.join(format!(".{}.thaw-{}", name, uuid::Uuid::new_v4()));
    std::fs::copy(&blob, &tmp).with_path(&tmp)?;
    if let Err(e) = fs::chmod(&tmp, THAWED_MODE).and_then(|_| fs::rename(&tmp, link)) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

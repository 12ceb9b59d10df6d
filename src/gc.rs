//! reachability for garbage collection

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::checksum::Checksum;
use crate::error::Result;
use crate::path::VolPath;
use crate::snapshot::Snapshot;
use crate::volume::Volume;

/// count link references per checksum across `snapshots`
///
/// directories carry no content and are ignored.
pub fn reduce<'a>(snapshots: impl IntoIterator<Item = &'a Snapshot>) -> BTreeMap<Checksum, usize> {
    let mut counts = BTreeMap::new();
    for snapshot in snapshots {
        for checksum in snapshot.checksums() {
            *counts.entry(*checksum).or_insert(0) += 1;
        }
    }
    counts
}

/// every checksum referenced by the live tree or a stored snapshot
///
/// the live tree is read leniently: unfrozen files and foreign symlinks
/// reference no blob and are skipped.
pub fn reachable(volume: &Volume) -> Result<BTreeSet<Checksum>> {
    let mut set = BTreeSet::new();

    let live = volume.live_tree();
    for link in live.links(&VolPath::root()) {
        let (_, _, checksum) = link?;
        set.insert(checksum);
    }
    let live_count = set.len();

    let stored = volume.snapshots()?.load_all()?;
    let counts = reduce(stored.iter().map(|(_, snapshot)| snapshot));
    set.extend(counts.into_keys());

    debug!(
        live = live_count,
        snapshots = stored.len(),
        reachable = set.len(),
        "computed reachability"
    );
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SnapshotItem;
    use tempfile::tempdir;

    fn snap(links: &[(&str, &[u8])]) -> Snapshot {
        let mut items = vec![SnapshotItem::directory(VolPath::root())];
        for (path, content) in links {
            items.push(SnapshotItem::link(
                VolPath::parse(path).unwrap(),
                Checksum::of_bytes(content),
            ));
        }
        Snapshot::new(items).unwrap()
    }

    #[test]
    fn test_reduce_counts_links() {
        let a = snap(&[("/x", b"1"), ("/y", b"1"), ("/z", b"2")]);
        let b = snap(&[("/x", b"2")]);
        let counts = reduce([&a, &b]);
        assert_eq!(counts.len(), 2);
        assert_eq!(counts[&Checksum::of_bytes(b"1")], 2);
        assert_eq!(counts[&Checksum::of_bytes(b"2")], 2);
        assert!(reduce(std::iter::empty()).is_empty());
    }

    #[test]
    fn test_reduce_same_snapshot_twice_doubles() {
        let s = snap(&[("/x", b"1"), ("/y", b"1"), ("/z", b"2")]);
        let once = reduce([&s]);
        let twice = reduce([&s, &s]);
        assert_eq!(once.len(), 2);
        assert_eq!(twice.keys().collect::<Vec<_>>(), once.keys().collect::<Vec<_>>());
        for (checksum, count) in &once {
            assert_eq!(twice[checksum], count * 2);
        }
    }

    #[test]
    fn test_reachable_unions_live_and_snapshots() {
        let dir = tempdir().unwrap();
        let volume = Volume::init(dir.path()).unwrap();
        let store = volume.blobstore();

        // live tree: one frozen link and one loose file
        let live_file = volume.root().join("live");
        std::fs::write(&live_file, b"live").unwrap();
        let live = Checksum::of_bytes(b"live");
        store.import_via_link(&live_file, &live).unwrap();
        store.link_to_blob(&live_file, &live).unwrap();
        std::fs::write(volume.root().join("loose"), b"loose").unwrap();

        let mut snapshots = volume.snapshots().unwrap();
        snapshots.save("old", &snap(&[("/gone", b"gone")])).unwrap();

        let set = reachable(&volume).unwrap();
        let expected: BTreeSet<Checksum> = [live, Checksum::of_bytes(b"gone")].into_iter().collect();
        assert_eq!(set, expected);
    }
}

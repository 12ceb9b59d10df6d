use serde::{Deserialize, Serialize};

use crate::checksum::Checksum;
use crate::codec;
use crate::error::{Error, Result};
use crate::path::VolPath;
use crate::snapshot::{ItemKind, Snapshot, SnapshotItem};

pub const RECORD_VERSION: u32 = 1;

const KIND_DIRECTORY: &str = "directory";
const KIND_LINK: &str = "link";

/// persisted form of a snapshot: an ordered list of `(path, kind, checksum?)`
///
/// kinds are stored as strings; an unknown kind fails decoding with
/// `Error::UnknownItemType`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub version: u32,
    pub items: Vec<RecordItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordItem {
    /// a string, or a byte string for names that are not utf-8
    pub path: VolPath,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl SnapshotRecord {
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let items = snapshot
            .iter()
            .map(|item| RecordItem {
                path: item.path.clone(),
                kind: item.kind.name().to_string(),
                checksum: item.kind.checksum().map(Checksum::to_hex),
            })
            .collect();
        Self {
            version: RECORD_VERSION,
            items,
        }
    }

    pub fn into_snapshot(self) -> Result<Snapshot> {
        if self.version != RECORD_VERSION {
            return Err(Error::Unsupported(format!(
                "snapshot record version {}",
                self.version
            )));
        }
        let items = self
            .items
            .into_iter()
            .map(|item| {
                let RecordItem {
                    path,
                    kind,
                    checksum,
                } = item;
                let kind = match (kind.as_str(), checksum) {
                    (KIND_DIRECTORY, None) => ItemKind::Directory,
                    (KIND_LINK, Some(hex)) => ItemKind::Link(Checksum::from_hex(&hex)?),
                    (KIND_DIRECTORY, Some(_)) | (KIND_LINK, None) => {
                        return Err(Error::CorruptRecord(format!(
                            "{} item {} with mismatched checksum field",
                            kind, path
                        )))
                    }
                    _ => {
                        return Err(Error::UnknownItemType {
                            path: path.to_string(),
                            kind: kind.clone(),
                        })
                    }
                };
                Ok(SnapshotItem { path, kind })
            })
            .collect::<Result<Vec<_>>>()?;
        Snapshot::new(items)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        codec::encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        codec::decode(bytes)
    }
}

/// encode a snapshot for storage
pub fn encode_snapshot(snapshot: &Snapshot) -> Result<Vec<u8>> {
    SnapshotRecord::from_snapshot(snapshot).encode()
}

/// decode and validate a stored snapshot
pub fn decode_snapshot(bytes: &[u8]) -> Result<Snapshot> {
    SnapshotRecord::decode(bytes)?.into_snapshot()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Snapshot {
        Snapshot::new(vec![
            SnapshotItem::directory(VolPath::root()),
            SnapshotItem::directory(VolPath::parse("/d").unwrap()),
            SnapshotItem::link(VolPath::parse("/d/f").unwrap(), Checksum::of_bytes(b"f")),
        ])
        .unwrap()
    }

    #[test]
    fn test_record_shape() {
        let record = SnapshotRecord::from_snapshot(&sample());
        assert_eq!(record.version, RECORD_VERSION);
        assert_eq!(record.items[0].path, VolPath::root());
        assert_eq!(record.items[2].kind, "link");
        assert_eq!(
            record.items[2].checksum.as_deref(),
            Some(Checksum::of_bytes(b"f").to_hex().as_str())
        );
        assert_eq!(decode_snapshot(&encode_snapshot(&sample()).unwrap()).unwrap(), sample());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let mut record = SnapshotRecord::from_snapshot(&sample());
        record.items[1].kind = "fifo".into();
        let bytes = record.encode().unwrap();
        match decode_snapshot(&bytes) {
            Err(Error::UnknownItemType { path, kind }) => {
                assert_eq!(path, "/d");
                assert_eq!(kind, "fifo");
            }
            other => panic!("expected UnknownItemType, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_payloads_rejected() {
        let mut record = SnapshotRecord::from_snapshot(&sample());
        record.items[2].checksum = Some("xyz".into());
        assert!(matches!(
            record.clone().into_snapshot(),
            Err(Error::InvalidChecksum(_))
        ));

        record.items[2].checksum = None;
        assert!(matches!(
            record.clone().into_snapshot(),
            Err(Error::CorruptRecord(_))
        ));

        let mut record = SnapshotRecord::from_snapshot(&sample());
        record.version = 99;
        assert!(matches!(record.into_snapshot(), Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_serde_json_view() {
        // the record is plain data; json makes the field names visible
        let json = serde_json::to_value(SnapshotRecord::from_snapshot(&sample())).unwrap();
        assert_eq!(json["items"][0]["kind"], "directory");
        assert!(json["items"][0].get("checksum").is_none());
    }

    #[test]
    fn test_non_utf8_path_survives_encoding() {
        use std::os::unix::ffi::OsStrExt;

        let name = std::ffi::OsStr::from_bytes(b"caf\xe9.txt");
        let snapshot = Snapshot::new(vec![
            SnapshotItem::directory(VolPath::root()),
            SnapshotItem::link(VolPath::root().join(name).unwrap(), Checksum::of_bytes(b"x")),
        ])
        .unwrap();
        let decoded = decode_snapshot(&encode_snapshot(&snapshot).unwrap()).unwrap();
        assert_eq!(decoded, snapshot);
        assert_eq!(decoded.items()[1].path.name(), Some(name));
    }
}

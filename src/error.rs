use std::path::PathBuf;

use crate::checksum::Checksum;

/// error type for coldstore operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("volume not found at {0}")]
    NoVolume(PathBuf),

    #[error("volume already exists at {0}")]
    VolumeExists(PathBuf),

    #[error("lock contention on volume")]
    LockContention,

    #[error("blob not found: {0}")]
    BlobNotFound(Checksum),

    #[error("corrupt blob {expected}: content hashes to {actual}")]
    CorruptBlob { expected: Checksum, actual: Checksum },

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("corrupt record for key {0}: digest mismatch")]
    CorruptRecord(String),

    #[error("snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("snapshot already exists: {0}")]
    SnapshotExists(String),

    #[error("remote not found: {0}")]
    RemoteNotFound(String),

    #[error("remote already exists: {0}")]
    RemoteExists(String),

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid checksum hex: {0}")]
    InvalidChecksum(String),

    #[error("invalid shard layout: {0}")]
    InvalidLayout(String),

    #[error("unexpected {found} at {path}")]
    TypeMismatch { path: PathBuf, found: &'static str },

    #[error("unknown snapshot item type {kind:?} at {path}")]
    UnknownItemType { path: String, kind: String },

    #[error("duplicate snapshot path: {0}")]
    DuplicatePath(String),

    #[error("snapshot has no root directory item")]
    MissingRoot,

    #[error("remote error: {message}")]
    Remote { message: String, transient: bool },

    #[error("remote rejected request with status {0}")]
    RemoteStatus(u16),

    #[error("retries exhausted: {0}")]
    RetriesExhausted(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cbor serialization error: {0}")]
    CborEncode(#[from] ciborium::ser::Error<std::io::Error>),

    #[error("cbor deserialization error: {0}")]
    CborDecode(#[from] ciborium::de::Error<std::io::Error>),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("config serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
}

impl Error {
    /// whether a retry may succeed (transient network or service condition)
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Remote { transient, .. } => *transient,
            Error::RemoteStatus(status) => *status == 429 || *status >= 500,
            Error::Io { source, .. } => matches!(
                source.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// helper to wrap io errors with path context
pub trait IoResultExt<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.into(),
            source,
        })
    }
}

/// convert a walkdir error into an io error carrying the walked root
pub(crate) fn walk_error(root: &std::path::Path, e: walkdir::Error) -> Error {
    let path = e.path().map(|p| p.to_path_buf()).unwrap_or_else(|| root.to_path_buf());
    Error::Io {
        path,
        source: e
            .into_io_error()
            .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "walkdir error")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let transient = Error::Remote {
            message: "connection reset".into(),
            transient: true,
        };
        assert!(transient.is_transient());

        let fatal = Error::Remote {
            message: "malformed request".into(),
            transient: false,
        };
        assert!(!fatal.is_transient());

        assert!(Error::RemoteStatus(503).is_transient());
        assert!(Error::RemoteStatus(429).is_transient());
        assert!(!Error::RemoteStatus(400).is_transient());
        assert!(!Error::KeyNotFound("k".into()).is_transient());
    }

    #[test]
    fn test_with_path() {
        let res: std::io::Result<()> = Err(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        let err = res.with_path("/tmp/x").unwrap_err();
        assert!(err.to_string().contains("/tmp/x"));
    }
}

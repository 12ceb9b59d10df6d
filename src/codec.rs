//! CBOR + zstd encoding shared by on-disk metadata formats

use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// zstd level 3: fast with a reasonable ratio
const ZSTD_LEVEL: i32 = 3;

/// serialize to cbor, then zstd compress
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut cbor_bytes = Vec::new();
    ciborium::into_writer(value, &mut cbor_bytes)?;
    zstd::encode_all(&cbor_bytes[..], ZSTD_LEVEL).map_err(|e| Error::Io {
        path: PathBuf::from("<zstd>"),
        source: e,
    })
}

/// decompress, then deserialize from cbor
pub fn decode<T: DeserializeOwned>(compressed: &[u8]) -> Result<T> {
    let cbor_bytes = zstd::decode_all(compressed).map_err(|e| Error::Io {
        path: PathBuf::from("<zstd>"),
        source: e,
    })?;
    Ok(ciborium::from_reader(&cbor_bytes[..])?)
}

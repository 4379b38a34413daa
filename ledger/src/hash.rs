//! SHA-256 helpers shared by events, the Merkle tree and the quorum.

use crate::error::LedgerError;
use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of arbitrary bytes.
pub fn sha256_hex(data: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(data.as_ref()))
}

/// Decode a 64-char hex digest into raw bytes.
pub fn decode_hash(hex_str: &str) -> Result<[u8; 32], LedgerError> {
    let bytes = hex::decode(hex_str).map_err(|e| LedgerError::InvalidHash(format!("{e}")))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| LedgerError::InvalidHash(format!("expected 32 bytes, got {}", b.len())))
}

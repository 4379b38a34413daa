use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid article reference {0}: expected one of 12, 13, 14, 15")]
    InvalidArticle(u16),

    #[error("index {index} out of range for tree of size {size}")]
    IndexOutOfRange { index: u64, size: u64 },

    #[error("invalid consistency range: old size {old_size}, tree size {size}")]
    InvalidConsistencyRange { old_size: u64, size: u64 },

    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("invalid threshold {threshold} for {nodes} nodes")]
    InvalidThreshold { threshold: usize, nodes: usize },

    #[error("Insufficient nodes: {online}/{threshold}")]
    InsufficientNodes { online: usize, threshold: usize },

    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

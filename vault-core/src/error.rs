use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Chunk not found: {0}")]
    ChunkNotFound(String),

    #[error("Not enough space: need {required} bytes, {available} available")]
    NotEnoughSpace { required: u64, available: u64 },

    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Routing error: {0}")]
    Routing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, VaultError>;

/// Failure reported to a client for a `Get`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GetError {
    NoSuchData,
    NetworkOther(String),
}

/// Failure reported to a client for a `Put`, `Post`, `Delete` or `Append`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MutationError {
    NoSuchData,
    DataExists,
    NetworkFull,
    InvalidSuccessor,
    InvalidOperation,
    DataTooLarge,
    NetworkOther(String),
}

impl std::fmt::Display for GetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GetError::NoSuchData => write!(f, "no such data"),
            GetError::NetworkOther(reason) => write!(f, "network error: {}", reason),
        }
    }
}

impl std::fmt::Display for MutationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MutationError::NoSuchData => write!(f, "no such data"),
            MutationError::DataExists => write!(f, "data already exists"),
            MutationError::NetworkFull => write!(f, "network full"),
            MutationError::InvalidSuccessor => write!(f, "invalid successor"),
            MutationError::InvalidOperation => write!(f, "invalid operation"),
            MutationError::DataTooLarge => write!(f, "data too large"),
            MutationError::NetworkOther(reason) => write!(f, "network error: {}", reason),
        }
    }
}

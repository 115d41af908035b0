//! Storage modules for SAFE Vault
//!
//! Provides bounded chunk storage and its SQLite index.

pub mod chunk_index;
pub mod chunk_store;

pub use chunk_index::{ChunkEntry, ChunkIndex};
pub use chunk_store::{ChunkStore, compute_hash, verify_hash};

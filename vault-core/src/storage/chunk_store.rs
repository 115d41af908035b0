use crate::data::{Data, DataIdentifier};
use crate::error::{Result, VaultError};
use crate::storage::chunk_index::{ChunkEntry, ChunkIndex};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// ChunkStore persists data chunks on disk with a bounded capacity.
/// Values live in `{root}/chunks/{storage_key}`, indexed by `{root}/chunk_index.db`.
pub struct ChunkStore {
    base_path: PathBuf,
    index: ChunkIndex,
    entries: HashMap<DataIdentifier, ChunkEntry>,
    max_space: u64,
    used_space: u64,
}

impl ChunkStore {
    /// Opens the store at `base_path`, reloading whatever an earlier run left behind.
    pub fn new(base_path: PathBuf, max_space: u64) -> Result<Self> {
        std::fs::create_dir_all(base_path.join("chunks"))?;
        let index = ChunkIndex::open(base_path.join("chunk_index.db"))?;

        let mut entries = HashMap::new();
        let mut used_space = 0;
        for entry in index.list()? {
            let path = chunk_path(&base_path, &entry.data_id);
            if !path.exists() {
                tracing::warn!(
                    "Dropping index entry {:?}: chunk file {:?} is missing",
                    entry.data_id,
                    path
                );
                let _ = index.remove(&entry.data_id)?;
                continue;
            }
            used_space += entry.size;
            let _ = entries.insert(entry.data_id, entry);
        }

        tracing::debug!(
            "Opened chunk store at {:?} with {} chunks, {} of {} bytes used",
            base_path,
            entries.len(),
            used_space,
            max_space
        );

        Ok(Self {
            base_path,
            index,
            entries,
            max_space,
            used_space,
        })
    }

    /// Get the base path for the store
    /// Stores `data` under `data_id`, replacing any previous value.
    pub async fn put(&mut self, data_id: &DataIdentifier, data: &Data) -> Result<()> {
        let serialised = serde_json::to_vec(data)?;
        let size = serialised.len() as u64;
        let old_size = self.entries.get(data_id).map_or(0, |entry| entry.size);
        let available = self.max_space.saturating_sub(self.used_space - old_size);
        if size > available {
            return Err(VaultError::NotEnoughSpace {
                required: size,
                available,
            });
        }

        let path = chunk_path(&self.base_path, data_id);

        // Write to temporary file first, then rename for atomicity
        let temp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&serialised).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &path).await?;

        let entry = ChunkEntry {
            data_id: *data_id,
            version: data.version(),
            size,
            stored_at: chrono::Utc::now(),
        };
        self.index.upsert(&entry)?;
        let _ = self.entries.insert(*data_id, entry);
        self.used_space = self.used_space - old_size + size;

        tracing::debug!("Stored chunk {:?} ({} bytes)", data_id, size);
        Ok(())
    }

    pub async fn get(&self, data_id: &DataIdentifier) -> Result<Data> {
        if !self.entries.contains_key(data_id) {
            return Err(VaultError::ChunkNotFound(data_id.storage_key()));
        }

        let bytes = fs::read(chunk_path(&self.base_path, data_id)).await?;
        let data: Data = serde_json::from_slice(&bytes)?;

        if let (DataIdentifier::Immutable(name), Data::Immutable(immutable)) = (data_id, &data) {
            verify_hash(immutable.value(), &name.to_hex())?;
        }

        Ok(data)
    }

    pub fn has(&self, data_id: &DataIdentifier) -> bool {
        self.entries.contains_key(data_id)
    }

    /// Removes a chunk. Deleting a missing chunk is not an error.
    pub async fn delete(&mut self, data_id: &DataIdentifier) -> Result<()> {
        let Some(entry) = self.entries.remove(data_id) else {
            return Ok(());
        };

        let path = chunk_path(&self.base_path, data_id);
        if path.exists() {
            fs::remove_file(&path).await?;
        }
        let _ = self.index.remove(data_id)?;
        self.used_space -= entry.size;

        tracing::debug!("Deleted chunk {:?}", data_id);
        Ok(())
    }

    pub fn keys(&self) -> Vec<DataIdentifier> {
        self.entries.keys().copied().collect()
    }

    pub fn version_of(&self, data_id: &DataIdentifier) -> Option<u64> {
        self.entries.get(data_id).map(|entry| entry.version)
    }

    pub fn used_space(&self) -> u64 {
        self.used_space
    }

    pub fn max_space(&self) -> u64 {
        self.max_space
    }
}

fn chunk_path(base_path: &Path, data_id: &DataIdentifier) -> PathBuf {
    base_path.join("chunks").join(data_id.storage_key())
}

/// Compute SHA256 hash of data
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Verify that data matches the expected hash
pub fn verify_hash(data: &[u8], expected_hash: &str) -> Result<()> {
    let actual_hash = compute_hash(data);
    if actual_hash != expected_hash {
        return Err(VaultError::HashMismatch {
            expected: expected_hash.to_string(),
            actual: actual_hash,
        });
    }
    Ok(())
}

use crate::data::DataIdentifier;
use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Index entry describing one stored chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkEntry {
    pub data_id: DataIdentifier,
    pub version: u64,
    pub size: u64,
    pub stored_at: DateTime<Utc>,
}

/// SQLite index over the chunk files of a `ChunkStore`.
pub struct ChunkIndex {
    db_path: PathBuf,
}

impl ChunkIndex {
    pub fn open(db_path: PathBuf) -> Result<Self> {
        let index = Self { db_path };
        index.init_schema()?;
        Ok(index)
    }

    fn get_conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        Ok(conn)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS chunks (
                storage_key TEXT PRIMARY KEY,
                identifier TEXT NOT NULL,
                version INTEGER NOT NULL,
                size INTEGER NOT NULL,
                stored_at TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    pub fn upsert(&self, entry: &ChunkEntry) -> Result<()> {
        let conn = self.get_conn()?;
        let identifier = serde_json::to_string(&entry.data_id)?;

        conn.execute(
            "INSERT OR REPLACE INTO chunks (storage_key, identifier, version, size, stored_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.data_id.storage_key(),
                identifier,
                entry.version as i64,
                entry.size as i64,
                entry.stored_at.to_rfc3339(),
            ],
        )?;

        Ok(())
    }

    pub fn remove(&self, data_id: &DataIdentifier) -> Result<bool> {
        let conn = self.get_conn()?;

        let affected = conn.execute(
            "DELETE FROM chunks WHERE storage_key = ?1",
            [data_id.storage_key()],
        )?;

        Ok(affected > 0)
    }

    pub fn list(&self) -> Result<Vec<ChunkEntry>> {
        let conn = self.get_conn()?;

        let mut stmt =
            conn.prepare("SELECT identifier, version, size, stored_at FROM chunks ORDER BY storage_key")?;

        let rows = stmt.query_map([], |row| {
            let identifier: String = row.get(0)?;
            let version: i64 = row.get(1)?;
            let size: i64 = row.get(2)?;
            let stored_at: String = row.get(3)?;

            let data_id: DataIdentifier = serde_json::from_str(&identifier)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

            Ok(ChunkEntry {
                data_id,
                version: version as u64,
                size: size as u64,
                stored_at: chrono::DateTime::parse_from_rfc3339(&stored_at)
                    .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?
                    .with_timezone(&Utc),
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }

        Ok(entries)
    }
}

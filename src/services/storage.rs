//! Relational chunk store.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::models::Chunk;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chunk_id TEXT NOT NULL UNIQUE,
    text TEXT NOT NULL,
    token_count INTEGER NOT NULL,
    char_count INTEGER NOT NULL,
    word_count INTEGER NOT NULL,
    source_unit INTEGER NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_chunks_source_unit ON chunks(source_unit);
"#;

/// Aggregate statistics over the stored chunk set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageStats {
    pub total_chunks: u64,
    pub total_tokens: u64,
    pub avg_tokens_per_chunk: f64,
    pub total_characters: u64,
    pub total_units: u64,
}

/// The relational collaborator holding the canonical chunk set.
pub trait ChunkStore: Send + Sync {
    /// The complete chunk set, in a deterministic order (chunking order).
    fn all_chunks(&self) -> Result<Vec<Chunk>, StorageError>;

    /// Look up one chunk; an absent id is a soft miss, not an error.
    fn chunk_by_id(&self, chunk_id: &str) -> Result<Option<Chunk>, StorageError>;

    /// Upsert chunks by `chunk_id`; returns the number written.
    fn store_chunks(&self, chunks: &[Chunk]) -> Result<usize, StorageError>;

    fn statistics(&self) -> Result<StorageStats, StorageError>;
}

/// SQLite-backed chunk store.
pub struct SqliteChunkStore {
    conn: Mutex<Connection>,
}

impl SqliteChunkStore {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store, used by tests.
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn row_to_chunk(row: &Row<'_>) -> Result<Chunk, rusqlite::Error> {
        let metadata_json: String = row.get("metadata")?;
        let metadata = serde_json::from_str(&metadata_json).unwrap_or_default();
        Ok(Chunk {
            chunk_id: row.get("chunk_id")?,
            text: row.get("text")?,
            token_count: row.get::<_, i64>("token_count")? as usize,
            char_count: row.get::<_, i64>("char_count")? as usize,
            word_count: row.get::<_, i64>("word_count")? as usize,
            source_unit: row.get::<_, i64>("source_unit")? as u32,
            metadata,
        })
    }
}

impl ChunkStore for SqliteChunkStore {
    fn all_chunks(&self) -> Result<Vec<Chunk>, StorageError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT chunk_id, text, token_count, char_count, word_count, source_unit, metadata
             FROM chunks ORDER BY id",
        )?;
        let chunks = stmt
            .query_map([], Self::row_to_chunk)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(chunks)
    }

    fn chunk_by_id(&self, chunk_id: &str) -> Result<Option<Chunk>, StorageError> {
        let conn = self.lock();
        let chunk = conn
            .query_row(
                "SELECT chunk_id, text, token_count, char_count, word_count, source_unit, metadata
                 FROM chunks WHERE chunk_id = ?1",
                params![chunk_id],
                Self::row_to_chunk,
            )
            .optional()?;
        Ok(chunk)
    }

    fn store_chunks(&self, chunks: &[Chunk]) -> Result<usize, StorageError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let mut stored = 0usize;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO chunks
                    (chunk_id, text, token_count, char_count, word_count, source_unit, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(chunk_id) DO UPDATE SET
                    text = excluded.text,
                    token_count = excluded.token_count,
                    char_count = excluded.char_count,
                    word_count = excluded.word_count,
                    source_unit = excluded.source_unit,
                    metadata = excluded.metadata",
            )?;
            for chunk in chunks {
                let metadata_json = serde_json::to_string(&chunk.metadata)?;
                stmt.execute(params![
                    chunk.chunk_id,
                    chunk.text,
                    chunk.token_count as i64,
                    chunk.char_count as i64,
                    chunk.word_count as i64,
                    chunk.source_unit as i64,
                    metadata_json,
                ])?;
                stored += 1;
            }
        }
        tx.commit()?;
        Ok(stored)
    }

    fn statistics(&self) -> Result<StorageStats, StorageError> {
        let conn = self.lock();
        let stats = conn.query_row(
            "SELECT
                COUNT(*),
                COALESCE(SUM(token_count), 0),
                COALESCE(AVG(token_count), 0),
                COALESCE(SUM(char_count), 0),
                COUNT(DISTINCT source_unit)
             FROM chunks",
            [],
            |row| {
                Ok(StorageStats {
                    total_chunks: row.get::<_, i64>(0)? as u64,
                    total_tokens: row.get::<_, i64>(1)? as u64,
                    avg_tokens_per_chunk: row.get::<_, f64>(2)?,
                    total_characters: row.get::<_, i64>(3)? as u64,
                    total_units: row.get::<_, i64>(4)? as u64,
                })
            },
        )?;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn sample_chunk(unit: u32, seq: usize, tokens: usize) -> Chunk {
        let mut metadata = Map::new();
        metadata.insert("unit_number".to_string(), serde_json::Value::from(unit));
        Chunk {
            chunk_id: Chunk::compose_id(unit, seq),
            text: format!("chunk {} of unit {}", seq, unit),
            token_count: tokens,
            char_count: 20,
            word_count: 5,
            source_unit: unit,
            metadata,
        }
    }

    #[test]
    fn test_store_and_fetch_all_in_order() {
        let store = SqliteChunkStore::in_memory().unwrap();
        let chunks = vec![
            sample_chunk(1, 0, 10),
            sample_chunk(1, 1, 12),
            sample_chunk(2, 0, 8),
        ];
        assert_eq!(store.store_chunks(&chunks).unwrap(), 3);

        let all = store.all_chunks().unwrap();
        let ids: Vec<&str> = all.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["1_0", "1_1", "2_0"]);
        assert_eq!(
            all[0].metadata.get("unit_number"),
            Some(&serde_json::Value::from(1))
        );
    }

    #[test]
    fn test_chunk_by_id_soft_miss() {
        let store = SqliteChunkStore::in_memory().unwrap();
        store.store_chunks(&[sample_chunk(1, 0, 10)]).unwrap();

        assert!(store.chunk_by_id("1_0").unwrap().is_some());
        assert!(store.chunk_by_id("99_0").unwrap().is_none());
    }

    #[test]
    fn test_upsert_does_not_duplicate() {
        let store = SqliteChunkStore::in_memory().unwrap();
        let chunks = vec![sample_chunk(1, 0, 10)];
        store.store_chunks(&chunks).unwrap();
        store.store_chunks(&chunks).unwrap();

        assert_eq!(store.all_chunks().unwrap().len(), 1);
    }

    #[test]
    fn test_statistics() {
        let store = SqliteChunkStore::in_memory().unwrap();
        store
            .store_chunks(&[
                sample_chunk(1, 0, 10),
                sample_chunk(1, 1, 20),
                sample_chunk(2, 0, 30),
            ])
            .unwrap();

        let stats = store.statistics().unwrap();
        assert_eq!(stats.total_chunks, 3);
        assert_eq!(stats.total_tokens, 60);
        assert_eq!(stats.total_units, 2);
        assert!((stats.avg_tokens_per_chunk - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_store_statistics() {
        let store = SqliteChunkStore::in_memory().unwrap();
        let stats = store.statistics().unwrap();
        assert_eq!(stats.total_chunks, 0);
        assert_eq!(stats.total_tokens, 0);
    }
}

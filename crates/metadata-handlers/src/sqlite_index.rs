//! SQLite Index Handler
//!
//! Maintains a relational index of saved-image metadata so galleries and
//! dashboards can query by model, sampler, or save id without touching the
//! image files. One row per image path; repeated saves upsert in place.
//!
//! The connection is shared behind a single-writer lock, which also covers
//! concurrent batch saves.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use gravure_metadata_contracts::{CanonicalMetadata, MetadataHandler, TargetFormat};

use crate::error::Result;

/// Relational metadata index backed by SQLite.
///
/// Unconstrained target: always receives the Full stage.
pub struct SqliteIndexHandler {
    db_path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteIndexHandler {
    /// Create or open the index database at the given path.
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&db_path)?;
        Self::configure_connection(&conn)?;
        Self::ensure_schema(&conn)?;

        Ok(Self {
            db_path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory index, used by tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::ensure_schema(&conn)?;
        Ok(Self {
            db_path: PathBuf::from(":memory:"),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Get the database path.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA busy_timeout=30000;
            PRAGMA synchronous=NORMAL;
            ",
        )?;
        Ok(())
    }

    fn ensure_schema(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS image_metadata (
                image_path TEXT PRIMARY KEY,
                save_id TEXT,
                model_name TEXT,
                model_hash TEXT,
                sampler_name TEXT,
                steps INTEGER,
                cfg_scale REAL,
                seed INTEGER,
                positive_prompt TEXT,
                negative_prompt TEXT,
                loras_json TEXT NOT NULL,
                metadata_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_image_metadata_model ON image_metadata(model_name)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_image_metadata_save ON image_metadata(save_id)",
            [],
        )?;
        Ok(())
    }

    fn upsert(&self, image_path: &Path, meta: &CanonicalMetadata) -> Result<()> {
        let generation = &meta.ai_info.generation;
        let model = meta.ai_info.assets.models.first();
        let loras_json = serde_json::to_string(&meta.ai_info.assets.loras)?;
        let metadata_json = serde_json::to_string(&meta.to_value())?;

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO image_metadata (
                image_path, save_id, model_name, model_hash, sampler_name,
                steps, cfg_scale, seed, positive_prompt, negative_prompt,
                loras_json, metadata_json, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT(image_path) DO UPDATE SET
                save_id = excluded.save_id,
                model_name = excluded.model_name,
                model_hash = excluded.model_hash,
                sampler_name = excluded.sampler_name,
                steps = excluded.steps,
                cfg_scale = excluded.cfg_scale,
                seed = excluded.seed,
                positive_prompt = excluded.positive_prompt,
                negative_prompt = excluded.negative_prompt,
                loras_json = excluded.loras_json,
                metadata_json = excluded.metadata_json,
                updated_at = excluded.updated_at",
            params![
                image_path.to_string_lossy(),
                meta.provenance.save_id,
                model.map(|m| m.name.as_str()),
                model.and_then(|m| m.hash.as_deref()),
                generation.sampler_name,
                generation.steps,
                generation.cfg_scale,
                generation.seed,
                generation.positive_prompt,
                generation.negative_prompt,
                loras_json,
                metadata_json,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn fetch(&self, image_path: &Path) -> Result<Option<CanonicalMetadata>> {
        let conn = self.conn.lock();
        let json: Option<String> = conn
            .query_row(
                "SELECT metadata_json FROM image_metadata WHERE image_path = ?1",
                params![image_path.to_string_lossy()],
                |row| row.get(0),
            )
            .optional()?;

        let Some(json) = json else {
            return Ok(None);
        };
        let value: serde_json::Value = serde_json::from_str(&json)?;
        Ok(CanonicalMetadata::from_value(&value).ok())
    }

    /// Number of indexed images.
    pub fn row_count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM image_metadata", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl MetadataHandler for SqliteIndexHandler {
    fn format(&self) -> TargetFormat {
        TargetFormat::DatabaseIndex
    }

    fn write(&self, path: &Path, meta: &CanonicalMetadata) -> bool {
        match self.upsert(path, meta) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("failed to index metadata for {}: {}", path.display(), err);
                false
            }
        }
    }

    fn read(&self, path: &Path) -> CanonicalMetadata {
        match self.fetch(path) {
            Ok(Some(meta)) => meta,
            Ok(None) => CanonicalMetadata::default(),
            Err(err) => {
                log::warn!("failed to read index row for {}: {}", path.display(), err);
                CanonicalMetadata::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gravure_metadata_contracts::ModelRef;

    fn sample(steps: u32) -> CanonicalMetadata {
        let mut meta = CanonicalMetadata::default();
        meta.ai_info.generation.steps = Some(steps);
        meta.ai_info.generation.sampler_name = Some("euler".to_string());
        meta.ai_info.assets.models.push(ModelRef::new("sd15.safetensors").with_hash("ab".repeat(32)));
        meta.provenance.save_id = Some("save-1".to_string());
        meta
    }

    #[test]
    fn test_write_and_read_round_trip() {
        let handler = SqliteIndexHandler::in_memory().unwrap();
        let path = Path::new("/renders/a.png");

        assert!(handler.write(path, &sample(20)));
        let read = handler.read(path);
        assert_eq!(read.ai_info.generation.steps, Some(20));
        assert_eq!(read.ai_info.assets.models[0].name, "sd15.safetensors");
    }

    #[test]
    fn test_upsert_is_idempotent_per_path() {
        let handler = SqliteIndexHandler::in_memory().unwrap();
        let path = Path::new("/renders/a.png");

        assert!(handler.write(path, &sample(20)));
        assert!(handler.write(path, &sample(35)));

        assert_eq!(handler.row_count().unwrap(), 1);
        assert_eq!(handler.read(path).ai_info.generation.steps, Some(35));
    }

    #[test]
    fn test_unknown_path_reads_empty() {
        let handler = SqliteIndexHandler::in_memory().unwrap();
        assert!(handler.read(Path::new("/renders/missing.png")).is_empty());
    }

    #[test]
    fn test_database_file_created_with_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("index").join("metadata.db");
        let handler = SqliteIndexHandler::new(&db_path).unwrap();
        assert!(handler.write(Path::new("/renders/a.png"), &sample(20)));
        assert!(db_path.exists());
    }
}

//! Durable, append-only gallery of generated images.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;

use super::entry::{GalleryEntry, GalleryMetadata};
use crate::params::LightingPreset;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS images (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    image_data BLOB NOT NULL,
    prompt TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    lighting TEXT,
    consistency REAL,
    style_reference TEXT
);
CREATE INDEX IF NOT EXISTS idx_images_timestamp ON images(timestamp);
";

const SELECT_COLUMNS: &str =
    "SELECT id, image_data, prompt, timestamp, lighting, consistency, style_reference FROM images";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("gallery database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to prepare gallery location: {0}")]
    Io(#[from] std::io::Error),
    #[error("gallery connection lock poisoned")]
    LockPoisoned,
    #[error("gallery entry {id} has unknown lighting '{label}'")]
    InvalidLighting { id: i64, label: String },
}

pub trait GalleryStore: Send {
    /// Appends an entry stamped with the current time and returns its id.
    fn save(
        &self,
        image_data: &[u8],
        prompt: &str,
        metadata: &GalleryMetadata,
    ) -> Result<i64, StoreError>;

    /// Every entry, newest first.
    fn list_all(&self) -> Result<Vec<GalleryEntry>, StoreError>;

    fn get(&self, id: i64) -> Result<Option<GalleryEntry>, StoreError>;
}

type Clock = Box<dyn Fn() -> i64 + Send + Sync>;

pub struct SqliteGalleryStore {
    conn: Mutex<Connection>,
    clock: Clock,
}

impl SqliteGalleryStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Replaces the wall clock used to stamp new entries.
    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            clock: Box::new(unix_millis),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

impl GalleryStore for SqliteGalleryStore {
    fn save(
        &self,
        image_data: &[u8],
        prompt: &str,
        metadata: &GalleryMetadata,
    ) -> Result<i64, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        // Timestamps never go backwards, even if the wall clock does.
        let newest: i64 = tx.query_row(
            "SELECT COALESCE(MAX(timestamp), 0) FROM images",
            [],
            |row| row.get(0),
        )?;
        let timestamp = (self.clock)().max(newest);
        tx.execute(
            "INSERT INTO images (image_data, prompt, timestamp, lighting, consistency, style_reference)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                image_data,
                prompt,
                timestamp,
                metadata.lighting.map(LightingPreset::label),
                metadata.consistency,
                metadata.style_reference.as_deref(),
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    fn list_all(&self) -> Result<Vec<GalleryEntry>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{SELECT_COLUMNS} ORDER BY timestamp DESC, id DESC"
        ))?;
        let rows = stmt
            .query_map([], RawEntry::from_row)?
            .collect::<Result<Vec<RawEntry>, rusqlite::Error>>()?;
        rows.into_iter().map(RawEntry::into_entry).collect()
    }

    fn get(&self, id: i64) -> Result<Option<GalleryEntry>, StoreError> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id],
                RawEntry::from_row,
            )
            .optional()?;
        raw.map(RawEntry::into_entry).transpose()
    }
}

struct RawEntry {
    id: i64,
    image_data: Vec<u8>,
    prompt: String,
    timestamp: i64,
    lighting: Option<String>,
    consistency: Option<f64>,
    style_reference: Option<String>,
}

impl RawEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            image_data: row.get(1)?,
            prompt: row.get(2)?,
            timestamp: row.get(3)?,
            lighting: row.get(4)?,
            consistency: row.get(5)?,
            style_reference: row.get(6)?,
        })
    }

    fn into_entry(self) -> Result<GalleryEntry, StoreError> {
        let lighting = match self.lighting {
            Some(label) => Some(label.parse::<LightingPreset>().map_err(|_| {
                StoreError::InvalidLighting {
                    id: self.id,
                    label: label.clone(),
                }
            })?),
            None => None,
        };
        Ok(GalleryEntry {
            id: self.id,
            image_data: self.image_data,
            prompt: self.prompt,
            timestamp: self.timestamp,
            metadata: GalleryMetadata {
                lighting,
                consistency: self.consistency,
                style_reference: self.style_reference,
            },
        })
    }
}

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::{GalleryStore, SqliteGalleryStore, StoreError};
    use crate::gallery::GalleryMetadata;
    use crate::params::LightingPreset;

    fn scripted_clock(values: Vec<i64>) -> impl Fn() -> i64 + Send + Sync + 'static {
        let idx = AtomicUsize::new(0);
        move || {
            let i = idx.fetch_add(1, Ordering::SeqCst);
            values[i.min(values.len() - 1)]
        }
    }

    fn metadata() -> GalleryMetadata {
        GalleryMetadata {
            lighting: Some(LightingPreset::GoldenHour),
            consistency: Some(0.85),
            style_reference: None,
        }
    }

    #[test]
    fn empty_store_lists_nothing() -> anyhow::Result<()> {
        let store = SqliteGalleryStore::open_in_memory()?;
        assert!(store.list_all()?.is_empty());
        assert!(store.get(1)?.is_none());
        Ok(())
    }

    #[test]
    fn fresh_insert_is_listed_first() -> anyhow::Result<()> {
        let store = SqliteGalleryStore::open_in_memory()?;
        let id = store.save(b"png-bytes", "render the lobby", &metadata())?;
        let entries = store.list_all()?;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, id);
        assert_eq!(entries[0].image_data, b"png-bytes".to_vec());
        Ok(())
    }

    #[test]
    fn list_all_is_newest_first() -> anyhow::Result<()> {
        let store =
            SqliteGalleryStore::open_in_memory()?.with_clock(scripted_clock(vec![1_000, 2_000, 3_000]));
        let first = store.save(b"1", "t1", &metadata())?;
        let second = store.save(b"2", "t2", &metadata())?;
        let third = store.save(b"3", "t3", &metadata())?;

        let entries = store.list_all()?;
        let ids: Vec<i64> = entries.iter().map(|entry| entry.id).collect();
        assert_eq!(ids, vec![third, second, first]);
        let stamps: Vec<i64> = entries.iter().map(|entry| entry.timestamp).collect();
        assert_eq!(stamps, vec![3_000, 2_000, 1_000]);
        Ok(())
    }

    #[test]
    fn equal_timestamps_fall_back_to_insertion_order() -> anyhow::Result<()> {
        let store = SqliteGalleryStore::open_in_memory()?.with_clock(|| 5_000);
        let a = store.save(b"a", "a", &metadata())?;
        let b = store.save(b"b", "b", &metadata())?;
        let ids: Vec<i64> = store.list_all()?.iter().map(|entry| entry.id).collect();
        assert_eq!(ids, vec![b, a]);
        Ok(())
    }

    #[test]
    fn timestamps_never_move_backwards() -> anyhow::Result<()> {
        let store =
            SqliteGalleryStore::open_in_memory()?.with_clock(scripted_clock(vec![9_000, 4_000]));
        store.save(b"a", "a", &metadata())?;
        let later = store.save(b"b", "b", &metadata())?;
        let entries = store.list_all()?;
        assert_eq!(entries[0].id, later);
        assert_eq!(entries[0].timestamp, 9_000);
        Ok(())
    }

    #[test]
    fn prompt_and_metadata_round_trip_exactly() -> anyhow::Result<()> {
        let store = SqliteGalleryStore::open_in_memory()?;
        let consistency = 0.1 + 0.2;
        let saved = GalleryMetadata {
            lighting: Some(LightingPreset::InteriorArtificial),
            consistency: Some(consistency),
            style_reference: Some("data:image/png;base64,AAAA".to_string()),
        };
        let id = store.save(b"x", "render this in walnut and concrete", &saved)?;

        let entry = store.get(id)?.ok_or_else(|| anyhow::anyhow!("missing entry"))?;
        assert_eq!(entry.prompt, "render this in walnut and concrete");
        assert_eq!(entry.metadata, saved);
        assert_eq!(
            entry.metadata.consistency.map(f64::to_bits),
            Some(consistency.to_bits())
        );
        Ok(())
    }

    #[test]
    fn missing_metadata_fields_stay_absent() -> anyhow::Result<()> {
        let store = SqliteGalleryStore::open_in_memory()?;
        let id = store.save(b"x", "bare", &GalleryMetadata::default())?;
        let entry = store.get(id)?.ok_or_else(|| anyhow::anyhow!("missing entry"))?;
        assert_eq!(entry.metadata, GalleryMetadata::default());
        Ok(())
    }

    #[test]
    fn list_all_is_idempotent_without_writes() -> anyhow::Result<()> {
        let store = SqliteGalleryStore::open_in_memory()?.with_clock(|| 1);
        for idx in 0u8..4 {
            store.save(&[idx], &format!("prompt {idx}"), &metadata())?;
        }
        assert_eq!(store.list_all()?, store.list_all()?);
        Ok(())
    }

    #[test]
    fn entries_survive_reopen() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("gallery.db");
        let id = {
            let store = SqliteGalleryStore::open(&path)?;
            store.save(b"persisted", "render the courtyard", &metadata())?
        };

        let reopened = SqliteGalleryStore::open(&path)?;
        let entries = reopened.list_all()?;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, id);
        assert_eq!(entries[0].prompt, "render the courtyard");

        let next = reopened.save(b"more", "second", &metadata())?;
        assert!(next > id);
        Ok(())
    }

    #[test]
    fn unknown_lighting_label_is_reported() -> anyhow::Result<()> {
        let store = SqliteGalleryStore::open_in_memory()?;
        let id = store.save(b"x", "p", &metadata())?;
        store
            .lock()?
            .execute("UPDATE images SET lighting = 'Neon' WHERE id = ?1", [id])?;
        match store.list_all() {
            Err(StoreError::InvalidLighting { id: bad, label }) => {
                assert_eq!(bad, id);
                assert_eq!(label, "Neon");
            }
            other => panic!("expected invalid lighting, got {other:?}"),
        }
        Ok(())
    }
}

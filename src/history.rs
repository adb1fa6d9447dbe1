use crate::types::{plate_matches, GeoLocation, HistoryEntry};
use failure::Fail;
use log::{debug, info};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use tokio::sync::Mutex;

#[derive(Debug, Fail)]
pub enum HistoryError {
    #[fail(display = "History database error: {}", _0)]
    Db(#[fail(cause)] rusqlite::Error),
}

impl From<rusqlite::Error> for HistoryError {
    fn from(e: rusqlite::Error) -> Self {
        HistoryError::Db(e)
    }
}

/// Recognitions kept on the device while the backend cannot be reached.
/// Listed most recent first.
pub struct LocalHistoryStore {
    conn: Mutex<Connection>,
}

impl LocalHistoryStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, HistoryError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, HistoryError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, HistoryError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS history (
                id TEXT NOT NULL PRIMARY KEY,
                plate TEXT NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                accuracy REAL,
                located_at INTEGER NOT NULL,
                recognized_at INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(LocalHistoryStore {
            conn: Mutex::new(conn),
        })
    }

    /// Adds `entry` at the front; an entry with the same id is replaced.
    pub async fn add(&self, entry: &HistoryEntry) -> Result<(), HistoryError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM history WHERE id = ?1", params![entry.id])?;
        tx.execute(
            "INSERT INTO history (id, plate, latitude, longitude, accuracy, located_at, recognized_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.id,
                entry.plate_text,
                entry.location.latitude,
                entry.location.longitude,
                entry.location.accuracy_meters,
                entry.location.captured_at_epoch_ms,
                entry.recognized_at_epoch_ms,
            ],
        )?;
        tx.commit()?;
        info!("Stored plate {} in local history", entry.plate_text);
        Ok(())
    }

    /// Returns whether an entry was removed.
    pub async fn remove(&self, id: &str) -> Result<bool, HistoryError> {
        let conn = self.conn.lock().await;
        let removed = conn.execute("DELETE FROM history WHERE id = ?1", params![id])?;
        debug!("Removed {} history entries for id {}", removed, id);
        Ok(removed > 0)
    }

    pub async fn clear(&self) -> Result<(), HistoryError> {
        let conn = self.conn.lock().await;
        let removed = conn.execute("DELETE FROM history", [])?;
        info!("Cleared {} history entries", removed);
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<HistoryEntry>, HistoryError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, plate, latitude, longitude, accuracy, located_at, recognized_at
             FROM history ORDER BY rowid DESC",
        )?;
        let rows = stmt.query_map([], entry_from_row)?;
        let mut entries = vec![];
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// Case-insensitive substring match on the plate; an empty query lists everything.
    pub async fn search(&self, query: &str) -> Result<Vec<HistoryEntry>, HistoryError> {
        let entries = self.list().await?;
        if query.is_empty() {
            return Ok(entries);
        }
        Ok(entries
            .into_iter()
            .filter(|e| plate_matches(&e.plate_text, query))
            .collect())
    }
}

fn entry_from_row(row: &Row) -> rusqlite::Result<HistoryEntry> {
    Ok(HistoryEntry {
        id: row.get(0)?,
        plate_text: row.get(1)?,
        location: GeoLocation {
            latitude: row.get(2)?,
            longitude: row.get(3)?,
            accuracy_meters: row.get(4)?,
            captured_at_epoch_ms: row.get(5)?,
        },
        recognized_at_epoch_ms: row.get(6)?,
    })
}

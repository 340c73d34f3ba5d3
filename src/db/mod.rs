//! SQLite artifact store: one file holds a whole trained snapshot.
//!
//! The `tracks` table is the processed track table (identifying fields, raw
//! features, labels, cluster id), with `position` preserving catalog order.
//! The `artifacts` table holds the scaler, cluster model, similarity index and
//! run metadata as JSON payloads.

pub mod queries;

use std::path::{Path, PathBuf};

use log::{debug, info};
use rusqlite::{Connection, OpenFlags};
use thiserror::Error;

use crate::error::EngineError;
use crate::snapshot::Snapshot;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("JSON error in artifact payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Migration failed: {0}")]
    Migration(String),
    #[error(transparent)]
    Integrity(#[from] EngineError),
}

pub type Result<T> = std::result::Result<T, DbError>;

const SCHEMA_VERSION: i32 = 1;

pub struct Database {
    pub conn: Connection,
}

impl Database {
    /// Open (or create) a writable snapshot file and bring its schema up to date.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Open an existing snapshot without writing to it.
    ///
    /// No journal-mode change and no migration: the file and its directory
    /// are left exactly as they were, so a retrain can rename a new file over
    /// it while this connection is still open.
    pub fn open_read_only(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        let db = Self { conn };
        let version = db.schema_version()?;
        if version != SCHEMA_VERSION {
            return Err(DbError::Migration(format!(
                "snapshot schema v{version} is not readable (expected v{SCHEMA_VERSION})"
            )));
        }
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        // Snapshots are written once and then renamed into place, so they
        // must never carry a -wal sidecar.
        self.conn.pragma_update(None, "journal_mode", "DELETE")?;
        self.conn.pragma_update(None, "synchronous", "FULL")?;
        self.migrate()?;
        Ok(())
    }

    fn schema_version(&self) -> Result<i32> {
        Ok(self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?)
    }

    fn migrate(&self) -> Result<()> {
        let version = self.schema_version().unwrap_or(0);

        if version > SCHEMA_VERSION {
            return Err(DbError::Migration(format!(
                "snapshot schema v{version} is newer than supported v{SCHEMA_VERSION}"
            )));
        }
        if version < 1 {
            self.migrate_v1()?;
        }

        self.conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(())
    }

    /// V1: processed track table + JSON artifacts
    fn migrate_v1(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS tracks (
                position         INTEGER PRIMARY KEY,
                track_id         TEXT NOT NULL UNIQUE,
                track_name       TEXT NOT NULL,
                artist           TEXT NOT NULL,
                album            TEXT NOT NULL,
                release_year     INTEGER,
                genres           TEXT NOT NULL DEFAULT '',

                -- Raw features, in vector order
                danceability     REAL NOT NULL,
                energy           REAL NOT NULL,
                valence          REAL NOT NULL,
                tempo            REAL NOT NULL,
                loudness         REAL NOT NULL,
                speechiness      REAL NOT NULL,
                acousticness     REAL NOT NULL,
                liveness         REAL NOT NULL,
                instrumentalness REAL NOT NULL,

                -- Derived
                mood             TEXT NOT NULL,
                activity         TEXT NOT NULL,
                time_of_day      TEXT NOT NULL,
                cluster          INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tracks_mood ON tracks(mood);
            CREATE INDEX IF NOT EXISTS idx_tracks_activity ON tracks(activity);

            CREATE TABLE IF NOT EXISTS artifacts (
                name        TEXT PRIMARY KEY,
                payload     TEXT NOT NULL,
                created_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );
            ",
        )
        .map_err(|e| DbError::Migration(format!("v1: {e}")))?;
        Ok(())
    }
}

/// `path` with `suffix` appended to its file name.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Sibling path the snapshot is staged at before the atomic rename.
fn staging_path(path: &Path) -> PathBuf {
    sibling(path, ".tmp")
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed stale {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Persist `snapshot` at `path`, replacing any previous file atomically.
///
/// The snapshot is written to a `.tmp` sibling in one transaction; only a
/// complete file is ever renamed over the target. Readers holding the old
/// file keep reading it until they reopen.
pub fn save_snapshot(path: &Path, snapshot: &Snapshot) -> Result<()> {
    let tmp = staging_path(path);
    for suffix in ["", "-journal", "-wal", "-shm"] {
        remove_if_present(&sibling(&tmp, suffix))?;
    }

    {
        let db = Database::open(&tmp)?;
        db.write_snapshot(snapshot)?;
    }

    // SQLite replays any log it finds next to a database, whatever file it
    // belonged to.
    for suffix in ["-wal", "-shm"] {
        remove_if_present(&sibling(path, suffix))?;
    }
    std::fs::rename(&tmp, path)?;
    info!(
        "Saved snapshot ({} tracks) to {}",
        snapshot.catalog().len(),
        path.display()
    );
    Ok(())
}

/// Load and validate the snapshot stored at `path`. The file is only read.
pub fn load_snapshot(path: &Path) -> Result<Snapshot> {
    if !path.exists() {
        return Err(DbError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no snapshot at {}", path.display()),
        )));
    }
    let db = Database::open_read_only(path)?;
    let snapshot = db.read_snapshot()?;
    info!(
        "Loaded snapshot ({} tracks, trained {}) from {}",
        snapshot.catalog().len(),
        snapshot.meta().trained_at,
        path.display()
    );
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_database_has_schema() {
        let db = Database::open_in_memory().unwrap();
        let version: i32 = db
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
        let tables: i64 = db
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('tracks', 'artifacts')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 2);
    }

    #[test]
    fn test_newer_schema_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("future.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.pragma_update(None, "user_version", 99).unwrap();
        }
        assert!(matches!(Database::open(&path), Err(DbError::Migration(_))));
        assert!(matches!(Database::open_read_only(&path), Err(DbError::Migration(_))));
    }

    #[test]
    fn test_read_only_open_rejects_unmigrated_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blank.db");
        Connection::open(&path).unwrap().execute_batch("CREATE TABLE t (x)").unwrap();
        assert!(matches!(Database::open_read_only(&path), Err(DbError::Migration(_))));
    }

    #[test]
    fn test_written_file_uses_rollback_journal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.db");
        {
            let db = Database::open(&path).unwrap();
            let mode: String = db
                .conn
                .pragma_query_value(None, "journal_mode", |row| row.get(0))
                .unwrap();
            assert_eq!(mode, "delete");
        }

        let reader = Database::open_read_only(&path).unwrap();
        let count: i64 = reader
            .conn
            .query_row("SELECT COUNT(*) FROM tracks", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
        assert!(!sibling(&path, "-wal").exists());
        assert!(!sibling(&path, "-shm").exists());
    }

    #[test]
    fn test_staging_path_is_sibling() {
        let p = Path::new("/data/moodmatch/snapshot.db");
        assert_eq!(staging_path(p), Path::new("/data/moodmatch/snapshot.db.tmp"));
        assert_eq!(sibling(&staging_path(p), "-wal"), Path::new("/data/moodmatch/snapshot.db.tmp-wal"));
    }

    #[test]
    fn test_missing_snapshot_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_snapshot(&dir.path().join("absent.db")).unwrap_err();
        assert!(matches!(err, DbError::Io(_)));
    }
}

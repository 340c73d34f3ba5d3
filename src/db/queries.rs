use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{Database, DbError, Result};
use crate::catalog::{Track, TrackCatalog};
use crate::cluster::ClusterModel;
use crate::error::EngineError;
use crate::features::{FEATURE_COUNT, Feature};
use crate::index::SimilarityIndex;
use crate::labels::Labels;
use crate::pipeline::Scaler;
use crate::snapshot::{SNAPSHOT_VERSION, Snapshot, SnapshotMeta};

const ARTIFACT_SCALER: &str = "scaler";
const ARTIFACT_CLUSTERS: &str = "cluster_model";
const ARTIFACT_INDEX: &str = "similarity_index";
const ARTIFACT_META: &str = "meta";

const IDENTITY_COLUMNS: [&str; 7] = [
    "position",
    "track_id",
    "track_name",
    "artist",
    "album",
    "release_year",
    "genres",
];
const LABEL_COLUMNS: [&str; 4] = ["mood", "activity", "time_of_day", "cluster"];

/// Every column the processed track table must carry, in select order.
fn track_columns() -> Vec<&'static str> {
    IDENTITY_COLUMNS
        .iter()
        .copied()
        .chain(Feature::ALL.iter().map(|f| f.column()))
        .chain(LABEL_COLUMNS.iter().copied())
        .collect()
}

/// A `tracks` row before its label strings are parsed.
struct TrackRow {
    id: String,
    name: String,
    artist: String,
    album: String,
    release_year: Option<i32>,
    genres: String,
    features: [f64; FEATURE_COUNT],
    mood: String,
    activity: String,
    time_of_day: String,
    cluster: i64,
}

impl TrackRow {
    fn into_track(self) -> std::result::Result<Track, EngineError> {
        let labels = Labels {
            mood: self.mood.parse()?,
            activity: self.activity.parse()?,
            time_of_day: self.time_of_day.parse()?,
        };
        let cluster = usize::try_from(self.cluster).map_err(|_| {
            EngineError::DataIntegrity(format!(
                "track '{}' has negative cluster id {}",
                self.id, self.cluster
            ))
        })?;
        Ok(Track {
            id: self.id,
            name: self.name,
            artist: self.artist,
            album: self.album,
            release_year: self.release_year,
            genres: self.genres,
            features: self.features,
            labels,
            cluster,
        })
    }
}

impl Database {
    /// Replace the stored snapshot with `snapshot` in a single transaction.
    pub fn write_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM tracks", [])?;
        tx.execute("DELETE FROM artifacts", [])?;

        {
            let columns = track_columns();
            let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
            let sql = format!(
                "INSERT INTO tracks ({}) VALUES ({})",
                columns.join(", "),
                placeholders.join(", ")
            );
            let mut stmt = tx.prepare_cached(&sql)?;
            for (pos, t) in snapshot.catalog().tracks().iter().enumerate() {
                let f = &t.features;
                stmt.execute(params![
                    pos as i64, t.id, t.name, t.artist, t.album, t.release_year, t.genres,
                    f[0], f[1], f[2], f[3], f[4], f[5], f[6], f[7], f[8],
                    t.labels.mood.as_str(), t.labels.activity.as_str(),
                    t.labels.time_of_day.as_str(), t.cluster as i64,
                ])?;
            }
        }

        store_artifact(&tx, ARTIFACT_SCALER, snapshot.scaler())?;
        store_artifact(&tx, ARTIFACT_CLUSTERS, snapshot.clusters())?;
        store_artifact(&tx, ARTIFACT_INDEX, snapshot.index())?;
        store_artifact(&tx, ARTIFACT_META, snapshot.meta())?;

        tx.commit()?;
        Ok(())
    }

    /// Rebuild a snapshot, validating the table layout and cross-artifact consistency.
    pub fn read_snapshot(&self) -> Result<Snapshot> {
        self.check_track_columns()?;

        let meta: SnapshotMeta = load_artifact(&self.conn, ARTIFACT_META)?;
        if meta.version != SNAPSHOT_VERSION {
            return Err(EngineError::DataIntegrity(format!(
                "snapshot format v{} is not supported (expected v{SNAPSHOT_VERSION})",
                meta.version
            ))
            .into());
        }
        let scaler: Scaler = load_artifact(&self.conn, ARTIFACT_SCALER)?;
        let clusters: ClusterModel = load_artifact(&self.conn, ARTIFACT_CLUSTERS)?;
        let index: SimilarityIndex = load_artifact(&self.conn, ARTIFACT_INDEX)?;

        let tracks = self.load_tracks()?;
        if tracks.len() != meta.tracks {
            return Err(EngineError::DataIntegrity(format!(
                "metadata records {} tracks but the table holds {}",
                meta.tracks,
                tracks.len()
            ))
            .into());
        }
        let clusters = clusters.with_assignments(tracks.iter().map(|t| t.cluster).collect());
        let catalog = TrackCatalog::new(tracks)?;
        Ok(Snapshot::new(scaler, catalog, clusters, index, meta)?)
    }

    /// Fail if the `tracks` table is missing any expected column.
    fn check_track_columns(&self) -> Result<()> {
        let mut stmt = self.conn.prepare("PRAGMA table_info(tracks)")?;
        let present: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let missing: Vec<&str> = track_columns()
            .into_iter()
            .filter(|c| !present.iter().any(|p| p == c))
            .collect();
        if !missing.is_empty() {
            return Err(EngineError::DataIntegrity(format!(
                "tracks table is missing columns: {}",
                missing.join(", ")
            ))
            .into());
        }
        Ok(())
    }

    fn load_tracks(&self) -> Result<Vec<Track>> {
        let sql = format!(
            "SELECT {} FROM tracks ORDER BY position",
            track_columns().join(", ")
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                let mut features = [0.0; FEATURE_COUNT];
                for (d, f) in features.iter_mut().enumerate() {
                    *f = row.get(IDENTITY_COLUMNS.len() + d)?;
                }
                let labels_at = IDENTITY_COLUMNS.len() + FEATURE_COUNT;
                Ok(TrackRow {
                    id: row.get(1)?,
                    name: row.get(2)?,
                    artist: row.get(3)?,
                    album: row.get(4)?,
                    release_year: row.get(5)?,
                    genres: row.get(6)?,
                    features,
                    mood: row.get(labels_at)?,
                    activity: row.get(labels_at + 1)?,
                    time_of_day: row.get(labels_at + 2)?,
                    cluster: row.get(labels_at + 3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|r| r.into_track().map_err(DbError::from))
            .collect()
    }
}

fn store_artifact<T: Serialize>(conn: &Connection, name: &str, value: &T) -> Result<()> {
    let payload = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO artifacts (name, payload) VALUES (?1, ?2)",
        params![name, payload],
    )?;
    Ok(())
}

fn load_artifact<T: DeserializeOwned>(conn: &Connection, name: &str) -> Result<T> {
    let payload: Option<String> = conn
        .query_row(
            "SELECT payload FROM artifacts WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()?;
    let payload = payload.ok_or_else(|| {
        EngineError::DataIntegrity(format!("snapshot has no '{name}' artifact"))
    })?;
    Ok(serde_json::from_str(&payload)?)
}

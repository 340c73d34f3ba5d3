//! Raw dataset import.
//!
//! The training input is a CSV export with one row per track. Columns are
//! bound to typed fields once, from the header, so a renamed or missing column
//! fails before any row is read.

use std::io::Read;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::features::{Feature, FeatureVector};

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("dataset is missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
}

pub type Result<T> = std::result::Result<T, DatasetError>;

/// Identifying columns every dataset must carry (features are checked separately).
const ID_COLUMNS: [&str; 6] = [
    "track_id",
    "track_name",
    "artist",
    "album",
    "release_year",
    "genres",
];

/// One track as it arrives from the raw dataset, before labelling.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTrack {
    pub id: String,
    pub name: String,
    pub artist: String,
    pub album: String,
    pub release_year: Option<i32>,
    /// Comma-delimited genre text; empty when the source had none.
    pub genres: String,
    pub features: FeatureVector,
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    track_id: String,
    track_name: String,
    artist: String,
    album: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    release_year: Option<i32>,
    #[serde(default)]
    genres: Option<String>,
    danceability: f64,
    energy: f64,
    valence: f64,
    tempo: f64,
    loudness: f64,
    speechiness: f64,
    acousticness: f64,
    liveness: f64,
    instrumentalness: f64,
}

impl From<CsvRow> for RawTrack {
    fn from(row: CsvRow) -> Self {
        Self {
            id: row.track_id,
            name: row.track_name,
            artist: row.artist,
            album: row.album,
            release_year: row.release_year,
            genres: row.genres.unwrap_or_default(),
            // Same order as Feature::ALL
            features: [
                row.danceability,
                row.energy,
                row.valence,
                row.tempo,
                row.loudness,
                row.speechiness,
                row.acousticness,
                row.liveness,
                row.instrumentalness,
            ],
        }
    }
}

/// Load a raw dataset CSV from disk.
pub fn load_dataset(path: &Path) -> Result<Vec<RawTrack>> {
    let file = std::fs::File::open(path)?;
    let rows = read_dataset(file)?;
    log::info!("Loaded {} raw rows from {}", rows.len(), path.display());
    Ok(rows)
}

/// Parse a raw dataset from any reader. Extra columns are ignored.
pub fn read_dataset<R: Read>(reader: R) -> Result<Vec<RawTrack>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let missing: Vec<String> = required_columns()
        .filter(|col| !headers.iter().any(|h| h == *col))
        .map(str::to_string)
        .collect();
    if !missing.is_empty() {
        return Err(DatasetError::MissingColumns(missing));
    }

    let mut rows = Vec::new();
    for record in rdr.deserialize::<CsvRow>() {
        rows.push(RawTrack::from(record?));
    }
    Ok(rows)
}

fn required_columns() -> impl Iterator<Item = &'static str> {
    ID_COLUMNS
        .into_iter()
        .chain(Feature::ALL.iter().map(|f| f.column()))
}

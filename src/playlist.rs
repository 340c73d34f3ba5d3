//! Label-filtered playlists and the fallback used when nothing matches.

use std::fmt;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::catalog::{Track, TrackCatalog};
use crate::error::{EngineError, Result};
use crate::rng::SharedRng;

pub const DEFAULT_PLAYLIST_SIZE: usize = 20;
pub const DEFAULT_RELATED_SIZE: usize = 5;

/// What a lookup returns when the requested key has no match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Uniform sample of `min(n, catalog_size)` tracks from the whole catalog.
    #[default]
    RandomSample,
    Empty,
    /// Surface `EngineError::NotFound`.
    Error,
}

/// Whether a selection is a real match or the fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Matched,
    Fallback,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Matched => "matched",
            Self::Fallback => "fallback",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Selection {
    pub tracks: Vec<Track>,
    pub provenance: Provenance,
}

impl Selection {
    pub fn matched(tracks: Vec<Track>) -> Self {
        Self { tracks, provenance: Provenance::Matched }
    }

    pub fn is_fallback(&self) -> bool {
        self.provenance == Provenance::Fallback
    }

    pub fn ids(&self) -> Vec<&str> {
        self.tracks.iter().map(|t| t.id.as_str()).collect()
    }
}

/// Apply `policy` for a miss described by `what`.
pub fn fallback(
    catalog: &TrackCatalog,
    n: usize,
    policy: FallbackPolicy,
    rng: &SharedRng,
    what: &str,
) -> Result<Selection> {
    debug!("No match for {what}; applying {policy:?}");
    match policy {
        FallbackPolicy::RandomSample => {
            let tracks = rng
                .sample_indices(catalog.len(), n)
                .into_iter()
                .filter_map(|pos| catalog.at(pos).cloned())
                .collect();
            Ok(Selection { tracks, provenance: Provenance::Fallback })
        }
        FallbackPolicy::Empty => Ok(Selection { tracks: Vec::new(), provenance: Provenance::Fallback }),
        FallbackPolicy::Error => Err(EngineError::NotFound(what.to_string())),
    }
}

/// Filter by `predicate`, then trim to `n`.
///
/// More than `n` matches are sampled down at random; otherwise all matches are
/// returned in catalog order. Zero matches go to the fallback.
pub fn select_where<P>(
    catalog: &TrackCatalog,
    predicate: P,
    n: usize,
    policy: FallbackPolicy,
    rng: &SharedRng,
    what: &str,
) -> Result<Selection>
where
    P: FnMut(&Track) -> bool,
{
    let matches = catalog.filter(predicate);
    if matches.is_empty() {
        return fallback(catalog, n, policy, rng, what);
    }
    let tracks = if matches.len() > n {
        rng.sample_indices(matches.len(), n)
            .into_iter()
            .map(|i| matches[i].clone())
            .collect()
    } else {
        matches.into_iter().cloned().collect()
    };
    Ok(Selection::matched(tracks))
}

/// Tracks whose mood label equals `mood` exactly.
pub fn mood_playlist(
    catalog: &TrackCatalog,
    mood: &str,
    n: usize,
    policy: FallbackPolicy,
    rng: &SharedRng,
) -> Result<Selection> {
    select_where(
        catalog,
        |t| t.labels.mood.as_str() == mood,
        n,
        policy,
        rng,
        &format!("mood '{mood}'"),
    )
}

pub fn activity_playlist(
    catalog: &TrackCatalog,
    activity: &str,
    n: usize,
    policy: FallbackPolicy,
    rng: &SharedRng,
) -> Result<Selection> {
    select_where(
        catalog,
        |t| t.labels.activity.as_str() == activity,
        n,
        policy,
        rng,
        &format!("activity '{activity}'"),
    )
}

pub fn time_of_day_playlist(
    catalog: &TrackCatalog,
    time_of_day: &str,
    n: usize,
    policy: FallbackPolicy,
    rng: &SharedRng,
) -> Result<Selection> {
    select_where(
        catalog,
        |t| t.labels.time_of_day.as_str() == time_of_day,
        n,
        policy,
        rng,
        &format!("time of day '{time_of_day}'"),
    )
}

/// Tracks sharing the seed's mood or activity, first `n` in catalog order.
///
/// Tracks with the same name as the seed are skipped, which also drops the
/// seed itself and re-releases of it.
pub fn related_by_labels(
    catalog: &TrackCatalog,
    track_id: &str,
    n: usize,
    policy: FallbackPolicy,
    rng: &SharedRng,
) -> Result<Selection> {
    let Some(seed) = catalog.get(track_id) else {
        return fallback(catalog, n, policy, rng, &format!("track '{track_id}'"));
    };
    let tracks = catalog
        .tracks()
        .iter()
        .filter(|t| t.name != seed.name)
        .filter(|t| t.labels.mood == seed.labels.mood || t.labels.activity == seed.labels.activity)
        .take(n)
        .cloned()
        .collect();
    Ok(Selection::matched(tracks))
}

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::error::{EngineError, Result};
use crate::features::FeatureVector;
use crate::labels::Labels;

/// A processed track: display metadata, raw features, derived labels, cluster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Track {
    pub id: String,
    pub name: String,
    pub artist: String,
    pub album: String,
    pub release_year: Option<i32>,
    /// Comma-delimited genre text as it came from the dataset.
    pub genres: String,
    /// Raw (unstandardized) features in `Feature::ALL` order.
    pub features: FeatureVector,
    pub labels: Labels,
    pub cluster: usize,
}

/// Split genre text on commas into lowercased, trimmed, non-empty tokens.
pub fn parse_genres(text: &str) -> BTreeSet<String> {
    text.split(',')
        .map(|g| g.trim().to_lowercase())
        .filter(|g| !g.is_empty())
        .collect()
}

/// Immutable in-memory track table, keyed by id, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct TrackCatalog {
    tracks: Vec<Track>,
    by_id: HashMap<String, usize>,
}

impl TrackCatalog {
    /// Build a catalog. Duplicate ids are a data integrity error.
    pub fn new(tracks: Vec<Track>) -> Result<Self> {
        let mut by_id = HashMap::with_capacity(tracks.len());
        for (pos, track) in tracks.iter().enumerate() {
            if by_id.insert(track.id.clone(), pos).is_some() {
                return Err(EngineError::DataIntegrity(format!(
                    "duplicate track id '{}' in catalog",
                    track.id
                )));
            }
            let recomputed = Labels::classify(&track.features);
            if recomputed != track.labels {
                return Err(EngineError::DataIntegrity(format!(
                    "track '{}' labels {:?} do not match its features ({:?})",
                    track.id, track.labels, recomputed
                )));
            }
        }
        Ok(Self { tracks, by_id })
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn get(&self, id: &str) -> Option<&Track> {
        self.position(id).map(|pos| &self.tracks[pos])
    }

    /// Insertion position of a track id.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    pub fn at(&self, position: usize) -> Option<&Track> {
        self.tracks.get(position)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    /// Tracks matching a predicate, in catalog order.
    pub fn filter<'a, P>(&'a self, mut predicate: P) -> Vec<&'a Track>
    where
        P: FnMut(&Track) -> bool,
    {
        self.tracks.iter().filter(|t| predicate(t)).collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::features::{FEATURE_COUNT, Feature};

    /// Test helper shared with other modules: a track whose labels match its features.
    pub(crate) fn make_track(id: &str, features: FeatureVector, genres: &str) -> Track {
        Track {
            id: id.to_string(),
            name: format!("Song {id}"),
            artist: "Artist".to_string(),
            album: "Album".to_string(),
            release_year: Some(2020),
            genres: genres.to_string(),
            features,
            labels: Labels::classify(&features),
            cluster: 0,
        }
    }

    fn features(energy: f64, valence: f64) -> FeatureVector {
        let mut f = [0.5; FEATURE_COUNT];
        f[Feature::Energy.index()] = energy;
        f[Feature::Valence.index()] = valence;
        f[Feature::Tempo.index()] = 100.0;
        f
    }

    #[test]
    fn test_lookup_by_id_and_position() {
        let catalog = TrackCatalog::new(vec![
            make_track("a", features(0.7, 0.7), "pop"),
            make_track("b", features(0.2, 0.2), "folk"),
        ])
        .unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.position("b"), Some(1));
        assert_eq!(catalog.get("a").unwrap().genres, "pop");
        assert!(catalog.get("zzz").is_none());
        assert!(catalog.contains("a"));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let err = TrackCatalog::new(vec![
            make_track("a", features(0.7, 0.7), ""),
            make_track("a", features(0.2, 0.2), ""),
        ])
        .unwrap_err();
        assert!(matches!(err, EngineError::DataIntegrity(_)));
    }

    #[test]
    fn test_stale_labels_rejected() {
        let mut t = make_track("a", features(0.7, 0.7), "");
        t.labels.mood = crate::labels::Mood::Sad;
        assert!(TrackCatalog::new(vec![t]).is_err());
    }

    #[test]
    fn test_parse_genres_normalizes() {
        let set: Vec<String> = parse_genres(" Rock, indie rock ,ROCK,, ").into_iter().collect();
        assert_eq!(set, ["indie rock", "rock"]);
        assert!(parse_genres("").is_empty());
    }
}

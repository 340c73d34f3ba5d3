//! Serving layer: every runtime query reads the current [`Snapshot`].
//!
//! The snapshot sits behind an `ArcSwap`, so queries never lock and a
//! retrained snapshot replaces the old one with a single pointer swap. The
//! shared RNG is the only mutable state.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use log::{debug, info, warn};

use crate::catalog::Track;
use crate::error::{EngineError, Result};
use crate::features::FeatureVector;
use crate::playlist::{self, DEFAULT_PLAYLIST_SIZE, DEFAULT_RELATED_SIZE, FallbackPolicy, Selection};
use crate::provider::TrackMetadataProvider;
use crate::rng::SharedRng;
use crate::scoring::{self, DEFAULT_PERTURBATION};
use crate::snapshot::Snapshot;

pub const DEFAULT_SIMILAR_K: usize = 10;
pub const DEFAULT_PROVIDER_BUDGET: Duration = Duration::from_secs(20);

/// Which label a playlist filters on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelKind {
    Mood,
    Activity,
    TimeOfDay,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    pub fallback: FallbackPolicy,
    /// Half-width of the compatibility noise; 0 disables it.
    pub perturbation: f64,
    pub similar_k: usize,
    pub playlist_size: usize,
    pub related_size: usize,
    /// Wall-clock allowance for all provider lookups in one score call.
    pub provider_budget: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            fallback: FallbackPolicy::default(),
            perturbation: DEFAULT_PERTURBATION,
            similar_k: DEFAULT_SIMILAR_K,
            playlist_size: DEFAULT_PLAYLIST_SIZE,
            related_size: DEFAULT_RELATED_SIZE,
            provider_budget: DEFAULT_PROVIDER_BUDGET,
        }
    }
}

/// A track resolved for scoring, from the catalog or the provider.
struct Resolved {
    standardized: FeatureVector,
    genres: String,
}

pub struct Recommender {
    snapshot: ArcSwap<Snapshot>,
    rng: SharedRng,
    provider: Option<Arc<dyn TrackMetadataProvider>>,
    settings: EngineSettings,
}

impl Recommender {
    pub fn new(snapshot: Snapshot, settings: EngineSettings, rng: SharedRng) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(snapshot),
            rng,
            provider: None,
            settings,
        }
    }

    /// Attach a source for ids the catalog does not hold.
    pub fn with_provider(mut self, provider: Arc<dyn TrackMetadataProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// The snapshot queries currently read.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.load_full()
    }

    /// Replace the live snapshot, returning the previous one. In-flight
    /// queries finish on whichever snapshot they loaded.
    pub fn swap(&self, next: Snapshot) -> Arc<Snapshot> {
        info!(
            "Swapping in snapshot trained {} ({} tracks)",
            next.meta().trained_at,
            next.meta().tracks
        );
        self.snapshot.swap(Arc::new(next))
    }

    /// Nearest neighbours of a catalog track, ordered by distance; the track
    /// itself is included.
    ///
    /// An unknown id is handled by the configured [`FallbackPolicy`]; check
    /// [`Selection::provenance`] to tell real neighbours from a sample.
    pub fn get_similar_tracks(&self, track_id: &str, k: usize) -> Result<Selection> {
        self.similar_tracks_with(track_id, k, self.settings.fallback)
    }

    pub fn similar_tracks_with(
        &self,
        track_id: &str,
        k: usize,
        policy: FallbackPolicy,
    ) -> Result<Selection> {
        let snap = self.snapshot.load();
        let catalog = snap.catalog();
        let Some(pos) = catalog.position(track_id) else {
            return playlist::fallback(catalog, k, policy, &self.rng, &format!("track '{track_id}'"));
        };
        let query = snap
            .index()
            .vector(pos)
            .ok_or_else(|| EngineError::DataIntegrity(format!("no index row for '{track_id}'")))?;
        let tracks = snap
            .index()
            .query(query, k)?
            .into_iter()
            .filter_map(|n| catalog.at(n.position).cloned())
            .collect();
        Ok(Selection::matched(tracks))
    }

    pub fn get_mood_playlist(&self, mood: &str, n: usize) -> Result<Selection> {
        self.playlist(LabelKind::Mood, mood, n, self.settings.fallback)
    }

    pub fn get_activity_playlist(&self, activity: &str, n: usize) -> Result<Selection> {
        self.playlist(LabelKind::Activity, activity, n, self.settings.fallback)
    }

    pub fn get_time_of_day_playlist(&self, time_of_day: &str, n: usize) -> Result<Selection> {
        self.playlist(LabelKind::TimeOfDay, time_of_day, n, self.settings.fallback)
    }

    /// Label playlist with an explicit fallback policy.
    pub fn playlist(
        &self,
        kind: LabelKind,
        label: &str,
        n: usize,
        policy: FallbackPolicy,
    ) -> Result<Selection> {
        let snap = self.snapshot.load();
        let catalog = snap.catalog();
        match kind {
            LabelKind::Mood => playlist::mood_playlist(catalog, label, n, policy, &self.rng),
            LabelKind::Activity => playlist::activity_playlist(catalog, label, n, policy, &self.rng),
            LabelKind::TimeOfDay => {
                playlist::time_of_day_playlist(catalog, label, n, policy, &self.rng)
            }
        }
    }

    /// Tracks sharing the seed's mood or activity.
    pub fn related_by_labels(&self, track_id: &str, n: usize) -> Result<Selection> {
        let snap = self.snapshot.load();
        playlist::related_by_labels(snap.catalog(), track_id, n, self.settings.fallback, &self.rng)
    }

    /// Compatibility in [0, 100]. Any failure degrades to 0.
    pub fn calculate_compatibility_score(&self, track_ids: &[String]) -> f64 {
        self.try_compatibility_score(track_ids).unwrap_or_else(|e| {
            warn!("Compatibility score degraded to 0: {e}");
            0.0
        })
    }

    /// Diversity in [0, 100]. Any failure degrades to 0.
    pub fn calculate_diversity_score(&self, track_ids: &[String]) -> f64 {
        self.try_diversity_score(track_ids).unwrap_or_else(|e| {
            warn!("Diversity score degraded to 0: {e}");
            0.0
        })
    }

    pub fn try_compatibility_score(&self, track_ids: &[String]) -> Result<f64> {
        let resolved = self.resolve(track_ids)?;
        let rows: Vec<FeatureVector> = resolved.iter().map(|r| r.standardized).collect();
        scoring::compatibility_score(&rows, self.settings.perturbation, &self.rng)
    }

    pub fn try_diversity_score(&self, track_ids: &[String]) -> Result<f64> {
        let resolved = self.resolve(track_ids)?;
        let rows: Vec<FeatureVector> = resolved.iter().map(|r| r.standardized).collect();
        let genres: Vec<&str> = resolved.iter().map(|r| r.genres.as_str()).collect();
        scoring::diversity_score(&rows, &genres)
    }

    /// Resolve ids into standardized rows in a canonical order.
    ///
    /// Duplicates collapse to their first occurrence. Catalog hits come first,
    /// in catalog order. Only when fewer than two hit is the provider asked for
    /// the rest; its results follow, ordered by id. Input order never matters.
    fn resolve(&self, track_ids: &[String]) -> Result<Vec<Resolved>> {
        let mut seen = HashSet::with_capacity(track_ids.len());
        let unique: Vec<&str> = track_ids
            .iter()
            .map(String::as_str)
            .filter(|id| seen.insert(*id))
            .collect();
        if unique.len() < 2 {
            return Err(EngineError::InvalidInput(format!(
                "need at least 2 distinct track ids, got {}",
                unique.len()
            )));
        }

        let snap = self.snapshot.load();
        let catalog = snap.catalog();
        let mut hits: Vec<(usize, &Track)> = unique
            .iter()
            .filter_map(|id| catalog.position(id).zip(catalog.get(id)))
            .collect();
        hits.sort_by_key(|(pos, _)| *pos);

        let mut resolved: Vec<Resolved> = hits
            .into_iter()
            .map(|(_, track)| Resolved {
                standardized: snap.standardized(track),
                genres: track.genres.clone(),
            })
            .collect();

        if resolved.len() < 2 {
            let mut missing: Vec<&str> = unique
                .iter()
                .copied()
                .filter(|id| !catalog.contains(id))
                .collect();
            missing.sort_unstable();
            resolved.extend(self.fetch_external(&snap, &missing));
        }

        if resolved.len() < 2 {
            return Err(EngineError::InvalidInput(format!(
                "only {} of {} track ids could be resolved",
                resolved.len(),
                unique.len()
            )));
        }
        Ok(resolved)
    }

    /// Ask the provider for `ids` one at a time, stopping once the
    /// configured budget is spent.
    fn fetch_external(&self, snap: &Snapshot, ids: &[&str]) -> Vec<Resolved> {
        let Some(provider) = self.provider.as_ref() else {
            debug!("{} ids unresolved and no provider configured", ids.len());
            return Vec::new();
        };
        let deadline = Instant::now() + self.settings.provider_budget;
        let mut resolved = Vec::new();
        for (done, id) in ids.iter().enumerate() {
            if Instant::now() >= deadline {
                warn!(
                    "Provider budget of {:?} spent; skipping {} remaining ids",
                    self.settings.provider_budget,
                    ids.len() - done
                );
                break;
            }
            match provider.fetch_track(id) {
                Ok(ext) => resolved.push(Resolved {
                    standardized: snap.scaler().standardize(&ext.features),
                    genres: ext.genres,
                }),
                Err(e) => warn!("Provider could not resolve '{id}': {e}"),
            }
        }
        resolved
    }
}

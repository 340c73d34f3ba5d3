use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{Track, TrackCatalog};
use crate::cluster::ClusterModel;
use crate::error::{EngineError, Result};
use crate::features::FeatureVector;
use crate::index::SimilarityIndex;
use crate::pipeline::Scaler;

/// Bumped whenever the persisted layout of any snapshot part changes.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Facts about the training run that produced a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub version: u32,
    pub trained_at: DateTime<Utc>,
    pub tracks: usize,
    pub clusters: usize,
    pub inertia: f64,
    pub iterations: usize,
}

/// Everything one training run produces. Never mutated after construction;
/// retraining builds a new one and swaps it in whole.
#[derive(Debug, Clone)]
pub struct Snapshot {
    scaler: Scaler,
    catalog: TrackCatalog,
    clusters: ClusterModel,
    index: SimilarityIndex,
    meta: SnapshotMeta,
}

impl Snapshot {
    /// Assemble a snapshot, checking that the index rows line up with the catalog.
    pub fn new(
        scaler: Scaler,
        catalog: TrackCatalog,
        clusters: ClusterModel,
        index: SimilarityIndex,
        meta: SnapshotMeta,
    ) -> Result<Self> {
        if index.len() != catalog.len() {
            return Err(EngineError::DataIntegrity(format!(
                "index holds {} rows but catalog holds {} tracks",
                index.len(),
                catalog.len()
            )));
        }
        if let Some((pos, (id, track))) = index
            .ids()
            .iter()
            .zip(catalog.tracks())
            .enumerate()
            .find(|(_, (id, track))| **id != track.id)
        {
            return Err(EngineError::DataIntegrity(format!(
                "index row {pos} is '{id}' but catalog position {pos} is '{}'",
                track.id
            )));
        }
        if let Some(track) = catalog.tracks().iter().find(|t| t.cluster >= clusters.k()) {
            return Err(EngineError::DataIntegrity(format!(
                "track '{}' is in cluster {} but the model has {} clusters",
                track.id,
                track.cluster,
                clusters.k()
            )));
        }
        Ok(Self { scaler, catalog, clusters, index, meta })
    }

    pub fn scaler(&self) -> &Scaler {
        &self.scaler
    }

    pub fn catalog(&self) -> &TrackCatalog {
        &self.catalog
    }

    pub fn clusters(&self) -> &ClusterModel {
        &self.clusters
    }

    pub fn index(&self) -> &SimilarityIndex {
        &self.index
    }

    pub fn meta(&self) -> &SnapshotMeta {
        &self.meta
    }

    /// Standardized vector for a catalog track.
    pub fn standardized(&self, track: &Track) -> FeatureVector {
        self.catalog
            .position(&track.id)
            .and_then(|pos| self.index.vector(pos).copied())
            .unwrap_or_else(|| self.scaler.standardize(&track.features))
    }
}

//! Batch training: raw dataset in, one immutable [`Snapshot`] out.

use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use rayon::prelude::*;

use crate::catalog::{Track, TrackCatalog};
use crate::cluster::{ClusterModel, KMeansConfig};
use crate::dataset::RawTrack;
use crate::error::{EngineError, Result};
use crate::features::FeatureVector;
use crate::index::SimilarityIndex;
use crate::labels::Labels;
use crate::pipeline::FeaturePipeline;
use crate::snapshot::{SNAPSHOT_VERSION, Snapshot, SnapshotMeta};

#[derive(Debug, Clone, Copy, Default)]
pub struct TrainingConfig {
    pub kmeans: KMeansConfig,
    /// Worker threads for standardization, labelling and clustering. 0 = rayon default.
    pub workers: usize,
}

/// Run the full pipeline: clean, fit the scaler, standardize, label, cluster, index.
///
/// Any `DataIntegrity` error aborts the run; nothing partial is returned.
pub fn fit_all(raw: Vec<RawTrack>, config: &TrainingConfig) -> Result<Snapshot> {
    let mut builder = rayon::ThreadPoolBuilder::new();
    if config.workers > 0 {
        builder = builder.num_threads(config.workers);
    }
    let pool = builder.build().map_err(|e| {
        EngineError::InvalidInput(format!("cannot start {} training workers: {e}", config.workers))
    })?;
    pool.install(|| fit_in_pool(raw, config))
}

fn fit_in_pool(raw: Vec<RawTrack>, config: &TrainingConfig) -> Result<Snapshot> {
    info!("Training on {} raw rows", raw.len());
    let (scaler, rows) = FeaturePipeline::fit(raw)?;

    let raw_matrix: Vec<FeatureVector> = rows.iter().map(|r| r.features).collect();
    let standardized = scaler.transform_matrix(&raw_matrix);

    let pb = ProgressBar::new(rows.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} labelling [{bar:40.cyan/blue}] {pos}/{len} tracks")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    let labels: Vec<Labels> = raw_matrix
        .par_iter()
        .map(|f| {
            let l = Labels::classify(f);
            pb.inc(1);
            l
        })
        .collect();
    pb.finish_and_clear();

    let clusters = ClusterModel::fit(&standardized, &config.kmeans)?;

    let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
    let tracks: Vec<Track> = rows
        .into_iter()
        .zip(labels)
        .zip(clusters.assignments())
        .map(|((r, labels), &cluster)| Track {
            id: r.id,
            name: r.name,
            artist: r.artist,
            album: r.album,
            release_year: r.release_year,
            genres: r.genres,
            features: r.features,
            labels,
            cluster,
        })
        .collect();

    let catalog = TrackCatalog::new(tracks)?;
    let index = SimilarityIndex::build(ids, standardized)?;
    let meta = SnapshotMeta {
        version: SNAPSHOT_VERSION,
        trained_at: Utc::now(),
        tracks: catalog.len(),
        clusters: clusters.k(),
        inertia: clusters.inertia(),
        iterations: clusters.iterations(),
    };
    info!(
        "Trained snapshot: {} tracks, {} clusters",
        meta.tracks, meta.clusters
    );
    Snapshot::new(scaler, catalog, clusters, index, meta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{FEATURE_COUNT, Feature};

    fn raw(id: &str, seed: f64) -> RawTrack {
        let mut features = [0.0; FEATURE_COUNT];
        for (d, f) in features.iter_mut().enumerate() {
            *f = ((seed * 7.3 + d as f64 * 1.7).sin() + 1.0) / 2.0;
        }
        features[Feature::Tempo.index()] = 60.0 + 100.0 * features[Feature::Tempo.index()];
        features[Feature::Loudness.index()] = -30.0 * features[Feature::Loudness.index()];
        RawTrack {
            id: id.to_string(),
            name: format!("Song {id}"),
            artist: "Artist".into(),
            album: "Album".into(),
            release_year: Some(2000),
            genres: "pop".into(),
            features,
        }
    }

    fn config(clusters: usize) -> TrainingConfig {
        TrainingConfig {
            kmeans: KMeansConfig { clusters, ..Default::default() },
            workers: 2,
        }
    }

    #[test]
    fn test_fit_all_produces_consistent_snapshot() {
        let rows: Vec<RawTrack> = (0..30).map(|i| raw(&format!("t{i}"), i as f64)).collect();
        let snap = fit_all(rows, &config(4)).unwrap();

        assert_eq!(snap.catalog().len(), 30);
        assert_eq!(snap.index().len(), 30);
        assert_eq!(snap.meta().tracks, 30);
        assert_eq!(snap.meta().clusters, 4);
        for (pos, track) in snap.catalog().tracks().iter().enumerate() {
            assert_eq!(snap.index().ids()[pos], track.id);
            assert_eq!(track.labels, Labels::classify(&track.features));
            assert!(track.cluster < 4);
        }
    }

    #[test]
    fn test_fit_all_dedupes_before_fitting() {
        let mut rows: Vec<RawTrack> = (0..10).map(|i| raw(&format!("t{i}"), i as f64)).collect();
        rows.push(raw("t3", 99.0));
        let snap = fit_all(rows, &config(3)).unwrap();
        assert_eq!(snap.catalog().len(), 10);
        assert_eq!(snap.catalog().get("t3").unwrap().features, raw("t3", 3.0).features);
    }

    #[test]
    fn test_zero_variance_aborts_training() {
        let rows: Vec<RawTrack> = (0..10)
            .map(|i| {
                let mut r = raw(&format!("t{i}"), i as f64);
                r.features[Feature::Speechiness.index()] = 0.05;
                r
            })
            .collect();
        let err = fit_all(rows, &config(3)).unwrap_err();
        assert!(matches!(err, EngineError::DataIntegrity(_)));
    }

    #[test]
    fn test_empty_dataset_rejected() {
        assert!(matches!(fit_all(Vec::new(), &config(3)), Err(EngineError::InvalidInput(_))));
    }
}

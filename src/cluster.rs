//! K-means partitioning of standardized feature vectors.
//!
//! **DETERMINISTIC**: k-means++ seeding draws from a `StdRng` with a fixed seed,
//! and empty clusters are re-seeded from the farthest point rather than a
//! random one, so the same matrix always yields the same assignment.
//!
//! Cluster ids are stored on each track as metadata. Nothing downstream
//! scores on them.

use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, trace};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::features::{FeatureVector, euclidean};

pub const DEFAULT_CLUSTERS: usize = 8;
pub const DEFAULT_MAX_ITERATIONS: usize = 300;
pub const DEFAULT_SEED: u64 = 42;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KMeansConfig {
    pub clusters: usize,
    pub max_iterations: usize,
    pub seed: u64,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            clusters: DEFAULT_CLUSTERS,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            seed: DEFAULT_SEED,
        }
    }
}

/// Fitted centroids plus the assignment of every training row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterModel {
    centroids: Vec<FeatureVector>,
    #[serde(skip)]
    assignments: Vec<usize>,
    inertia: f64,
    iterations: usize,
}

impl ClusterModel {
    /// Run k-means until assignments stop changing or the iteration cap is hit.
    pub fn fit(points: &[FeatureVector], config: &KMeansConfig) -> Result<Self> {
        if points.is_empty() {
            return Err(EngineError::InvalidInput(
                "cannot cluster an empty matrix".into(),
            ));
        }
        if config.clusters == 0 {
            return Err(EngineError::InvalidInput("cluster count must be positive".into()));
        }

        let k = config.clusters.min(points.len());
        if k < config.clusters {
            debug!("Only {} points, clustering with k = {}", points.len(), k);
        }

        let mut centroids = kmeans_plus_plus(points, k, config.seed);
        let mut assignments = assign(points, &centroids);
        let mut iterations = 0;

        let pb = ProgressBar::new(config.max_iterations as u64);
        pb.set_style(
            ProgressStyle::with_template("{spinner:.green} k-means [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );

        for iter in 0..config.max_iterations {
            iterations = iter + 1;
            centroids = recompute(points, &assignments, &centroids);
            let next = assign(points, &centroids);
            let changed = next.iter().zip(&assignments).filter(|(a, b)| a != b).count();
            assignments = next;

            pb.inc(1);
            if log::log_enabled!(log::Level::Trace) {
                trace!(
                    "k-means iteration {}: {} reassigned, inertia {:.4}",
                    iterations,
                    changed,
                    inertia(points, &assignments, &centroids)
                );
            }
            if changed == 0 {
                break;
            }
        }

        let inertia = inertia(points, &assignments, &centroids);
        pb.finish_and_clear();
        info!(
            "k-means converged: k = {}, {} iterations, inertia {:.3}",
            k, iterations, inertia
        );

        Ok(Self {
            centroids,
            assignments,
            inertia,
            iterations,
        })
    }

    /// Cluster id for each training row, in input order.
    pub fn assignments(&self) -> &[usize] {
        &self.assignments
    }

    /// Restore assignments that were persisted alongside the model.
    pub(crate) fn with_assignments(mut self, assignments: Vec<usize>) -> Self {
        self.assignments = assignments;
        self
    }

    /// Nearest centroid for a standardized vector.
    pub fn predict(&self, point: &FeatureVector) -> usize {
        nearest(point, &self.centroids).0
    }

    pub fn centroids(&self) -> &[FeatureVector] {
        &self.centroids
    }

    /// Number of clusters actually used.
    pub fn k(&self) -> usize {
        self.centroids.len()
    }

    /// Sum of squared distances from each point to its centroid.
    pub fn inertia(&self) -> f64 {
        self.inertia
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }
}

/// Index of, and distance to, the closest centroid. Ties go to the lower index.
fn nearest(point: &FeatureVector, centroids: &[FeatureVector]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (i, c) in centroids.iter().enumerate() {
        let d = euclidean(point, c);
        if d < best.1 {
            best = (i, d);
        }
    }
    best
}

fn assign(points: &[FeatureVector], centroids: &[FeatureVector]) -> Vec<usize> {
    points.par_iter().map(|p| nearest(p, centroids).0).collect()
}

/// Mean of each cluster's members. An emptied cluster takes the point farthest
/// from its current centroid.
fn recompute(
    points: &[FeatureVector],
    assignments: &[usize],
    previous: &[FeatureVector],
) -> Vec<FeatureVector> {
    let k = previous.len();
    let dim = points[0].len();
    let mut sums = vec![[0.0_f64; crate::features::FEATURE_COUNT]; k];
    let mut counts = vec![0usize; k];

    for (p, &c) in points.iter().zip(assignments) {
        counts[c] += 1;
        for d in 0..dim {
            sums[c][d] += p[d];
        }
    }

    let mut taken: Vec<usize> = Vec::new();
    for c in 0..k {
        if counts[c] > 0 {
            for d in 0..dim {
                sums[c][d] /= counts[c] as f64;
            }
        } else {
            let far = points
                .iter()
                .enumerate()
                .filter(|(i, _)| !taken.contains(i))
                .map(|(i, p)| (i, euclidean(p, &previous[assignments[i]])))
                .max_by(|a, b| a.1.total_cmp(&b.1).then(b.0.cmp(&a.0)))
                .map(|(i, _)| i)
                .unwrap_or(0);
            debug!("Cluster {c} emptied; re-seeding from point {far}");
            taken.push(far);
            sums[c] = points[far];
        }
    }
    sums
}

fn inertia(points: &[FeatureVector], assignments: &[usize], centroids: &[FeatureVector]) -> f64 {
    points
        .iter()
        .zip(assignments)
        .map(|(p, &c)| euclidean(p, &centroids[c]).powi(2))
        .sum()
}

/// k-means++ seeding: first centroid uniform, then proportional to D².
fn kmeans_plus_plus(points: &[FeatureVector], k: usize, seed: u64) -> Vec<FeatureVector> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut centroids = Vec::with_capacity(k);
    centroids.push(points[rng.gen_range(0..points.len())]);

    while centroids.len() < k {
        let weights: Vec<f64> = points
            .iter()
            .map(|p| nearest(p, &centroids).1.powi(2))
            .collect();
        let total: f64 = weights.iter().sum();

        let selected = if total <= 0.0 {
            // Every point already sits on a centroid (duplicates)
            rng.gen_range(0..points.len())
        } else {
            let threshold = rng.gen_range(0.0..total);
            let mut cumsum = 0.0;
            let mut selected = points.len() - 1;
            for (i, &w) in weights.iter().enumerate() {
                cumsum += w;
                if cumsum > threshold {
                    selected = i;
                    break;
                }
            }
            selected
        };
        centroids.push(points[selected]);
    }

    centroids
}

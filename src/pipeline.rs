//! Z-score standardization over the fixed feature vector.
//!
//! `z_i = (x_i - mean_i) / std_i`, with population std fit once over the
//! training set. A feature with (near-)zero spread would turn every
//! standardized value into inf/NaN and poison all downstream distances, so
//! fitting refuses it outright.

use std::collections::HashSet;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::dataset::RawTrack;
use crate::error::{EngineError, Result};
use crate::features::{FEATURE_COUNT, Feature, FeatureVector, to_vector};

/// Smallest std accepted at fit time.
const MIN_STD: f64 = 1e-12;

/// Fitted per-feature (mean, std) pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    pub mean: FeatureVector,
    pub std: FeatureVector,
}

impl Scaler {
    /// Fit mean and population std for each feature.
    pub fn fit(rows: &[FeatureVector]) -> Result<Self> {
        if rows.is_empty() {
            return Err(EngineError::InvalidInput(
                "cannot fit scaler on an empty dataset".into(),
            ));
        }
        let n = rows.len() as f64;

        let mut mean = [0.0_f64; FEATURE_COUNT];
        for row in rows {
            for (d, &val) in row.iter().enumerate() {
                mean[d] += val;
            }
        }
        for m in &mut mean {
            *m /= n;
        }

        let mut var = [0.0_f64; FEATURE_COUNT];
        for row in rows {
            for (d, &val) in row.iter().enumerate() {
                let diff = val - mean[d];
                var[d] += diff * diff;
            }
        }

        let mut std = [0.0_f64; FEATURE_COUNT];
        for feature in Feature::ALL {
            let d = feature.index();
            std[d] = (var[d] / n).sqrt();
            if !std[d].is_finite() || std[d] <= MIN_STD {
                return Err(EngineError::DataIntegrity(format!(
                    "feature '{}' has zero variance across {} rows (std = {})",
                    feature.column(),
                    rows.len(),
                    std[d]
                )));
            }
        }

        Ok(Self { mean, std })
    }

    /// Standardize one vector. Fails unless it has exactly 9 values.
    pub fn transform(&self, values: &[f64]) -> Result<FeatureVector> {
        let x = to_vector(values)?;
        Ok(self.standardize(&x))
    }

    /// Map a standardized vector back to raw feature space.
    pub fn inverse_transform(&self, values: &[f64]) -> Result<FeatureVector> {
        let z = to_vector(values)?;
        let mut out = [0.0; FEATURE_COUNT];
        for d in 0..FEATURE_COUNT {
            out[d] = z[d] * self.std[d] + self.mean[d];
        }
        Ok(out)
    }

    /// Infallible form for callers that already hold a fixed-size vector.
    pub fn standardize(&self, x: &FeatureVector) -> FeatureVector {
        let mut out = [0.0; FEATURE_COUNT];
        for d in 0..FEATURE_COUNT {
            out[d] = (x[d] - self.mean[d]) / self.std[d];
        }
        out
    }

    /// Standardize a whole matrix in parallel, preserving row order.
    pub fn transform_matrix(&self, rows: &[FeatureVector]) -> Vec<FeatureVector> {
        rows.par_iter().map(|row| self.standardize(row)).collect()
    }
}

/// Dataset preparation and scaler fitting.
pub struct FeaturePipeline;

impl FeaturePipeline {
    /// Clean the raw dataset and fit a scaler on it.
    ///
    /// Returns the scaler together with the cleaned rows, which are what every
    /// later training stage must see.
    pub fn fit(raw: Vec<RawTrack>) -> Result<(Scaler, Vec<RawTrack>)> {
        let rows = Self::prepare(raw)?;
        let matrix: Vec<FeatureVector> = rows.iter().map(|r| r.features).collect();
        let scaler = Scaler::fit(&matrix)?;
        log::info!("Fitted scaler over {} tracks", rows.len());
        Ok((scaler, rows))
    }

    /// Drop duplicate track ids (first occurrence wins) and reject non-finite values.
    pub fn prepare(raw: Vec<RawTrack>) -> Result<Vec<RawTrack>> {
        let total = raw.len();
        let mut seen: HashSet<String> = HashSet::with_capacity(total);
        let mut rows = Vec::with_capacity(total);

        for row in raw {
            if !seen.insert(row.id.clone()) {
                continue;
            }
            for feature in Feature::ALL {
                let v = row.features[feature.index()];
                if !v.is_finite() {
                    return Err(EngineError::DataIntegrity(format!(
                        "track '{}' has non-finite {} ({v})",
                        row.id,
                        feature.column()
                    )));
                }
            }
            rows.push(row);
        }

        if rows.len() < total {
            log::info!("Dropped {} duplicate track ids", total - rows.len());
        }
        Ok(rows)
    }
}

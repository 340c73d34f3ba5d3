//! Compatibility and diversity scores over a resolved set of tracks.
//!
//! Both scores read standardized vectors restricted to [`WEIGHTED_FEATURES`].
//! Pairwise distance is averaged over the full n×n matrix, zero diagonal
//! included, so two tracks at distance d average to d/2.
//!
//! Resolution (catalog lookup, provider fetch, ordering) happens in the engine.
//! Functions here take the already-resolved rows in a fixed order.

use std::collections::BTreeSet;

use crate::catalog::parse_genres;
use crate::error::{EngineError, Result};
use crate::features::{Feature, FeatureVector, WEIGHTED_FEATURES, subset_distance};
use crate::rng::SharedRng;

/// Genre count treated as maximal diversity.
pub const GENRE_CEILING: f64 = 20.0;

/// Default half-width of the compatibility perturbation.
pub const DEFAULT_PERTURBATION: f64 = 5.0;

const COMPAT_FEATURE_WEIGHT: f64 = 0.6;
const COMPAT_DISTANCE_WEIGHT: f64 = 0.4;

const DIVERSITY_FEATURE_WEIGHT: f64 = 0.4;
const DIVERSITY_DISTANCE_WEIGHT: f64 = 0.3;
const DIVERSITY_GENRE_WEIGHT: f64 = 0.3;

/// Acoustic similarity of a set of tracks, in [0, 100].
///
/// `amplitude` is the half-width of the uniform noise added before the final
/// clamp; 0 makes the score deterministic.
pub fn compatibility_score(
    standardized: &[FeatureVector],
    amplitude: f64,
    rng: &SharedRng,
) -> Result<f64> {
    require_pair(standardized)?;

    let weighted: f64 = WEIGHTED_FEATURES
        .iter()
        .map(|&(feature, weight)| weight * 100.0 * (1.0 - population_std(standardized, feature)))
        .sum();
    let distance_factor = 100.0 * (1.0 - mean_pairwise_distance(standardized) / max_distance());

    let base = (COMPAT_FEATURE_WEIGHT * weighted + COMPAT_DISTANCE_WEIGHT * distance_factor)
        .clamp(0.0, 100.0);
    let noisy = (base + rng.perturbation(amplitude)).clamp(0.0, 100.0);
    Ok(round2(noisy))
}

/// Acoustic and genre spread of a set of tracks, in [0, 100]. Deterministic.
///
/// `genres` holds each track's comma-delimited genre text, aligned with
/// `standardized`.
pub fn diversity_score(standardized: &[FeatureVector], genres: &[&str]) -> Result<f64> {
    require_pair(standardized)?;
    if genres.len() != standardized.len() {
        return Err(EngineError::InvalidInput(format!(
            "{} genre entries for {} tracks",
            genres.len(),
            standardized.len()
        )));
    }

    let weighted: f64 = WEIGHTED_FEATURES
        .iter()
        .map(|&(feature, weight)| weight * 100.0 * population_std(standardized, feature))
        .sum();
    let distance = 100.0 * mean_pairwise_distance(standardized) / max_distance();

    let distinct: BTreeSet<String> = genres.iter().flat_map(|g| parse_genres(g)).collect();
    let genre = (100.0 * distinct.len() as f64 / GENRE_CEILING).min(100.0);

    let total = DIVERSITY_FEATURE_WEIGHT * weighted
        + DIVERSITY_DISTANCE_WEIGHT * distance
        + DIVERSITY_GENRE_WEIGHT * genre;
    Ok(round2(total.clamp(0.0, 100.0)))
}

fn require_pair(rows: &[FeatureVector]) -> Result<()> {
    if rows.len() < 2 {
        return Err(EngineError::InvalidInput(format!(
            "need at least 2 tracks to score, got {}",
            rows.len()
        )));
    }
    Ok(())
}

/// ddof = 0
fn population_std(rows: &[FeatureVector], feature: Feature) -> f64 {
    let n = rows.len() as f64;
    let d = feature.index();
    let mean = rows.iter().map(|r| r[d]).sum::<f64>() / n;
    let var = rows.iter().map(|r| (r[d] - mean).powi(2)).sum::<f64>() / n;
    var.sqrt()
}

/// Mean over all n² ordered pairs, diagonal included.
fn mean_pairwise_distance(rows: &[FeatureVector]) -> f64 {
    let subset: Vec<Feature> = WEIGHTED_FEATURES.iter().map(|(f, _)| *f).collect();
    let mut total = 0.0;
    for a in rows {
        for b in rows {
            total += subset_distance(a, b, &subset);
        }
    }
    total / (rows.len() * rows.len()) as f64
}

fn max_distance() -> f64 {
    (WEIGHTED_FEATURES.len() as f64).sqrt()
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FEATURE_COUNT;

    fn at(values: &[(Feature, f64)]) -> FeatureVector {
        let mut v = [0.0; FEATURE_COUNT];
        for &(f, x) in values {
            v[f.index()] = x;
        }
        v
    }

    fn quiet() -> SharedRng {
        SharedRng::seeded(0)
    }

    #[test]
    fn test_identical_tracks_diversity_is_one_and_a_half() {
        let rows = vec![[0.3; FEATURE_COUNT]; 4];
        let genres = ["rock"; 4];
        assert_eq!(diversity_score(&rows, &genres).unwrap(), 1.5);
    }

    #[test]
    fn test_identical_tracks_fully_compatible() {
        let rows = vec![[1.2; FEATURE_COUNT]; 3];
        assert_eq!(compatibility_score(&rows, 0.0, &quiet()).unwrap(), 100.0);
    }

    #[test]
    fn test_full_matrix_mean_includes_diagonal() {
        // One pair at distance 2 on energy: mean over 4 cells is 1
        let rows = vec![at(&[]), at(&[(Feature::Energy, 2.0)])];
        assert!((mean_pairwise_distance(&rows) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_unweighted_features_do_not_move_scores() {
        let a = vec![at(&[]), at(&[(Feature::Energy, 1.0)])];
        let b = vec![
            at(&[(Feature::Liveness, 5.0)]),
            at(&[(Feature::Energy, 1.0), (Feature::Instrumentalness, -3.0)]),
        ];
        let g = ["", ""];
        assert_eq!(diversity_score(&a, &g).unwrap(), diversity_score(&b, &g).unwrap());
        assert_eq!(
            compatibility_score(&a, 0.0, &quiet()).unwrap(),
            compatibility_score(&b, 0.0, &quiet()).unwrap()
        );
    }

    #[test]
    fn test_known_pair_values() {
        // energy spread: std 0.5, mean distance 0.5
        let rows = vec![at(&[]), at(&[(Feature::Energy, 1.0)])];
        let weighted_compat = 100.0 - 0.2 * 100.0 * 0.5;
        let dist_compat = 100.0 * (1.0 - 0.5 / 7f64.sqrt());
        let expected = round2(0.6 * weighted_compat + 0.4 * dist_compat);
        assert_eq!(compatibility_score(&rows, 0.0, &quiet()).unwrap(), expected);

        let weighted_div = 0.2 * 100.0 * 0.5;
        let dist_div = 100.0 * 0.5 / 7f64.sqrt();
        let genre_div = 100.0 * 3.0 / 20.0;
        let expected = round2(0.4 * weighted_div + 0.3 * dist_div + 0.3 * genre_div);
        let score = diversity_score(&rows, &["Pop, Rock", "rock ,jazz"]).unwrap();
        assert_eq!(score, expected);
    }

    #[test]
    fn test_scores_stay_in_range_for_wild_inputs() {
        let rows: Vec<FeatureVector> = (0..6)
            .map(|i| [(i as f64 - 3.0) * 40.0; FEATURE_COUNT])
            .collect();
        let genres: Vec<String> = (0..6)
            .map(|i| (0..10).map(|j| format!("g{i}{j}")).collect::<Vec<_>>().join(","))
            .collect();
        let genre_refs: Vec<&str> = genres.iter().map(String::as_str).collect();

        let rng = SharedRng::seeded(11);
        for _ in 0..50 {
            let c = compatibility_score(&rows, 5.0, &rng).unwrap();
            assert!((0.0..=100.0).contains(&c));
        }
        let d = diversity_score(&rows, &genre_refs).unwrap();
        assert!((0.0..=100.0).contains(&d));
    }

    #[test]
    fn test_genre_term_saturates() {
        let rows = vec![[0.0; FEATURE_COUNT]; 2];
        let many: String = (0..30).map(|i| format!("g{i}")).collect::<Vec<_>>().join(",");
        // Only the genre term contributes: 0.3 * 100
        assert_eq!(diversity_score(&rows, &[many.as_str(), ""]).unwrap(), 30.0);
    }

    #[test]
    fn test_diversity_ignores_row_order() {
        let rows = vec![
            at(&[(Feature::Tempo, 1.5), (Feature::Valence, -0.2)]),
            at(&[(Feature::Danceability, 0.7)]),
            at(&[(Feature::Loudness, -1.1), (Feature::Speechiness, 2.0)]),
        ];
        let genres = ["pop", "metal, Pop", "folk"];
        let forward = diversity_score(&rows, &genres).unwrap();

        let rev_rows: Vec<FeatureVector> = rows.iter().rev().copied().collect();
        let rev_genres: Vec<&str> = genres.iter().rev().copied().collect();
        assert_eq!(forward, diversity_score(&rev_rows, &rev_genres).unwrap());
    }

    #[test]
    fn test_perturbation_is_bounded_and_seeded() {
        let rows = vec![at(&[]), at(&[(Feature::Energy, 1.0)])];
        let base = compatibility_score(&rows, 0.0, &quiet()).unwrap();
        let rng = SharedRng::seeded(8);
        for _ in 0..100 {
            let s = compatibility_score(&rows, 5.0, &rng).unwrap();
            assert!((s - base).abs() <= 5.0 + 0.01);
        }

        let a = compatibility_score(&rows, 5.0, &SharedRng::seeded(21)).unwrap();
        let b = compatibility_score(&rows, 5.0, &SharedRng::seeded(21)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_fewer_than_two_rows_is_invalid_input() {
        let one = vec![[0.0; FEATURE_COUNT]];
        assert!(matches!(
            compatibility_score(&one, 0.0, &quiet()),
            Err(EngineError::InvalidInput(_))
        ));
        assert!(matches!(diversity_score(&one, &[""]), Err(EngineError::InvalidInput(_))));
        assert!(diversity_score(&[], &[]).is_err());
    }
}

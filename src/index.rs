use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::error::{EngineError, Result};
use crate::features::{FeatureVector, euclidean, to_vector};

/// Exact k-NN over the standardized feature matrix.
///
/// Rows keep catalog insertion order; `position` in results is the row index,
/// which is also the tie-break for equal distances. The index is rebuilt
/// wholesale on retraining and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityIndex {
    ids: Vec<String>,
    matrix: Vec<FeatureVector>,
}

/// One neighbour returned by [`SimilarityIndex::query`].
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub position: usize,
    pub track_id: String,
    pub distance: f64,
}

impl SimilarityIndex {
    /// Build from `(track_id, standardized vector)` rows in catalog order.
    pub fn build(ids: Vec<String>, matrix: Vec<FeatureVector>) -> Result<Self> {
        if ids.len() != matrix.len() {
            return Err(EngineError::DataIntegrity(format!(
                "index has {} ids but {} vectors",
                ids.len(),
                matrix.len()
            )));
        }
        Ok(Self { ids, matrix })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Standardized vector stored at `position`.
    pub fn vector(&self, position: usize) -> Option<&FeatureVector> {
        self.matrix.get(position)
    }

    /// The `k` nearest rows to `vector`, ascending by Euclidean distance.
    pub fn query(&self, vector: &[f64], k: usize) -> Result<Vec<Neighbor>> {
        let q = to_vector(vector)?;
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut distances: Vec<(usize, f64)> = self
            .matrix
            .par_iter()
            .enumerate()
            .map(|(i, row)| (i, euclidean(&q, row)))
            .collect();

        // Partial sort: only need top-K smallest distances
        let k = k.min(distances.len());
        if k < distances.len() {
            distances.select_nth_unstable_by(k - 1, by_distance_then_position);
            distances.truncate(k);
        }
        distances.sort_by(by_distance_then_position);

        Ok(distances
            .into_iter()
            .map(|(position, distance)| Neighbor {
                position,
                track_id: self.ids[position].clone(),
                distance,
            })
            .collect())
    }
}

fn by_distance_then_position(a: &(usize, f64), b: &(usize, f64)) -> Ordering {
    a.1.total_cmp(&b.1).then(a.0.cmp(&b.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FEATURE_COUNT;

    fn vec_at(x: f64) -> FeatureVector {
        let mut v = [0.0; FEATURE_COUNT];
        v[0] = x;
        v
    }

    fn index(xs: &[f64]) -> SimilarityIndex {
        let ids = (0..xs.len()).map(|i| format!("t{i}")).collect();
        let matrix = xs.iter().map(|&x| vec_at(x)).collect();
        SimilarityIndex::build(ids, matrix).unwrap()
    }

    #[test]
    fn test_query_orders_by_distance() {
        let idx = index(&[0.0, 5.0, 1.0, -2.0, 10.0]);
        let hits = idx.query(&vec_at(0.9), 3).unwrap();
        let ids: Vec<&str> = hits.iter().map(|n| n.track_id.as_str()).collect();
        assert_eq!(ids, ["t2", "t0", "t3"]);
        assert!((hits[0].distance - 0.1).abs() < 1e-12);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn test_ties_follow_insertion_order() {
        // t1 and t3 are both at distance 1 from the query; t4 duplicates t1
        let idx = index(&[3.0, 1.0, 5.0, -1.0, 1.0]);
        let hits = idx.query(&vec_at(0.0), 3).unwrap();
        let ids: Vec<&str> = hits.iter().map(|n| n.track_id.as_str()).collect();
        assert_eq!(ids, ["t1", "t3", "t4"]);

        let all = idx.query(&vec_at(0.0), 10).unwrap();
        let positions: Vec<usize> = all.iter().map(|n| n.position).collect();
        assert_eq!(positions, [1, 3, 4, 0, 2]);
    }

    #[test]
    fn test_self_is_first_hit() {
        let idx = index(&[0.0, 2.0, 4.0]);
        let v = *idx.vector(1).unwrap();
        let hits = idx.query(&v, 2).unwrap();
        assert_eq!(hits[0].track_id, "t1");
        assert_eq!(hits[0].distance, 0.0);
    }

    #[test]
    fn test_k_zero_and_oversized_k() {
        let idx = index(&[0.0, 1.0]);
        assert!(idx.query(&vec_at(0.0), 0).unwrap().is_empty());
        assert_eq!(idx.query(&vec_at(0.0), 50).unwrap().len(), 2);
    }

    #[test]
    fn test_query_rejects_wrong_dimension() {
        let idx = index(&[0.0]);
        assert!(matches!(idx.query(&[0.0; 3], 1), Err(EngineError::DataIntegrity(_))));
    }

    #[test]
    fn test_build_rejects_mismatched_lengths() {
        assert!(SimilarityIndex::build(vec!["a".into()], vec![]).is_err());
    }
}

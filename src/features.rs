use serde::{Deserialize, Serialize};

/// Number of audio features per track.
pub const FEATURE_COUNT: usize = 9;

/// Raw or standardized feature vector, always in [`Feature::ALL`] order.
pub type FeatureVector = [f64; FEATURE_COUNT];

/// Audio features in their fixed column order.
///
/// The order is shared by the scaler, the similarity index, the classifier and
/// the artifact store. Changing it invalidates every persisted snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Danceability,
    Energy,
    Valence,
    Tempo,
    Loudness,
    Speechiness,
    Acousticness,
    Liveness,
    Instrumentalness,
}

impl Feature {
    pub const ALL: [Feature; FEATURE_COUNT] = [
        Feature::Danceability,
        Feature::Energy,
        Feature::Valence,
        Feature::Tempo,
        Feature::Loudness,
        Feature::Speechiness,
        Feature::Acousticness,
        Feature::Liveness,
        Feature::Instrumentalness,
    ];

    /// Position of this feature inside a [`FeatureVector`].
    pub fn index(self) -> usize {
        self as usize
    }

    /// Column name used by the raw dataset and the processed track table.
    pub fn column(self) -> &'static str {
        match self {
            Self::Danceability => "danceability",
            Self::Energy => "energy",
            Self::Valence => "valence",
            Self::Tempo => "tempo",
            Self::Loudness => "loudness",
            Self::Speechiness => "speechiness",
            Self::Acousticness => "acousticness",
            Self::Liveness => "liveness",
            Self::Instrumentalness => "instrumentalness",
        }
    }
}

/// Features that feed the compatibility and diversity scores, with weights.
/// Liveness and instrumentalness are deliberately absent.
pub const WEIGHTED_FEATURES: [(Feature, f64); 7] = [
    (Feature::Danceability, 0.15),
    (Feature::Energy, 0.2),
    (Feature::Valence, 0.2),
    (Feature::Tempo, 0.15),
    (Feature::Loudness, 0.1),
    (Feature::Speechiness, 0.1),
    (Feature::Acousticness, 0.1),
];

/// Convenience accessor so rule code reads `get(f, Feature::Energy)`.
pub fn get(features: &FeatureVector, feature: Feature) -> f64 {
    features[feature.index()]
}

/// Copy a slice into a fixed vector, checking the length.
pub fn to_vector(values: &[f64]) -> crate::error::Result<FeatureVector> {
    <FeatureVector>::try_from(values)
        .map_err(|_| crate::error::EngineError::invalid_dimension(FEATURE_COUNT, values.len()))
}

/// Euclidean distance restricted to the given feature positions.
pub fn subset_distance(a: &FeatureVector, b: &FeatureVector, subset: &[Feature]) -> f64 {
    subset
        .iter()
        .map(|f| {
            let d = a[f.index()] - b[f.index()];
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

/// Full 9-dimensional Euclidean distance.
pub fn euclidean(a: &FeatureVector, b: &FeatureVector) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

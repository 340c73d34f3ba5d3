//! External track metadata for ids the catalog does not hold.

pub mod spotify;

use serde::Serialize;
use thiserror::Error;

use crate::error::EngineError;
use crate::features::FeatureVector;

pub use spotify::{SpotifyConfig, SpotifyProvider};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("provider has no credentials: {0}")]
    Auth(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("track not found upstream: {0}")]
    NotFound(String),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("could not decode provider response: {0}")]
    Decode(String),
}

impl From<ProviderError> for EngineError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound(id) => EngineError::NotFound(id),
            other => EngineError::UpstreamFailure(other.to_string()),
        }
    }
}

/// A track resolved outside the catalog: display metadata plus raw features.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExternalTrack {
    pub id: String,
    pub name: String,
    pub artist: String,
    pub album: String,
    pub release_year: Option<i32>,
    pub genres: String,
    pub features: FeatureVector,
}

/// Source of raw features for ids missing from the catalog.
///
/// Implementations must bound every call with a timeout; a slow upstream is
/// reported as [`ProviderError::Timeout`], never waited on indefinitely.
pub trait TrackMetadataProvider: Send + Sync {
    fn fetch_track(&self, id: &str) -> Result<ExternalTrack, ProviderError>;
}

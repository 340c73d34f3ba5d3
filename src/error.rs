use thiserror::Error;

/// Failure kinds surfaced by the recommendation engine.
///
/// Serving paths mostly absorb these (scores degrade to 0, lookups degrade to
/// the configured fallback). Training treats `DataIntegrity` as fatal.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("track not found: {0}")]
    NotFound(String),
    #[error("upstream provider failure: {0}")]
    UpstreamFailure(String),
    #[error("data integrity error: {0}")]
    DataIntegrity(String),
}

impl EngineError {
    /// Vector length does not match the fixed feature dimensionality.
    pub fn invalid_dimension(expected: usize, got: usize) -> Self {
        Self::DataIntegrity(format!(
            "invalid dimension: expected {expected} features, got {got}"
        ))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

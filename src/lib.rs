pub mod catalog;
pub mod cluster;
pub mod config;
pub mod dataset;
pub mod db;
pub mod engine;
pub mod error;
pub mod features;
pub mod index;
pub mod labels;
pub mod pipeline;
pub mod playlist;
pub mod provider;
pub mod rng;
pub mod scoring;
pub mod snapshot;
pub mod training;

pub use engine::{EngineSettings, LabelKind, Recommender};
pub use error::EngineError;
pub use snapshot::Snapshot;

/// Application name for XDG paths
pub const APP_NAME: &str = "moodmatch";

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;

use crate::cluster::{DEFAULT_CLUSTERS, DEFAULT_MAX_ITERATIONS, DEFAULT_SEED, KMeansConfig};
use crate::engine::{DEFAULT_PROVIDER_BUDGET, DEFAULT_SIMILAR_K, EngineSettings};
use crate::playlist::{DEFAULT_PLAYLIST_SIZE, DEFAULT_RELATED_SIZE, FallbackPolicy};
use crate::provider::SpotifyConfig;
use crate::provider::spotify::{DEFAULT_ACCOUNTS_BASE, DEFAULT_API_BASE};
use crate::scoring::DEFAULT_PERTURBATION;
use crate::training::TrainingConfig;

pub const CLIENT_ID_ENV: &str = "SPOTIFY_CLIENT_ID";
pub const CLIENT_SECRET_ENV: &str = "SPOTIFY_CLIENT_SECRET";

/// Application configuration loaded from TOML config file.
/// All fields have defaults; the config file is optional.
#[derive(Debug, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub general: GeneralConfig,
    pub serving: ServingConfig,
    pub training: TrainingSection,
    pub provider: ProviderConfig,
}

#[derive(Debug, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct GeneralConfig {
    /// Custom snapshot path (overrides XDG default).
    pub snapshot_path: Option<PathBuf>,
    /// Number of parallel workers. 0 = auto-detect (cores / 2, min 1).
    pub workers: usize,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServingConfig {
    pub similar_k: usize,
    pub playlist_size: usize,
    pub related_size: usize,
    /// What lookups return when nothing matches.
    pub fallback: FallbackPolicy,
    /// Compatibility noise half-width. 0 disables it.
    pub perturbation: f64,
    /// Pin the serving RNG (reproducible sampling and scores).
    pub seed: Option<u64>,
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            similar_k: DEFAULT_SIMILAR_K,
            playlist_size: DEFAULT_PLAYLIST_SIZE,
            related_size: DEFAULT_RELATED_SIZE,
            fallback: FallbackPolicy::default(),
            perturbation: DEFAULT_PERTURBATION,
            seed: None,
        }
    }
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrainingSection {
    pub clusters: usize,
    pub max_iterations: usize,
    pub seed: u64,
}

impl Default for TrainingSection {
    fn default() -> Self {
        Self {
            clusters: DEFAULT_CLUSTERS,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            seed: DEFAULT_SEED,
        }
    }
}

/// Spotify Web API settings.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub timeout_secs: u64,
    /// Total time one score call may spend on lookups.
    pub budget_secs: u64,
    pub api_base: String,
    pub accounts_base: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            timeout_secs: 10,
            budget_secs: DEFAULT_PROVIDER_BUDGET.as_secs(),
            api_base: DEFAULT_API_BASE.to_string(),
            accounts_base: DEFAULT_ACCOUNTS_BASE.to_string(),
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/moodmatch/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Load from an explicit path, falling back to defaults on any failure.
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<AppConfig>(&contents) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                Self::default()
            }
        }
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.general.workers > 0 {
            self.general.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            fallback: self.serving.fallback,
            perturbation: self.serving.perturbation,
            similar_k: self.serving.similar_k,
            playlist_size: self.serving.playlist_size,
            related_size: self.serving.related_size,
            provider_budget: Duration::from_secs(self.provider.budget_secs),
        }
    }

    pub fn training_config(&self) -> TrainingConfig {
        TrainingConfig {
            kmeans: KMeansConfig {
                clusters: self.training.clusters,
                max_iterations: self.training.max_iterations,
                seed: self.training.seed,
            },
            workers: self.resolve_workers(),
        }
    }

    /// Provider settings, or `None` when no credentials are available.
    ///
    /// `SPOTIFY_CLIENT_ID` / `SPOTIFY_CLIENT_SECRET` override the file.
    pub fn spotify_config(&self) -> Option<SpotifyConfig> {
        self.spotify_config_with(|key| std::env::var(key).ok())
    }

    fn spotify_config_with<F>(&self, env: F) -> Option<SpotifyConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |v: Option<String>| v.filter(|s| !s.is_empty());
        let id = non_empty(env(CLIENT_ID_ENV)).or_else(|| non_empty(self.provider.client_id.clone()))?;
        let secret = non_empty(env(CLIENT_SECRET_ENV))
            .or_else(|| non_empty(self.provider.client_secret.clone()))?;
        Some(SpotifyConfig {
            client_id: id,
            client_secret: secret,
            timeout: Duration::from_secs(self.provider.timeout_secs),
            api_base: self.provider.api_base.trim_end_matches('/').to_string(),
            accounts_base: self.provider.accounts_base.trim_end_matches('/').to_string(),
        })
    }

    /// Snapshot location: explicit override, then config, then the XDG default.
    pub fn snapshot_path(&self, cli_override: Option<PathBuf>) -> PathBuf {
        cli_override
            .or_else(|| self.general.snapshot_path.clone())
            .unwrap_or_else(default_snapshot_path)
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Resolve the default snapshot path using XDG data directory.
pub fn default_snapshot_path() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        dirs.data_dir().join("snapshot.db")
    } else {
        // Fallback: current directory
        PathBuf::from("snapshot.db")
    }
}

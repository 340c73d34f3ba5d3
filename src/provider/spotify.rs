use std::sync::Mutex;
use std::time::{Duration, Instant};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use log::debug;
use serde::Deserialize;
use ureq::Agent;

use super::{ExternalTrack, ProviderError, TrackMetadataProvider};
use crate::features::FEATURE_COUNT;

pub const DEFAULT_API_BASE: &str = "https://api.spotify.com";
pub const DEFAULT_ACCOUNTS_BASE: &str = "https://accounts.spotify.com";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Tokens are refreshed this long before Spotify says they expire.
const TOKEN_SLACK: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
    pub timeout: Duration,
    pub api_base: String,
    pub accounts_base: String,
}

impl SpotifyConfig {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            timeout: DEFAULT_TIMEOUT,
            api_base: DEFAULT_API_BASE.to_string(),
            accounts_base: DEFAULT_ACCOUNTS_BASE.to_string(),
        }
    }
}

/// Spotify Web API client using the client-credentials flow.
pub struct SpotifyProvider {
    agent: Agent,
    config: SpotifyConfig,
    token: Mutex<Option<CachedToken>>,
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct TrackObject {
    id: String,
    name: String,
    #[serde(default)]
    artists: Vec<NamedObject>,
    album: AlbumObject,
}

#[derive(Debug, Deserialize)]
struct NamedObject {
    name: String,
}

#[derive(Debug, Deserialize)]
struct AlbumObject {
    name: String,
    #[serde(default)]
    release_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AudioFeatures {
    danceability: f64,
    energy: f64,
    valence: f64,
    tempo: f64,
    loudness: f64,
    speechiness: f64,
    acousticness: f64,
    liveness: f64,
    instrumentalness: f64,
}

impl AudioFeatures {
    fn to_vector(&self) -> [f64; FEATURE_COUNT] {
        [
            self.danceability,
            self.energy,
            self.valence,
            self.tempo,
            self.loudness,
            self.speechiness,
            self.acousticness,
            self.liveness,
            self.instrumentalness,
        ]
    }
}

impl SpotifyProvider {
    pub fn new(config: SpotifyConfig) -> Result<Self, ProviderError> {
        if config.client_id.is_empty() || config.client_secret.is_empty() {
            return Err(ProviderError::Auth(
                "client id and secret must both be set".into(),
            ));
        }
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(config.timeout))
            .build()
            .into();
        Ok(Self {
            agent,
            config,
            token: Mutex::new(None),
        })
    }

    /// Bearer token, fetched on first use and whenever the cached one is stale.
    fn access_token(&self) -> Result<String, ProviderError> {
        let mut cached = self.token.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.access_token.clone());
            }
        }

        debug!("Requesting Spotify access token");
        let url = format!("{}/api/token", self.config.accounts_base);
        let credentials = STANDARD.encode(format!(
            "{}:{}",
            self.config.client_id, self.config.client_secret
        ));
        let resp: TokenResponse = self
            .agent
            .post(&url)
            .header("Authorization", format!("Basic {credentials}"))
            .send_form([("grant_type", "client_credentials")])
            .map_err(|e| match classify("token", e) {
                ProviderError::NotFound(what) | ProviderError::Http(what) => ProviderError::Auth(what),
                other => other,
            })?
            .body_mut()
            .read_json()
            .map_err(|e| ProviderError::Decode(format!("token: {e}")))?;

        let lifetime = Duration::from_secs(resp.expires_in).saturating_sub(TOKEN_SLACK);
        *cached = Some(CachedToken {
            access_token: resp.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(resp.access_token)
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ProviderError> {
        let token = self.access_token()?;
        let url = format!("{}{}", self.config.api_base, path);
        self.agent
            .get(&url)
            .header("Authorization", format!("Bearer {token}"))
            .call()
            .map_err(|e| classify(path, e))?
            .body_mut()
            .read_json()
            .map_err(|e| ProviderError::Decode(format!("{path}: {e}")))
    }
}

impl TrackMetadataProvider for SpotifyProvider {
    fn fetch_track(&self, id: &str) -> Result<ExternalTrack, ProviderError> {
        let track: TrackObject = self.get_json(&format!("/v1/tracks/{id}"))?;
        let features: AudioFeatures = self.get_json(&format!("/v1/audio-features/{id}"))?;
        Ok(build_track(track, &features))
    }
}

fn build_track(track: TrackObject, features: &AudioFeatures) -> ExternalTrack {
    let artist = track
        .artists
        .iter()
        .map(|a| a.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    ExternalTrack {
        id: track.id,
        name: track.name,
        artist,
        release_year: track.album.release_date.as_deref().and_then(release_year),
        album: track.album.name,
        // Track objects carry no genres; those live on artists
        genres: String::new(),
        features: features.to_vector(),
    }
}

/// Year from a Spotify release date ("1997", "1997-05" or "1997-05-21").
fn release_year(date: &str) -> Option<i32> {
    date.get(..4)?.parse().ok()
}

fn classify(what: &str, err: ureq::Error) -> ProviderError {
    match err {
        ureq::Error::StatusCode(404) => ProviderError::NotFound(what.to_string()),
        ureq::Error::StatusCode(code) => ProviderError::Http(format!("{what}: status {code}")),
        ureq::Error::Timeout(t) => ProviderError::Timeout(format!("{what}: {t}")),
        other => ProviderError::Http(format!("{what}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    const TRACK_JSON: &str = r#"{
        "id": "4uLU6hMCjMI75M1A2tKUQC",
        "name": "Never Gonna Give You Up",
        "artists": [{"name": "Rick Astley"}, {"name": "Guest"}],
        "album": {"name": "Whenever You Need Somebody", "release_date": "1987-11-12"},
        "popularity": 80
    }"#;

    const FEATURES_JSON: &str = r#"{
        "danceability": 0.727, "energy": 0.939, "valence": 0.916, "tempo": 113.3,
        "loudness": -11.8, "speechiness": 0.0369, "acousticness": 0.135,
        "liveness": 0.151, "instrumentalness": 0.0000417, "key": 8, "mode": 1
    }"#;

    #[test]
    fn test_build_track_from_responses() {
        let track: TrackObject = serde_json::from_str(TRACK_JSON).unwrap();
        let features: AudioFeatures = serde_json::from_str(FEATURES_JSON).unwrap();
        let ext = build_track(track, &features);

        assert_eq!(ext.id, "4uLU6hMCjMI75M1A2tKUQC");
        assert_eq!(ext.artist, "Rick Astley, Guest");
        assert_eq!(ext.album, "Whenever You Need Somebody");
        assert_eq!(ext.release_year, Some(1987));
        assert_eq!(ext.features[1], 0.939);
        assert_eq!(ext.features[3], 113.3);
        assert_eq!(ext.features[8], 0.0000417);
        assert!(ext.genres.is_empty());
    }

    #[test]
    fn test_release_year_precisions() {
        assert_eq!(release_year("1997"), Some(1997));
        assert_eq!(release_year("1997-05"), Some(1997));
        assert_eq!(release_year(""), None);
        assert_eq!(release_year("n/a"), None);
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(classify("x", ureq::Error::StatusCode(404)), ProviderError::NotFound(_)));
        assert!(matches!(classify("x", ureq::Error::StatusCode(503)), ProviderError::Http(_)));
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let err = SpotifyProvider::new(SpotifyConfig::new("", "secret")).err();
        assert!(matches!(err, Some(ProviderError::Auth(_))));
        assert!(SpotifyProvider::new(SpotifyConfig::new("id", "secret")).is_ok());
    }

    #[test]
    fn test_unresponsive_server_times_out() {
        // Connections queue in the backlog but are never answered
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());

        let mut config = SpotifyConfig::new("id", "secret");
        config.timeout = Duration::from_millis(300);
        config.api_base = base.clone();
        config.accounts_base = base;
        let provider = SpotifyProvider::new(config).unwrap();

        let started = Instant::now();
        let result = provider.fetch_track("4uLU6hMCjMI75M1A2tKUQC");
        let elapsed = started.elapsed();

        assert!(matches!(result, Err(ProviderError::Timeout(_))), "{result:?}");
        assert!(elapsed >= Duration::from_millis(250), "returned after {elapsed:?}");
        assert!(elapsed < Duration::from_secs(5), "returned after {elapsed:?}");
        drop(listener);
    }
}

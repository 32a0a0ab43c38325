use gemini_realtime::DEFAULT_LIVE_ENDPOINT;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

pub const DEFAULT_BACKEND_URL: &str = "https://disasterguard-backend-v79u.onrender.com";
pub const DEFAULT_LIVE_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-12-2025";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 15;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub backend_url: String,
    pub gemini_api_key: Option<String>,
    pub live_model: String,
    pub live_url: String,
    pub state_path: PathBuf,
    pub connect_timeout: Duration,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let backend_url =
            std::env::var("DG_BACKEND_URL").unwrap_or_else(|_| DEFAULT_BACKEND_URL.to_string());
        if !(backend_url.starts_with("http://") || backend_url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue(
                "DG_BACKEND_URL".to_string(),
                format!("'{}' is not an http(s) URL", backend_url),
            ));
        }

        let gemini_api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty());
        let live_model =
            std::env::var("GEMINI_LIVE_MODEL").unwrap_or_else(|_| DEFAULT_LIVE_MODEL.to_string());
        let live_url =
            std::env::var("GEMINI_LIVE_URL").unwrap_or_else(|_| DEFAULT_LIVE_ENDPOINT.to_string());

        let state_path = std::env::var("DG_STATE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_state_path());

        let timeout_str = std::env::var("DG_CONNECT_TIMEOUT_SECS")
            .unwrap_or_else(|_| DEFAULT_CONNECT_TIMEOUT_SECS.to_string());
        let connect_timeout = match timeout_str.parse::<u64>() {
            Ok(secs) if secs > 0 => Duration::from_secs(secs),
            _ => {
                return Err(ConfigError::InvalidValue(
                    "DG_CONNECT_TIMEOUT_SECS".to_string(),
                    format!("'{}' is not a positive number of seconds", timeout_str),
                ));
            }
        };

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            backend_url,
            gemini_api_key,
            live_model,
            live_url,
            state_path,
            connect_timeout,
            log_level,
        })
    }

    /// The live API key, required by the voice session only.
    pub fn require_gemini_key(&self) -> Result<&str, ConfigError> {
        self.gemini_api_key.as_deref().ok_or_else(|| {
            ConfigError::MissingVar("GEMINI_API_KEY must be set for voice sessions".to_string())
        })
    }
}

fn default_state_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("disasterguard"))
        .unwrap_or_else(|| PathBuf::from("./.disasterguard"))
        .join("state.json")
}

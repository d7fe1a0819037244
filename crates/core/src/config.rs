//! Application configuration.
//!
//! Sources, lowest precedence first: built-in defaults, the TOML file under
//! the user's config directory, `ABOUT_TIME__*` environment variables, then
//! the conventional `OPENAI_API_KEY` / `OPENAI_MODEL` variables.

use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::tone::ToneThresholds;

/// Directory under the platform config dir holding `config.toml`.
pub const CONFIG_DIR: &str = "about-time";
const CONFIG_FILE: &str = "config.toml";
const ENV_PREFIX: &str = "ABOUT_TIME";

/// Model used when none is configured.
pub const DEFAULT_MODEL: &str = "gpt-4o";
/// OpenAI-compatible API root.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
/// Per-request limit in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

const DEFAULT_CONFIG_TOML: &str = r#"# About Time configuration.
# The API key may also come from OPENAI_API_KEY or ABOUT_TIME__API_KEY.
# api_key = "sk-..."
model = "gpt-4o"
base_url = "https://api.openai.com/v1"
request_timeout_secs = 120
stream = true

# Probability cut points for the tone of a reply, drawn per turn.
[tone]
first_negative = 0.6
first_mixed = 0.8
later_positive = 0.4
later_mixed = 0.7
"#;

/// Errors raised while loading configuration. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No key in the file or the environment.
    #[error("no API key configured; set OPENAI_API_KEY or api_key in {0}")]
    MissingApiKey(PathBuf),

    /// A value failed validation.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// The layered sources could not be read or merged.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// Writing the default file failed.
    #[error("failed to write default configuration to {path}: {source}")]
    Io {
        /// File that could not be written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Runtime settings for the game and its generation client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Bearer token for the generation service.
    pub api_key: String,
    /// Model name sent with every request.
    pub model: String,
    /// Base URL of an OpenAI-compatible API, without the `/chat/completions` suffix.
    pub base_url: String,
    /// Upper bound for a single generation call.
    pub request_timeout_secs: u64,
    /// Stream story and intervention replies as they are written.
    pub stream: bool,
    /// Tone draw thresholds.
    pub tone: ToneThresholds,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            stream: true,
            tone: ToneThresholds::default(),
        }
    }
}

impl AppConfig {
    /// Load from the default config path and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(
            &config_path(),
            env::var("OPENAI_API_KEY").ok(),
            env::var("OPENAI_MODEL").ok(),
        )
    }

    /// Load from `path` (optional file) plus `ABOUT_TIME__*` variables, then
    /// apply the given OpenAI overrides.
    pub fn load_from(
        path: &Path,
        openai_key: Option<String>,
        openai_model: Option<String>,
    ) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from(path).format(FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let mut config: AppConfig = settings.try_deserialize()?;

        if config.api_key.trim().is_empty() {
            if let Some(key) = openai_key.filter(|key| !key.trim().is_empty()) {
                config.api_key = key;
            }
        }
        if let Some(model) = openai_model.filter(|model| !model.trim().is_empty()) {
            config.model = model;
        }

        config.validate(path)?;
        Ok(config)
    }

    /// Limit applied to each generation call.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn validate(&self, path: &Path) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey(path.to_path_buf()));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::Invalid("model must not be empty".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be positive".to_string(),
            ));
        }
        self.tone.validate().map_err(ConfigError::Invalid)
    }
}

/// Path of the user's configuration file.
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR)
        .join(CONFIG_FILE)
}

/// Write a commented default configuration if none exists yet.
pub fn ensure_default_config() -> Result<PathBuf, ConfigError> {
    let path = config_path();
    ensure_default_config_at(&path)?;
    Ok(path)
}

/// Same as [`ensure_default_config`] for an explicit path.
pub fn ensure_default_config_at(path: &Path) -> Result<(), ConfigError> {
    if path.exists() {
        return Ok(());
    }
    let io_error = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error)?;
    }
    fs::write(path, DEFAULT_CONFIG_TOML).map_err(io_error)?;
    info!(path = %path.display(), "wrote default configuration");
    Ok(())
}

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;

use crate::conversation::DEFAULT_MAX_TOOL_ROUNDS;
use crate::providers::configs::{AnthropicProviderConfig, ANTHROPIC_HOST};

pub const API_KEY_ENV_VAR: &str = "ANTHROPIC_API_KEY";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error("No API key configured: set ROBO_API_KEY, ROBO_API_KEY_FILE or ANTHROPIC_API_KEY")]
    MissingApiKey,

    #[error("Failed to read API key file {path}: {source}")]
    ApiKeyFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Runtime settings: built-in defaults, then an optional `robo.toml`, then
/// `ROBO_` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_file: Option<String>,
    #[serde(default = "default_logs_dir")]
    pub logs_dir: String,
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
}

impl Settings {
    pub fn new() -> Result<Self, SettingsError> {
        Self::load(None)
    }

    /// Load settings, reading `file` instead of `./robo.toml` when given
    pub fn load(file: Option<&Path>) -> Result<Self, SettingsError> {
        let builder = Config::builder()
            .set_default("host", default_host())?
            .set_default("logs_dir", default_logs_dir())?;

        let builder = match file {
            Some(path) => builder.add_source(File::from(path)),
            None => builder.add_source(File::with_name("robo").required(false)),
        };

        let config = builder
            .add_source(
                Environment::with_prefix("ROBO")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        tracing::debug!(host = %settings.host, logs_dir = %settings.logs_dir, "settings loaded");
        Ok(settings)
    }

    /// The API key: set directly, read from `api_key_file`, or taken from
    /// `ANTHROPIC_API_KEY`, in that order.
    pub fn resolve_api_key(&self) -> Result<String, SettingsError> {
        if let Some(key) = self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
            return Ok(key.to_string());
        }

        if let Some(file) = &self.api_key_file {
            let path = PathBuf::from(shellexpand::tilde(file).into_owned());
            let key = fs::read_to_string(&path)
                .map_err(|source| SettingsError::ApiKeyFile { path, source })?;
            return Ok(key.trim().to_string());
        }

        env::var(API_KEY_ENV_VAR)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or(SettingsError::MissingApiKey)
    }

    pub fn logs_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.logs_dir).into_owned())
    }

    pub fn anthropic_config(&self) -> Result<AnthropicProviderConfig, SettingsError> {
        Ok(AnthropicProviderConfig::new(self.resolve_api_key()?).with_host(&self.host))
    }
}

fn default_host() -> String {
    ANTHROPIC_HOST.to_string()
}

fn default_logs_dir() -> String {
    dirs::data_dir()
        .map(|dir| dir.join("robo").join("logs").display().to_string())
        .unwrap_or_else(|| "~/.robo/logs".to_string())
}

fn default_max_tool_rounds() -> usize {
    DEFAULT_MAX_TOOL_ROUNDS
}

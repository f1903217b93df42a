//! Configuration management
//!
//! TOML file with per-field defaults; a missing file is created on first
//! load. The OpenAI key can also come from the environment, which wins over
//! the file so deployments never have to write secrets to disk.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::voice::routing::DEFAULT_TOKEN_MATCH_RATIO;
use crate::voice::transport::{DEFAULT_REALTIME_MODEL, DEFAULT_REALTIME_URL};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Browser-facing WebSocket server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8787
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: default_host(), port: default_port() }
    }
}

/// Upstream Realtime API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// API key; OPENAI_API_KEY in the environment takes precedence
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_realtime_url")]
    pub url: String,
    #[serde(default = "default_realtime_model")]
    pub model: String,
}

fn default_realtime_url() -> String {
    DEFAULT_REALTIME_URL.to_string()
}

fn default_realtime_model() -> String {
    DEFAULT_REALTIME_MODEL.to_string()
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            url: default_realtime_url(),
            model: default_realtime_model(),
        }
    }
}

impl OpenAiConfig {
    /// Resolve the API key: environment first, then the config file.
    pub fn resolve_api_key(&self) -> Result<String> {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.trim().is_empty() {
                return Ok(key);
            }
        }
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .context("No OpenAI API key: set OPENAI_API_KEY or openai.api_key in config")
    }
}

/// Shop-name resolution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Fraction of query words that must appear in a shop name for an
    /// approximate match
    #[serde(default = "default_token_match_ratio")]
    pub token_match_ratio: f64,
}

fn default_token_match_ratio() -> f64 {
    DEFAULT_TOKEN_MATCH_RATIO
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self { token_match_ratio: default_token_match_ratio() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Session log path; defaults to sessions.db in the data directory
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: None }
    }
}

impl DatabaseConfig {
    pub fn resolve_path(&self) -> Result<PathBuf> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => Ok(data_dir()?.join("sessions.db")),
        }
    }
}

impl Config {
    /// Load configuration from file, creating a default one if absent.
    pub fn load() -> Result<Self> {
        let config_path = config_path()?;
        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .context("Failed to read config file")?;
            let config: Config = toml::from_str(&contents)
                .context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = config_path()?;
        let parent = config_path.parent().context("Config path has no parent")?;
        std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, contents).context("Failed to write config file")?;
        Ok(())
    }
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "salon-voice", "salon-voice")
        .context("Failed to get project directories")?;
    Ok(base.config_dir().join("config.toml"))
}

/// Get the data directory path
pub fn data_dir() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "salon-voice", "salon-voice")
        .context("Failed to get project directories")?;
    Ok(base.data_dir().to_path_buf())
}

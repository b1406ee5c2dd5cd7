//! Configuration loading
//!
//! Configuration is read from a YAML file and then patched with environment
//! variables named after the nested key, with `.` replaced by `_` and
//! upper-cased (`server.port` becomes `SERVER_PORT`).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Idle minutes before a client entry is evicted, when not configured.
pub const DEFAULT_CLIENT_DURATION: u64 = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("error reading config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to decode config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid value {value:?} for {key}")]
    InvalidOverride { key: &'static str, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,

    pub resources: Vec<Resource>,

    /// Minutes a client may stay idle before its limiter state is dropped.
    #[serde(default = "default_client_duration")]
    pub client_duration: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// One backend origin requests may be forwarded to.
#[derive(Debug, Clone, Deserialize)]
pub struct Resource {
    pub name: String,

    #[serde(default)]
    pub endpoint: String,

    pub destination_url: String,
}

fn default_client_duration() -> u64 {
    DEFAULT_CLIENT_DURATION
}

impl ServerConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Config {
    /// Load from `CONFIG_PATH` (or `config.yaml`) and apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::from_file(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Read and decode a YAML file without applying overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Patch values from `lookup`, which maps an override name to its value.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("SERVER_HOST") {
            self.server.host = host;
        }

        if let Some(port) = lookup("SERVER_PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| ConfigError::InvalidOverride { key: "SERVER_PORT", value: port })?;
        }

        if let Some(duration) = lookup("CLIENT_DURATION") {
            self.client_duration = duration.parse().map_err(|_| ConfigError::InvalidOverride {
                key: "CLIENT_DURATION",
                value: duration,
            })?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::Invalid("server.host must not be empty".into()));
        }

        if self.resources.is_empty() {
            return Err(ConfigError::Invalid("at least one resource is required".into()));
        }

        if let Some(r) = self.resources.iter().find(|r| r.destination_url.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "resource {} has an empty destination_url",
                r.name
            )));
        }

        Ok(())
    }
}

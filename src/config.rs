//! Application configuration.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::{StaticFxEntry, StaticFxProvider};
use crate::error::ConfigError;

/// Top-level configuration, normally read from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AppConfig {
    /// Host to bind the HTTP server to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Currency every projection is reported in
    #[serde(default = "default_report_currency")]
    pub report_currency: String,

    /// Static FX multipliers keyed by native currency code
    #[serde(default)]
    pub fx: BTreeMap<String, StaticFxEntry>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_report_currency() -> String {
    "EUR".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            report_currency: default_report_currency(),
            fx: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load from `path` when it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) if p.exists() => {
                tracing::info!(path = %p.display(), "loading configuration");
                Self::from_file(p)
            }
            Some(p) => {
                tracing::warn!(path = %p.display(), "config file not found, using defaults");
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    pub fn fx_provider(&self) -> StaticFxProvider {
        StaticFxProvider::new(self.report_currency.clone(), self.fx.clone())
    }
}

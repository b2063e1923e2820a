//! Application settings.
//!
//! Settings come from an optional TOML file, then the process environment,
//! then defaults derived from the deployment environment. A value given
//! explicitly in the file always wins over the environment.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Environment variable selecting the deployment environment.
pub const ENV_VAR: &str = "ARMONAUT_ENV";
/// Environment variable overriding the log level.
pub const LOG_LEVEL_VAR: &str = "ARMONAUT_LOG_LEVEL";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The settings file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// Path of the settings file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The settings file is not valid TOML for [`RawSettings`].
    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),
    /// An unknown deployment environment was requested.
    #[error("unknown environment {0:?}, expected \"production\" or \"development\"")]
    InvalidEnvironment(String),
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Production deployment.
    #[default]
    Production,
    /// Local development.
    Development,
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" => Ok(Environment::Production),
            "development" => Ok(Environment::Development),
            _ => Err(ConfigError::InvalidEnvironment(s.to_owned())),
        }
    }
}

/// Settings as written in the settings file; every value is optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RawSettings {
    /// Deployment environment.
    pub env: Option<Environment>,
    /// Logging section.
    pub logging: RawLoggingSettings,
    /// HTTP section.
    pub http: RawHttpSettings,
}

/// `[logging]` section of the settings file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RawLoggingSettings {
    /// Log filter directive, e.g. `info` or `armonaut=debug`.
    pub level: Option<String>,
}

/// `[http]` section of the settings file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RawHttpSettings {
    /// Never answer conditional requests with `304 Not Modified`.
    pub prevent_http_cache: Option<bool>,
}

/// Resolved application settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Deployment environment.
    pub env: Environment,
    /// Logging settings.
    pub logging: LoggingSettings,
    /// HTTP pipeline settings.
    pub http: HttpSettings,
}

/// Resolved logging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    /// Default log filter directive, used when `RUST_LOG` is unset.
    pub level: String,
}

/// Resolved HTTP pipeline settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpSettings {
    /// Never answer conditional requests with `304 Not Modified`.
    pub prevent_http_cache: bool,
}

impl Settings {
    /// Loads settings from a TOML file, filling gaps from the process
    /// environment.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: RawSettings = toml::from_str(&content)?;
        Self::resolve(raw, |var| std::env::var(var).ok())
    }

    /// Builds settings from the process environment alone.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::resolve(RawSettings::default(), |var| std::env::var(var).ok())
    }

    /// Resolves raw settings, consulting `lookup` for environment variables.
    pub fn resolve<F>(raw: RawSettings, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = match raw.env {
            Some(env) => env,
            None => lookup(ENV_VAR)
                .map(|value| value.parse())
                .transpose()?
                .unwrap_or_default(),
        };

        let development = env == Environment::Development;

        let level = raw
            .logging
            .level
            .or_else(|| lookup(LOG_LEVEL_VAR))
            .unwrap_or_else(|| if development { "debug" } else { "info" }.to_owned());

        let prevent_http_cache = raw.http.prevent_http_cache.unwrap_or(development);

        Ok(Self {
            env,
            logging: LoggingSettings { level },
            http: HttpSettings { prevent_http_cache },
        })
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            env: Environment::Production,
            logging: LoggingSettings {
                level: "info".to_owned(),
            },
            http: HttpSettings {
                prevent_http_cache: false,
            },
        }
    }
}

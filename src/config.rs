// Server configuration: TOML file overlaid with environment variables

use hserver_core::logging::{ENV_LOG_FILE, ENV_LOG_FORMAT, ENV_LOG_LEVEL, LogConfig, LogFormat, LogLevel, LogOutput};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable naming the configuration file.
pub const ENV_CONFIG: &str = "HSERVER_CONFIG";
pub const ENV_HOST: &str = "HSERVER_HOST";
pub const ENV_PORT: &str = "HSERVER_PORT";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// `[log]` table of the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: LogLevel,
    pub format: LogFormat,
    /// Append to this file instead of stdout.
    pub file: Option<PathBuf>,
    /// Filter directives replacing `level`, e.g. `hserver_core=debug`.
    pub filter: Option<String>,
}

impl LogSettings {
    pub fn to_log_config(&self) -> LogConfig {
        let output = match &self.file {
            Some(path) => LogOutput::File(path.clone()),
            None => LogOutput::Stdout,
        };
        let config = LogConfig::new()
            .level(self.level)
            .format(self.format)
            .output(output);
        match &self.filter {
            Some(filter) => config.with_env_filter(filter.clone()),
            None => config,
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Json,
            file: None,
            filter: None,
        }
    }
}

/// Listener address and logging.
///
/// ```
/// use hserver::config::ServerConfig;
///
/// let config = ServerConfig::from_toml_str("port = 8080\n[log]\nlevel = \"debug\"").unwrap();
/// assert_eq!(config.bind_address(), "127.0.0.1:8080");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log: LogSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            log: LogSettings::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Load `path` (or the defaults) and apply the `HSERVER_*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()
    }

    pub fn apply_env(self) -> Result<Self> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides read through `lookup`.
    pub fn apply_env_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(ENV_HOST) {
            self.host = host;
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.port = port.parse().map_err(|_| invalid(ENV_PORT, &port))?;
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.log.level = level.parse().map_err(|_| invalid(ENV_LOG_LEVEL, &level))?;
        }
        if let Some(format) = lookup(ENV_LOG_FORMAT) {
            self.log.format = format.parse().map_err(|_| invalid(ENV_LOG_FORMAT, &format))?;
        }
        if let Some(file) = lookup(ENV_LOG_FILE) {
            self.log.file = Some(PathBuf::from(file));
        }
        Ok(self)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

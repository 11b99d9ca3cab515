//! Configuration file for the vstore framework
//!
//! Configuration is read from a TOML file. Only the storage base directory and
//! the master node URL are required; every other field has a default. The two
//! required values may be overridden from the environment
//! (`VSTORE_BASE_DIR`, `VSTORE_MASTER_URL`).

use crate::matching::MatchingMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const ENV_BASE_DIR: &str = "VSTORE_BASE_DIR";
pub const ENV_MASTER_URL: &str = "VSTORE_MASTER_URL";

/// Main framework configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VStoreConfig {
    pub storage: StorageSection,
    pub master: MasterSection,
    #[serde(default)]
    pub matching: MatchingSection,
    #[serde(default)]
    pub noise: NoiseSection,
    #[serde(default)]
    pub upload: UploadSection,
    #[serde(default)]
    pub evaluation: EvaluationSection,
}

/// Local storage section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageSection {
    /// Directory the framework keeps its files in. Must already exist.
    pub base_dir: PathBuf,
}

/// Master node section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MasterSection {
    /// Base URL of the master node, e.g. `http://master.example.org:50000`
    pub url: String,
    #[serde(default = "default_config_connect_timeout")]
    pub config_connect_timeout_secs: u64,
    #[serde(default = "default_config_write_timeout")]
    pub config_write_timeout_secs: u64,
    #[serde(default = "default_config_read_timeout")]
    pub config_read_timeout_secs: u64,
    #[serde(default = "default_nodes_connect_timeout")]
    pub nodes_connect_timeout_secs: u64,
    #[serde(default = "default_nodes_read_timeout")]
    pub nodes_read_timeout_secs: u64,
}

fn default_config_connect_timeout() -> u64 {
    2
}

fn default_config_write_timeout() -> u64 {
    2
}

fn default_config_read_timeout() -> u64 {
    5
}

fn default_nodes_connect_timeout() -> u64 {
    5
}

fn default_nodes_read_timeout() -> u64 {
    10
}

/// Matching section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchingSection {
    /// Initial matching mode; the master configuration may replace it
    #[serde(default)]
    pub mode: MatchingMode,
    /// Whether rules may place a file on more than one node
    #[serde(default = "default_true")]
    pub multiple_nodes_per_rule: bool,
}

impl Default for MatchingSection {
    fn default() -> Self {
        Self {
            mode: MatchingMode::default(),
            multiple_nodes_per_rule: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Noise thresholds used when the caller builds noise context
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NoiseSection {
    #[serde(default = "default_rms_threshold")]
    pub rms_threshold: i32,
    #[serde(default = "default_db_threshold")]
    pub db_threshold: i32,
}

impl Default for NoiseSection {
    fn default() -> Self {
        Self {
            rms_threshold: default_rms_threshold(),
            db_threshold: default_db_threshold(),
        }
    }
}

fn default_rms_threshold() -> i32 {
    1000
}

fn default_db_threshold() -> i32 {
    -25
}

/// Upload behaviour
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadSection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_node_timeout")]
    pub node_timeout_secs: u64,
}

impl Default for UploadSection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_secs: default_retry_delay(),
            node_timeout_secs: default_node_timeout(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    5
}

fn default_node_timeout() -> u64 {
    30
}

/// Evaluation logging service
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EvaluationSection {
    #[serde(default)]
    pub enabled: bool,
    /// Base URL records are posted to (`/store`, `/download`)
    pub logging_url: Option<String>,
    /// Environment variable holding the logging URL, used when `logging_url` is unset
    #[serde(default)]
    pub logging_url_env: Option<String>,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl VStoreConfig {
    /// Build a configuration from the two required values, everything else default
    pub fn new<P: Into<PathBuf>, S: Into<String>>(base_dir: P, master_url: S) -> Self {
        Self {
            storage: StorageSection {
                base_dir: base_dir.into(),
            },
            master: MasterSection {
                url: master_url.into(),
                config_connect_timeout_secs: default_config_connect_timeout(),
                config_write_timeout_secs: default_config_write_timeout(),
                config_read_timeout_secs: default_config_read_timeout(),
                nodes_connect_timeout_secs: default_nodes_connect_timeout(),
                nodes_read_timeout_secs: default_nodes_read_timeout(),
            },
            matching: MatchingSection::default(),
            noise: NoiseSection::default(),
            upload: UploadSection::default(),
            evaluation: EvaluationSection::default(),
        }
    }

    /// Load configuration from TOML file, apply environment overrides and validate
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: VStoreConfig = toml::from_str(&content)?;
        config.apply_env_overrides();
        config.resolve_env_references()?;
        config.validate()?;
        Ok(config)
    }

    /// Fill values configured by environment variable name
    pub fn resolve_env_references(&mut self) -> Result<(), ConfigError> {
        if self.evaluation.logging_url.is_none() {
            if let Some(name) = &self.evaluation.logging_url_env {
                self.evaluation.logging_url = Some(Self::get_env_var_required(name)?);
            }
        }
        Ok(())
    }

    fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
        std::env::var(env_var_name).map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
    }

    /// Replace base directory and master URL with values from the environment, if set
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var(ENV_BASE_DIR) {
            if !dir.trim().is_empty() {
                self.storage.base_dir = PathBuf::from(dir);
            }
        }
        if let Ok(url) = std::env::var(ENV_MASTER_URL) {
            if !url.trim().is_empty() {
                self.master.url = url;
            }
        }
    }

    /// Check the values that cannot be defaulted
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.base_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "storage.base_dir must not be empty".to_string(),
            ));
        }
        self.master_url()?;
        if self.upload.max_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "upload.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.evaluation.enabled {
            match &self.evaluation.logging_url {
                Some(url) => {
                    Url::parse(url).map_err(|e| {
                        ConfigError::InvalidConfig(format!("evaluation.logging_url: {e}"))
                    })?;
                }
                None => {
                    return Err(ConfigError::InvalidConfig(
                        "evaluation.enabled requires evaluation.logging_url".to_string(),
                    ))
                }
            }
        }
        Ok(())
    }

    /// Parsed master node URL
    pub fn master_url(&self) -> Result<Url, ConfigError> {
        if self.master.url.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "master.url must not be empty".to_string(),
            ));
        }
        Url::parse(&self.master.url)
            .map_err(|e| ConfigError::InvalidConfig(format!("master.url: {e}")))
    }

    pub fn upload_retry_delay(&self) -> Duration {
        Duration::from_secs(self.upload.retry_delay_secs)
    }

    /// Create a test configuration rooted in the given directory
    #[cfg(test)]
    pub fn test_config(base_dir: &Path) -> Self {
        let mut config = Self::new(base_dir, "http://127.0.0.1:1");
        config.upload.retry_delay_secs = 0;
        config
    }
}

//! Configuration handling for qrator
//!
//! Configuration is read from `~/.config/qrator/config.toml` (platform
//! equivalent) or from an explicit path. Every field has a default, so an
//! empty or missing file is valid.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::archive::ArchiveLayout;
use crate::domain::{SourcePolicy, DEFAULT_DISCONNECTED_PREFIX, DEFAULT_DPI, DEFAULT_LOCAL_PROVIDERS};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

/// Output format for commands
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Auxiliary store handling
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct AuxiliaryConfig {
    /// Vacuum the store after dropping tables
    pub vacuum: bool,
}

/// Data source handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SourcesConfig {
    /// Providers whose sources are plain files
    pub local_providers: Vec<String>,

    /// Placeholder directory for disconnected sources
    pub disconnected_prefix: String,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            local_providers: DEFAULT_LOCAL_PROVIDERS.iter().map(|p| p.to_string()).collect(),
            disconnected_prefix: DEFAULT_DISCONNECTED_PREFIX.to_string(),
        }
    }
}

impl SourcesConfig {
    pub fn policy(&self) -> SourcePolicy {
        SourcePolicy::new(&self.local_providers, self.disconnected_prefix.as_str())
    }
}

/// The out-of-process layout export worker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Program to run; the job file path is appended to `args`
    pub program: Option<String>,

    pub args: Vec<String>,

    /// Install prefix handed to the worker
    pub prefix: String,

    pub dpi: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: None,
            args: vec![],
            prefix: String::new(),
            dpi: DEFAULT_DPI,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Default output format (text or json)
    pub default_format: OutputFormat,

    /// Name recorded as `saveUser` (defaults to $USER)
    pub user: Option<String>,

    pub archive: ArchiveLayout,

    pub auxiliary: AuxiliaryConfig,

    pub sources: SourcesConfig,

    pub worker: WorkerConfig,
}

impl Config {
    /// Loads configuration from `path`, or from the global location
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => {
                if !path.is_file() {
                    return Err(ConfigError::Invalid(format!(
                        "config file not found: {}",
                        path.display()
                    ))
                    .into());
                }
                path.to_path_buf()
            }
            None => match Self::global_config_dir() {
                Some(dir) => dir.join("config.toml"),
                None => return Ok(Self::default()),
            },
        };

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config: {}", config_path.display()))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to load config: {}", config_path.display()))?;
        log::debug!("loaded config from {}", config_path.display());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.archive.document_member.trim().is_empty() {
            return Err(ConfigError::Invalid("archive.document_member is empty".into()));
        }
        if self.archive.document_member == self.archive.auxiliary_member {
            return Err(ConfigError::Invalid(
                "archive.document_member and archive.auxiliary_member must differ".into(),
            ));
        }
        if self.worker.dpi == 0 {
            return Err(ConfigError::Invalid("worker.dpi must be positive".into()));
        }
        Ok(())
    }

    /// Returns the global config directory
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("org", "qrator", "qrator").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Gets the effective user name from config, environment, or defaults
    pub fn effective_user(&self) -> String {
        self.user
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .or_else(|| std::env::var("USERNAME").ok())
            .unwrap_or_else(|| "qrator".to_string())
    }
}

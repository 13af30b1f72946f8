//! Engine configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::vc::CheckoutMode;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Engine configuration options.
///
/// Every field has a default, so a TOML file only needs the keys it changes:
///
/// ```toml
/// path = "/var/lib/tablegit/rows"
/// default_branch = "main"
/// checkout = "incremental"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Row store directory. `None` keeps rows in a temporary directory that
    /// lives as long as the engine.
    pub path: Option<PathBuf>,
    /// Create the row store if it doesn't exist.
    pub create_if_missing: bool,
    /// Name of the branch created at initialization.
    pub default_branch: String,
    /// Author of the root commit.
    pub system_user: String,
    pub checkout: CheckoutMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            path: None,
            create_if_missing: true,
            default_branch: "primary".to_string(),
            system_user: "system".to_string(),
            checkout: CheckoutMode::Full,
        }
    }
}

impl EngineConfig {
    /// Create a new configuration with the given row store path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn default_branch(mut self, name: impl Into<String>) -> Self {
        self.default_branch = name.into();
        self
    }

    pub fn system_user(mut self, user: impl Into<String>) -> Self {
        self.system_user = user.into();
        self
    }

    pub fn checkout(mut self, mode: CheckoutMode) -> Self {
        self.checkout = mode;
        self
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.system_user.trim().is_empty() {
            return Err(ConfigError::Invalid("system_user must not be empty".into()));
        }
        if !self.create_if_missing && self.path.is_none() {
            return Err(ConfigError::Invalid(
                "a temporary row store always has to be created".into(),
            ));
        }
        Ok(())
    }
}

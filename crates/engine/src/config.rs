//! Store configuration via `cmoo.toml`
//!
//! A store can be configured in code or from a TOML file. Missing fields
//! take their defaults, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use cmoo_core::{Error, ObjectId, Result};

/// Config file name embedders conventionally use
pub const CONFIG_FILE_NAME: &str = "cmoo.toml";

fn default_max_tasks() -> usize {
    64
}

fn default_cache_size() -> usize {
    1024
}

fn default_first_object_id() -> ObjectId {
    1000
}

/// Store configuration loaded from `cmoo.toml`.
///
/// # Example
///
/// ```toml
/// # Maximum number of concurrent transactions (worker threads)
/// max_tasks = 64
///
/// # Initial number of cache buckets
/// cache_size = 1024
///
/// # Lowest id handed out by make_object
/// first_object_id = 1000
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreConfig {
    /// Upper bound on simultaneously active transactions
    #[serde(default = "default_max_tasks")]
    pub max_tasks: usize,
    /// Initial cache table size in buckets
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
    /// Lowest id `make_object` allocates; raised past the highest persisted
    /// id when the store opens
    #[serde(default = "default_first_object_id")]
    pub first_object_id: ObjectId,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_tasks: default_max_tasks(),
            cache_size: default_cache_size(),
            first_object_id: default_first_object_id(),
        }
    }
}

impl StoreConfig {
    /// Default configuration with a different task bound
    pub fn with_max_tasks(max_tasks: usize) -> Self {
        Self {
            max_tasks,
            ..Self::default()
        }
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns an error if `max_tasks` or `cache_size` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.max_tasks == 0 {
            return Err(Error::invalid_config("max_tasks must be at least 1"));
        }
        if self.cache_size == 0 {
            return Err(Error::invalid_config("cache_size must be at least 1"));
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# cmoo store configuration
#
# Maximum number of concurrent transactions. Every worker thread running a
# transaction needs one slot; starting more at once is a fatal error.
max_tasks = 64

# Initial number of cache buckets. The table doubles whenever more than
# 70% of its buckets are in use.
cache_size = 1024

# Lowest object id handed out by make_object. Raised automatically past
# the highest id already persisted.
first_object_id = 1000
"#
    }

    /// Parse and validate config from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML for this struct or
    /// fails [`validate`](Self::validate).
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: StoreConfig = toml::from_str(content)
            .map_err(|e| Error::invalid_config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content).map_err(|e| match e {
            Error::InvalidConfig(msg) => {
                Error::InvalidConfig(format!("{} ({})", msg, path.display()))
            }
            other => other,
        })
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml())?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::SerializationError(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

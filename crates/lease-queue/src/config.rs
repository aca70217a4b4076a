//! Engine configuration.
//!
//! Sources (applied in order, later sources override earlier ones):
//!  1. Built-in defaults
//!  2. An optional YAML file
//!  3. Environment variables prefixed `LQ__` (double-underscore separator),
//!     e.g. `LQ__DEFAULT_VISIBILITY_TIMEOUT_SECS=60`

use crate::error::ConfigurationError;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Largest number of messages a single receive or peek may return
pub const MAX_BATCH_SIZE: u32 = 32;

/// Largest number of signed identifiers a queue may hold
pub const MAX_ACCESS_POLICIES: usize = 15;

/// Largest page size accepted by listing operations
pub const MAX_LIST_PAGE_SIZE: u32 = 5000;

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "LQ";

/// Tunable defaults and limits for the queue engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Visibility timeout applied by `receive` when the caller gives none
    pub default_visibility_timeout_secs: u64,
    /// Upper bound for any visibility timeout or initial visibility delay
    pub max_visibility_timeout_secs: u64,
    /// Message lifetime applied by `send` when the caller gives none
    pub default_message_ttl_secs: u64,
    /// Page size for listings when the caller gives none
    pub default_list_page_size: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_visibility_timeout_secs: 30,
            max_visibility_timeout_secs: 7 * 24 * 60 * 60,
            default_message_ttl_secs: 7 * 24 * 60 * 60,
            default_list_page_size: MAX_LIST_PAGE_SIZE,
        }
    }
}

impl EngineConfig {
    /// Load configuration from an optional YAML file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let defaults = ::config::Config::try_from(&Self::default())?;
        let mut builder = ::config::Config::builder().add_source(defaults);

        if let Some(path) = path {
            info!(path = %path.display(), "Loading queue engine configuration from file");
            builder = builder.add_source(
                ::config::File::from(path)
                    .required(true)
                    .format(::config::FileFormat::Yaml),
            );
        }

        let engine_config: Self = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        engine_config.validate()?;
        Ok(engine_config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_visibility_timeout_secs == 0 {
            return Err(ConfigurationError::Invalid {
                message: "max_visibility_timeout_secs must be positive".to_string(),
            });
        }

        if self.default_visibility_timeout_secs > self.max_visibility_timeout_secs {
            return Err(ConfigurationError::Invalid {
                message: format!(
                    "default_visibility_timeout_secs ({}) exceeds max_visibility_timeout_secs ({})",
                    self.default_visibility_timeout_secs, self.max_visibility_timeout_secs
                ),
            });
        }

        if self.default_message_ttl_secs == 0 {
            return Err(ConfigurationError::Invalid {
                message: "default_message_ttl_secs must be positive".to_string(),
            });
        }

        if self.default_list_page_size == 0 || self.default_list_page_size > MAX_LIST_PAGE_SIZE {
            return Err(ConfigurationError::Invalid {
                message: format!(
                    "default_list_page_size must be 1-{}",
                    MAX_LIST_PAGE_SIZE
                ),
            });
        }

        Ok(())
    }

    pub fn default_visibility_timeout(&self) -> Duration {
        seconds(self.default_visibility_timeout_secs)
    }

    pub fn max_visibility_timeout(&self) -> Duration {
        seconds(self.max_visibility_timeout_secs)
    }

    pub fn default_message_ttl(&self) -> Duration {
        seconds(self.default_message_ttl_secs)
    }
}

fn seconds(secs: u64) -> Duration {
    Duration::try_seconds(i64::try_from(secs).unwrap_or(i64::MAX)).unwrap_or(Duration::MAX)
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

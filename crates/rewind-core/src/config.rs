//! Driver configuration.

use std::env;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration for a `Driver`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Name attached to every log event of this driver (default: "driver").
    pub name: String,

    /// Upper bound on recorded steps per chain (default: unbounded).
    pub max_steps: Option<usize>,

    /// Log a warning when a completion handler is dropped without firing
    /// (default: true). Such a chain never resumes.
    pub warn_on_dropped_handler: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },

    #[error("json decode: {0}")]
    Json(#[from] serde_json::Error),
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            name: "driver".to_string(),
            max_steps: None,
            warn_on_dropped_handler: true,
        }
    }
}

impl DriverConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    pub fn with_warn_on_dropped_handler(mut self, warn: bool) -> Self {
        self.warn_on_dropped_handler = warn;
        self
    }

    /// Load configuration from environment variables.
    ///
    /// # Optional Environment Variables
    /// - `REWIND_DRIVER_NAME` - Driver name used in logs (default: "driver")
    /// - `REWIND_MAX_STEPS` - Maximum recorded steps per chain (default: unbounded)
    /// - `REWIND_WARN_ON_DROPPED_HANDLER` - "true"/"1" or "false"/"0" (default: true)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env`, reading values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(name) = lookup("REWIND_DRIVER_NAME") {
            config.name = name;
        }

        if let Some(raw) = lookup("REWIND_MAX_STEPS") {
            let max_steps = raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
                key: "REWIND_MAX_STEPS",
                reason: format!("{e}"),
            })?;
            config.max_steps = Some(max_steps);
        }

        if let Some(raw) = lookup("REWIND_WARN_ON_DROPPED_HANDLER") {
            config.warn_on_dropped_handler = match raw.trim() {
                "true" | "1" => true,
                "false" | "0" => false,
                other => {
                    return Err(ConfigError::InvalidValue {
                        key: "REWIND_WARN_ON_DROPPED_HANDLER",
                        reason: format!("expected true/false, got {other:?}"),
                    });
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "name",
                reason: "must not be empty".to_string(),
            });
        }
        if self.max_steps == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "max_steps",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

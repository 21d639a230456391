use serde::Deserialize;

use crate::errors::ConfigError;

/// Selects the [ContainerConfig::production] or [ContainerConfig::development] preset
pub const ENV_PROFILE: &str = "WRAPP_ENV";
/// Overrides [ContainerConfig::detect_cycles]
pub const ENV_DETECT_CYCLES: &str = "WRAPP_DI_DETECT_CYCLES";

/// Runtime behaviour of a [crate::Container]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Check for circular dependencies before waiting on another instance.
    ///
    /// Without it a cycle between concurrently created instances deadlocks.
    pub detect_cycles: bool,
    /// Longest allowed chain of nested resolutions
    pub max_resolution_depth: usize,
    /// How often one resolution restarts after a retryable error
    pub max_resolve_attempts: usize,
    /// Round limit of [crate::Container::clear_all]
    pub max_clear_rounds: usize,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        ContainerConfig {
            detect_cycles: cfg!(debug_assertions),
            max_resolution_depth: 100,
            max_resolve_attempts: 8,
            max_clear_rounds: 10,
        }
    }
}

impl ContainerConfig {
    pub fn production() -> Self {
        ContainerConfig {
            detect_cycles: false,
            ..Default::default()
        }
    }

    pub fn development() -> Self {
        ContainerConfig {
            detect_cycles: true,
            ..Default::default()
        }
    }

    /// Parses a JSON document, missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Builds the config from [ENV_PROFILE] and [ENV_DETECT_CYCLES]
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match lookup(ENV_PROFILE).as_deref() {
            None => Self::default(),
            Some("production" | "prod") => Self::production(),
            Some("development" | "dev") => Self::development(),
            Some(other) => {
                return Err(ConfigError::InvalidEnv {
                    name: ENV_PROFILE,
                    value: other.to_string(),
                })
            }
        };

        if let Some(value) = lookup(ENV_DETECT_CYCLES) {
            config.detect_cycles = match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        name: ENV_DETECT_CYCLES,
                        value,
                    })
                }
            };
        }

        Ok(config)
    }

    pub fn with_detect_cycles(mut self, detect_cycles: bool) -> Self {
        self.detect_cycles = detect_cycles;
        self
    }

    pub fn with_max_resolution_depth(mut self, depth: usize) -> Self {
        self.max_resolution_depth = depth;
        self
    }
}

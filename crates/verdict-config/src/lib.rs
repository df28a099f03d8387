//! Configuration management for Verdict
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. Environment variables (VERDICT_* prefix, `__` between sections)
//! 2. verdict.local.toml (gitignored, local overrides)
//! 3. verdict.toml (git-tracked, project config)
//! 4. ~/.config/verdict/config.toml (user defaults)
//! 5. Built-in defaults (lowest precedence)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Main Verdict configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerdictConfig {
    pub engine: EngineSection,
    pub cache: CacheSection,
    pub limits: LimitsSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// Emit a structured event for every decision.
    pub audit_enabled: bool,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            audit_enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub enabled: bool,
    /// Maximum number of memoized decisions.
    pub capacity: usize,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 4096,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsSection {
    /// Deepest allowed policy-set nesting (root is depth 0).
    pub max_policy_depth: usize,
    /// Deepest allowed AND/OR/NOT nesting inside one condition.
    pub max_condition_depth: usize,
    /// Hard step bound for a single pattern match.
    pub pattern_step_limit: u64,
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            max_policy_depth: 64,
            max_condition_depth: 64,
            pattern_step_limit: 100_000,
        }
    }
}

impl VerdictConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Read a single TOML file without layering.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&raw).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration for test and development use: no cache, no audit events.
    pub fn development() -> Self {
        Self {
            engine: EngineSection {
                audit_enabled: false,
            },
            cache: CacheSection {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.enabled && self.cache.capacity == 0 {
            return Err(ConfigError::ValidationError {
                field: "cache.capacity",
                reason: "must be > 0 when the cache is enabled".to_string(),
            });
        }
        if self.limits.max_policy_depth == 0 {
            return Err(ConfigError::ValidationError {
                field: "limits.max_policy_depth",
                reason: "must be > 0".to_string(),
            });
        }
        if self.limits.max_condition_depth == 0 {
            return Err(ConfigError::ValidationError {
                field: "limits.max_condition_depth",
                reason: "must be > 0".to_string(),
            });
        }
        if self.limits.pattern_step_limit == 0 {
            return Err(ConfigError::ValidationError {
                field: "limits.pattern_step_limit",
                reason: "must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

//! Configuration management for Flock
//!
//! This module provides the process-level configuration: defaults applied to
//! new swarms, default budgets, and the tier facade settings.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::types::{ResourceAmounts, SwarmConfig};
use crate::{FlockError, Result};

/// Process-level Flock configuration
///
/// Loaded from `.flock/config.toml` under the given root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlockConfig {
    /// Configuration applied to swarms created without explicit settings
    #[serde(default)]
    pub swarm_defaults: SwarmConfig,

    /// Budget opened for each swarm when none is supplied
    #[serde(default)]
    pub budget: BudgetDefaults,

    /// Tier facade settings
    #[serde(default)]
    pub tier: TierSettings,
}

/// Default budget per swarm
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetDefaults {
    #[serde(default = "default_credits")]
    pub credits: u64,

    #[serde(default = "default_tokens")]
    pub tokens: u64,

    #[serde(default = "default_time_ms")]
    pub time_ms: u64,
}

/// Tier facade settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierSettings {
    /// Name reported as the originating tier in errors
    #[serde(default = "default_tier_name")]
    pub name: String,

    /// Maximum concurrently executing swarms advertised in capabilities
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Credit ceiling reserved for a routine that does not state its own
    #[serde(default = "default_routine_cost")]
    pub routine_cost: u64,
}

fn default_credits() -> u64 {
    10_000
}

fn default_tokens() -> u64 {
    1_000_000
}

fn default_time_ms() -> u64 {
    3_600_000
}

fn default_tier_name() -> String {
    "swarm".to_string()
}

fn default_max_concurrency() -> usize {
    10
}

fn default_routine_cost() -> u64 {
    100
}

impl Default for BudgetDefaults {
    fn default() -> Self {
        Self {
            credits: default_credits(),
            tokens: default_tokens(),
            time_ms: default_time_ms(),
        }
    }
}

impl Default for TierSettings {
    fn default() -> Self {
        Self {
            name: default_tier_name(),
            max_concurrency: default_max_concurrency(),
            routine_cost: default_routine_cost(),
        }
    }
}

impl FlockConfig {
    /// Load configuration from `.flock/config.toml` or use defaults
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let config_path = root.join(".flock/config.toml");

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Self = toml::from_str(&content)
                .map_err(|e| FlockError::Config(format!("Failed to parse config file: {}", e)))?;
            config.swarm_defaults.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Write default configuration to `.flock/config.toml`
    pub fn write_default(root: &Path) -> Result<()> {
        let config_dir = root.join(".flock");
        std::fs::create_dir_all(&config_dir)?;

        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| FlockError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(config_dir.join("config.toml"), content)?;
        Ok(())
    }

    /// Budget for a swarm, honoring any per-swarm overrides
    pub fn budget_for(&self, swarm: &SwarmConfig) -> ResourceAmounts {
        ResourceAmounts {
            credits: swarm.total_budget.unwrap_or(self.budget.credits),
            tokens: swarm.token_budget.unwrap_or(self.budget.tokens),
            time_ms: swarm.time_budget_ms.unwrap_or(self.budget.time_ms),
        }
    }
}

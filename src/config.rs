//! Planner configuration using Figment
//!
//! Configuration is assembled in layers, lowest precedence first:
//! 1. Built-in defaults
//! 2. An optional TOML file
//! 3. Environment variables prefixed with `LHPLAN_`
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated with a double underscore:
//!
//! ```text
//! LHPLAN_PLANNER__CARRY_VOLUME_UL=0.25
//! LHPLAN_PLANNER__MERGE_TRANSFERS=false
//! LHPLAN_LOGGING__LEVEL=debug
//! ```
//!
//! # Example
//!
//! ```no_run
//! use liquid_planner::config::PlannerConfig;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = PlannerConfig::load_from("lhplan.toml")?;
//!     println!("carry volume: {} ul", config.planner.carry_volume_ul);
//!     Ok(())
//! }
//! ```

use crate::error::{PlanError, PlanResult};
use crate::volume::{Volume, DEFAULT_EPSILON_UL};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "LHPLAN_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlannerConfig {
    #[serde(default)]
    pub planner: PlannerSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Knobs of the planning pass itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerSettings {
    /// Tolerance for volume comparisons (ul)
    #[serde(default = "default_epsilon")]
    pub epsilon_ul: f64,
    /// Volume lost from the source on every aspirate (ul)
    #[serde(default = "default_carry_volume")]
    pub carry_volume_ul: f64,
    /// Whether the single tip refresh pass may restore depleted boxes
    #[serde(default)]
    pub refresh_depleted_tip_boxes: bool,
    /// Whether transfer blocks merge adjacent compatible transfers
    #[serde(default = "default_true")]
    pub merge_transfers: bool,
    /// New tip boxes that may be placed for one tip request
    #[serde(default = "default_max_tip_box_allocations")]
    pub max_tip_box_allocations: usize,
    /// Drive speed sent after initialisation, if set (mm/s)
    #[serde(default)]
    pub drive_speed_mm_s: Option<f64>,
    /// Match sources by liquid name only, even when a request pins an instance
    #[serde(default)]
    pub ignore_liquid_instances: bool,
}

/// Logging output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_epsilon() -> f64 {
    DEFAULT_EPSILON_UL
}

fn default_carry_volume() -> f64 {
    0.5
}

fn default_true() -> bool {
    true
}

fn default_max_tip_box_allocations() -> usize {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            epsilon_ul: default_epsilon(),
            carry_volume_ul: default_carry_volume(),
            refresh_depleted_tip_boxes: false,
            merge_transfers: default_true(),
            max_tip_box_allocations: default_max_tip_box_allocations(),
            drive_speed_mm_s: None,
            ignore_liquid_instances: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl PlannerSettings {
    pub fn carry_volume(&self) -> Volume {
        Volume::ul(self.carry_volume_ul)
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl PlannerConfig {
    /// Defaults overlaid with `LHPLAN_` environment variables only.
    pub fn load() -> PlanResult<Self> {
        Self::from_figment(Self::base_figment())
    }

    /// Defaults, then the TOML file at `path` (if it exists), then the environment.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Config`] if a layer cannot be parsed and
    /// [`PlanError::Configuration`] if the merged values fail validation.
    pub fn load_from<P: AsRef<Path>>(path: P) -> PlanResult<Self> {
        let figment = Figment::from(Serialized::defaults(PlannerConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::from_figment(figment)
    }

    /// Render the effective configuration as a TOML document.
    pub fn to_toml_string(&self) -> PlanResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| PlanError::Configuration(format!("cannot render config: {e}")))
    }

    fn base_figment() -> Figment {
        Figment::from(Serialized::defaults(PlannerConfig::default()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    fn from_figment(figment: Figment) -> PlanResult<Self> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Check semantic constraints the types cannot express.
    pub fn validate(&self) -> PlanResult<()> {
        let p = &self.planner;
        if p.epsilon_ul <= 0.0 || !p.epsilon_ul.is_finite() {
            return Err(PlanError::Configuration(format!(
                "epsilon_ul must be positive, got {}",
                p.epsilon_ul
            )));
        }
        if p.carry_volume_ul < 0.0 || !p.carry_volume_ul.is_finite() {
            return Err(PlanError::Configuration(format!(
                "carry_volume_ul must be >= 0, got {}",
                p.carry_volume_ul
            )));
        }
        if let Some(speed) = p.drive_speed_mm_s {
            if speed <= 0.0 || !speed.is_finite() {
                return Err(PlanError::Configuration(format!(
                    "drive_speed_mm_s must be positive, got {speed}"
                )));
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(PlanError::Configuration(format!(
                "Invalid logging level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }
        Ok(())
    }
}

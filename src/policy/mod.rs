//! Liquid-handling policies and the conditional rule engine that selects them.
//!
//! A [`Policy`] is the fully resolved set of execution parameters for one channel of
//! one transfer: speeds, offsets, mixing, waits, blowout and multi-channel
//! eligibility. Rules contribute [`PolicyOverrides`], sparse sets of the same keys,
//! which are layered over the rule set's default policy in priority order.
//!
//! # Resolution
//!
//! ```text
//! PolicyQuery (attributes of one transfer channel)
//!    │
//!    ├── Rule "water"     (LIQUIDCLASS == water)         ✗
//!    ├── Rule "glycerol"  (LIQUIDCLASS == glycerol)      ✓ priority 0
//!    └── Rule "big_slow"  (VOLUME in [100, 1000])        ✓ priority 5
//!
//! default ─▶ glycerol overrides ─▶ big_slow overrides ─▶ Policy
//! ```

pub mod attributes;
pub mod defaults;
pub mod document;
pub mod rules;

pub use attributes::{Attribute, AttributeKind, PolicyQuery};
pub use document::RuleDocument;
pub use rules::{Combinator, Condition, Rule, RuleSet};

use crate::error::{PlanError, PlanResult};
use crate::volume::Volume;
use serde::{Deserialize, Serialize};

/// Where a vertical offset is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WellReference {
    #[default]
    Bottom,
    Top,
    LiquidLevel,
}

/// Resolved execution parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Aspiration flow rate (ul/s).
    pub aspirate_speed: f64,
    /// Dispense flow rate (ul/s).
    pub dispense_speed: f64,
    pub aspirate_offset_mm: f64,
    pub dispense_offset_mm: f64,
    pub aspirate_reference: WellReference,
    pub dispense_reference: WellReference,
    /// Mix cycles in the source before aspirating.
    pub pre_mix: u32,
    /// Mix volume for pre-mixing; zero means the transfer volume.
    pub pre_mix_volume: Volume,
    /// Mix cycles in the destination after dispensing.
    pub post_mix: u32,
    pub post_mix_volume: Volume,
    /// Mixing flow rate (ul/s).
    pub mix_rate: f64,
    pub aspirate_wait_s: f64,
    pub dispense_wait_s: f64,
    pub blowout: bool,
    pub blowout_volume: Volume,
    pub touchoff: bool,
    pub touchoff_offset_mm: f64,
    /// Whether transfers under this policy may run on a multi-channel head.
    pub can_multi: bool,
    /// How many distinct transfers may share one set of tips.
    pub tip_reuse_limit: u32,
    pub description: String,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            aspirate_speed: 150.0,
            dispense_speed: 150.0,
            aspirate_offset_mm: 0.5,
            dispense_offset_mm: 0.5,
            aspirate_reference: WellReference::Bottom,
            dispense_reference: WellReference::Bottom,
            pre_mix: 0,
            pre_mix_volume: Volume::ZERO,
            post_mix: 0,
            post_mix_volume: Volume::ZERO,
            mix_rate: 150.0,
            aspirate_wait_s: 0.0,
            dispense_wait_s: 0.0,
            blowout: true,
            blowout_volume: Volume::ZERO,
            touchoff: false,
            touchoff_offset_mm: 0.5,
            can_multi: true,
            tip_reuse_limit: 100,
            description: "default".to_string(),
        }
    }
}

/// Sparse policy: only the keys a rule wants to change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyOverrides {
    pub aspirate_speed: Option<f64>,
    pub dispense_speed: Option<f64>,
    pub aspirate_offset_mm: Option<f64>,
    pub dispense_offset_mm: Option<f64>,
    pub aspirate_reference: Option<WellReference>,
    pub dispense_reference: Option<WellReference>,
    pub pre_mix: Option<u32>,
    pub pre_mix_volume: Option<Volume>,
    pub post_mix: Option<u32>,
    pub post_mix_volume: Option<Volume>,
    pub mix_rate: Option<f64>,
    pub aspirate_wait_s: Option<f64>,
    pub dispense_wait_s: Option<f64>,
    pub blowout: Option<bool>,
    pub blowout_volume: Option<Volume>,
    pub touchoff: Option<bool>,
    pub touchoff_offset_mm: Option<f64>,
    pub can_multi: Option<bool>,
    pub tip_reuse_limit: Option<u32>,
    pub description: Option<String>,
}

macro_rules! overlay {
    ($target:ident, $src:ident; $($field:ident),* $(,)?) => {
        $(
            if let Some(v) = &$src.$field {
                $target.$field = v.clone();
            }
        )*
    };
}

impl Policy {
    /// Layer `overrides` on top of this policy, returning the merged result.
    #[must_use]
    pub fn merged(&self, overrides: &PolicyOverrides) -> Policy {
        let mut out = self.clone();
        overlay!(out, overrides;
            aspirate_speed, dispense_speed, aspirate_offset_mm, dispense_offset_mm,
            aspirate_reference, dispense_reference, pre_mix, pre_mix_volume,
            post_mix, post_mix_volume, mix_rate, aspirate_wait_s, dispense_wait_s,
            blowout, blowout_volume, touchoff, touchoff_offset_mm, can_multi,
            tip_reuse_limit, description,
        );
        out
    }
}

impl PolicyOverrides {
    /// Reject values no robot could honour.
    pub fn validate(&self, name: &str) -> PlanResult<()> {
        let invalid = |reason: String| PlanError::InvalidRuleCondition {
            rule: name.to_string(),
            reason,
        };
        let rates = [
            ("aspirate_speed", self.aspirate_speed),
            ("dispense_speed", self.dispense_speed),
            ("mix_rate", self.mix_rate),
        ];
        for (key, value) in rates {
            if let Some(v) = value {
                if v <= 0.0 || !v.is_finite() {
                    return Err(invalid(format!("{key} must be positive, got {v}")));
                }
            }
        }
        let non_negative = [
            ("aspirate_wait_s", self.aspirate_wait_s),
            ("dispense_wait_s", self.dispense_wait_s),
            ("pre_mix_volume", self.pre_mix_volume.map(Volume::as_ul)),
            ("post_mix_volume", self.post_mix_volume.map(Volume::as_ul)),
            ("blowout_volume", self.blowout_volume.map(Volume::as_ul)),
        ];
        for (key, value) in non_negative {
            if let Some(v) = value {
                if v < 0.0 || !v.is_finite() {
                    return Err(invalid(format!("{key} must be >= 0, got {v}")));
                }
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        *self == PolicyOverrides::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_only_touches_set_keys() {
        let base = Policy::default();
        let overrides = PolicyOverrides {
            aspirate_speed: Some(20.0),
            can_multi: Some(false),
            ..Default::default()
        };
        let merged = base.merged(&overrides);
        assert_eq!(merged.aspirate_speed, 20.0);
        assert!(!merged.can_multi);
        assert_eq!(merged.dispense_speed, base.dispense_speed);
        assert_eq!(merged.description, "default");
    }

    #[test]
    fn test_overrides_reject_unknown_keys() {
        let err = serde_json::from_str::<PolicyOverrides>(r#"{"asprate_speed": 10}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_overrides_validate_rates() {
        let bad = PolicyOverrides {
            dispense_speed: Some(0.0),
            ..Default::default()
        };
        assert!(matches!(
            bad.validate("slow"),
            Err(PlanError::InvalidRuleCondition { .. })
        ));
        assert!(PolicyOverrides::default().validate("empty").is_ok());
    }
}

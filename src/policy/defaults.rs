//! Built-in liquid-class policies.
//!
//! Each class gets one policy and one rule keyed on `LIQUIDCLASS`. Anything without a
//! class rule falls through to [`Policy::default`](super::Policy), which is tuned for
//! aqueous buffers.

use super::rules::{Condition, Rule, RuleSet};
use super::{PolicyOverrides, WellReference};
use crate::volume::Volume;

fn water() -> PolicyOverrides {
    PolicyOverrides {
        description: Some("aqueous, fast with blowout".into()),
        ..Default::default()
    }
}

fn glycerol() -> PolicyOverrides {
    PolicyOverrides {
        aspirate_speed: Some(30.0),
        dispense_speed: Some(30.0),
        aspirate_wait_s: Some(1.0),
        dispense_wait_s: Some(1.0),
        touchoff: Some(true),
        description: Some("viscous, slow with settle time".into()),
        ..Default::default()
    }
}

fn ethanol() -> PolicyOverrides {
    PolicyOverrides {
        aspirate_speed: Some(100.0),
        pre_mix: Some(3),
        touchoff: Some(true),
        description: Some("volatile, pre-wet tips".into()),
        ..Default::default()
    }
}

fn culture() -> PolicyOverrides {
    PolicyOverrides {
        aspirate_speed: Some(50.0),
        pre_mix: Some(2),
        aspirate_offset_mm: Some(1.0),
        dispense_reference: Some(WellReference::LiquidLevel),
        description: Some("cells, resuspend before aspirating".into()),
        ..Default::default()
    }
}

fn protein() -> PolicyOverrides {
    PolicyOverrides {
        aspirate_speed: Some(50.0),
        dispense_speed: Some(50.0),
        post_mix: Some(3),
        mix_rate: Some(50.0),
        blowout: Some(false),
        description: Some("foaming, gentle mixing, no blowout".into()),
        ..Default::default()
    }
}

fn detergent() -> PolicyOverrides {
    PolicyOverrides {
        aspirate_speed: Some(40.0),
        dispense_speed: Some(40.0),
        blowout: Some(false),
        dispense_reference: Some(WellReference::LiquidLevel),
        description: Some("foaming, dispense at liquid level".into()),
        ..Default::default()
    }
}

fn dna() -> PolicyOverrides {
    PolicyOverrides {
        post_mix: Some(3),
        post_mix_volume: Some(Volume::ul(10.0)),
        can_multi: Some(false),
        tip_reuse_limit: Some(0),
        description: Some("template, single channel with fresh tips".into()),
        ..Default::default()
    }
}

fn solvent() -> PolicyOverrides {
    PolicyOverrides {
        aspirate_speed: Some(120.0),
        aspirate_wait_s: Some(0.5),
        touchoff: Some(true),
        description: Some("low surface tension, touch off".into()),
        ..Default::default()
    }
}

/// Built-in class policies, in registration order.
pub fn builtin_policies() -> Vec<(&'static str, PolicyOverrides)> {
    vec![
        ("water", water()),
        ("glycerol", glycerol()),
        ("ethanol", ethanol()),
        ("culture", culture()),
        ("protein", protein()),
        ("detergent", detergent()),
        ("dna", dna()),
        ("solvent", solvent()),
    ]
}

impl RuleSet {
    /// The default policy plus one rule per built-in liquid class.
    pub fn with_defaults() -> Self {
        let mut rules = RuleSet::default();
        for (class, overrides) in builtin_policies() {
            let rule = Rule::new(class, class).when(Condition::category("LIQUIDCLASS", class));
            // Built-ins are well formed; a failure here means the table above is wrong.
            if let Err(e) = rules.add_policy_rule(rule, overrides) {
                tracing::error!("built-in policy '{}' rejected: {}", class, e);
            }
        }
        rules
    }
}

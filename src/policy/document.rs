//! Serialized rule definitions.
//!
//! A rule document lists named policy overrides and the rules that select them. Rules
//! may also carry their overrides inline, in which case the rule name doubles as the
//! policy name:
//!
//! ```yaml
//! policies:
//!   viscous:
//!     aspirate_speed: 20
//!     dispense_speed: 20
//! rules:
//!   - name: glycerol_large
//!     priority: 5
//!     conditions:
//!       - attribute: LIQUIDCLASS
//!         equals: glycerol
//!       - attribute: VOLUME
//!         min: 100
//!     policy: viscous
//!   - name: dye_single
//!     conditions:
//!       - attribute: COMPONENT
//!         equals: dye
//!     overrides:
//!       can_multi: false
//! ```

use super::rules::{Combinator, Condition, Rule, RuleSet};
use super::PolicyOverrides;
use crate::error::{PlanError, PlanResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleDocument {
    #[serde(default)]
    pub policies: BTreeMap<String, PolicyOverrides>,
    #[serde(default)]
    pub rules: Vec<RuleEntry>,
}

/// One rule as written in a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleEntry {
    pub name: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub combinator: Combinator,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub policy: Option<String>,
    #[serde(default)]
    pub overrides: Option<PolicyOverrides>,
}

impl RuleDocument {
    pub fn from_yaml_str(text: &str) -> PlanResult<Self> {
        serde_yaml::from_str(text).map_err(|e| PlanError::RuleParse(e.to_string()))
    }

    pub fn from_json_str(text: &str) -> PlanResult<Self> {
        serde_json::from_str(text).map_err(|e| PlanError::RuleParse(e.to_string()))
    }

    /// Register everything in this document on top of `base`.
    pub fn apply_to(self, base: &mut RuleSet) -> PlanResult<()> {
        for (name, overrides) in self.policies {
            base.add_policy(name, overrides)?;
        }
        for entry in self.rules {
            let policy = match (entry.policy, entry.overrides) {
                (Some(_), Some(_)) => {
                    return Err(PlanError::InvalidRuleCondition {
                        rule: entry.name,
                        reason: "give either 'policy' or 'overrides', not both".into(),
                    })
                }
                (Some(policy), None) => policy,
                (None, Some(overrides)) => {
                    base.add_policy(entry.name.clone(), overrides)?;
                    entry.name.clone()
                }
                (None, None) => {
                    return Err(PlanError::InvalidRuleCondition {
                        rule: entry.name,
                        reason: "rule has no policy".into(),
                    })
                }
            };
            base.add_rule(Rule {
                name: entry.name,
                priority: entry.priority,
                combinator: entry.combinator,
                conditions: entry.conditions,
                policy,
            })?;
        }
        Ok(())
    }

    /// Built-in defaults extended with this document.
    pub fn into_rule_set(self) -> PlanResult<RuleSet> {
        let mut rules = RuleSet::with_defaults();
        self.apply_to(&mut rules)?;
        Ok(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyQuery;

    const DOC: &str = r#"
policies:
  viscous:
    aspirate_speed: 20
    dispense_speed: 20
rules:
  - name: glycerol_large
    priority: 5
    conditions:
      - attribute: LIQUIDCLASS
        equals: glycerol
      - attribute: VOLUME
        min: 100
    policy: viscous
  - name: dye_single
    conditions:
      - attribute: COMPONENT
        equals: dye
    overrides:
      can_multi: false
"#;

    #[test]
    fn test_yaml_document_extends_defaults() {
        let rules = RuleDocument::from_yaml_str(DOC)
            .unwrap()
            .into_rule_set()
            .unwrap();
        let big = PolicyQuery::default()
            .with_liquid_class("glycerol")
            .with_volume(150.0);
        let small = PolicyQuery::default()
            .with_liquid_class("glycerol")
            .with_volume(50.0);
        assert_eq!(rules.resolve(&big).aspirate_speed, 20.0);
        assert_eq!(rules.resolve(&small).aspirate_speed, 30.0);
        let dye = PolicyQuery::default().with_component("dye");
        assert!(!rules.resolve(&dye).can_multi);
    }

    #[test]
    fn test_json_document() {
        let doc = RuleDocument::from_json_str(
            r#"{"rules": [{"name": "all_slow", "overrides": {"aspirate_speed": 5}}]}"#,
        )
        .unwrap();
        let rules = doc.into_rule_set().unwrap();
        assert_eq!(rules.resolve(&PolicyQuery::default()).aspirate_speed, 5.0);
    }

    #[test]
    fn test_unknown_policy_key_is_a_parse_error() {
        let err = RuleDocument::from_yaml_str("policies:\n  x:\n    warp_speed: 9\n").unwrap_err();
        assert!(matches!(err, PlanError::RuleParse(_)));
    }

    #[test]
    fn test_rule_without_policy_is_rejected() {
        let doc = RuleDocument::from_yaml_str("rules:\n  - name: lonely\n").unwrap();
        assert!(matches!(
            doc.into_rule_set(),
            Err(PlanError::InvalidRuleCondition { .. })
        ));
    }
}

//! Rules, conditions and the rule set.

use super::attributes::{parse_for_rule, AttributeKind, PolicyQuery};
use super::{Policy, PolicyOverrides};
use crate::error::{PlanError, PlanResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name under which the base policy is always available.
pub const DEFAULT_POLICY: &str = "default";

/// A single test on one instruction attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    /// Case-insensitive equality on a categorical attribute.
    Category { attribute: String, equals: String },
    /// Inclusive range on a numeric attribute; a missing bound is open.
    Range {
        attribute: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
}

impl Condition {
    pub fn category(attribute: &str, equals: &str) -> Self {
        Condition::Category {
            attribute: attribute.to_string(),
            equals: equals.to_string(),
        }
    }

    pub fn range(attribute: &str, min: Option<f64>, max: Option<f64>) -> Self {
        Condition::Range {
            attribute: attribute.to_string(),
            min,
            max,
        }
    }

    fn attribute(&self) -> &str {
        match self {
            Condition::Category { attribute, .. } | Condition::Range { attribute, .. } => {
                attribute
            }
        }
    }

    fn validate(&self, rule: &str) -> PlanResult<()> {
        let attr = parse_for_rule(rule, self.attribute())?;
        let invalid = |reason: String| PlanError::InvalidRuleCondition {
            rule: rule.to_string(),
            reason,
        };
        match (self, attr.kind()) {
            (Condition::Category { .. }, AttributeKind::Categorical) => Ok(()),
            (Condition::Range { min, max, .. }, AttributeKind::Numeric) => match (min, max) {
                (None, None) => Err(invalid(format!("range on {attr} has no bounds"))),
                (Some(lo), Some(hi)) if lo > hi => {
                    Err(invalid(format!("range on {attr} has lower {lo} > upper {hi}")))
                }
                (Some(v), _) | (_, Some(v)) if v.is_nan() => {
                    Err(invalid(format!("range on {attr} has a NaN bound")))
                }
                _ => Ok(()),
            },
            (Condition::Category { .. }, AttributeKind::Numeric) => Err(invalid(format!(
                "{attr} is numeric and needs a min/max range"
            ))),
            (Condition::Range { .. }, AttributeKind::Categorical) => Err(invalid(format!(
                "{attr} is categorical and needs an equality test"
            ))),
        }
    }

    /// Evaluate against a query. Conditions on unknown attribute values never match.
    pub fn matches(&self, query: &PolicyQuery) -> bool {
        let Ok(attr) = self.attribute().parse() else {
            return false;
        };
        match self {
            Condition::Category { equals, .. } => query
                .category(attr)
                .is_some_and(|v| v.eq_ignore_ascii_case(equals)),
            Condition::Range { min, max, .. } => query.numeric(attr).is_some_and(|v| {
                min.map_or(true, |lo| v >= lo) && max.map_or(true, |hi| v <= hi)
            }),
        }
    }
}

/// How a rule combines its conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Combinator {
    #[default]
    All,
    Any,
}

/// A named, prioritized, conditional contributor to policy resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub combinator: Combinator,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Registered policy applied when the rule matches.
    pub policy: String,
}

impl Rule {
    pub fn new(name: impl Into<String>, policy: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            combinator: Combinator::All,
            conditions: Vec::new(),
            policy: policy.into(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_combinator(mut self, combinator: Combinator) -> Self {
        self.combinator = combinator;
        self
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// A rule without conditions matches everything.
    pub fn matches(&self, query: &PolicyQuery) -> bool {
        if self.conditions.is_empty() {
            return true;
        }
        match self.combinator {
            Combinator::All => self.conditions.iter().all(|c| c.matches(query)),
            Combinator::Any => self.conditions.iter().any(|c| c.matches(query)),
        }
    }
}

/// Registered policies and the rules that select them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    default: Policy,
    policies: BTreeMap<String, PolicyOverrides>,
    rules: Vec<Rule>,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::new(Policy::default())
    }
}

impl RuleSet {
    /// An empty rule set resolving everything to `default`.
    pub fn new(default: Policy) -> Self {
        Self {
            default,
            policies: BTreeMap::new(),
            rules: Vec::new(),
        }
    }

    pub fn default_policy(&self) -> &Policy {
        &self.default
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn policy(&self, name: &str) -> Option<&PolicyOverrides> {
        self.policies.get(name)
    }

    /// Register (or replace) named overrides.
    pub fn add_policy(&mut self, name: impl Into<String>, overrides: PolicyOverrides) -> PlanResult<()> {
        let name = name.into();
        overrides.validate(&name)?;
        self.policies.insert(name, overrides);
        Ok(())
    }

    /// Register a rule, validating its conditions and policy reference.
    pub fn add_rule(&mut self, rule: Rule) -> PlanResult<()> {
        if rule.name.trim().is_empty() {
            return Err(PlanError::InvalidRuleCondition {
                rule: rule.name,
                reason: "rule name is empty".into(),
            });
        }
        for condition in &rule.conditions {
            condition.validate(&rule.name)?;
        }
        if rule.policy != DEFAULT_POLICY && !self.policies.contains_key(&rule.policy) {
            return Err(PlanError::InvalidRuleCondition {
                reason: format!("policy '{}' is not registered", rule.policy),
                rule: rule.name,
            });
        }
        tracing::debug!("registered rule '{}' -> '{}'", rule.name, rule.policy);
        self.rules.retain(|r| r.name != rule.name);
        self.rules.push(rule);
        Ok(())
    }

    /// Convenience: register overrides and a rule of the same name selecting them.
    pub fn add_policy_rule(
        &mut self,
        rule: Rule,
        overrides: PolicyOverrides,
    ) -> PlanResult<()> {
        self.add_policy(rule.policy.clone(), overrides)?;
        self.add_rule(rule)
    }

    /// Matching rules in application order: priority ascending, then name.
    pub fn matching_rules(&self, query: &PolicyQuery) -> Vec<&Rule> {
        let mut matched: Vec<&Rule> = self.rules.iter().filter(|r| r.matches(query)).collect();
        matched.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        matched
    }

    /// Resolve the policy for one query.
    pub fn resolve(&self, query: &PolicyQuery) -> Policy {
        self.matching_rules(query)
            .into_iter()
            .filter_map(|rule| self.policies.get(&rule.policy))
            .fold(self.default.clone(), |acc, overrides| acc.merged(overrides))
    }

    /// Absorb another rule set's policies and rules; `other` wins on name clashes.
    pub fn extend(&mut self, other: RuleSet) -> PlanResult<()> {
        for (name, overrides) in other.policies {
            self.add_policy(name, overrides)?;
        }
        for rule in other.rules {
            self.add_rule(rule)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slow() -> PolicyOverrides {
        PolicyOverrides {
            aspirate_speed: Some(10.0),
            ..Default::default()
        }
    }

    fn fast() -> PolicyOverrides {
        PolicyOverrides {
            aspirate_speed: Some(300.0),
            description: Some("fast".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_priority_then_name_ordering() {
        let mut rules = RuleSet::default();
        rules.add_policy("slow", slow()).unwrap();
        rules.add_policy("fast", fast()).unwrap();
        rules
            .add_rule(Rule::new("b_fast", "fast").when(Condition::category("LIQUIDCLASS", "water")))
            .unwrap();
        rules
            .add_rule(Rule::new("a_slow", "slow").when(Condition::category("LIQUIDCLASS", "water")))
            .unwrap();
        let q = PolicyQuery::default().with_liquid_class("water");
        // Same priority: a_slow applies first, b_fast overrides it.
        assert_eq!(rules.resolve(&q).aspirate_speed, 300.0);

        rules
            .add_rule(
                Rule::new("a_slow", "slow")
                    .with_priority(10)
                    .when(Condition::category("LIQUIDCLASS", "water")),
            )
            .unwrap();
        assert_eq!(rules.resolve(&q).aspirate_speed, 10.0);
        assert_eq!(rules.resolve(&q).description, "fast");
    }

    #[test]
    fn test_range_conditions() {
        let mut rules = RuleSet::default();
        rules
            .add_policy_rule(
                Rule::new("big", "slow").when(Condition::range("VOLUME", Some(100.0), None)),
                slow(),
            )
            .unwrap();
        let small = PolicyQuery::default().with_volume(50.0);
        let big = PolicyQuery::default().with_volume(100.0);
        assert_eq!(rules.resolve(&small).aspirate_speed, 150.0);
        assert_eq!(rules.resolve(&big).aspirate_speed, 10.0);
        // Unknown volume never matches a range.
        assert_eq!(rules.resolve(&PolicyQuery::default()).aspirate_speed, 150.0);
    }

    #[test]
    fn test_any_combinator() {
        let mut rules = RuleSet::default();
        rules
            .add_policy_rule(
                Rule::new("either", "slow")
                    .with_combinator(Combinator::Any)
                    .when(Condition::category("COMPONENT", "dye"))
                    .when(Condition::category("TOPLATETYPE", "greiner384")),
                slow(),
            )
            .unwrap();
        let q = PolicyQuery {
            to_plate_type: Some("greiner384".into()),
            ..Default::default()
        };
        assert_eq!(rules.resolve(&q).aspirate_speed, 10.0);
    }

    #[test]
    fn test_registration_rejects_malformed_rules() {
        let mut rules = RuleSet::default();
        rules.add_policy("slow", slow()).unwrap();
        let cases = [
            Rule::new("unknown_attr", "slow").when(Condition::category("COLOUR", "red")),
            Rule::new("kind_mismatch", "slow").when(Condition::category("VOLUME", "10")),
            Rule::new("kind_mismatch2", "slow")
                .when(Condition::range("LIQUIDCLASS", Some(1.0), None)),
            Rule::new("inverted", "slow").when(Condition::range("VOLUME", Some(5.0), Some(1.0))),
            Rule::new("unbounded", "slow").when(Condition::range("VOLUME", None, None)),
            Rule::new("no_policy", "missing"),
        ];
        for rule in cases {
            let name = rule.name.clone();
            let err = rules.add_rule(rule).unwrap_err();
            assert!(
                matches!(&err, PlanError::InvalidRuleCondition { rule, .. } if *rule == name),
                "unexpected error for {name}: {err}"
            );
        }
        assert!(rules.rules().is_empty());
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let rules = RuleSet::with_defaults();
        let q = PolicyQuery::default()
            .with_liquid_class("glycerol")
            .with_volume(40.0);
        assert_eq!(rules.resolve(&q), rules.resolve(&q));
    }
}

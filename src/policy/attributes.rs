//! Instruction attributes that rule conditions can query.

use crate::error::{PlanError, PlanResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Whether an attribute is compared by equality or by numeric range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    Categorical,
    Numeric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    /// Liquid class of the aspirated component.
    LiquidClass,
    /// Name of the aspirated component.
    Component,
    FromPlateType,
    ToPlateType,
    /// Volume moved by the channel (ul).
    Volume,
    /// Volume in the source well before aspiration (ul).
    WellFromVolume,
    /// Volume in the destination well before dispensing (ul).
    WellToVolume,
}

impl Attribute {
    pub const ALL: [Attribute; 7] = [
        Attribute::LiquidClass,
        Attribute::Component,
        Attribute::FromPlateType,
        Attribute::ToPlateType,
        Attribute::Volume,
        Attribute::WellFromVolume,
        Attribute::WellToVolume,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Attribute::LiquidClass => "LIQUIDCLASS",
            Attribute::Component => "COMPONENT",
            Attribute::FromPlateType => "FROMPLATETYPE",
            Attribute::ToPlateType => "TOPLATETYPE",
            Attribute::Volume => "VOLUME",
            Attribute::WellFromVolume => "WELLFROMVOLUME",
            Attribute::WellToVolume => "WELLTOVOLUME",
        }
    }

    pub const fn kind(self) -> AttributeKind {
        match self {
            Attribute::LiquidClass
            | Attribute::Component
            | Attribute::FromPlateType
            | Attribute::ToPlateType => AttributeKind::Categorical,
            Attribute::Volume | Attribute::WellFromVolume | Attribute::WellToVolume => {
                AttributeKind::Numeric
            }
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Attribute {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Attribute::ALL
            .into_iter()
            .find(|a| a.name() == upper)
            .ok_or_else(|| PlanError::RuleParse(format!("unknown attribute '{s}'")))
    }
}

/// Attribute values of one channel of one transfer, as seen by the rule engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyQuery {
    pub liquid_class: Option<String>,
    pub component: Option<String>,
    pub from_plate_type: Option<String>,
    pub to_plate_type: Option<String>,
    pub volume: Option<f64>,
    pub well_from_volume: Option<f64>,
    pub well_to_volume: Option<f64>,
}

impl PolicyQuery {
    pub fn with_liquid_class(mut self, class: impl Into<String>) -> Self {
        self.liquid_class = Some(class.into());
        self
    }

    pub fn with_component(mut self, name: impl Into<String>) -> Self {
        self.component = Some(name.into());
        self
    }

    pub fn with_volume(mut self, ul: f64) -> Self {
        self.volume = Some(ul);
        self
    }

    /// Value of a categorical attribute, if known.
    pub fn category(&self, attribute: Attribute) -> Option<&str> {
        match attribute {
            Attribute::LiquidClass => self.liquid_class.as_deref(),
            Attribute::Component => self.component.as_deref(),
            Attribute::FromPlateType => self.from_plate_type.as_deref(),
            Attribute::ToPlateType => self.to_plate_type.as_deref(),
            _ => None,
        }
    }

    /// Value of a numeric attribute, if known.
    pub fn numeric(&self, attribute: Attribute) -> Option<f64> {
        match attribute {
            Attribute::Volume => self.volume,
            Attribute::WellFromVolume => self.well_from_volume,
            Attribute::WellToVolume => self.well_to_volume,
            _ => None,
        }
    }
}

/// Parse an attribute name for a rule, mapping failure to a condition error.
pub(crate) fn parse_for_rule(rule: &str, name: &str) -> PlanResult<Attribute> {
    name.parse().map_err(|_| PlanError::InvalidRuleCondition {
        rule: rule.to_string(),
        reason: format!("unknown attribute '{name}'"),
    })
}

//! Liquids held in wells.
//!
//! A [`Liquid`] is a named, typed, variable-volume substance. Its `name` is what the
//! source matcher compares against a request; its `id` identifies one physical
//! instance and changes when a well's contents are split or mixed into something new.

use crate::error::{PlanError, PlanResult};
use crate::labware::WellRef;
use crate::volume::Volume;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Generate a new unique liquid or labware identifier.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Liquid class used to select handling policies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LiquidType {
    Water,
    Glycerol,
    Ethanol,
    Culture,
    Protein,
    Detergent,
    Dna,
    Solvent,
    /// Any class without a built-in policy; matched by name.
    Custom(String),
}

impl LiquidType {
    /// Policy name for this class, as queried through the `LIQUIDCLASS` attribute.
    pub fn policy_name(&self) -> &str {
        match self {
            LiquidType::Water => "water",
            LiquidType::Glycerol => "glycerol",
            LiquidType::Ethanol => "ethanol",
            LiquidType::Culture => "culture",
            LiquidType::Protein => "protein",
            LiquidType::Detergent => "detergent",
            LiquidType::Dna => "dna",
            LiquidType::Solvent => "solvent",
            LiquidType::Custom(name) => name,
        }
    }
}

impl From<String> for LiquidType {
    fn from(name: String) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "water" => LiquidType::Water,
            "glycerol" => LiquidType::Glycerol,
            "ethanol" => LiquidType::Ethanol,
            "culture" => LiquidType::Culture,
            "protein" => LiquidType::Protein,
            "detergent" => LiquidType::Detergent,
            "dna" => LiquidType::Dna,
            "solvent" => LiquidType::Solvent,
            _ => LiquidType::Custom(name),
        }
    }
}

impl From<&str> for LiquidType {
    fn from(name: &str) -> Self {
        LiquidType::from(name.to_string())
    }
}

impl From<LiquidType> for String {
    fn from(kind: LiquidType) -> Self {
        kind.policy_name().to_string()
    }
}

impl fmt::Display for LiquidType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.policy_name())
    }
}

/// A volume of a named liquid, optionally located in a well.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Liquid {
    /// Identity of this physical instance.
    pub id: String,
    /// Name used for matching (e.g. "water", "buffer+dna").
    pub name: String,
    /// Liquid class driving policy selection.
    pub kind: LiquidType,
    /// Current volume; never negative.
    pub volume: Volume,
    /// Where the liquid sits, if placed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<WellRef>,
}

impl Liquid {
    pub fn new(name: impl Into<String>, kind: impl Into<LiquidType>, volume: Volume) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            kind: kind.into(),
            volume,
            location: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn at(mut self, location: WellRef) -> Self {
        self.location = Some(location);
        self
    }

    /// Take `volume` out of this liquid, returning the portion removed.
    ///
    /// The remainder is floored to zero within `eps`. Taking more than is present
    /// is an internal error: sources are reserved before they are drawn from.
    pub fn take(&mut self, volume: Volume, eps: f64) -> PlanResult<Liquid> {
        if volume.greater_than(self.volume, eps) {
            return Err(PlanError::Internal(format!(
                "cannot take {} of '{}' holding {}",
                volume, self.name, self.volume
            )));
        }
        self.volume = self.volume.saturating_sub(volume, eps);
        Ok(Liquid {
            id: self.id.clone(),
            name: self.name.clone(),
            kind: self.kind.clone(),
            volume,
            location: None,
        })
    }

    /// Mix `other` into this liquid.
    ///
    /// An empty liquid simply becomes `other`. Otherwise names are joined with `+`
    /// (unless identical) and the class of the larger share is kept.
    pub fn mix(&mut self, other: Liquid, eps: f64) {
        if self.volume.is_zero(eps) {
            let location = self.location.take();
            *self = other;
            self.location = location;
            return;
        }
        if other.name != self.name {
            self.name = format!("{}+{}", self.name, other.name);
            self.id = new_id();
        }
        if other.volume > self.volume {
            self.kind = other.kind;
        }
        self.volume += other.volume;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-4;

    #[test]
    fn test_liquid_type_round_trips_through_names() {
        assert_eq!(LiquidType::from("Glycerol"), LiquidType::Glycerol);
        assert_eq!(
            LiquidType::from("mastermix"),
            LiquidType::Custom("mastermix".into())
        );
        assert_eq!(String::from(LiquidType::Dna), "dna");
    }

    #[test]
    fn test_take_floors_remainder() {
        let mut water = Liquid::new("water", LiquidType::Water, Volume::ul(100.0));
        let part = water.take(Volume::ul(100.0 - EPS / 2.0), EPS).unwrap();
        assert_eq!(water.volume, Volume::ZERO);
        assert_eq!(part.name, "water");
    }

    #[test]
    fn test_take_more_than_present_fails() {
        let mut water = Liquid::new("water", LiquidType::Water, Volume::ul(10.0));
        assert!(water.take(Volume::ul(11.0), EPS).is_err());
        assert_eq!(water.volume, Volume::ul(10.0));
    }

    #[test]
    fn test_mix_into_empty_adopts_incoming() {
        let mut empty = Liquid::new("", LiquidType::Water, Volume::ZERO);
        let dye = Liquid::new("dye", LiquidType::Protein, Volume::ul(5.0));
        let dye_id = dye.id.clone();
        empty.mix(dye, EPS);
        assert_eq!(empty.name, "dye");
        assert_eq!(empty.id, dye_id);
    }

    #[test]
    fn test_mix_joins_names() {
        let mut water = Liquid::new("water", LiquidType::Water, Volume::ul(50.0));
        water.mix(Liquid::new("dye", LiquidType::Protein, Volume::ul(5.0)), EPS);
        assert_eq!(water.name, "water+dye");
        assert_eq!(water.kind, LiquidType::Water);
        assert!(water.volume.approx_eq(Volume::ul(55.0), EPS));
    }
}

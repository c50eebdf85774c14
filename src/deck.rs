//! Deck model: the mutable snapshot of a liquid-handling robot.
//!
//! A [`Deck`] owns every labware item placed on the robot (keyed by position name),
//! the roster of heads and usable tip types, the placement preferences per labware
//! category, and an [`Inventory`] of tip boxes that may be brought onto the deck
//! while planning.
//!
//! # Lifecycle
//!
//! ```text
//! Deck (caller's snapshot, never mutated by planning)
//!    │
//!    ├── dup_keep_ids()  ──> working copy for one planning pass
//!    │                        (tips consumed, liquids moved, boxes added)
//!    │
//!    └── dup()           ──> isolated copy with fresh identifiers
//! ```
//!
//! At most one labware item occupies a position at any time; [`Deck::place`] enforces it.

use crate::error::{PlanError, PlanResult};
use crate::hardware::{Head, TipSpec};
use crate::labware::{Labware, Plate, TipBox, TipWaste, WellRef};
use crate::liquid::new_id;
use crate::volume::Volume;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Placement preferences: position names in priority order per labware category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub tips: Vec<String>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub tip_waste: Vec<String>,
    pub wash: Vec<String>,
    pub waste: Vec<String>,
}

/// Off-deck stock of tip boxes that planning may place on the deck.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    tip_boxes: Vec<TipBox>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a template box (builder pattern).
    pub fn with_tip_box(mut self, template: TipBox) -> Self {
        self.tip_boxes.push(template);
        self
    }

    /// A fresh, full box of the requested tip type, if the inventory stocks one.
    pub fn new_tip_box(&self, tip_type: &str) -> Option<TipBox> {
        self.tip_boxes
            .iter()
            .find(|b| b.tip.tip_type == tip_type)
            .map(|template| {
                let mut fresh = template.clone();
                fresh.id = new_id();
                fresh.refill();
                fresh
            })
    }

    pub fn tip_types(&self) -> impl Iterator<Item = &str> {
        self.tip_boxes.iter().map(|b| b.tip.tip_type.as_str())
    }
}

/// Mutable robot snapshot used during planning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deck {
    pub name: String,
    #[serde(default)]
    pub model: String,
    layout: Vec<String>,
    #[serde(default)]
    positions: BTreeMap<String, Labware>,
    #[serde(default)]
    pub heads: Vec<Head>,
    /// Indices into `heads` of the heads currently mounted.
    #[serde(default)]
    pub heads_loaded: Vec<usize>,
    /// Tip types the robot can use.
    #[serde(default)]
    pub tips: Vec<TipSpec>,
    #[serde(default)]
    pub preferences: Preferences,
    #[serde(default)]
    pub inventory: Inventory,
}

impl Deck {
    /// An empty deck with the given position names.
    pub fn new<S: Into<String>>(name: impl Into<String>, layout: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: name.into(),
            model: String::new(),
            layout: layout.into_iter().map(Into::into).collect(),
            positions: BTreeMap::new(),
            heads: Vec::new(),
            heads_loaded: Vec::new(),
            tips: Vec::new(),
            preferences: Preferences::default(),
            inventory: Inventory::default(),
        }
    }

    pub fn layout(&self) -> &[String] {
        &self.layout
    }

    /// Put labware on a free position.
    pub fn place(&mut self, position: &str, labware: Labware) -> PlanResult<()> {
        if !self.layout.iter().any(|p| p == position) {
            return Err(PlanError::UnknownPosition(position.to_string()));
        }
        if self.positions.contains_key(position) {
            return Err(PlanError::PositionOccupied(position.to_string()));
        }
        tracing::debug!("placing '{}' at {}", labware.name(), position);
        self.positions.insert(position.to_string(), labware);
        Ok(())
    }

    pub fn add_plate(&mut self, position: &str, plate: Plate) -> PlanResult<()> {
        self.place(position, Labware::Plate(plate))
    }

    pub fn add_tip_box(&mut self, position: &str, tip_box: TipBox) -> PlanResult<()> {
        self.place(position, Labware::TipBox(tip_box))
    }

    pub fn add_tip_waste(&mut self, position: &str, waste: TipWaste) -> PlanResult<()> {
        self.place(position, Labware::TipWaste(waste))
    }

    /// Mount a head; `loaded` heads take part in channel selection.
    pub fn add_head(&mut self, head: Head, loaded: bool) -> usize {
        self.heads.push(head);
        let idx = self.heads.len() - 1;
        if loaded {
            self.heads_loaded.push(idx);
        }
        idx
    }

    pub fn remove(&mut self, position: &str) -> Option<Labware> {
        self.positions.remove(position)
    }

    pub fn labware_at(&self, position: &str) -> Option<&Labware> {
        self.positions.get(position)
    }

    /// Occupied positions with their labware, in position-name order.
    pub fn occupied(&self) -> impl Iterator<Item = (&str, &Labware)> {
        self.positions.iter().map(|(p, l)| (p.as_str(), l))
    }

    /// Position holding the labware with this id.
    pub fn position_of(&self, id: &str) -> Option<&str> {
        self.positions
            .iter()
            .find(|(_, l)| l.id() == id)
            .map(|(p, _)| p.as_str())
    }

    pub fn plate_at(&self, position: &str) -> Option<&Plate> {
        match self.positions.get(position) {
            Some(Labware::Plate(p)) => Some(p),
            _ => None,
        }
    }

    pub fn plate(&self, id: &str) -> PlanResult<&Plate> {
        self.positions
            .values()
            .find_map(|l| match l {
                Labware::Plate(p) if p.id == id => Some(p),
                _ => None,
            })
            .ok_or_else(|| PlanError::Internal(format!("plate '{id}' is not on the deck")))
    }

    pub fn plate_mut(&mut self, id: &str) -> PlanResult<&mut Plate> {
        self.positions
            .values_mut()
            .find_map(|l| match l {
                Labware::Plate(p) if p.id == id => Some(p),
                _ => None,
            })
            .ok_or_else(|| PlanError::Internal(format!("plate '{id}' is not on the deck")))
    }

    pub fn tip_box_at(&self, position: &str) -> Option<&TipBox> {
        match self.positions.get(position) {
            Some(Labware::TipBox(b)) => Some(b),
            _ => None,
        }
    }

    pub fn tip_box_at_mut(&mut self, position: &str) -> Option<&mut TipBox> {
        match self.positions.get_mut(position) {
            Some(Labware::TipBox(b)) => Some(b),
            _ => None,
        }
    }

    pub fn tip_waste_at_mut(&mut self, position: &str) -> Option<&mut TipWaste> {
        match self.positions.get_mut(position) {
            Some(Labware::TipWaste(w)) => Some(w),
            _ => None,
        }
    }

    /// Number of tip boxes currently on the deck.
    pub fn tip_box_count(&self) -> usize {
        self.positions
            .values()
            .filter(|l| matches!(l, Labware::TipBox(_)))
            .count()
    }

    /// First declared, unoccupied position among `candidates`.
    pub fn free_position(&self, candidates: &[String]) -> Option<String> {
        candidates
            .iter()
            .find(|p| self.layout.contains(p) && !self.positions.contains_key(p.as_str()))
            .cloned()
    }

    pub fn head(&self, idx: usize) -> PlanResult<&Head> {
        self.heads
            .get(idx)
            .ok_or_else(|| PlanError::Internal(format!("head {idx} does not exist")))
    }

    pub fn head_mut(&mut self, idx: usize) -> PlanResult<&mut Head> {
        self.heads
            .get_mut(idx)
            .ok_or_else(|| PlanError::Internal(format!("head {idx} does not exist")))
    }

    /// Mounted heads with their indices.
    pub fn loaded_heads(&self) -> impl Iterator<Item = (usize, &Head)> {
        self.heads_loaded
            .iter()
            .filter_map(|&i| self.heads.get(i).map(|h| (i, h)))
    }

    /// Smallest volume any mounted head can move with any compatible tip.
    pub fn min_possible_volume(&self) -> Option<Volume> {
        self.loaded_heads()
            .flat_map(|(_, head)| {
                self.tips
                    .iter()
                    .filter(|tip| head.params.accepts_tip(tip))
                    .map(|tip| head.params.merge_with_tip(tip).min_volume)
            })
            .reduce(Volume::min)
    }

    /// Positions scanned for source liquids: inputs first, then outputs.
    pub fn source_positions(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for p in self
            .preferences
            .inputs
            .iter()
            .chain(self.preferences.outputs.iter())
        {
            if !out.contains(p) {
                out.push(p.clone());
            }
        }
        out
    }

    /// Move `volume` from `src` to `dst`; the source also loses `carry`.
    pub fn move_liquid(
        &mut self,
        src: &WellRef,
        dst: &WellRef,
        volume: Volume,
        carry: Volume,
        eps: f64,
    ) -> PlanResult<()> {
        let mut taken = self
            .plate_mut(&src.plate_id)?
            .remove_liquid(src.well, volume + carry, eps)?;
        taken.volume = volume;
        self.plate_mut(&dst.plate_id)?
            .add_liquid(dst.well, taken, eps)
    }

    /// Total liquid volume across every plate on the deck.
    pub fn total_volume(&self) -> Volume {
        self.positions
            .values()
            .filter_map(|l| match l {
                Labware::Plate(p) => Some(p.wells().map(|w| w.volume()).sum::<Volume>()),
                _ => None,
            })
            .sum()
    }

    /// Deep copy preserving every identifier.
    pub fn dup_keep_ids(&self) -> Deck {
        self.clone()
    }

    /// Deep copy with fresh identifiers for all labware and liquids.
    ///
    /// Returns the copy and a map from old labware ids to new ones so callers can
    /// re-target requests.
    pub fn dup(&self) -> (Deck, HashMap<String, String>) {
        let mut copy = self.clone();
        let mut id_map = HashMap::new();
        for labware in copy.positions.values_mut() {
            let old = labware.id().to_string();
            labware.regenerate_ids();
            id_map.insert(old, labware.id().to_string());
        }
        (copy, id_map)
    }
}

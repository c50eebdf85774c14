//! Labware placed on deck positions: plates, tip boxes, tip wastes and stations.
//!
//! Grid labware is addressed with [`WellCoords`] (`x` = column, `y` = row) and
//! printed in the usual `A1` notation. A *lane* is the line of wells a multi-channel
//! head spans in one stroke: a column for a vertically oriented head, a row for a
//! horizontal one.

use crate::error::{PlanError, PlanResult};
use crate::hardware::{Orientation, TipSpec};
use crate::liquid::{new_id, Liquid};
use crate::volume::Volume;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Grid coordinates of a well or tip slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WellCoords {
    /// Column, zero based.
    pub x: usize,
    /// Row, zero based.
    pub y: usize,
}

impl WellCoords {
    pub const fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }

    /// Position of this well along a lane for the given head orientation.
    pub const fn lane_index(&self, orientation: Orientation) -> usize {
        match orientation {
            Orientation::Vertical => self.y,
            Orientation::Horizontal => self.x,
        }
    }

    /// Which lane this well belongs to for the given head orientation.
    pub const fn lane(&self, orientation: Orientation) -> usize {
        match orientation {
            Orientation::Vertical => self.x,
            Orientation::Horizontal => self.y,
        }
    }

    /// Inverse of [`lane`](Self::lane) / [`lane_index`](Self::lane_index).
    pub const fn from_lane(orientation: Orientation, lane: usize, index: usize) -> Self {
        match orientation {
            Orientation::Vertical => Self { x: lane, y: index },
            Orientation::Horizontal => Self { x: index, y: lane },
        }
    }

    fn row_label(mut row: usize) -> String {
        // Bijective base 26: A..Z, AA..AZ, ...
        let mut label = Vec::new();
        loop {
            label.push(b'A' + (row % 26) as u8);
            if row < 26 {
                break;
            }
            row = row / 26 - 1;
        }
        label.reverse();
        String::from_utf8_lossy(&label).into_owned()
    }
}

impl fmt::Display for WellCoords {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", Self::row_label(self.y), self.x + 1)
    }
}

impl FromStr for WellCoords {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| c.is_ascii_digit())
            .ok_or_else(|| PlanError::Internal(format!("malformed well name '{s}'")))?;
        let malformed = || PlanError::Internal(format!("malformed well name '{s}'"));
        let (letters, digits) = s.split_at(split);
        if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(malformed());
        }
        let row = letters
            .to_ascii_uppercase()
            .bytes()
            .try_fold(0usize, |acc, b| {
                acc.checked_mul(26)?.checked_add((b - b'A') as usize + 1)
            })
            .ok_or_else(malformed)?
            - 1;
        let col: usize = digits.parse().map_err(|_| malformed())?;
        if col == 0 {
            return Err(malformed());
        }
        Ok(WellCoords::new(col - 1, row))
    }
}

/// A well on a specific plate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WellRef {
    pub plate_id: String,
    pub well: WellCoords,
}

impl WellRef {
    pub fn new(plate_id: impl Into<String>, well: WellCoords) -> Self {
        Self {
            plate_id: plate_id.into(),
            well,
        }
    }
}

impl fmt::Display for WellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.plate_id, self.well)
    }
}

/// A single well and its contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Well {
    pub coords: WellCoords,
    #[serde(default)]
    pub contents: Option<Liquid>,
}

impl Well {
    pub fn volume(&self) -> Volume {
        self.contents.as_ref().map_or(Volume::ZERO, |l| l.volume)
    }
}

/// A plate (or trough) holding liquids in a grid of wells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plate {
    pub id: String,
    pub name: String,
    /// Catalog type, queried by the `FROMPLATETYPE` / `TOPLATETYPE` attributes.
    pub plate_type: String,
    pub rows: usize,
    pub cols: usize,
    /// Working volume of each well.
    pub well_max: Volume,
    /// Dead volume that can never be aspirated.
    pub well_residual: Volume,
    wells: Vec<Well>,
}

impl Plate {
    pub fn new(
        name: impl Into<String>,
        plate_type: impl Into<String>,
        rows: usize,
        cols: usize,
        well_max: Volume,
        well_residual: Volume,
    ) -> Self {
        let wells = (0..rows)
            .flat_map(|y| (0..cols).map(move |x| WellCoords::new(x, y)))
            .map(|coords| Well {
                coords,
                contents: None,
            })
            .collect();
        Self {
            id: new_id(),
            name: name.into(),
            plate_type: plate_type.into(),
            rows,
            cols,
            well_max,
            well_residual,
            wells,
        }
    }

    fn index(&self, coords: WellCoords) -> Option<usize> {
        (coords.x < self.cols && coords.y < self.rows).then(|| coords.y * self.cols + coords.x)
    }

    pub fn contains(&self, coords: WellCoords) -> bool {
        self.index(coords).is_some()
    }

    pub fn well(&self, coords: WellCoords) -> Option<&Well> {
        self.index(coords).and_then(|i| self.wells.get(i))
    }

    fn well_mut(&mut self, coords: WellCoords) -> PlanResult<&mut Well> {
        let idx = self.index(coords).ok_or_else(|| {
            PlanError::Internal(format!("well {} not on plate '{}'", coords, self.name))
        })?;
        self.wells
            .get_mut(idx)
            .ok_or_else(|| PlanError::Internal(format!("well {coords} missing")))
    }

    pub fn wells(&self) -> impl Iterator<Item = &Well> {
        self.wells.iter()
    }

    /// Current volume in a well (zero if empty or off-plate).
    pub fn volume(&self, coords: WellCoords) -> Volume {
        self.well(coords).map_or(Volume::ZERO, Well::volume)
    }

    /// Volume that can still be aspirated from a well.
    pub fn available(&self, coords: WellCoords, eps: f64) -> Volume {
        self.volume(coords).saturating_sub(self.well_residual, eps)
    }

    /// Add liquid to a well, mixing with whatever is there.
    pub fn add_liquid(&mut self, coords: WellCoords, liquid: Liquid, eps: f64) -> PlanResult<()> {
        let location = WellRef::new(self.id.clone(), coords);
        let well_max = self.well_max;
        let plate_name = self.name.clone();
        let well = self.well_mut(coords)?;
        match &mut well.contents {
            Some(existing) => existing.mix(liquid, eps),
            None => well.contents = Some(liquid),
        }
        if let Some(contents) = &mut well.contents {
            contents.location = Some(location);
            if contents.volume.greater_than(well_max, eps) {
                tracing::warn!(
                    "well {} on '{}' overfilled: {} > {}",
                    coords,
                    plate_name,
                    contents.volume,
                    well_max
                );
            }
        }
        Ok(())
    }

    /// Remove `volume` from a well, returning what was taken.
    pub fn remove_liquid(
        &mut self,
        coords: WellCoords,
        volume: Volume,
        eps: f64,
    ) -> PlanResult<Liquid> {
        let plate_name = self.name.clone();
        let well = self.well_mut(coords)?;
        let contents = well.contents.as_mut().ok_or_else(|| {
            PlanError::Internal(format!("well {coords} on '{plate_name}' is empty"))
        })?;
        contents.take(volume, eps)
    }

    /// Mutable access to a well's liquid, if any.
    pub fn contents_mut(&mut self, coords: WellCoords) -> PlanResult<Option<&mut Liquid>> {
        Ok(self.well_mut(coords)?.contents.as_mut())
    }

    /// Number of lanes for a head orientation.
    pub const fn n_lanes(&self, orientation: Orientation) -> usize {
        match orientation {
            Orientation::Vertical => self.cols,
            Orientation::Horizontal => self.rows,
        }
    }

    /// Number of wells along one lane for a head orientation.
    pub const fn lane_len(&self, orientation: Orientation) -> usize {
        match orientation {
            Orientation::Vertical => self.rows,
            Orientation::Horizontal => self.cols,
        }
    }

    pub(crate) fn regenerate_ids(&mut self) {
        self.id = new_id();
        let plate_id = self.id.clone();
        for well in &mut self.wells {
            if let Some(contents) = &mut well.contents {
                contents.id = new_id();
                contents.location = Some(WellRef::new(plate_id.clone(), well.coords));
            }
        }
    }
}

/// A box of disposable tips of a single type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TipBox {
    pub id: String,
    pub name: String,
    pub tip: TipSpec,
    pub rows: usize,
    pub cols: usize,
    present: Vec<bool>,
}

impl TipBox {
    /// A full box.
    pub fn new(name: impl Into<String>, tip: TipSpec, rows: usize, cols: usize) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            tip,
            rows,
            cols,
            present: vec![true; rows * cols],
        }
    }

    fn index(&self, coords: WellCoords) -> Option<usize> {
        (coords.x < self.cols && coords.y < self.rows).then(|| coords.y * self.cols + coords.x)
    }

    pub fn has_tip(&self, coords: WellCoords) -> bool {
        self.index(coords)
            .and_then(|i| self.present.get(i).copied())
            .unwrap_or(false)
    }

    pub fn tips_left(&self) -> usize {
        self.present.iter().filter(|p| **p).count()
    }

    pub fn is_depleted(&self) -> bool {
        self.tips_left() == 0
    }

    /// Put a full set of tips back in the box.
    pub fn refill(&mut self) {
        self.present.iter_mut().for_each(|p| *p = true);
    }

    fn lane_len(&self, orientation: Orientation) -> usize {
        match orientation {
            Orientation::Vertical => self.rows,
            Orientation::Horizontal => self.cols,
        }
    }

    fn n_lanes(&self, orientation: Orientation) -> usize {
        match orientation {
            Orientation::Vertical => self.cols,
            Orientation::Horizontal => self.rows,
        }
    }

    /// Locate tips for the channels set in `mask`.
    ///
    /// Non-independent heads keep their channel spacing, so the tips must sit at the
    /// same relative offsets as the channels within one lane. Independent heads may
    /// take any present tips of a lane. Returns one entry per channel.
    pub fn find_tips(
        &self,
        mask: &[bool],
        orientation: Orientation,
        independent: bool,
    ) -> Option<Vec<Option<WellCoords>>> {
        let active: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(i, on)| on.then_some(i))
            .collect();
        let (first, last) = match (active.first(), active.last()) {
            (Some(f), Some(l)) => (*f as isize, *l as isize),
            _ => return Some(vec![None; mask.len()]),
        };
        let lane_len = self.lane_len(orientation) as isize;

        for lane in 0..self.n_lanes(orientation) {
            if independent {
                let free: Vec<usize> = (0..lane_len as usize)
                    .filter(|&i| self.has_tip(WellCoords::from_lane(orientation, lane, i)))
                    .collect();
                if free.len() >= active.len() {
                    let mut found = vec![None; mask.len()];
                    for (channel, idx) in active.iter().zip(free) {
                        found[*channel] = Some(WellCoords::from_lane(orientation, lane, idx));
                    }
                    return Some(found);
                }
                continue;
            }

            for offset in -first..(lane_len - last) {
                let all_present = active.iter().all(|&ch| {
                    let idx = ch as isize + offset;
                    idx >= 0
                        && self.has_tip(WellCoords::from_lane(orientation, lane, idx as usize))
                });
                if all_present {
                    let mut found = vec![None; mask.len()];
                    for &ch in &active {
                        let idx = (ch as isize + offset) as usize;
                        found[ch] = Some(WellCoords::from_lane(orientation, lane, idx));
                    }
                    return Some(found);
                }
            }
        }
        None
    }

    /// Remove tips from the given slots.
    pub fn take_tips(&mut self, slots: &[WellCoords]) -> PlanResult<()> {
        for coords in slots {
            let idx = self
                .index(*coords)
                .filter(|i| self.present.get(*i).copied().unwrap_or(false))
                .ok_or_else(|| {
                    PlanError::Internal(format!("no tip at {} in box '{}'", coords, self.name))
                })?;
            self.present[idx] = false;
        }
        Ok(())
    }
}

/// Bin for used tips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TipWaste {
    pub id: String,
    pub name: String,
    pub capacity: usize,
    pub contents: usize,
}

impl TipWaste {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            capacity,
            contents: 0,
        }
    }

    pub const fn can_accept(&self, n: usize) -> bool {
        self.contents + n <= self.capacity
    }

    pub fn dispose(&mut self, n: usize) -> PlanResult<()> {
        if !self.can_accept(n) {
            return Err(PlanError::NoTipWasteCapacity { needed: n });
        }
        self.contents += n;
        Ok(())
    }

    pub fn empty(&mut self) {
        self.contents = 0;
    }
}

/// Wash or liquid-waste station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub id: String,
    pub name: String,
}

impl Station {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
        }
    }
}

/// Anything that can occupy a deck position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "labware", rename_all = "snake_case")]
pub enum Labware {
    Plate(Plate),
    TipBox(TipBox),
    TipWaste(TipWaste),
    Wash(Station),
    Waste(Station),
}

impl Labware {
    pub fn id(&self) -> &str {
        match self {
            Labware::Plate(p) => &p.id,
            Labware::TipBox(b) => &b.id,
            Labware::TipWaste(w) => &w.id,
            Labware::Wash(s) | Labware::Waste(s) => &s.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Labware::Plate(p) => &p.name,
            Labware::TipBox(b) => &b.name,
            Labware::TipWaste(w) => &w.name,
            Labware::Wash(s) | Labware::Waste(s) => &s.name,
        }
    }

    pub(crate) fn regenerate_ids(&mut self) {
        match self {
            Labware::Plate(p) => p.regenerate_ids(),
            Labware::TipBox(b) => b.id = new_id(),
            Labware::TipWaste(w) => w.id = new_id(),
            Labware::Wash(s) | Labware::Waste(s) => s.id = new_id(),
        }
    }
}

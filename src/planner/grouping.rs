//! Multi-channel grouping of pending destination requests.
//!
//! Pending requests are laid out on the destination plate's grid. Lane by lane, in the
//! head's orientation, channel slots are mapped onto wells with [`LaneFit`] and the
//! front request at each well is claimed for its slot. Heads with fixed channel
//! spacing need contiguous runs of equal volume; independent heads take whatever is
//! available. Passes repeat until no further group forms.

use super::LaneFit;
use crate::hardware::Orientation;
use crate::labware::WellCoords;
use crate::volume::Volume;
use std::collections::{BTreeMap, VecDeque};

/// Request ids by channel slot.
pub type IdSet = Vec<Option<String>>;

/// Groups in the order they were formed.
pub type SetOfIdSets = Vec<IdSet>;

#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
    pub id: String,
    pub volume: Volume,
}

/// Pending requests of one destination plate, queued per well.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingGrid {
    pub rows: usize,
    pub cols: usize,
    cells: BTreeMap<WellCoords, VecDeque<PendingRequest>>,
}

impl PendingGrid {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            cells: BTreeMap::new(),
        }
    }

    pub fn push(&mut self, well: WellCoords, request: PendingRequest) {
        self.cells.entry(well).or_default().push_back(request);
    }

    pub fn len(&self) -> usize {
        self.cells.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unclaimed request ids.
    pub fn remaining_ids(&self) -> Vec<String> {
        self.cells
            .values()
            .flat_map(|q| q.iter().map(|r| r.id.clone()))
            .collect()
    }

    fn queued(&self, well: WellCoords, depth: usize) -> Option<&PendingRequest> {
        self.cells.get(&well).and_then(|q| q.get(depth))
    }

    fn pop(&mut self, well: WellCoords) -> Option<PendingRequest> {
        let queue = self.cells.get_mut(&well)?;
        let front = queue.pop_front();
        if queue.is_empty() {
            self.cells.remove(&well);
        }
        front
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

    /// Try to claim one group along `slots` (well index per channel slot) of `lane`.
    fn claim(
        &mut self,
        orientation: Orientation,
        lane: usize,
        slots: &[Option<usize>],
        contiguous: bool,
        eps: f64,
    ) -> Option<IdSet> {
        let mut depth: BTreeMap<WellCoords, usize> = BTreeMap::new();
        let mut claimed: Vec<(usize, WellCoords)> = Vec::new();
        let mut group_volume: Option<Volume> = None;

        for (slot, well_idx) in slots.iter().enumerate() {
            let next = well_idx.and_then(|idx| {
                let well = WellCoords::from_lane(orientation, lane, idx);
                let d = depth.get(&well).copied().unwrap_or(0);
                self.queued(well, d).map(|r| (well, r.volume))
            });
            let usable = match (next, group_volume) {
                (Some((_, v)), Some(g)) if contiguous => v.approx_eq(g, eps),
                (Some(_), _) => true,
                (None, _) => false,
            };
            if usable {
                if let Some((well, volume)) = next {
                    *depth.entry(well).or_insert(0) += 1;
                    claimed.push((slot, well));
                    group_volume.get_or_insert(volume);
                }
            } else if contiguous && !claimed.is_empty() {
                break;
            }
        }

        if claimed.is_empty() {
            return None;
        }
        let mut set: IdSet = vec![None; slots.len()];
        for (slot, well) in claimed {
            set[slot] = self.pop(well).map(|r| r.id);
        }
        Some(set)
    }
}

/// Group pending requests for a head with `multi` channels.
///
/// Claimed requests are removed from `pending`. Returns no groups when the plate's
/// lane length and the head's channel count do not divide one another.
pub fn group_parallel(
    pending: &mut PendingGrid,
    multi: usize,
    orientation: Orientation,
    contiguous: bool,
    eps: f64,
) -> SetOfIdSets {
    let lane_len = pending.lane_len(orientation);
    let fit = LaneFit::new(lane_len, multi);
    if fit == LaneFit::Irregular {
        tracing::debug!(
            "lane of {} wells does not fit a {}-channel head",
            lane_len,
            multi
        );
        return Vec::new();
    }

    let mut groups = SetOfIdSets::new();
    loop {
        let mut formed = false;
        for lane in 0..pending.n_lanes(orientation) {
            for offset in fit.offsets() {
                let slots = fit.slot_wells(lane_len, multi, offset);
                if let Some(set) = pending.claim(orientation, lane, &slots, contiguous, eps) {
                    groups.push(set);
                    formed = true;
                }
            }
        }
        if !formed || pending.is_empty() {
            break;
        }
    }
    groups
}

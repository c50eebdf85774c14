//! Liquid-source matcher.
//!
//! Given a vector of component requests (one slot per channel of the head that will
//! run them), the matcher finds concrete source wells on the deck and reserves volume
//! from them. It works in greedy rounds:
//!
//! 1. check that every requested liquid has enough aggregate volume left,
//! 2. score every candidate source vector at every alignment against the outstanding
//!    requests and keep the best (covered volume, then matched channels; the first
//!    candidate wins ties),
//! 3. draw the matched volume plus the carry volume from the [`SourcePool`] and take
//!    the matched volume off the outstanding requests.
//!
//! Rounds stop when nothing is outstanding. A round that changes nothing fails with
//! `NoProgress`; a round with nothing to match despite enough aggregate volume fails
//! with `SourceNotFound`.
//!
//! Candidate vectors are built from every plate at the input, then output, preference
//! positions, lane by lane in the head's orientation (see [`LaneFit`]).

use super::LaneFit;
use crate::deck::Deck;
use crate::error::{PlanError, PlanResult, Shortfall};
use crate::hardware::Orientation;
use crate::labware::{WellCoords, WellRef};
use crate::liquid::LiquidType;
use crate::volume::Volume;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// One requested component for one channel slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRequest {
    /// Liquid name to draw.
    pub name: String,
    /// Specific liquid instance, if the request pins one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liquid_id: Option<String>,
    pub volume: Volume,
}

impl ComponentRequest {
    pub fn new(name: impl Into<String>, volume: Volume) -> Self {
        Self {
            name: name.into(),
            liquid_id: None,
            volume,
        }
    }
}

/// Requests indexed by channel slot; `None` slots are idle.
pub type ComponentVector = Vec<Option<ComponentRequest>>;

#[derive(Debug, Clone, PartialEq)]
struct PoolEntry {
    name: String,
    liquid_id: String,
    kind: LiquidType,
    available: Volume,
}

/// Aspirable volume per source well, reserved as matches are made.
///
/// Built once per transfer block so that requests matched earlier in the block are
/// not offered the same liquid again before the deck itself is updated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourcePool {
    entries: BTreeMap<WellRef, PoolEntry>,
}

impl SourcePool {
    /// Snapshot every non-empty well at the source positions.
    pub fn from_deck(deck: &Deck, eps: f64) -> Self {
        let mut entries = BTreeMap::new();
        for position in deck.source_positions() {
            let Some(plate) = deck.plate_at(&position) else {
                continue;
            };
            for well in plate.wells() {
                let Some(liquid) = &well.contents else {
                    continue;
                };
                let available = plate.available(well.coords, eps);
                if available.is_zero(eps) {
                    continue;
                }
                entries.insert(
                    WellRef::new(plate.id.clone(), well.coords),
                    PoolEntry {
                        name: liquid.name.clone(),
                        liquid_id: liquid.id.clone(),
                        kind: liquid.kind.clone(),
                        available,
                    },
                );
            }
        }
        Self { entries }
    }

    pub fn available(&self, well: &WellRef) -> Volume {
        self.entries.get(well).map_or(Volume::ZERO, |e| e.available)
    }

    /// Total aspirable volume of a liquid across all wells, restricted to one
    /// instance when `liquid_id` is given.
    pub fn total_for(&self, name: &str, liquid_id: Option<&str>) -> Volume {
        self.entries
            .values()
            .filter(|e| e.name == name && liquid_id.map_or(true, |id| e.liquid_id == id))
            .map(|e| e.available)
            .sum()
    }

    /// Class of the first pooled liquid with this name.
    pub fn kind_of(&self, name: &str) -> Option<&LiquidType> {
        self.entries
            .values()
            .find(|e| e.name == name)
            .map(|e| &e.kind)
    }

    /// Total aspirable volume in the pool.
    pub fn total(&self) -> Volume {
        self.entries.values().map(|e| e.available).sum()
    }

    fn entry(&self, well: &WellRef) -> Option<&PoolEntry> {
        self.entries.get(well)
    }

    fn draw(&mut self, well: &WellRef, volume: Volume, eps: f64) {
        if let Some(entry) = self.entries.get_mut(well) {
            entry.available = entry.available.saturating_sub(volume, eps);
        }
    }
}

/// Source wells a head could address in one stroke, one per channel slot.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceVector {
    pub position: String,
    pub plate_id: String,
    pub lane: usize,
    pub offset: usize,
    pub slots: Vec<Option<WellRef>>,
}

/// Volume drawn from one well for one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDraw {
    pub well: WellRef,
    pub component: String,
    pub volume: Volume,
}

/// One parallel transfer: a draw per channel slot.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedTransfer {
    pub draws: Vec<Option<SourceDraw>>,
}

impl MatchedTransfer {
    pub fn total(&self) -> Volume {
        self.draws.iter().flatten().map(|d| d.volume).sum()
    }

    pub fn count(&self) -> usize {
        self.draws.iter().flatten().count()
    }
}

/// Head geometry and tolerances the matcher works with.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOptions {
    pub multi: usize,
    pub orientation: Orientation,
    pub independent: bool,
    /// Match by liquid name only, ignoring pinned instances.
    pub ignore_instances: bool,
    pub carry: Volume,
    /// Smallest volume any channel can move.
    pub min_volume: Volume,
    pub eps: f64,
}

/// Enumerate source vectors over every source plate on the deck.
pub fn candidate_vectors(deck: &Deck, multi: usize, orientation: Orientation) -> Vec<SourceVector> {
    let mut vectors = Vec::new();
    for position in deck.source_positions() {
        let Some(plate) = deck.plate_at(&position) else {
            continue;
        };
        let lane_len = plate.lane_len(orientation);
        let fit = LaneFit::new(lane_len, multi);
        for lane in 0..plate.n_lanes(orientation) {
            for offset in fit.offsets() {
                let slots = fit
                    .slot_wells(lane_len, multi, offset)
                    .into_iter()
                    .map(|idx| {
                        idx.map(|i| {
                            WellRef::new(
                                plate.id.clone(),
                                WellCoords::from_lane(orientation, lane, i),
                            )
                        })
                    })
                    .collect();
                vectors.push(SourceVector {
                    position: position.clone(),
                    plate_id: plate.id.clone(),
                    lane,
                    offset,
                    slots,
                });
            }
        }
    }
    vectors
}

#[derive(Debug, Clone)]
struct Candidate {
    draws: Vec<Option<SourceDraw>>,
    covered: Volume,
    count: usize,
}

impl Candidate {
    fn beats(&self, other: &Candidate, eps: f64) -> bool {
        self.covered.greater_than(other.covered, eps)
            || (self.covered.approx_eq(other.covered, eps) && self.count > other.count)
    }
}

fn compatible(request: &ComponentRequest, entry: &PoolEntry, opts: &MatchOptions) -> bool {
    if entry.name != request.name {
        return false;
    }
    if !opts.ignore_instances {
        if let Some(id) = &request.liquid_id {
            if *id != entry.liquid_id {
                return false;
            }
        }
    }
    true
}

/// Volume one channel can take from a well holding `avail`, if any.
fn amount_for(want: Volume, avail: Volume, opts: &MatchOptions) -> Option<Volume> {
    let eps = opts.eps;
    let usable = avail.saturating_sub(opts.carry, eps);
    let mut amount = want.min(usable);
    if amount.less_than(opts.min_volume, eps) {
        return None;
    }
    let rest = want - amount;
    if !rest.is_zero(eps) && rest.less_than(opts.min_volume, eps) {
        // Leave at least the minimum for a later round.
        amount = want - opts.min_volume;
        if amount.less_than(opts.min_volume, eps) {
            return None;
        }
    }
    Some(amount)
}

struct Scorer<'a> {
    pool: &'a SourcePool,
    request: &'a ComponentVector,
    outstanding: &'a [Volume],
    opts: &'a MatchOptions,
}

impl Scorer<'_> {
    fn wants(&self, slot: usize) -> Option<(&ComponentRequest, Volume)> {
        let request = self.request.get(slot)?.as_ref()?;
        let want = *self.outstanding.get(slot)?;
        (!want.is_zero(self.opts.eps)).then_some((request, want))
    }

    fn local_available(&self, local: &HashMap<WellRef, Volume>, well: &WellRef) -> Volume {
        local
            .get(well)
            .copied()
            .unwrap_or_else(|| self.pool.available(well))
    }

    fn finish(&self, draws: Vec<Option<SourceDraw>>) -> Option<Candidate> {
        let count = draws.iter().flatten().count();
        if count == 0 {
            return None;
        }
        let covered = draws.iter().flatten().map(|d| d.volume).sum();
        Some(Candidate {
            draws,
            covered,
            count,
        })
    }

    /// Fixed channel spacing: request slot `i` draws from source slot `i + shift`, and
    /// every matched channel moves the same volume.
    fn aligned(&self, vector: &SourceVector, shift: isize) -> Option<Candidate> {
        let eps = self.opts.eps;
        let n = vector.slots.len() as isize;
        let mut local: HashMap<WellRef, Volume> = HashMap::new();
        let mut tentative: Vec<(usize, WellRef, Volume)> = Vec::new();

        for slot in 0..self.request.len() {
            let Some((request, want)) = self.wants(slot) else {
                continue;
            };
            let j = slot as isize + shift;
            if j < 0 || j >= n {
                continue;
            }
            let Some(well) = vector.slots.get(j as usize).and_then(Option::as_ref) else {
                continue;
            };
            let Some(entry) = self.pool.entry(well) else {
                continue;
            };
            if !compatible(request, entry, self.opts) {
                continue;
            }
            let avail = self.local_available(&local, well);
            if let Some(amount) = amount_for(want, avail, self.opts) {
                local.insert(well.clone(), avail.saturating_sub(amount + self.opts.carry, eps));
                tentative.push((slot, well.clone(), amount));
            }
        }

        // Common stroke volume; drop channels it would strand below the minimum.
        loop {
            let common = tentative
                .iter()
                .map(|(_, _, a)| *a)
                .reduce(Volume::min)?;
            let before = tentative.len();
            tentative.retain(|(slot, _, _)| {
                let rest = self.outstanding[*slot] - common;
                rest.is_zero(eps) || !rest.less_than(self.opts.min_volume, eps)
            });
            if tentative.len() == before {
                let mut draws = vec![None; self.request.len()];
                for (slot, well, _) in tentative {
                    let component = self.request[slot]
                        .as_ref()
                        .map(|r| r.name.clone())
                        .unwrap_or_default();
                    draws[slot] = Some(SourceDraw {
                        well,
                        component,
                        volume: common,
                    });
                }
                return self.finish(draws);
            }
        }
    }

    /// Independent channels: each request slot takes the unused compatible source slot
    /// with the most liquid left.
    fn independent(&self, vector: &SourceVector) -> Option<Candidate> {
        let eps = self.opts.eps;
        let mut local: HashMap<WellRef, Volume> = HashMap::new();
        let mut used = vec![false; vector.slots.len()];
        let mut draws = vec![None; self.request.len()];

        for slot in 0..self.request.len() {
            let Some((request, want)) = self.wants(slot) else {
                continue;
            };
            let mut best: Option<(usize, Volume)> = None;
            for (j, well) in vector.slots.iter().enumerate() {
                let Some(well) = well else { continue };
                if used[j] {
                    continue;
                }
                let Some(entry) = self.pool.entry(well) else {
                    continue;
                };
                if !compatible(request, entry, self.opts) {
                    continue;
                }
                let avail = self.local_available(&local, well);
                if best.map_or(true, |(_, b)| avail.greater_than(b, eps)) {
                    best = Some((j, avail));
                }
            }
            let Some((j, avail)) = best else { continue };
            let Some(amount) = amount_for(want, avail, self.opts) else {
                continue;
            };
            let Some(well) = vector.slots[j].clone() else {
                continue;
            };
            used[j] = true;
            local.insert(well.clone(), avail.saturating_sub(amount + self.opts.carry, eps));
            draws[slot] = Some(SourceDraw {
                well,
                component: request.name.clone(),
                volume: amount,
            });
        }
        self.finish(draws)
    }

    fn best(&self, vectors: &[SourceVector]) -> Option<Candidate> {
        let mut best: Option<Candidate> = None;
        let m = self.request.len() as isize;
        for vector in vectors {
            let n = vector.slots.len() as isize;
            let candidates: Vec<Option<Candidate>> = if self.opts.independent {
                vec![self.independent(vector)]
            } else {
                (-(m - 1)..n).map(|shift| self.aligned(vector, shift)).collect()
            };
            for candidate in candidates.into_iter().flatten() {
                if best
                    .as_ref()
                    .map_or(true, |b| candidate.beats(b, self.opts.eps))
                {
                    best = Some(candidate);
                }
            }
        }
        best
    }
}

fn check_supply(
    pool: &SourcePool,
    request: &ComponentVector,
    outstanding: &[Volume],
    opts: &MatchOptions,
) -> PlanResult<()> {
    let mut wanted: BTreeMap<(&str, Option<&str>), Volume> = BTreeMap::new();
    for (slot, want) in request.iter().zip(outstanding) {
        if let Some(r) = slot {
            let instance = if opts.ignore_instances {
                None
            } else {
                r.liquid_id.as_deref()
            };
            *wanted.entry((r.name.as_str(), instance)).or_insert(Volume::ZERO) += *want;
        }
    }
    let shortfalls: Vec<Shortfall> = wanted
        .into_iter()
        .filter_map(|((name, instance), requested)| {
            let available = pool.total_for(name, instance);
            requested.greater_than(available, opts.eps).then(|| Shortfall {
                liquid: match instance {
                    Some(id) => format!("{name} ({id})"),
                    None => name.to_string(),
                },
                requested,
                available,
            })
        })
        .collect();
    if shortfalls.is_empty() {
        Ok(())
    } else {
        Err(PlanError::InsufficientSource(shortfalls))
    }
}

/// Find and reserve sources for every slot of `request`.
///
/// On success the returned transfers cover each requested volume exactly (within
/// epsilon) and `pool` has been debited by every draw plus one carry volume per draw.
pub fn match_components(
    deck: &Deck,
    pool: &mut SourcePool,
    request: &ComponentVector,
    opts: &MatchOptions,
) -> PlanResult<Vec<MatchedTransfer>> {
    let eps = opts.eps;
    for r in request.iter().flatten() {
        if r.volume.less_than(opts.min_volume, eps) {
            return Err(PlanError::VolumeTooSmall {
                volume: r.volume,
                min: opts.min_volume,
            });
        }
    }

    let vectors = candidate_vectors(deck, opts.multi, opts.orientation);
    let mut outstanding: Vec<Volume> = request
        .iter()
        .map(|r| r.as_ref().map_or(Volume::ZERO, |r| r.volume))
        .collect();
    let mut matched = Vec::new();

    while outstanding.iter().any(|v| !v.is_zero(eps)) {
        check_supply(pool, request, &outstanding, opts)?;
        let snapshot = outstanding.clone();

        let best = Scorer {
            pool,
            request,
            outstanding: &outstanding,
            opts,
        }
        .best(&vectors);
        let Some(best) = best else {
            let names: Vec<&str> = request
                .iter()
                .zip(&outstanding)
                .filter(|(_, v)| !v.is_zero(eps))
                .filter_map(|(r, _)| r.as_ref().map(|r| r.name.as_str()))
                .collect();
            return Err(PlanError::SourceNotFound(format!(
                "no source well can supply {}",
                names.join(", ")
            )));
        };

        for (slot, draw) in best.draws.iter().enumerate() {
            if let Some(draw) = draw {
                pool.draw(&draw.well, draw.volume + opts.carry, eps);
                outstanding[slot] = outstanding[slot].saturating_sub(draw.volume, eps);
            }
        }
        if outstanding == snapshot {
            return Err(PlanError::NoProgress(format!(
                "outstanding volumes unchanged: {:?}",
                outstanding.iter().map(|v| v.as_ul()).collect::<Vec<_>>()
            )));
        }
        tracing::debug!(
            "matched {} channel(s) for {} from {}",
            best.count,
            best.covered,
            best.draws
                .iter()
                .flatten()
                .map(|d| d.well.to_string())
                .collect::<Vec<_>>()
                .join(",")
        );
        matched.push(MatchedTransfer { draws: best.draws });
    }
    Ok(matched)
}

//! Planning algorithms: channel choice, tip handling, source matching and grouping.
//!
//! Every function here is synchronous and works on an explicitly passed
//! [`Deck`](crate::deck::Deck). Nothing holds on to deck state between calls.

pub mod channel;
pub mod grouping;
pub mod matcher;
pub mod tips;

pub use channel::{choose_channel, choose_channel_on_head, fit_score, ChannelChoice};
pub use grouping::{group_parallel, IdSet, PendingGrid, PendingRequest, SetOfIdSets};
pub use matcher::{
    candidate_vectors, match_components, ComponentRequest, ComponentVector, MatchOptions,
    MatchedTransfer, SourceDraw, SourcePool, SourceVector,
};
pub use tips::{drop_dirty_tips, get_clean_tips, TipDrop, TipPickup};

/// How the channels of a head map onto the wells of one lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneFit {
    /// The lane is `step` times longer than the head: channels land on every
    /// `step`-th well, starting at one of `step` offsets.
    Spaced { step: usize },
    /// The head is longer than the lane: `tips_per_well` channels share each well.
    Replicated { tips_per_well: usize },
    /// Neither divides the other.
    Irregular,
}

impl LaneFit {
    pub fn new(lane_len: usize, multi: usize) -> Self {
        if lane_len == 0 || multi == 0 {
            return LaneFit::Irregular;
        }
        if lane_len >= multi && lane_len % multi == 0 {
            LaneFit::Spaced {
                step: lane_len / multi,
            }
        } else if lane_len < multi && multi % lane_len == 0 {
            LaneFit::Replicated {
                tips_per_well: multi / lane_len,
            }
        } else {
            LaneFit::Irregular
        }
    }

    /// Starting offsets along the lane.
    pub fn offsets(self) -> std::ops::Range<usize> {
        match self {
            LaneFit::Spaced { step } => 0..step,
            LaneFit::Replicated { .. } | LaneFit::Irregular => 0..1,
        }
    }

    /// Well index along the lane for each channel slot at `offset`.
    pub fn slot_wells(self, lane_len: usize, multi: usize, offset: usize) -> Vec<Option<usize>> {
        (0..multi)
            .map(|k| match self {
                LaneFit::Spaced { step } => Some(offset + k * step),
                LaneFit::Replicated { tips_per_well } => Some(k / tips_per_well),
                LaneFit::Irregular => (k < lane_len).then_some(k),
            })
            .collect()
    }
}

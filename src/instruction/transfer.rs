//! Transfer-level instructions and their expansion into channel rounds.
//!
//! ```text
//! Transfer (sets of per-channel TransferParams)
//!    │  channel choice, split into rounds
//!    ▼
//! ChannelBlock (one tip load)
//!    ├── LoadTips
//!    ├── ChannelTransfer ──> Move, Aspirate, Move, Dispense, Blowout ...
//!    ├── ChannelTransfer
//!    └── UnloadTips
//! ```

use super::terminal::{
    AspirateCmd, BlowoutCmd, DispenseCmd, LoadTipsCmd, MixCmd, MoveCmd, SetPipetteSpeedCmd,
    TerminalInstruction, UnloadTipsCmd, WaitCmd,
};
use super::tree::PlanContext;
use super::Instruction;
use crate::error::{PlanError, PlanResult};
use crate::hardware::ChannelParams;
use crate::labware::WellRef;
use crate::planner::{choose_channel, choose_channel_on_head, drop_dirty_tips, get_clean_tips};
use crate::policy::{Policy, WellReference};
use crate::volume::{split_multi, Volume};
use serde::{Deserialize, Serialize};

/// Everything one channel needs to move one component into one destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferParams {
    pub request_id: String,
    pub component: String,
    pub liquid_class: String,
    pub source: WellRef,
    pub source_position: String,
    pub source_plate_type: String,
    pub destination: WellRef,
    pub dest_position: String,
    pub dest_plate_type: String,
    pub volume: Volume,
    /// Name the destination liquid takes after the dispense.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    pub policy: Policy,
}

/// Per-channel parameters of one parallel stroke; `None` slots are idle.
pub type ParamSet = Vec<Option<TransferParams>>;

/// One or more parallel transfers, executed in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferInstruction {
    pub sets: Vec<ParamSet>,
    /// Head committed to by grouping, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head: Option<usize>,
}

impl TransferInstruction {
    pub fn single(set: ParamSet, head: Option<usize>) -> Self {
        Self {
            sets: vec![set],
            head,
        }
    }

    /// Whether every channel's policy allows a multi-channel head.
    pub fn can_multi(&self) -> bool {
        self.params().all(|p| p.policy.can_multi)
    }

    pub fn params(&self) -> impl Iterator<Item = &TransferParams> {
        self.sets.iter().flatten().flatten()
    }

    /// Component names per set, used to decide whether transfers can share tips.
    pub fn component_names(&self) -> Vec<Vec<Option<&str>>> {
        self.sets
            .iter()
            .map(|set| {
                set.iter()
                    .map(|p| p.as_ref().map(|p| p.component.as_str()))
                    .collect()
            })
            .collect()
    }

    pub fn total_volume(&self) -> Volume {
        self.params().map(|p| p.volume).sum()
    }

    pub(super) fn expand(&self, ctx: &mut PlanContext<'_>) -> PlanResult<Vec<Instruction>> {
        let mut rounds: Vec<PlannedRound> = Vec::new();
        for (set_index, set) in self.sets.iter().enumerate() {
            rounds.extend(self.plan_set(set_index, set, ctx)?);
        }
        Ok(into_channel_blocks(rounds)
            .into_iter()
            .map(Instruction::ChannelBlock)
            .collect())
    }

    fn plan_set(
        &self,
        set_index: usize,
        set: &ParamSet,
        ctx: &PlanContext<'_>,
    ) -> PlanResult<Vec<PlannedRound>> {
        let eps = ctx.settings.epsilon_ul;
        let smallest = set
            .iter()
            .flatten()
            .map(|p| p.volume)
            .reduce(Volume::min)
            .ok_or_else(|| PlanError::Internal("transfer set with no active channel".into()))?;

        let choice = match self.head {
            Some(head) => choose_channel_on_head(smallest, ctx.deck(), head, eps)?,
            None => choose_channel(smallest, ctx.deck(), eps)?,
        };
        let multi = choice.params.multi.max(1);
        if set.len() > multi {
            return Err(PlanError::Internal(format!(
                "{} channels requested on a {}-channel head",
                set.len(),
                multi
            )));
        }

        let mut padded: ParamSet = set.clone();
        padded.resize(multi, None);
        let volumes: Vec<Volume> = padded
            .iter()
            .map(|p| p.as_ref().map_or(Volume::ZERO, |p| p.volume))
            .collect();
        let split = split_multi(
            &volumes,
            choice.params.min_volume,
            choice.params.max_volume,
            eps,
        )?;
        if split.len() > 1 {
            tracing::debug!(
                "set {} split into {} rounds on head {}",
                set_index,
                split.len(),
                choice.head
            );
        }

        let tip_type = choice.tip.tip_type.clone();
        Ok(split
            .into_iter()
            .enumerate()
            .map(|(round, round_volumes)| {
                let params: ParamSet = padded
                    .iter()
                    .zip(&round_volumes)
                    .map(|(p, v)| {
                        p.as_ref().filter(|_| !v.is_zero(eps)).map(|p| TransferParams {
                            volume: *v,
                            ..p.clone()
                        })
                    })
                    .collect();
                PlannedRound {
                    set_index,
                    tip_type: tip_type.clone(),
                    transfer: ChannelTransfer {
                        head: choice.head,
                        channel: choice.params.clone(),
                        params,
                        // Only the first stroke of a split transfer leaves a carry loss.
                        carry: if round == 0 {
                            ctx.settings.carry_volume()
                        } else {
                            Volume::ZERO
                        },
                    },
                }
            })
            .collect())
    }
}

struct PlannedRound {
    set_index: usize,
    tip_type: String,
    transfer: ChannelTransfer,
}

impl PlannedRound {
    fn tip_types(&self) -> Vec<Option<String>> {
        self.transfer
            .params
            .iter()
            .map(|p| p.as_ref().map(|_| self.tip_type.clone()))
            .collect()
    }

    fn components(&self) -> Vec<Option<&str>> {
        self.transfer
            .params
            .iter()
            .map(|p| p.as_ref().map(|p| p.component.as_str()))
            .collect()
    }

    fn reuse_limit(&self) -> usize {
        self.transfer
            .params
            .iter()
            .flatten()
            .map(|p| p.policy.tip_reuse_limit as usize)
            .min()
            .unwrap_or(0)
            .max(1)
    }
}

/// Pack rounds into tip contexts.
///
/// Rounds of one set always share tips. A new set joins the open block while the head,
/// tip types and per-channel liquids are unchanged and the block holds fewer sets than
/// the policies' `tip_reuse_limit`.
fn into_channel_blocks(rounds: Vec<PlannedRound>) -> Vec<ChannelBlock> {
    let mut blocks: Vec<ChannelBlock> = Vec::new();
    let mut open: Option<(Vec<Option<String>>, Vec<Option<String>>, usize, usize)> = None;

    for round in rounds {
        let tip_types = round.tip_types();
        let components: Vec<Option<String>> = round
            .components()
            .into_iter()
            .map(|c| c.map(str::to_string))
            .collect();
        let joins = match (&mut open, blocks.last()) {
            (Some((types, comps, last_set, sets)), Some(block)) => {
                let same_context = block.head == round.transfer.head
                    && *types == tip_types
                    && *comps == components;
                if round.set_index == *last_set {
                    true
                } else if same_context && *sets < round.reuse_limit() {
                    *last_set = round.set_index;
                    *sets += 1;
                    true
                } else {
                    false
                }
            }
            _ => false,
        };

        if joins {
            if let Some(block) = blocks.last_mut() {
                block.steps.push(Instruction::ChannelTransfer(round.transfer));
            }
        } else {
            open = Some((tip_types.clone(), components, round.set_index, 1));
            blocks.push(ChannelBlock {
                head: round.transfer.head,
                tip_types,
                steps: vec![Instruction::ChannelTransfer(round.transfer)],
            });
        }
    }
    blocks
}

/// A run of channel-level steps executed with one set of tips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelBlock {
    pub head: usize,
    /// Tip type per channel; `None` channels stay bare.
    pub tip_types: Vec<Option<String>>,
    pub steps: Vec<Instruction>,
}

impl ChannelBlock {
    pub(super) fn expand(&self, ctx: &mut PlanContext<'_>) -> PlanResult<Vec<Instruction>> {
        let mut children = Vec::with_capacity(self.steps.len() + 2);
        let pickups = get_clean_tips(ctx.deck, self.head, &self.tip_types, ctx.settings)?;
        for pickup in pickups {
            children.push(Instruction::Terminal(TerminalInstruction::LoadTips(
                LoadTipsCmd {
                    head: pickup.head,
                    position: pickup.position,
                    tip_box_id: pickup.tip_box_id,
                    tip_type: pickup.tip_type,
                    wells: pickup
                        .wells
                        .iter()
                        .map(|w| w.map(|w| w.to_string()))
                        .collect(),
                    mask: pickup.mask,
                },
            )));
        }
        children.extend(self.steps.iter().cloned());
        if let Some(dropped) = drop_dirty_tips(ctx.deck, self.head)? {
            children.push(Instruction::Terminal(TerminalInstruction::UnloadTips(
                UnloadTipsCmd {
                    head: dropped.head,
                    position: dropped.position,
                    mask: dropped.mask,
                },
            )));
        }
        Ok(children)
    }
}

/// One aspirate/dispense stroke across the channels of a head.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelTransfer {
    pub head: usize,
    /// Head envelope merged with the loaded tip.
    pub channel: ChannelParams,
    pub params: ParamSet,
    /// Volume each active source loses on top of the stroke.
    pub carry: Volume,
}

impl ChannelTransfer {
    fn lead_policy(&self) -> PlanResult<&Policy> {
        self.params
            .iter()
            .flatten()
            .map(|p| &p.policy)
            .next()
            .ok_or_else(|| PlanError::Internal("channel transfer with no active channel".into()))
    }

    fn mask(&self) -> Vec<bool> {
        self.params.iter().map(Option::is_some).collect()
    }

    fn volumes(&self) -> Vec<Volume> {
        self.params
            .iter()
            .map(|p| p.as_ref().map_or(Volume::ZERO, |p| p.volume))
            .collect()
    }

    fn classes(&self) -> Vec<Option<String>> {
        self.params
            .iter()
            .map(|p| p.as_ref().map(|p| p.liquid_class.clone()))
            .collect()
    }

    fn move_to_source(&self, policy: &Policy) -> TerminalInstruction {
        TerminalInstruction::Move(MoveCmd {
            head: self.head,
            positions: self.pluck(|p| p.source_position.clone()),
            wells: self.pluck(|p| p.source.well.to_string()),
            plate_types: self.pluck(|p| p.source_plate_type.clone()),
            reference: policy.aspirate_reference,
            offset_z_mm: policy.aspirate_offset_mm,
        })
    }

    fn move_to_destination(&self, reference: WellReference, offset: f64) -> TerminalInstruction {
        TerminalInstruction::Move(MoveCmd {
            head: self.head,
            positions: self.pluck(|p| p.dest_position.clone()),
            wells: self.pluck(|p| p.destination.well.to_string()),
            plate_types: self.pluck(|p| p.dest_plate_type.clone()),
            reference,
            offset_z_mm: offset,
        })
    }

    fn pluck(&self, f: impl Fn(&TransferParams) -> String) -> Vec<Option<String>> {
        self.params.iter().map(|p| p.as_ref().map(&f)).collect()
    }

    fn mix_volumes(&self, requested: Volume, eps: f64) -> Vec<Volume> {
        self.params
            .iter()
            .map(|p| match p {
                Some(_) if !requested.is_zero(eps) => requested.min(self.channel.max_volume),
                Some(p) => p.volume,
                None => Volume::ZERO,
            })
            .collect()
    }

    pub(super) fn expand(&self, ctx: &mut PlanContext<'_>) -> PlanResult<Vec<Instruction>> {
        let eps = ctx.settings.epsilon_ul;
        let policy = self.lead_policy()?.clone();
        let mask = self.mask();
        let volumes = self.volumes();
        let mut out: Vec<TerminalInstruction> = Vec::new();

        let aspirate_speed = self.channel.clamp_rate(policy.aspirate_speed);
        let dispense_speed = self.channel.clamp_rate(policy.dispense_speed);
        let mix_rate = self.channel.clamp_rate(policy.mix_rate);

        out.push(TerminalInstruction::SetPipetteSpeed(SetPipetteSpeedCmd {
            head: self.head,
            rate: aspirate_speed,
        }));
        out.push(self.move_to_source(&policy));
        if policy.pre_mix > 0 {
            out.push(TerminalInstruction::Mix(MixCmd {
                head: self.head,
                volumes: self.mix_volumes(policy.pre_mix_volume, eps),
                cycles: policy.pre_mix,
                rate: mix_rate,
                mask: mask.clone(),
            }));
        }
        out.push(TerminalInstruction::Aspirate(AspirateCmd {
            head: self.head,
            volumes: volumes.clone(),
            liquid_classes: self.classes(),
            speed: aspirate_speed,
        }));
        if policy.aspirate_wait_s > 0.0 {
            out.push(TerminalInstruction::Wait(WaitCmd {
                seconds: policy.aspirate_wait_s,
            }));
        }
        if (dispense_speed - aspirate_speed).abs() > f64::EPSILON {
            out.push(TerminalInstruction::SetPipetteSpeed(SetPipetteSpeedCmd {
                head: self.head,
                rate: dispense_speed,
            }));
        }
        out.push(self.move_to_destination(policy.dispense_reference, policy.dispense_offset_mm));
        out.push(TerminalInstruction::Dispense(DispenseCmd {
            head: self.head,
            volumes,
            liquid_classes: self.classes(),
            speed: dispense_speed,
        }));
        if policy.dispense_wait_s > 0.0 {
            out.push(TerminalInstruction::Wait(WaitCmd {
                seconds: policy.dispense_wait_s,
            }));
        }
        if policy.post_mix > 0 {
            out.push(TerminalInstruction::Mix(MixCmd {
                head: self.head,
                volumes: self.mix_volumes(policy.post_mix_volume, eps),
                cycles: policy.post_mix,
                rate: mix_rate,
                mask: mask.clone(),
            }));
        }
        if policy.touchoff {
            out.push(self.move_to_destination(WellReference::Top, -policy.touchoff_offset_mm));
        }
        if policy.blowout {
            out.push(TerminalInstruction::Blowout(BlowoutCmd {
                head: self.head,
                volumes: mask
                    .iter()
                    .map(|m| if *m { policy.blowout_volume } else { Volume::ZERO })
                    .collect(),
                mask,
            }));
        }

        for p in self.params.iter().flatten() {
            ctx.deck
                .move_liquid(&p.source, &p.destination, p.volume, self.carry, eps)?;
            if let Some(result) = &p.result {
                let plate = ctx.deck.plate_mut(&p.destination.plate_id)?;
                if let Some(liquid) = plate.contents_mut(p.destination.well)? {
                    liquid.name = result.clone();
                }
            }
        }
        tracing::debug!(
            "head {} moved {} over {} channel(s)",
            self.head,
            self.params.iter().flatten().map(|p| p.volume).sum::<Volume>(),
            self.params.iter().flatten().count()
        );

        Ok(out.into_iter().map(Instruction::Terminal).collect())
    }
}

/// Mix the contents of a well in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMix {
    pub head: usize,
    pub channel: ChannelParams,
    pub well: WellRef,
    pub position: String,
    pub plate_type: String,
    pub volume: Volume,
    pub cycles: u32,
    pub policy: Policy,
}

impl ChannelMix {
    pub(super) fn expand(&self, _ctx: &mut PlanContext<'_>) -> PlanResult<Vec<Instruction>> {
        let multi = self.channel.multi.max(1);
        let slot = |value: String| {
            let mut v = vec![None; multi];
            v[0] = Some(value);
            v
        };
        let mut mask = vec![false; multi];
        mask[0] = true;
        let mut volumes = vec![Volume::ZERO; multi];
        volumes[0] = self.volume.min(self.channel.max_volume);

        Ok(vec![
            Instruction::Terminal(TerminalInstruction::Move(MoveCmd {
                head: self.head,
                positions: slot(self.position.clone()),
                wells: slot(self.well.well.to_string()),
                plate_types: slot(self.plate_type.clone()),
                reference: self.policy.aspirate_reference,
                offset_z_mm: self.policy.aspirate_offset_mm,
            })),
            Instruction::Terminal(TerminalInstruction::Mix(MixCmd {
                head: self.head,
                volumes,
                cycles: self.cycles,
                rate: self.channel.clamp_rate(self.policy.mix_rate),
                mask,
            })),
        ])
    }
}

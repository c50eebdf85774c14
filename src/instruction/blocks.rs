//! Request blocks: the children of the tree root.
//!
//! A transfer block is planned component layer by component layer. Within a layer,
//! requests for the same component into the same destination plate form a partition.
//! When the deck carries a multi-channel head and the partition's policy allows it,
//! destination wells are grouped for that head and each group is matched against the
//! sources in one go. A group runs on that head only if the policy resolved for every
//! one of its channels allows it. Whatever is left is matched one request at a time.
//!
//! Sources are reserved in a [`SourcePool`] shared by the whole block, so two requests
//! are never promised the same liquid.

use super::request::{MixRequest, PromptRequest, SplitRequest, TransferRequest};
use super::terminal::{MessageCmd, TerminalInstruction};
use super::transfer::{ChannelBlock, ChannelMix, ParamSet, TransferInstruction, TransferParams};
use super::tree::PlanContext;
use super::{merge_adjacent, Instruction};
use crate::error::{PlanError, PlanResult};
use crate::hardware::{ChannelParams, Orientation};
use crate::labware::{Plate, WellRef};
use crate::planner::{
    choose_channel, group_parallel, match_components, ComponentRequest, ComponentVector,
    MatchOptions, MatchedTransfer, PendingGrid, PendingRequest, SourceDraw, SourcePool,
};
use crate::policy::rules::DEFAULT_POLICY;
use crate::policy::{Policy, PolicyQuery};
use crate::volume::Volume;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferBlock {
    pub requests: Vec<TransferRequest>,
}

/// One component of one request.
struct Unit<'r> {
    request: &'r TransferRequest,
    component: &'r ComponentRequest,
}

fn liquid_class_at(plate: &Plate, well: &WellRef) -> Option<String> {
    plate
        .well(well.well)
        .and_then(|w| w.contents.as_ref())
        .map(|l| l.kind.policy_name().to_string())
}

fn position_of(ctx: &PlanContext<'_>, plate_id: &str) -> PlanResult<String> {
    ctx.deck()
        .position_of(plate_id)
        .map(str::to_string)
        .ok_or_else(|| PlanError::Internal(format!("plate {plate_id} is not on the deck")))
}

impl TransferBlock {
    pub(super) fn expand(&self, ctx: &mut PlanContext<'_>) -> PlanResult<Vec<Instruction>> {
        let eps = ctx.settings.epsilon_ul;
        let mut pool = SourcePool::from_deck(ctx.deck(), eps);
        let min_volume = ctx
            .deck()
            .min_possible_volume()
            .ok_or_else(|| PlanError::NoTipAvailable("no loaded head accepts any tip".into()))?;
        let multi_head: Option<(usize, ChannelParams)> = ctx
            .deck()
            .loaded_heads()
            .find(|(_, head)| head.multi() > 1)
            .map(|(idx, head)| (idx, head.params.clone()));

        let layers = self
            .requests
            .iter()
            .map(|r| r.components.len())
            .max()
            .unwrap_or(0);
        let mut transfers = Vec::new();
        for layer in 0..layers {
            let mut partitions: Vec<Vec<Unit<'_>>> = Vec::new();
            for request in &self.requests {
                let Some(component) = request.components.get(layer) else {
                    continue;
                };
                let unit = Unit { request, component };
                match partitions.iter_mut().find(|p| {
                    p[0].component.name == component.name
                        && p[0].request.destination.plate_id == request.destination.plate_id
                }) {
                    Some(partition) => partition.push(unit),
                    None => partitions.push(vec![unit]),
                }
            }
            for partition in &partitions {
                let planner = PartitionPlanner {
                    units: partition,
                    min_volume,
                    multi_head: multi_head.as_ref(),
                };
                transfers.extend(planner.plan(ctx, &mut pool)?);
            }
        }

        if ctx.settings.merge_transfers {
            transfers = merge_adjacent(transfers);
        }
        tracing::debug!(
            "transfer block of {} request(s) planned as {} transfer(s)",
            self.requests.len(),
            transfers.len()
        );
        Ok(transfers.into_iter().map(Instruction::Transfer).collect())
    }
}

struct PartitionPlanner<'u, 'r> {
    units: &'u [Unit<'r>],
    min_volume: Volume,
    multi_head: Option<&'u (usize, ChannelParams)>,
}

impl PartitionPlanner<'_, '_> {
    fn options(
        &self,
        ctx: &PlanContext<'_>,
        multi: usize,
        params: Option<&ChannelParams>,
    ) -> MatchOptions {
        MatchOptions {
            multi,
            orientation: params.map_or(Orientation::Vertical, |p| p.orientation),
            independent: params.map_or(true, |p| p.independent),
            ignore_instances: ctx.settings.ignore_liquid_instances,
            carry: ctx.settings.carry_volume(),
            min_volume: self.min_volume,
            eps: ctx.settings.epsilon_ul,
        }
    }

    /// Policy of the partition as a whole. A partition this policy keeps off the
    /// multi-channel head is never grouped; each group is still checked per channel.
    fn partition_policy(&self, ctx: &PlanContext<'_>, pool: &SourcePool) -> PlanResult<Policy> {
        let first = &self.units[0];
        let dest = ctx.deck().plate(&first.request.destination.plate_id)?;
        let mut query = PolicyQuery {
            to_plate_type: Some(dest.plate_type.clone()),
            ..PolicyQuery::default()
        }
        .with_component(first.component.name.clone())
        .with_volume(first.component.volume.as_ul());
        if let Some(kind) = pool.kind_of(&first.component.name) {
            query = query.with_liquid_class(kind.policy_name());
        }
        Ok(ctx.rules.resolve(&query))
    }

    fn plan(
        &self,
        ctx: &PlanContext<'_>,
        pool: &mut SourcePool,
    ) -> PlanResult<Vec<TransferInstruction>> {
        let mut transfers = Vec::new();
        let mut claimed = vec![false; self.units.len()];

        if let Some((head, params)) = self.multi_head {
            if self.units.len() > 1 && self.partition_policy(ctx, pool)?.can_multi {
                for group in self.groups(ctx, params)? {
                    if group.iter().flatten().count() < 2 {
                        continue;
                    }
                    let request: ComponentVector = group
                        .iter()
                        .map(|slot| slot.map(|i| self.units[i].component.clone()))
                        .collect();
                    let opts = self.options(ctx, params.multi, Some(params));
                    // Reserve against a copy until every channel's policy agrees.
                    let mut trial = pool.clone();
                    let matched = match_components(ctx.deck(), &mut trial, &request, &opts)?;
                    let sets = self.param_sets(ctx, &group, &matched)?;
                    let transfer = TransferInstruction {
                        sets,
                        head: Some(*head),
                    };
                    if !transfer.can_multi() {
                        tracing::debug!(
                            "group of {} well(s) not eligible for head {}, planning singly",
                            group.iter().flatten().count(),
                            head
                        );
                        continue;
                    }
                    *pool = trial;
                    transfers.push(transfer);
                    for i in group.iter().flatten() {
                        claimed[*i] = true;
                    }
                }
            }
        }

        for (i, unit) in self.units.iter().enumerate() {
            if claimed[i] {
                continue;
            }
            let request: ComponentVector = vec![Some(unit.component.clone())];
            let opts = self.options(ctx, 1, None);
            let matched = match_components(ctx.deck(), pool, &request, &opts)?;
            let sets = self.param_sets(ctx, &[Some(i)], &matched)?;
            transfers.push(TransferInstruction { sets, head: None });
        }
        Ok(transfers)
    }

    /// Group the partition's destination wells for the multi-channel head.
    ///
    /// Returns unit indices per channel slot.
    fn groups(
        &self,
        ctx: &PlanContext<'_>,
        params: &ChannelParams,
    ) -> PlanResult<Vec<Vec<Option<usize>>>> {
        let dest = ctx.deck().plate(&self.units[0].request.destination.plate_id)?;
        let mut grid = PendingGrid::new(dest.rows, dest.cols);
        for (i, unit) in self.units.iter().enumerate() {
            grid.push(
                unit.request.destination.well,
                PendingRequest {
                    id: i.to_string(),
                    volume: unit.component.volume,
                },
            );
        }
        let sets = group_parallel(
            &mut grid,
            params.multi,
            params.orientation,
            !params.independent,
            ctx.settings.epsilon_ul,
        );
        Ok(sets
            .into_iter()
            .map(|set| {
                set.into_iter()
                    .map(|id| id.and_then(|id| id.parse::<usize>().ok()))
                    .collect()
            })
            .collect())
    }

    fn param_sets(
        &self,
        ctx: &PlanContext<'_>,
        slots: &[Option<usize>],
        matched: &[MatchedTransfer],
    ) -> PlanResult<Vec<ParamSet>> {
        matched
            .iter()
            .map(|transfer| {
                transfer
                    .draws
                    .iter()
                    .zip(slots)
                    .map(|(draw, slot)| match (draw, slot) {
                        (Some(draw), Some(i)) => {
                            self.params_for(ctx, &self.units[*i], draw).map(Some)
                        }
                        _ => Ok(None),
                    })
                    .collect::<PlanResult<ParamSet>>()
            })
            .collect()
    }

    fn params_for(
        &self,
        ctx: &PlanContext<'_>,
        unit: &Unit<'_>,
        draw: &SourceDraw,
    ) -> PlanResult<TransferParams> {
        let deck = ctx.deck();
        let source = deck.plate(&draw.well.plate_id)?;
        let destination = &unit.request.destination;
        let dest = deck.plate(&destination.plate_id)?;
        let liquid_class = liquid_class_at(source, &draw.well)
            .unwrap_or_else(|| DEFAULT_POLICY.to_string());

        let query = PolicyQuery {
            liquid_class: Some(liquid_class.clone()),
            component: Some(draw.component.clone()),
            from_plate_type: Some(source.plate_type.clone()),
            to_plate_type: Some(dest.plate_type.clone()),
            volume: Some(draw.volume.as_ul()),
            well_from_volume: Some(source.volume(draw.well.well).as_ul()),
            well_to_volume: Some(dest.volume(destination.well).as_ul()),
        };

        Ok(TransferParams {
            request_id: unit.request.id.clone(),
            component: draw.component.clone(),
            liquid_class,
            source: draw.well.clone(),
            source_position: position_of(ctx, &source.id)?,
            source_plate_type: source.plate_type.clone(),
            destination: destination.clone(),
            dest_position: position_of(ctx, &dest.id)?,
            dest_plate_type: dest.plate_type.clone(),
            volume: draw.volume,
            result: unit.request.result.clone(),
            policy: ctx.rules.resolve(&query),
        })
    }
}

/// Mix requests, each run with its own tips on a single channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixBlock {
    pub requests: Vec<MixRequest>,
}

impl MixBlock {
    pub(super) fn expand(&self, ctx: &mut PlanContext<'_>) -> PlanResult<Vec<Instruction>> {
        let eps = ctx.settings.epsilon_ul;
        let mut children = Vec::with_capacity(self.requests.len());
        for request in &self.requests {
            let deck = ctx.deck();
            let plate = deck.plate(&request.well.plate_id)?;
            let mut query = PolicyQuery {
                to_plate_type: Some(plate.plate_type.clone()),
                well_to_volume: Some(plate.volume(request.well.well).as_ul()),
                ..PolicyQuery::default()
            }
            .with_volume(request.volume.as_ul());
            if let Some(class) = liquid_class_at(plate, &request.well) {
                query = query.with_liquid_class(class);
            }
            if let Some(liquid) = plate.well(request.well.well).and_then(|w| w.contents.as_ref()) {
                query = query.with_component(liquid.name.clone());
            }

            let choice = choose_channel(request.volume, deck, eps)?;
            let multi = choice.params.multi.max(1);
            let mut tip_types = vec![None; multi];
            tip_types[0] = Some(choice.tip.tip_type.clone());

            let mix = ChannelMix {
                head: choice.head,
                channel: choice.params.clone(),
                well: request.well.clone(),
                position: position_of(ctx, &plate.id)?,
                plate_type: plate.plate_type.clone(),
                volume: request.volume,
                cycles: request.cycles,
                policy: ctx.rules.resolve(&query),
            };
            children.push(Instruction::ChannelBlock(ChannelBlock {
                head: choice.head,
                tip_types,
                steps: vec![Instruction::ChannelMix(mix)],
            }));
        }
        Ok(children)
    }
}

/// Split markers: re-identify well contents, producing no driver calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitBlock {
    pub requests: Vec<SplitRequest>,
}

impl SplitBlock {
    pub(super) fn expand(&self, ctx: &mut PlanContext<'_>) -> PlanResult<Vec<Instruction>> {
        for request in &self.requests {
            let plate = ctx.deck.plate_mut(&request.well.plate_id)?;
            let liquid = plate.contents_mut(request.well.well)?.ok_or_else(|| {
                PlanError::SourceNotFound(format!("nothing to split at {}", request.well))
            })?;
            tracing::debug!(
                "split {} at {}: {} -> {}",
                liquid.name,
                request.well,
                liquid.id,
                request.new_liquid_id
            );
            liquid.id = request.new_liquid_id.clone();
        }
        Ok(Vec::new())
    }
}

/// Operator messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptBlock {
    pub requests: Vec<PromptRequest>,
}

impl PromptBlock {
    pub(super) fn expand(&self, _ctx: &mut PlanContext<'_>) -> PlanResult<Vec<Instruction>> {
        Ok(self
            .requests
            .iter()
            .map(|r| {
                Instruction::Terminal(TerminalInstruction::Message(MessageCmd {
                    text: r.message.clone(),
                    pause: r.pause,
                }))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use crate::config::PlannerSettings;
    use crate::labware::WellCoords;
    use crate::liquid::Liquid;
    use crate::policy::RuleSet;

    const EPS: f64 = 1e-4;

    fn deck_with_water() -> (crate::deck::Deck, String, String) {
        let mut deck = catalog::standard_deck();
        let mut src = catalog::pcr_plate_96("src");
        src.add_liquid(
            WellCoords::new(0, 0),
            Liquid::new("water", "water", Volume::ul(190.0)),
            EPS,
        )
        .unwrap();
        let src_id = src.id.clone();
        deck.add_plate("position_4", src).unwrap();
        let dst = catalog::pcr_plate_96("dst");
        let dst_id = dst.id.clone();
        deck.add_plate("position_8", dst).unwrap();
        (deck, src_id, dst_id)
    }

    #[test]
    fn test_split_reidentifies_contents() {
        let (mut deck, src_id, _) = deck_with_water();
        let rules = RuleSet::with_defaults();
        let settings = PlannerSettings::default();
        let mut ctx = PlanContext::new(&mut deck, &rules, &settings);
        let block = SplitBlock {
            requests: vec![SplitRequest {
                id: "s".into(),
                well: WellRef::new(src_id.clone(), WellCoords::new(0, 0)),
                new_liquid_id: "lot-2".into(),
            }],
        };
        assert!(block.expand(&mut ctx).unwrap().is_empty());
        let plate = deck.plate(&src_id).unwrap();
        let liquid = plate.well(WellCoords::new(0, 0)).unwrap().contents.as_ref().unwrap();
        assert_eq!(liquid.id, "lot-2");
    }

    #[test]
    fn test_split_of_empty_well_fails() {
        let (mut deck, _, dst_id) = deck_with_water();
        let rules = RuleSet::with_defaults();
        let settings = PlannerSettings::default();
        let mut ctx = PlanContext::new(&mut deck, &rules, &settings);
        let block = SplitBlock {
            requests: vec![SplitRequest {
                id: "s".into(),
                well: WellRef::new(dst_id, WellCoords::new(0, 0)),
                new_liquid_id: "x".into(),
            }],
        };
        assert!(matches!(block.expand(&mut ctx), Err(PlanError::SourceNotFound(_))));
    }

    #[test]
    fn test_transfer_block_resolves_policy_per_channel() {
        let (mut deck, src_id, dst_id) = deck_with_water();
        let rules = RuleSet::with_defaults();
        let settings = PlannerSettings::default();
        let mut ctx = PlanContext::new(&mut deck, &rules, &settings);
        let block = TransferBlock {
            requests: vec![TransferRequest::new(WellRef::new(dst_id, WellCoords::new(0, 0)))
                .with_component("water", Volume::ul(40.0))],
        };
        let children = block.expand(&mut ctx).unwrap();
        assert_eq!(children.len(), 1);
        let Instruction::Transfer(transfer) = &children[0] else {
            panic!("expected a transfer");
        };
        let params: Vec<_> = transfer.params().collect();
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].source.plate_id, src_id);
        assert_eq!(params[0].source_position, "position_4");
        assert_eq!(params[0].liquid_class, "water");
        assert_eq!(transfer.head, None);
    }

    #[test]
    fn test_adjacent_singletons_merge() {
        let (mut deck, _, dst_id) = deck_with_water();
        let rules = RuleSet::with_defaults();
        let settings = PlannerSettings::default();
        let mut ctx = PlanContext::new(&mut deck, &rules, &settings);
        // Two wells in different columns and rows cannot share a group.
        let block = TransferBlock {
            requests: vec![
                TransferRequest::new(WellRef::new(dst_id.clone(), WellCoords::new(0, 0)))
                    .with_component("water", Volume::ul(20.0)),
                TransferRequest::new(WellRef::new(dst_id, WellCoords::new(5, 3)))
                    .with_component("water", Volume::ul(30.0)),
            ],
        };
        let children = block.expand(&mut ctx).unwrap();
        assert_eq!(children.len(), 1);
        let Instruction::Transfer(transfer) = &children[0] else {
            panic!("expected a transfer");
        };
        assert_eq!(transfer.sets.len(), 2);
    }
}

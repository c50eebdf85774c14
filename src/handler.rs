//! Planning facade.
//!
//! [`LiquidHandler`] owns a deck snapshot, a rule set and the planner settings. Each
//! call to [`LiquidHandler::plan`] works on its own copy of the deck, so the snapshot
//! is never touched and repeated passes are independent:
//!
//! ```text
//! blocks ──> InstructionTree::root ──expand(deck copy)──> leaves ──> Plan
//!                                                                     │
//!                                             execute(driver) <───────┘
//! ```
//!
//! A failed pass returns the first error and no plan.

use crate::config::PlannerSettings;
use crate::deck::Deck;
use crate::driver::{execute_leaves, LiquidHandlingDriver};
use crate::error::PlanResult;
use crate::instruction::{Block, InstructionTree, PlanContext, Request, TerminalInstruction};
use crate::liquid::new_id;
use crate::policy::RuleSet;
use crate::volume::Volume;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counts over a plan's terminal instructions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub instructions: usize,
    pub aspirates: usize,
    pub dispenses: usize,
    pub tip_loads: usize,
    pub tips_used: usize,
    pub messages: usize,
    /// Total volume dispensed.
    pub volume_moved: Volume,
    /// Tip boxes brought onto the deck during planning.
    pub tip_boxes_added: usize,
}

impl PlanSummary {
    fn from_leaves(leaves: &[TerminalInstruction]) -> Self {
        let mut summary = PlanSummary {
            instructions: leaves.len(),
            ..PlanSummary::default()
        };
        for leaf in leaves {
            match leaf {
                TerminalInstruction::Aspirate(_) => summary.aspirates += 1,
                TerminalInstruction::Dispense(_) => {
                    summary.dispenses += 1;
                    summary.volume_moved += leaf.volume();
                }
                TerminalInstruction::LoadTips(_) => {
                    summary.tip_loads += 1;
                    summary.tips_used += leaf.active_channels();
                }
                TerminalInstruction::Message(_) => summary.messages += 1,
                _ => {}
            }
        }
        summary
    }
}

/// The outcome of one planning pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub planned_at: DateTime<Utc>,
    /// Terminal instructions in execution order.
    pub instructions: Vec<TerminalInstruction>,
    /// Deck state once every instruction has run.
    pub final_deck: Deck,
    pub summary: PlanSummary,
}

impl Plan {
    /// Instructions of one kind, in order.
    pub fn of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a TerminalInstruction> {
        self.instructions.iter().filter(move |i| i.kind() == kind)
    }
}

/// Deck, rules and settings for planning protocols.
#[derive(Debug, Clone)]
pub struct LiquidHandler {
    pub deck: Deck,
    pub rules: RuleSet,
    pub settings: PlannerSettings,
}

impl LiquidHandler {
    pub fn new(deck: Deck, rules: RuleSet, settings: PlannerSettings) -> Self {
        Self {
            deck,
            rules,
            settings,
        }
    }

    /// Built-in liquid-class rules and default settings.
    pub fn with_defaults(deck: Deck) -> Self {
        Self::new(deck, RuleSet::with_defaults(), PlannerSettings::default())
    }

    /// Plan `blocks` against a copy of the deck.
    pub fn plan(&self, blocks: Vec<Block>) -> PlanResult<Plan> {
        let span = tracing::info_span!("plan", blocks = blocks.len());
        let _enter = span.enter();

        let mut deck = self.deck.dup_keep_ids();
        let mut tree = InstructionTree::root(blocks);
        {
            let mut ctx = PlanContext::new(&mut deck, &self.rules, &self.settings);
            tree.expand(&mut ctx)?;
        }
        let instructions: Vec<TerminalInstruction> = tree.leaves().into_iter().cloned().collect();
        let mut summary = PlanSummary::from_leaves(&instructions);
        summary.tip_boxes_added = deck.tip_box_count().saturating_sub(self.deck.tip_box_count());

        tracing::info!(
            "planned {} instruction(s): {} aspirate(s), {} tip load(s), {} moved",
            summary.instructions,
            summary.aspirates,
            summary.tip_loads,
            summary.volume_moved
        );
        Ok(Plan {
            id: new_id(),
            planned_at: Utc::now(),
            instructions,
            final_deck: deck,
            summary,
        })
    }

    /// Batch `requests` into blocks and plan them.
    pub fn plan_requests(&self, requests: Vec<Request>) -> PlanResult<Plan> {
        self.plan(Block::from_requests(requests))
    }

    /// Send a plan to a driver, stopping at the first failure.
    pub fn execute<D: LiquidHandlingDriver + ?Sized>(
        &self,
        plan: &Plan,
        driver: &mut D,
    ) -> PlanResult<usize> {
        tracing::info!("executing plan {}", plan.id);
        execute_leaves(driver, &plan.instructions)
    }
}

/// A deck plus the requests to run on it, as read by the command-line tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub deck: Deck,
    pub requests: Vec<Request>,
}

impl Scenario {
    /// Fill the first column of a PCR plate with water from a trough, mix the first
    /// well and tell the operator the plate is ready.
    pub fn demo() -> PlanResult<Self> {
        use crate::catalog;
        use crate::instruction::{MixRequest, PromptRequest, TransferRequest};
        use crate::labware::{WellCoords, WellRef};
        use crate::liquid::{Liquid, LiquidType};
        use crate::volume::DEFAULT_EPSILON_UL;

        let mut deck = catalog::standard_deck();
        let mut trough = catalog::trough_12("buffer trough");
        trough.add_liquid(
            WellCoords::new(0, 0),
            Liquid::new("water", LiquidType::Water, Volume::ml(10.0)),
            DEFAULT_EPSILON_UL,
        )?;
        deck.add_plate("position_4", trough)?;
        let plate = catalog::pcr_plate_96("assay plate");
        let plate_id = plate.id.clone();
        deck.add_plate("position_8", plate)?;

        let mut requests: Vec<Request> = (0..8)
            .map(|row| {
                Request::Transfer(
                    TransferRequest::new(WellRef::new(plate_id.clone(), WellCoords::new(0, row)))
                        .with_component("water", Volume::ul(50.0)),
                )
            })
            .collect();
        requests.push(Request::MixInPlace(MixRequest {
            id: new_id(),
            well: WellRef::new(plate_id, WellCoords::new(0, 0)),
            volume: Volume::ul(20.0),
            cycles: 3,
        }));
        requests.push(Request::Prompt(PromptRequest {
            id: new_id(),
            message: "column 1 filled".into(),
            pause: false,
        }));
        Ok(Self { deck, requests })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use crate::instruction::{PromptRequest, TransferRequest};
    use crate::labware::{WellCoords, WellRef};
    use crate::liquid::Liquid;

    const EPS: f64 = 1e-4;

    #[test]
    fn test_plan_leaves_snapshot_untouched() {
        let mut deck = catalog::standard_deck();
        let mut src = catalog::pcr_plate_96("src");
        src.add_liquid(WellCoords::new(0, 0), Liquid::new("water", "water", Volume::ul(150.0)), EPS)
            .unwrap();
        deck.add_plate("position_4", src).unwrap();
        let dst = catalog::pcr_plate_96("dst");
        let dst_id = dst.id.clone();
        deck.add_plate("position_8", dst).unwrap();
        let before = deck.clone();

        let handler = LiquidHandler::with_defaults(deck);
        let plan = handler
            .plan_requests(vec![Request::Transfer(
                TransferRequest::new(WellRef::new(dst_id.clone(), WellCoords::new(0, 0)))
                    .with_component("water", Volume::ul(25.0)),
            )])
            .unwrap();

        assert_eq!(handler.deck, before);
        assert_eq!(plan.summary.aspirates, 1);
        assert!(plan.summary.volume_moved.approx_eq(Volume::ul(25.0), EPS));
        let moved = plan.final_deck.plate(&dst_id).unwrap().volume(WellCoords::new(0, 0));
        assert!(moved.approx_eq(Volume::ul(25.0), EPS));
    }

    #[test]
    fn test_summary_counts_messages() {
        let handler = LiquidHandler::with_defaults(catalog::standard_deck());
        let plan = handler
            .plan_requests(vec![Request::Prompt(PromptRequest {
                id: new_id(),
                message: "add reagent".into(),
                pause: true,
            })])
            .unwrap();
        assert_eq!(plan.summary.messages, 1);
        assert_eq!(plan.of_kind("message").count(), 1);
        assert_eq!(plan.summary.tip_boxes_added, 0);
    }
}

//! The instruction tree: a root bracketing request blocks, expanded depth-first.
//!
//! Expansion is strictly sequential. Each node expands before its children and each
//! subtree finishes before its next sibling starts, so later siblings observe the deck
//! as earlier ones left it. A node's children are produced once; expanding an already
//! expanded tree changes nothing.

use super::terminal::{
    FinalizeCmd, InitializeCmd, ResetPistonsCmd, SetDriveSpeedCmd, TerminalInstruction,
};
use super::{Block, Instruction};
use crate::config::PlannerSettings;
use crate::deck::Deck;
use crate::error::PlanResult;
use crate::policy::RuleSet;

/// Shared state threaded through one expansion pass.
pub struct PlanContext<'a> {
    pub deck: &'a mut Deck,
    pub rules: &'a RuleSet,
    pub settings: &'a PlannerSettings,
}

impl<'a> PlanContext<'a> {
    pub fn new(deck: &'a mut Deck, rules: &'a RuleSet, settings: &'a PlannerSettings) -> Self {
        Self {
            deck,
            rules,
            settings,
        }
    }

    pub fn deck(&self) -> &Deck {
        &*self.deck
    }
}

#[derive(Debug, Clone, Default)]
pub struct InstructionTree {
    /// `None` only at the root.
    pub instruction: Option<Instruction>,
    pub children: Vec<InstructionTree>,
    blocks: Vec<Block>,
    expanded: bool,
}

impl InstructionTree {
    /// A root node over `blocks`; nothing is expanded yet.
    pub fn root(blocks: Vec<Block>) -> Self {
        Self {
            instruction: None,
            children: Vec::new(),
            blocks,
            expanded: false,
        }
    }

    fn node(instruction: Instruction) -> Self {
        Self {
            instruction: Some(instruction),
            ..Self::default()
        }
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    fn root_children(&self, ctx: &PlanContext<'_>) -> Vec<Instruction> {
        let mut children: Vec<Instruction> =
            vec![TerminalInstruction::Initialize(InitializeCmd {}).into()];
        for (head, _) in ctx.deck().loaded_heads() {
            children.push(TerminalInstruction::ResetPistons(ResetPistonsCmd { head }).into());
        }
        if let Some(speed) = ctx.settings.drive_speed_mm_s {
            children.push(
                TerminalInstruction::SetDriveSpeed(SetDriveSpeedCmd {
                    axis: "xyz".to_string(),
                    speed_mm_s: speed,
                })
                .into(),
            );
        }
        children.extend(self.blocks.iter().cloned().map(Instruction::from));
        children.push(TerminalInstruction::Finalize(FinalizeCmd {}).into());
        children
    }

    /// Expand this node and then every child, in order.
    ///
    /// Stops at the first error. A node whose subtree failed drops its children and
    /// reads as unexpanded again, so an aborted tree yields no leaves. The deck in
    /// `ctx` keeps whatever the expanded part already did to it.
    pub fn expand(&mut self, ctx: &mut PlanContext<'_>) -> PlanResult<()> {
        if !self.expanded {
            let children = match &self.instruction {
                Some(instruction) => instruction.expand(ctx)?,
                None => self.root_children(ctx),
            };
            self.children = children.into_iter().map(Self::node).collect();
            self.expanded = true;
        }
        let result = self
            .children
            .iter_mut()
            .try_for_each(|child| child.expand(ctx));
        if result.is_err() {
            self.children.clear();
            self.expanded = false;
        }
        result
    }

    /// Terminal leaves in tree order.
    pub fn leaves(&self) -> Vec<&TerminalInstruction> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'t>(&'t self, out: &mut Vec<&'t TerminalInstruction>) {
        if self.children.is_empty() {
            if let Some(terminal) = self.instruction.as_ref().and_then(Instruction::as_terminal) {
                out.push(terminal);
            }
            return;
        }
        for child in &self.children {
            child.collect_leaves(out);
        }
    }

    /// Nodes in the whole tree, root included.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(Self::node_count).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use crate::instruction::request::{PromptRequest, SplitRequest};
    use crate::labware::{WellCoords, WellRef};
    use crate::liquid::new_id;

    fn prompt(text: &str) -> Block {
        Block::Prompt {
            requests: vec![PromptRequest {
                id: new_id(),
                message: text.into(),
                pause: false,
            }],
        }
    }

    #[test]
    fn test_root_brackets_blocks() {
        let mut deck = catalog::standard_deck();
        let rules = RuleSet::with_defaults();
        let settings = PlannerSettings::default();
        let mut ctx = PlanContext::new(&mut deck, &rules, &settings);

        let mut tree = InstructionTree::root(vec![prompt("hello")]);
        tree.expand(&mut ctx).unwrap();
        let kinds: Vec<_> = tree.leaves().iter().map(|t| t.kind()).collect();
        assert_eq!(
            kinds,
            vec!["initialize", "reset_pistons", "reset_pistons", "message", "finalize"]
        );
    }

    #[test]
    fn test_expansion_is_idempotent() {
        let mut deck = catalog::standard_deck();
        let rules = RuleSet::with_defaults();
        let mut settings = PlannerSettings::default();
        settings.drive_speed_mm_s = Some(250.0);
        let mut ctx = PlanContext::new(&mut deck, &rules, &settings);

        let mut tree = InstructionTree::root(vec![prompt("a"), prompt("b")]);
        tree.expand(&mut ctx).unwrap();
        let first = tree.node_count();
        tree.expand(&mut ctx).unwrap();
        assert_eq!(tree.node_count(), first);
        assert!(tree.is_expanded());
        assert_eq!(tree.leaves()[3].kind(), "set_drive_speed");
    }

    #[test]
    fn test_failed_block_discards_partial_tree() {
        let mut deck = catalog::standard_deck();
        let rules = RuleSet::with_defaults();
        let settings = PlannerSettings::default();
        let mut ctx = PlanContext::new(&mut deck, &rules, &settings);

        let split_of_missing_plate = Block::Split {
            requests: vec![SplitRequest {
                id: new_id(),
                well: WellRef::new("nowhere", WellCoords::new(0, 0)),
                new_liquid_id: new_id(),
            }],
        };
        let mut tree = InstructionTree::root(vec![prompt("before"), split_of_missing_plate]);
        assert!(tree.expand(&mut ctx).is_err());
        assert!(!tree.is_expanded());
        assert!(tree.leaves().is_empty());
        assert_eq!(tree.node_count(), 1);
    }

    #[test]
    fn test_unexpanded_tree_has_no_leaves() {
        let tree = InstructionTree::root(vec![prompt("a")]);
        assert!(tree.leaves().is_empty());
    }
}

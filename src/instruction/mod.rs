//! Instruction model and the recursive expansion protocol.
//!
//! Every planning step is an [`Instruction`] variant. Expanding a variant may consult the
//! rule engine, the channel chooser, the tip inventory and the source matcher, mutates
//! the deck, and yields child instructions. Expansion bottoms out in
//! [`TerminalInstruction`]s, which map one-to-one onto driver calls.
//!
//! ```text
//! root ─┬─ Initialize, ResetPistons ...
//!       ├─ TransferBlock ── Transfer ── ChannelBlock ─┬─ LoadTips
//!       │                                             ├─ ChannelTransfer ── Move, Aspirate ...
//!       │                                             └─ UnloadTips
//!       ├─ SplitBlock       (deck bookkeeping only)
//!       ├─ PromptBlock ──── Message
//!       └─ Finalize
//! ```

pub mod blocks;
pub mod merge;
pub mod request;
pub mod terminal;
pub mod transfer;
pub mod tree;

pub use blocks::{MixBlock, PromptBlock, SplitBlock, TransferBlock};
pub use merge::merge_adjacent;
pub use request::{Block, MixRequest, PromptRequest, Request, SplitRequest, TransferRequest};
pub use terminal::TerminalInstruction;
pub use transfer::{
    ChannelBlock, ChannelMix, ChannelTransfer, ParamSet, TransferInstruction, TransferParams,
};
pub use tree::{InstructionTree, PlanContext};

use crate::error::PlanResult;
use serde::{Deserialize, Serialize};

/// Closed set of instruction variants, from request blocks down to driver calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "instruction", rename_all = "snake_case")]
pub enum Instruction {
    TransferBlock(TransferBlock),
    MixBlock(MixBlock),
    SplitBlock(SplitBlock),
    PromptBlock(PromptBlock),
    Transfer(TransferInstruction),
    ChannelBlock(ChannelBlock),
    ChannelTransfer(ChannelTransfer),
    ChannelMix(ChannelMix),
    Terminal(TerminalInstruction),
}

impl Instruction {
    pub fn kind(&self) -> &'static str {
        match self {
            Instruction::TransferBlock(_) => "transfer_block",
            Instruction::MixBlock(_) => "mix_block",
            Instruction::SplitBlock(_) => "split_block",
            Instruction::PromptBlock(_) => "prompt_block",
            Instruction::Transfer(_) => "transfer",
            Instruction::ChannelBlock(_) => "channel_block",
            Instruction::ChannelTransfer(_) => "channel_transfer",
            Instruction::ChannelMix(_) => "channel_mix",
            Instruction::Terminal(t) => t.kind(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Instruction::Terminal(_))
    }

    pub fn as_terminal(&self) -> Option<&TerminalInstruction> {
        match self {
            Instruction::Terminal(t) => Some(t),
            _ => None,
        }
    }

    /// Produce this instruction's children, updating the deck as a side effect.
    ///
    /// Terminal instructions have no children.
    pub fn expand(&self, ctx: &mut PlanContext<'_>) -> PlanResult<Vec<Instruction>> {
        let span = tracing::debug_span!("expand", kind = self.kind());
        let _enter = span.enter();
        let children = match self {
            Instruction::TransferBlock(b) => b.expand(ctx)?,
            Instruction::MixBlock(b) => b.expand(ctx)?,
            Instruction::SplitBlock(b) => b.expand(ctx)?,
            Instruction::PromptBlock(b) => b.expand(ctx)?,
            Instruction::Transfer(t) => t.expand(ctx)?,
            Instruction::ChannelBlock(b) => b.expand(ctx)?,
            Instruction::ChannelTransfer(t) => t.expand(ctx)?,
            Instruction::ChannelMix(m) => m.expand(ctx)?,
            Instruction::Terminal(_) => Vec::new(),
        };
        tracing::debug!("{} child instruction(s)", children.len());
        Ok(children)
    }
}

impl From<Block> for Instruction {
    fn from(block: Block) -> Self {
        match block {
            Block::Transfer { requests } => Instruction::TransferBlock(TransferBlock { requests }),
            Block::Mix { requests } => Instruction::MixBlock(MixBlock { requests }),
            Block::Split { requests } => Instruction::SplitBlock(SplitBlock { requests }),
            Block::Prompt { requests } => Instruction::PromptBlock(PromptBlock { requests }),
        }
    }
}

impl From<TerminalInstruction> for Instruction {
    fn from(terminal: TerminalInstruction) -> Self {
        Instruction::Terminal(terminal)
    }
}

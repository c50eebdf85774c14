//! Simulated robot for testing without hardware.
//!
//! `RecordingDriver` keeps a log of every call it receives and enough state to reject
//! calls a real robot would refuse:
//!
//! - any call other than `initialize` before initialisation (code 1)
//! - loading tips on a channel that already carries one (code 2)
//! - aspirating or dispensing on a channel without a tip (code 3)
//! - dispensing more than the channel holds (code 4)
//!
//! A failure can also be injected at a given call index (code 99).

use super::{CommandStatus, LiquidHandlingDriver};
use crate::instruction::terminal::{
    AspirateCmd, BlowoutCmd, DispenseCmd, LoadTipsCmd, MessageCmd, MixCmd, MoveCmd,
    ResetPistonsCmd, SetDriveSpeedCmd, SetPipetteSpeedCmd, UnloadTipsCmd, WaitCmd,
};
use crate::volume::{Volume, DEFAULT_EPSILON_UL};
use std::collections::BTreeMap;

pub const CODE_NOT_INITIALIZED: i32 = 1;
pub const CODE_TIP_PRESENT: i32 = 2;
pub const CODE_NO_TIP: i32 = 3;
pub const CODE_OVERDRAWN: i32 = 4;
pub const CODE_INJECTED: i32 = 99;

#[derive(Debug, Clone, Default)]
struct HeadState {
    tips: Vec<bool>,
    held: Vec<Volume>,
}

impl HeadState {
    fn ensure(&mut self, channels: usize) {
        if self.tips.len() < channels {
            self.tips.resize(channels, false);
            self.held.resize(channels, Volume::ZERO);
        }
    }
}

/// In-memory driver that records calls.
#[derive(Debug, Clone, Default)]
pub struct RecordingDriver {
    /// Call names in the order received.
    pub calls: Vec<String>,
    /// Operator messages shown.
    pub messages: Vec<String>,
    pub aspirated: Volume,
    pub dispensed: Volume,
    fail_at: Option<usize>,
    initialized: bool,
    heads: BTreeMap<usize, HeadState>,
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the call with this zero-based index.
    pub fn failing_at(index: usize) -> Self {
        Self {
            fail_at: Some(index),
            ..Self::default()
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Tips currently carried by a head.
    pub fn tips_on(&self, head: usize) -> usize {
        self.heads
            .get(&head)
            .map_or(0, |h| h.tips.iter().filter(|t| **t).count())
    }

    fn record(&mut self, name: &str) -> Option<CommandStatus> {
        let index = self.calls.len();
        self.calls.push(name.to_string());
        if self.fail_at == Some(index) {
            return Some(CommandStatus::error(
                CODE_INJECTED,
                format!("injected failure at call {index}"),
            ));
        }
        if !self.initialized && name != "initialize" {
            return Some(CommandStatus::error(
                CODE_NOT_INITIALIZED,
                "robot not initialised",
            ));
        }
        None
    }

    fn head(&mut self, head: usize, channels: usize) -> &mut HeadState {
        let state = self.heads.entry(head).or_default();
        state.ensure(channels);
        state
    }
}

impl LiquidHandlingDriver for RecordingDriver {
    fn initialize(&mut self) -> CommandStatus {
        if let Some(status) = self.record("initialize") {
            return status;
        }
        self.initialized = true;
        CommandStatus::ok()
    }

    fn finalize(&mut self) -> CommandStatus {
        if let Some(status) = self.record("finalize") {
            return status;
        }
        self.initialized = false;
        CommandStatus::ok()
    }

    fn move_to(&mut self, _cmd: &MoveCmd) -> CommandStatus {
        self.record("move").unwrap_or_else(CommandStatus::ok)
    }

    fn aspirate(&mut self, cmd: &AspirateCmd) -> CommandStatus {
        if let Some(status) = self.record("aspirate") {
            return status;
        }
        let state = self.head(cmd.head, cmd.volumes.len());
        for (channel, volume) in cmd.volumes.iter().enumerate() {
            if volume.is_zero(DEFAULT_EPSILON_UL) {
                continue;
            }
            if !state.tips[channel] {
                return CommandStatus::error(
                    CODE_NO_TIP,
                    format!("aspirate on bare channel {channel}"),
                );
            }
            state.held[channel] += *volume;
        }
        self.aspirated += cmd.volumes.iter().sum::<Volume>();
        CommandStatus::ok()
    }

    fn dispense(&mut self, cmd: &DispenseCmd) -> CommandStatus {
        if let Some(status) = self.record("dispense") {
            return status;
        }
        let state = self.head(cmd.head, cmd.volumes.len());
        for (channel, volume) in cmd.volumes.iter().enumerate() {
            if volume.is_zero(DEFAULT_EPSILON_UL) {
                continue;
            }
            if !state.tips[channel] {
                return CommandStatus::error(
                    CODE_NO_TIP,
                    format!("dispense on bare channel {channel}"),
                );
            }
            if volume.greater_than(state.held[channel], DEFAULT_EPSILON_UL) {
                return CommandStatus::error(
                    CODE_OVERDRAWN,
                    format!(
                        "channel {channel} holds {} but was asked for {volume}",
                        state.held[channel]
                    ),
                );
            }
            state.held[channel] = state.held[channel].saturating_sub(*volume, DEFAULT_EPSILON_UL);
        }
        self.dispensed += cmd.volumes.iter().sum::<Volume>();
        CommandStatus::ok()
    }

    fn blowout(&mut self, cmd: &BlowoutCmd) -> CommandStatus {
        if let Some(status) = self.record("blowout") {
            return status;
        }
        let state = self.head(cmd.head, cmd.mask.len());
        for (channel, active) in cmd.mask.iter().enumerate() {
            if *active {
                state.held[channel] = Volume::ZERO;
            }
        }
        CommandStatus::ok()
    }

    fn mix(&mut self, cmd: &MixCmd) -> CommandStatus {
        if let Some(status) = self.record("mix") {
            return status;
        }
        let state = self.head(cmd.head, cmd.mask.len());
        match cmd
            .mask
            .iter()
            .enumerate()
            .find(|(channel, active)| **active && !state.tips[*channel])
        {
            Some((channel, _)) => {
                CommandStatus::error(CODE_NO_TIP, format!("mix on bare channel {channel}"))
            }
            None => CommandStatus::ok(),
        }
    }

    fn load_tips(&mut self, cmd: &LoadTipsCmd) -> CommandStatus {
        if let Some(status) = self.record("load_tips") {
            return status;
        }
        let state = self.head(cmd.head, cmd.mask.len());
        for (channel, active) in cmd.mask.iter().enumerate() {
            if !*active {
                continue;
            }
            if state.tips[channel] {
                return CommandStatus::error(
                    CODE_TIP_PRESENT,
                    format!("channel {channel} already carries a tip"),
                );
            }
            state.tips[channel] = true;
        }
        CommandStatus::ok()
    }

    fn unload_tips(&mut self, cmd: &UnloadTipsCmd) -> CommandStatus {
        if let Some(status) = self.record("unload_tips") {
            return status;
        }
        let state = self.head(cmd.head, cmd.mask.len());
        for (channel, active) in cmd.mask.iter().enumerate() {
            if *active {
                state.tips[channel] = false;
                state.held[channel] = Volume::ZERO;
            }
        }
        CommandStatus::ok()
    }

    fn set_pipette_speed(&mut self, _cmd: &SetPipetteSpeedCmd) -> CommandStatus {
        self.record("set_pipette_speed")
            .unwrap_or_else(CommandStatus::ok)
    }

    fn set_drive_speed(&mut self, _cmd: &SetDriveSpeedCmd) -> CommandStatus {
        self.record("set_drive_speed").unwrap_or_else(CommandStatus::ok)
    }

    fn wait(&mut self, _cmd: &WaitCmd) -> CommandStatus {
        self.record("wait").unwrap_or_else(CommandStatus::ok)
    }

    fn message(&mut self, cmd: &MessageCmd) -> CommandStatus {
        if let Some(status) = self.record("message") {
            return status;
        }
        self.messages.push(cmd.text.clone());
        CommandStatus::ok()
    }

    fn reset_pistons(&mut self, cmd: &ResetPistonsCmd) -> CommandStatus {
        if let Some(status) = self.record("reset_pistons") {
            return status;
        }
        if let Some(state) = self.heads.get_mut(&cmd.head) {
            state.held.iter_mut().for_each(|v| *v = Volume::ZERO);
        }
        CommandStatus::ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{execute_leaves, LiquidHandlingDriver};
    use crate::error::PlanError;
    use crate::instruction::terminal::{FinalizeCmd, InitializeCmd};
    use crate::instruction::TerminalInstruction;

    fn load(head: usize, mask: Vec<bool>) -> TerminalInstruction {
        TerminalInstruction::LoadTips(LoadTipsCmd {
            head,
            position: "position_2".into(),
            tip_box_id: "box".into(),
            tip_type: "Gilson200".into(),
            wells: vec![Some("A1".into()); mask.len()],
            mask,
        })
    }

    fn aspirate(head: usize, volumes: Vec<Volume>) -> TerminalInstruction {
        let n = volumes.len();
        TerminalInstruction::Aspirate(AspirateCmd {
            head,
            volumes,
            liquid_classes: vec![None; n],
            speed: 100.0,
        })
    }

    #[test]
    fn test_calls_before_initialize_are_rejected() {
        let mut driver = RecordingDriver::new();
        let status = driver.wait(&WaitCmd { seconds: 1.0 });
        assert!(!status.ok);
        assert_eq!(status.code, CODE_NOT_INITIALIZED);
    }

    #[test]
    fn test_aspirate_needs_tips() {
        let leaves = vec![
            TerminalInstruction::Initialize(InitializeCmd {}),
            aspirate(0, vec![Volume::ul(10.0)]),
        ];
        let mut driver = RecordingDriver::new();
        let err = execute_leaves(&mut driver, &leaves).unwrap_err();
        match err {
            PlanError::DriverFailure { instruction, code, .. } => {
                assert_eq!(instruction, "aspirate");
                assert_eq!(code, CODE_NO_TIP);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_injected_failure_stops_execution() {
        let leaves = vec![
            TerminalInstruction::Initialize(InitializeCmd {}),
            load(0, vec![true]),
            aspirate(0, vec![Volume::ul(10.0)]),
            TerminalInstruction::Finalize(FinalizeCmd {}),
        ];
        let mut driver = RecordingDriver::failing_at(2);
        assert!(execute_leaves(&mut driver, &leaves).is_err());
        assert_eq!(driver.calls.len(), 3);
        assert!(driver.is_initialized());
    }

    #[test]
    fn test_tracks_tips_and_volume() {
        let leaves = vec![
            TerminalInstruction::Initialize(InitializeCmd {}),
            load(1, vec![true, true, false]),
            aspirate(1, vec![Volume::ul(5.0), Volume::ul(5.0), Volume::ZERO]),
        ];
        let mut driver = RecordingDriver::new();
        assert_eq!(execute_leaves(&mut driver, &leaves).unwrap(), 3);
        assert_eq!(driver.tips_on(1), 2);
        assert_eq!(driver.aspirated, Volume::ul(10.0));
    }
}

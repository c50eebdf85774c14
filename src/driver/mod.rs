//! Driver interface: one call per terminal instruction.
//!
//! A driver reports each call with a [`CommandStatus`]. Executing a plan walks the
//! terminal leaves in order and stops at the first non-ok status, which becomes
//! [`PlanError::DriverFailure`]. Nothing after the failing call is sent.
//!
//! # Available Drivers
//!
//! - [`RecordingDriver`] - in-memory simulator that records every call and tracks
//!   tips and volumes, with optional failure injection

pub mod mock;

pub use mock::RecordingDriver;

use crate::error::{PlanError, PlanResult};
use crate::instruction::terminal::{
    AspirateCmd, BlowoutCmd, DispenseCmd, LoadTipsCmd, MessageCmd, MixCmd, MoveCmd,
    ResetPistonsCmd, SetDriveSpeedCmd, SetPipetteSpeedCmd, UnloadTipsCmd, WaitCmd,
};
use crate::instruction::TerminalInstruction;
use serde::{Deserialize, Serialize};

/// Result of one driver call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandStatus {
    pub ok: bool,
    pub code: i32,
    pub message: String,
}

impl CommandStatus {
    pub fn ok() -> Self {
        Self {
            ok: true,
            code: 0,
            message: String::new(),
        }
    }

    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            code,
            message: message.into(),
        }
    }
}

/// A liquid-handling robot, physical or simulated.
pub trait LiquidHandlingDriver {
    fn initialize(&mut self) -> CommandStatus;
    fn finalize(&mut self) -> CommandStatus;
    fn move_to(&mut self, cmd: &MoveCmd) -> CommandStatus;
    fn aspirate(&mut self, cmd: &AspirateCmd) -> CommandStatus;
    fn dispense(&mut self, cmd: &DispenseCmd) -> CommandStatus;
    fn blowout(&mut self, cmd: &BlowoutCmd) -> CommandStatus;
    fn mix(&mut self, cmd: &MixCmd) -> CommandStatus;
    fn load_tips(&mut self, cmd: &LoadTipsCmd) -> CommandStatus;
    fn unload_tips(&mut self, cmd: &UnloadTipsCmd) -> CommandStatus;
    fn set_pipette_speed(&mut self, cmd: &SetPipetteSpeedCmd) -> CommandStatus;
    fn set_drive_speed(&mut self, cmd: &SetDriveSpeedCmd) -> CommandStatus;
    fn wait(&mut self, cmd: &WaitCmd) -> CommandStatus;
    fn message(&mut self, cmd: &MessageCmd) -> CommandStatus;
    fn reset_pistons(&mut self, cmd: &ResetPistonsCmd) -> CommandStatus;
}

/// Send one terminal instruction to the matching driver call.
pub fn dispatch<D: LiquidHandlingDriver + ?Sized>(
    driver: &mut D,
    instruction: &TerminalInstruction,
) -> CommandStatus {
    match instruction {
        TerminalInstruction::Initialize(_) => driver.initialize(),
        TerminalInstruction::Finalize(_) => driver.finalize(),
        TerminalInstruction::Move(c) => driver.move_to(c),
        TerminalInstruction::Aspirate(c) => driver.aspirate(c),
        TerminalInstruction::Dispense(c) => driver.dispense(c),
        TerminalInstruction::Blowout(c) => driver.blowout(c),
        TerminalInstruction::Mix(c) => driver.mix(c),
        TerminalInstruction::LoadTips(c) => driver.load_tips(c),
        TerminalInstruction::UnloadTips(c) => driver.unload_tips(c),
        TerminalInstruction::SetPipetteSpeed(c) => driver.set_pipette_speed(c),
        TerminalInstruction::SetDriveSpeed(c) => driver.set_drive_speed(c),
        TerminalInstruction::Wait(c) => driver.wait(c),
        TerminalInstruction::Message(c) => driver.message(c),
        TerminalInstruction::ResetPistons(c) => driver.reset_pistons(c),
    }
}

/// Run `leaves` in order, returning how many were executed.
pub fn execute_leaves<'a, D, I>(driver: &mut D, leaves: I) -> PlanResult<usize>
where
    D: LiquidHandlingDriver + ?Sized,
    I: IntoIterator<Item = &'a TerminalInstruction>,
{
    let mut executed = 0;
    for (index, instruction) in leaves.into_iter().enumerate() {
        let status = dispatch(driver, instruction);
        if !status.ok {
            tracing::error!(
                "driver rejected instruction {} ({}): code {} {}",
                index,
                instruction,
                status.code,
                status.message
            );
            return Err(PlanError::DriverFailure {
                instruction: instruction.kind().to_string(),
                code: status.code,
                message: status.message,
            });
        }
        executed += 1;
    }
    tracing::info!("driver executed {} instruction(s)", executed);
    Ok(executed)
}

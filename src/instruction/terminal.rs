//! Terminal instructions: the leaves of the instruction tree, one per driver call.
//!
//! Per-channel fields are parallel arrays indexed by the head's channel number; idle
//! channels carry `None` (or zero volume and `false` in masks).

use crate::policy::WellReference;
use crate::volume::Volume;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InitializeCmd {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinalizeCmd {}

/// Position the channels of a head over wells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveCmd {
    pub head: usize,
    /// Deck position per channel.
    pub positions: Vec<Option<String>>,
    /// Well name (A1 notation) per channel.
    pub wells: Vec<Option<String>>,
    pub plate_types: Vec<Option<String>>,
    pub reference: WellReference,
    pub offset_z_mm: f64,
}

/// Draw liquid into the tips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AspirateCmd {
    pub head: usize,
    pub volumes: Vec<Volume>,
    pub liquid_classes: Vec<Option<String>>,
    pub speed: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispenseCmd {
    pub head: usize,
    pub volumes: Vec<Volume>,
    pub liquid_classes: Vec<Option<String>>,
    pub speed: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlowoutCmd {
    pub head: usize,
    pub volumes: Vec<Volume>,
    pub mask: Vec<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixCmd {
    pub head: usize,
    pub volumes: Vec<Volume>,
    pub cycles: u32,
    pub rate: f64,
    pub mask: Vec<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadTipsCmd {
    pub head: usize,
    pub position: String,
    pub tip_box_id: String,
    pub tip_type: String,
    /// Tip slot (A1 notation) per channel.
    pub wells: Vec<Option<String>>,
    pub mask: Vec<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnloadTipsCmd {
    pub head: usize,
    pub position: String,
    pub mask: Vec<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetPipetteSpeedCmd {
    pub head: usize,
    /// Plunger rate in ul/s.
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetDriveSpeedCmd {
    pub axis: String,
    pub speed_mm_s: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitCmd {
    pub seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageCmd {
    pub text: String,
    /// Whether execution pauses until the operator acknowledges.
    pub pause: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetPistonsCmd {
    pub head: usize,
}

/// Instructions that map one-to-one onto driver calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TerminalInstruction {
    Initialize(InitializeCmd),
    Finalize(FinalizeCmd),
    Move(MoveCmd),
    Aspirate(AspirateCmd),
    Dispense(DispenseCmd),
    Blowout(BlowoutCmd),
    Mix(MixCmd),
    LoadTips(LoadTipsCmd),
    UnloadTips(UnloadTipsCmd),
    SetPipetteSpeed(SetPipetteSpeedCmd),
    SetDriveSpeed(SetDriveSpeedCmd),
    Wait(WaitCmd),
    Message(MessageCmd),
    ResetPistons(ResetPistonsCmd),
}

impl TerminalInstruction {
    pub fn kind(&self) -> &'static str {
        match self {
            TerminalInstruction::Initialize(_) => "initialize",
            TerminalInstruction::Finalize(_) => "finalize",
            TerminalInstruction::Move(_) => "move",
            TerminalInstruction::Aspirate(_) => "aspirate",
            TerminalInstruction::Dispense(_) => "dispense",
            TerminalInstruction::Blowout(_) => "blowout",
            TerminalInstruction::Mix(_) => "mix",
            TerminalInstruction::LoadTips(_) => "load_tips",
            TerminalInstruction::UnloadTips(_) => "unload_tips",
            TerminalInstruction::SetPipetteSpeed(_) => "set_pipette_speed",
            TerminalInstruction::SetDriveSpeed(_) => "set_drive_speed",
            TerminalInstruction::Wait(_) => "wait",
            TerminalInstruction::Message(_) => "message",
            TerminalInstruction::ResetPistons(_) => "reset_pistons",
        }
    }

    /// Number of channels doing work, for channel-level instructions.
    pub fn active_channels(&self) -> usize {
        let nonzero = |v: &[Volume]| v.iter().filter(|v| v.as_ul() > 0.0).count();
        let set = |m: &[bool]| m.iter().filter(|b| **b).count();
        match self {
            TerminalInstruction::Move(c) => c.wells.iter().flatten().count(),
            TerminalInstruction::Aspirate(c) => nonzero(&c.volumes),
            TerminalInstruction::Dispense(c) => nonzero(&c.volumes),
            TerminalInstruction::Blowout(c) => set(&c.mask),
            TerminalInstruction::Mix(c) => set(&c.mask),
            TerminalInstruction::LoadTips(c) => set(&c.mask),
            TerminalInstruction::UnloadTips(c) => set(&c.mask),
            _ => 0,
        }
    }

    /// Total volume moved by an aspirate or dispense.
    pub fn volume(&self) -> Volume {
        match self {
            TerminalInstruction::Aspirate(c) => c.volumes.iter().sum(),
            TerminalInstruction::Dispense(c) => c.volumes.iter().sum(),
            _ => Volume::ZERO,
        }
    }
}

impl fmt::Display for TerminalInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalInstruction::Move(c) => write!(
                f,
                "move head {} -> {}",
                c.head,
                c.wells
                    .iter()
                    .zip(&c.positions)
                    .map(|(w, p)| match (w, p) {
                        (Some(w), Some(p)) => format!("{p}:{w}"),
                        _ => "-".to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(",")
            ),
            TerminalInstruction::Aspirate(c) => {
                write!(f, "aspirate head {} {}", c.head, self.volume())
            }
            TerminalInstruction::Dispense(c) => {
                write!(f, "dispense head {} {}", c.head, self.volume())
            }
            TerminalInstruction::LoadTips(c) => write!(
                f,
                "load {} {} tips on head {} from {}",
                self.active_channels(),
                c.tip_type,
                c.head,
                c.position
            ),
            TerminalInstruction::UnloadTips(c) => write!(
                f,
                "unload {} tips from head {} to {}",
                self.active_channels(),
                c.head,
                c.position
            ),
            TerminalInstruction::Message(c) => write!(f, "message \"{}\"", c.text),
            TerminalInstruction::Wait(c) => write!(f, "wait {}s", c.seconds),
            other => f.write_str(other.kind()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_tag_is_kind() {
        let ins = TerminalInstruction::Wait(WaitCmd { seconds: 1.5 });
        let json = serde_json::to_value(&ins).unwrap();
        assert_eq!(json["kind"], "wait");
        let back: TerminalInstruction = serde_json::from_value(json).unwrap();
        assert_eq!(back, ins);
    }

    #[test]
    fn test_active_channels_counts_nonzero_volumes() {
        let ins = TerminalInstruction::Aspirate(AspirateCmd {
            head: 1,
            volumes: vec![Volume::ul(10.0), Volume::ZERO, Volume::ul(10.0)],
            liquid_classes: vec![None; 3],
            speed: 100.0,
        });
        assert_eq!(ins.active_channels(), 2);
        assert_eq!(ins.volume(), Volume::ul(20.0));
        assert_eq!(ins.to_string(), "aspirate head 1 20.000 ul");
    }
}

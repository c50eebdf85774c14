//! Execution planner for liquid-handling robots.
//!
//! The library turns high-level liquid-handling requests (transfer these components
//! into that well, mix this well, prompt the operator) into a flat, ordered list of
//! low-level robot instructions, tracking tips and liquid volumes on a modelled deck
//! as it goes.
//!
//! # Layout
//!
//! - [`volume`], [`liquid`], [`labware`], [`hardware`], [`deck`]: the physical model
//! - [`catalog`]: stock tips, heads, plates and decks
//! - [`policy`]: liquid-class rules resolved to per-transfer handling parameters
//! - [`planner`]: channel choice, tip allocation, source matching and lane grouping
//! - [`instruction`]: the instruction tree and its expansion rules
//! - [`handler`]: the planning facade producing a [`Plan`]
//! - [`driver`]: the robot interface and an in-memory simulator
//! - [`config`], [`logging`], [`error`]: ambient plumbing
//!
//! # Example
//!
//! ```rust,ignore
//! use liquid_planner::{catalog, LiquidHandler, Request, TransferRequest, Volume};
//!
//! let handler = LiquidHandler::with_defaults(deck);
//! let plan = handler.plan_requests(vec![Request::Transfer(
//!     TransferRequest::new(destination).with_component("water", Volume::ul(25.0)),
//! )])?;
//! for instruction in &plan.instructions {
//!     println!("{instruction}");
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod deck;
pub mod driver;
pub mod error;
pub mod handler;
pub mod hardware;
pub mod instruction;
pub mod labware;
pub mod liquid;
pub mod logging;
pub mod planner;
pub mod policy;
pub mod volume;

pub use config::{PlannerConfig, PlannerSettings};
pub use deck::Deck;
pub use driver::{LiquidHandlingDriver, RecordingDriver};
pub use error::{PlanError, PlanResult};
pub use handler::{LiquidHandler, Plan, PlanSummary, Scenario};
pub use instruction::{
    Block, MixRequest, PromptRequest, Request, SplitRequest, TerminalInstruction,
    TransferRequest,
};
pub use labware::{WellCoords, WellRef};
pub use liquid::{Liquid, LiquidType};
pub use policy::{Policy, RuleSet};
pub use volume::Volume;

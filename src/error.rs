//! Custom error types for the planner.
//!
//! This module defines the primary error type, `PlanError`, for the entire crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different ways a planning pass can fail, from impossible volumes and exhausted
//! tip inventory to driver-reported failures during execution.
//!
//! ## Error Hierarchy
//!
//! `PlanError` is an enum that consolidates the failure modes of every stage:
//!
//! - **Volume arithmetic**: `VolumeTooSmall` and `VolumeUnsplittable` are raised when a
//!   requested volume cannot be expressed as legal sub-transfers for a channel.
//! - **Hardware allocation**: `NoTipAvailable`, `NoDeckSpace` and `NoTipWasteCapacity`
//!   cover channel/tip selection and physical tip inventory.
//! - **Source matching**: `InsufficientSource` carries a per-liquid shortfall summary;
//!   `NoProgress` and `SourceNotFound` report a matcher that cannot advance.
//! - **Policies**: `InvalidRuleCondition` and `RuleParse` are raised when rules are
//!   registered or parsed, never at resolution time.
//! - **Execution**: `DriverFailure` wraps a non-ok driver status.
//! - **Configuration**: `Config` wraps figment errors; `Configuration` holds semantic
//!   validation failures.
//! - **Internal**: `Internal`, `UnknownPosition` and `PositionOccupied` indicate that an
//!   invariant of the deck model was violated. These are fatal and never retried.
//!
//! Every planning stage returns `PlanResult<T>` and callers propagate the first error
//! with `?`, so a failed pass never yields a partial instruction stream.

use crate::volume::Volume;
use thiserror::Error;

/// Convenience alias for results using the planner error type.
pub type PlanResult<T> = std::result::Result<T, PlanError>;

/// Volume missing for one liquid when the matcher checks aggregate supply.
#[derive(Debug, Clone, PartialEq)]
pub struct Shortfall {
    /// Liquid name that is under-supplied, followed by the instance id in parentheses
    /// when the request pinned one.
    pub liquid: String,
    /// Total volume still requested.
    pub requested: Volume,
    /// Total volume available across all candidate sources.
    pub available: Volume,
}

impl std::fmt::Display for Shortfall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: want {} have {} (short {})",
            self.liquid,
            self.requested,
            self.available,
            self.requested - self.available
        )
    }
}

fn join_shortfalls(shortfalls: &[Shortfall]) -> String {
    shortfalls
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug)]
pub enum PlanError {
    #[error("Volume {volume} is below the minimum of {min}")]
    VolumeTooSmall { volume: Volume, min: Volume },

    #[error("Volume {volume} cannot be split into parts within [{min}, {max}]")]
    VolumeUnsplittable {
        volume: Volume,
        min: Volume,
        max: Volume,
    },

    #[error("No tip available: {0}")]
    NoTipAvailable(String),

    #[error("No deck space: {0}")]
    NoDeckSpace(String),

    #[error("No tip waste can accept {needed} tips")]
    NoTipWasteCapacity { needed: usize },

    #[error("Insufficient source volume: {}", join_shortfalls(.0))]
    InsufficientSource(Vec<Shortfall>),

    #[error("Source matching made no progress: {0}")]
    NoProgress(String),

    #[error("Source not found: {0}")]
    SourceNotFound(String),

    #[error("Invalid condition in rule '{rule}': {reason}")]
    InvalidRuleCondition { rule: String, reason: String },

    #[error("Rule document could not be parsed: {0}")]
    RuleParse(String),

    #[error("Driver failed on {instruction} (code {code}): {message}")]
    DriverFailure {
        instruction: String,
        code: i32,
        message: String,
    },

    #[error("Deck position '{0}' does not exist")]
    UnknownPosition(String),

    #[error("Deck position '{0}' is already occupied")]
    PositionOccupied(String),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Internal planner error: {0}")]
    Internal(String),
}

impl PlanError {
    /// Errors that indicate a broken invariant rather than an unsatisfiable request.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PlanError::Internal(_) | PlanError::UnknownPosition(_) | PlanError::PositionOccupied(_)
        )
    }
}

impl From<figment::Error> for PlanError {
    fn from(err: figment::Error) -> Self {
        PlanError::Config(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PlanError::NoTipAvailable("no tip fits 0.1 ul".to_string());
        assert_eq!(err.to_string(), "No tip available: no tip fits 0.1 ul");
    }

    #[test]
    fn test_insufficient_source_lists_every_liquid() {
        let err = PlanError::InsufficientSource(vec![
            Shortfall {
                liquid: "water".into(),
                requested: Volume::ul(100.0),
                available: Volume::ul(40.0),
            },
            Shortfall {
                liquid: "dye".into(),
                requested: Volume::ul(10.0),
                available: Volume::ZERO,
            },
        ]);
        let msg = err.to_string();
        assert!(msg.contains("water"));
        assert!(msg.contains("dye"));
        assert!(msg.contains("short 60.000 ul"));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(PlanError::Internal("plate missing".into()).is_fatal());
        assert!(!PlanError::NoTipWasteCapacity { needed: 8 }.is_fatal());
    }
}

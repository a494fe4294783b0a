//! Motion control of the drum stage.
//!
//! Layers, leaves first:
//! - `driver`: unchecked command encoder/decoder over a [`Channel`](crate::adapters::Channel).
//!   Crate-private; nothing outside this module tree can issue raw steps.
//! - [`homing`]: per-axis reference seeking and the homing phase machine.
//! - [`controller`]: [`SafeMotionController`], the only public way to move
//!   the stage.

pub mod controller;
pub(crate) mod driver;
pub mod homing;

pub use controller::{SafeMotionController, StageStatus};
pub use homing::HomingPhase;

use std::fmt;

/// Lifecycle of a stage session.
///
/// `Uninitialized` at construction, `Homing` while references are sought,
/// `Homed` once an origin is established. Any homing or communication failure
/// leads to `Faulted`, left only by a fresh homing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MotionState {
    /// No homing attempted yet
    #[default]
    Uninitialized,
    /// Seeking references
    Homing,
    /// Origin established; moves accepted
    Homed,
    /// Origin untrusted after a failure
    Faulted,
}

impl MotionState {
    /// Whether moves are accepted in this state.
    pub fn accepts_motion(&self) -> bool {
        matches!(self, MotionState::Homed)
    }
}

impl fmt::Display for MotionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MotionState::Uninitialized => "Uninitialized",
            MotionState::Homing => "Homing",
            MotionState::Homed => "Homed",
            MotionState::Faulted => "Faulted",
        })
    }
}

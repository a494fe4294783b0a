//! Custom error types for the stage controller.
//!
//! This module defines the primary error type, `StageError`. Using the
//! `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of errors that can occur while driving the stage.
//!
//! ## Error Classes
//!
//! Errors fall into two classes with different side effects:
//!
//! - **Local rejections** (`NotHomed`, `OutOfRange`, `InvalidPosition`,
//!   `InvalidPulseInterval`, `Configuration`): detected before any command
//!   reaches the hardware. The controller state is left untouched.
//! - **Fatal errors** (`Communication`, `Device`, `UnexpectedResponse`,
//!   `HomingFailure`): the hardware did not do what was asked, or we cannot
//!   tell. The controller records the failure as `Faulted`, invalidates its
//!   origin, and every later move fails fast until a successful re-home.
//!
//! Use [`StageError::is_fatal`] to tell them apart.

use crate::adapters::ChannelError;
use crate::config::ConfigError;
use crate::hardware::MotionState;
use crate::motion::Axis;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the stage error type.
pub type StageResult<T> = std::result::Result<T, StageError>;

/// Which limit a rejected target violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    /// Below `min_steps`
    Min,
    /// Above `max_steps`
    Max,
    /// Outside the plate's safe-radius envelope
    Envelope,
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Bound::Min => "minimum",
            Bound::Max => "maximum",
            Bound::Envelope => "safe envelope",
        })
    }
}

/// Why an axis failed to reach its reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HomingFailReason {
    /// The limit switch was not reported within the travel budget.
    ReferenceNotDetected {
        /// Time allowed for the seek
        budget: Duration,
    },
    /// The device refused the homing command.
    DeviceRejected(String),
}

impl fmt::Display for HomingFailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HomingFailReason::ReferenceNotDetected { budget } => {
                write!(f, "reference not detected within {:?}", budget)
            }
            HomingFailReason::DeviceRejected(response) => {
                write!(f, "device rejected homing: {}", response)
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum StageError {
    #[error("Communication error: {0}")]
    Communication(#[from] ChannelError),

    #[error("Device error: {response}")]
    Device { response: String },

    #[error("Unexpected response to '{command}': {response}")]
    UnexpectedResponse { command: String, response: String },

    #[error("Homing failed on {axis} axis: {reason}")]
    HomingFailure { axis: Axis, reason: HomingFailReason },

    #[error("Stage is not homed (state: {state})")]
    NotHomed { state: MotionState },

    #[error("{axis} target {requested_steps} steps exceeds {bound} limit of {limit_steps} steps")]
    OutOfRange {
        axis: Axis,
        bound: Bound,
        requested_steps: i64,
        limit_steps: i64,
    },

    #[error("{axis} coordinate {value} is not a finite number")]
    InvalidPosition { axis: Axis, value: f64 },

    #[error("{axis} pulse interval {seconds}s is not a positive number")]
    InvalidPulseInterval { axis: Axis, seconds: f64 },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),
}

impl StageError {
    /// Whether this error leaves the stage in an unverified state.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StageError::Communication(_)
                | StageError::Device { .. }
                | StageError::UnexpectedResponse { .. }
                | StageError::HomingFailure { .. }
        )
    }
}

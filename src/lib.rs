//! Safe motion control for the two-axis drum stage.
//!
//! The drum stage positions a probe over a vibrating plate in polar
//! coordinates (radius, angle), driven through a microcontroller on a serial
//! link. This library makes commanding it safe:
//!
//! - Nothing moves until both axes have been homed onto their limit switches.
//! - Every target is checked against the axis limits, and optionally the
//!   plate envelope, before a single step is sent.
//! - Any communication or homing failure faults the stage until it is rehomed.
//!
//! [`SafeMotionController`] is the entry point. It owns a
//! [`Channel`](adapters::Channel): either the real serial port or the
//! in-process [`DummyDrum`](adapters::DummyDrum) simulator.

pub mod adapters;
pub mod config;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod motion;

pub use config::StageConfig;
pub use error::{StageError, StageResult};
pub use hardware::{MotionState, SafeMotionController, StageStatus};
pub use motion::{Axis, Position, StepPosition};

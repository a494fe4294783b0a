//! Position types and unit conversion for the drum stage.
//!
//! The stage has two axes, always listed in the order radius, angle:
//!
//! - **Radius**: linear travel of the probe from the plate centre outwards.
//! - **Angle**: rotation of the drum.
//!
//! Callers work in application units ([`Position`]). The hardware works in
//! motor steps ([`StepPosition`]). The only way to get from one to the other
//! is through [`convert`], which needs the per-axis [`Scale`] and the origin
//! offsets established by homing.

pub mod convert;
pub mod geometry;

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the two stage axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    /// Radial (linear) axis
    Radius,
    /// Angular (rotational) axis
    Angle,
}

impl Axis {
    /// Both axes in their canonical order.
    pub const ALL: [Axis; 2] = [Axis::Radius, Axis::Angle];

    /// Lower-case axis name used in logs and errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            Axis::Radius => "radius",
            Axis::Angle => "angle",
        }
    }

    /// Single-letter prefix of the device commands for this axis (`r_go`, `a_go`).
    pub(crate) fn command_prefix(&self) -> char {
        match self {
            Axis::Radius => 'r',
            Axis::Angle => 'a',
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage position in application units.
///
/// No inherent bounds: a position is only valid relative to the configured
/// [`AxisLimits`] after conversion to steps.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// Radial coordinate
    pub radius: f64,
    /// Angular coordinate
    pub angle: f64,
}

impl Position {
    /// Create a position from its two coordinates.
    pub fn new(radius: f64, angle: f64) -> Self {
        Self { radius, angle }
    }

    /// Coordinate along `axis`.
    pub fn get(&self, axis: Axis) -> f64 {
        match axis {
            Axis::Radius => self.radius,
            Axis::Angle => self.angle,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(r={:.3}, a={:.3})", self.radius, self.angle)
    }
}

/// Raw hardware position in motor steps.
///
/// Produced by [`convert::to_steps`] and by homing; never built from
/// caller-supplied numbers on the motion path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StepPosition {
    /// Radial step counter
    pub radius_steps: i64,
    /// Angular step counter
    pub angle_steps: i64,
}

impl StepPosition {
    pub(crate) fn new(radius_steps: i64, angle_steps: i64) -> Self {
        Self {
            radius_steps,
            angle_steps,
        }
    }

    /// Step counter of `axis`.
    pub fn get(&self, axis: Axis) -> i64 {
        match axis {
            Axis::Radius => self.radius_steps,
            Axis::Angle => self.angle_steps,
        }
    }

    pub(crate) fn set(&mut self, axis: Axis, steps: i64) {
        match axis {
            Axis::Radius => self.radius_steps = steps,
            Axis::Angle => self.angle_steps = steps,
        }
    }
}

impl fmt::Display for StepPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(r={} steps, a={} steps)", self.radius_steps, self.angle_steps)
    }
}

/// Step value of application-unit zero on each axis, fixed at homing time.
pub type OriginOffsets = StepPosition;

/// Travel limits of one axis in steps. Invariant: `min_steps <= max_steps`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisLimits {
    /// Lowest allowed step target
    pub min_steps: i64,
    /// Highest allowed step target
    pub max_steps: i64,
}

impl AxisLimits {
    /// Create limits, returning `None` when `min_steps > max_steps`.
    pub fn new(min_steps: i64, max_steps: i64) -> Option<Self> {
        (min_steps <= max_steps).then_some(Self {
            min_steps,
            max_steps,
        })
    }

    /// Whether `steps` lies in `[min_steps, max_steps]`.
    pub fn contains(&self, steps: i64) -> bool {
        (self.min_steps..=self.max_steps).contains(&steps)
    }
}

/// Steps per application unit on each axis (fixed mechanical constants).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scale {
    /// Radial steps per application unit
    pub radius_steps_per_unit: f64,
    /// Angular steps per application unit
    pub angle_steps_per_unit: f64,
}

impl Scale {
    /// Steps per unit along `axis`.
    pub fn get(&self, axis: Axis) -> f64 {
        match axis {
            Axis::Radius => self.radius_steps_per_unit,
            Axis::Angle => self.angle_steps_per_unit,
        }
    }
}

impl Default for Scale {
    fn default() -> Self {
        Self {
            radius_steps_per_unit: 1.0,
            angle_steps_per_unit: 1.0,
        }
    }
}

//! Application units <-> motor steps.
//!
//! `steps = round(units * steps_per_unit) + origin`. The conversion is lossy
//! at the step boundary: `to_position(to_steps(p))` equals `p` only to within
//! half a step (`0.5 / steps_per_unit` units) on each axis.

use super::{Axis, OriginOffsets, Position, Scale, StepPosition};

/// Convert one coordinate to a step target.
///
/// Float to integer casts saturate, so out-of-range inputs land on
/// `i64::MIN`/`i64::MAX` and are subsequently rejected by the limit check.
pub fn axis_to_steps(value: f64, origin_steps: i64, steps_per_unit: f64) -> i64 {
    let relative = (value * steps_per_unit).round() as i64;
    relative.saturating_add(origin_steps)
}

/// Convert one step counter back to application units.
pub fn axis_to_units(steps: i64, origin_steps: i64, steps_per_unit: f64) -> f64 {
    (steps.saturating_sub(origin_steps)) as f64 / steps_per_unit
}

/// Convert an application position into absolute step targets.
pub fn to_steps(position: Position, origin: OriginOffsets, scale: Scale) -> StepPosition {
    StepPosition {
        radius_steps: axis_to_steps(
            position.radius,
            origin.radius_steps,
            scale.radius_steps_per_unit,
        ),
        angle_steps: axis_to_steps(
            position.angle,
            origin.angle_steps,
            scale.angle_steps_per_unit,
        ),
    }
}

/// Convert a step position into application units.
pub fn to_position(steps: StepPosition, origin: OriginOffsets, scale: Scale) -> Position {
    Position {
        radius: axis_to_units(
            steps.radius_steps,
            origin.radius_steps,
            scale.radius_steps_per_unit,
        ),
        angle: axis_to_units(
            steps.angle_steps,
            origin.angle_steps,
            scale.angle_steps_per_unit,
        ),
    }
}

/// Largest round-trip error on `axis`, in application units.
pub fn resolution(scale: Scale, axis: Axis) -> f64 {
    0.5 / scale.get(axis)
}

//! Plate geometry: the safe-radius envelope and polar/cartesian helpers.

use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

/// Shape of the plate mounted in the drum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlateShape {
    /// No envelope beyond the axis limits.
    None,
    /// Round plate: the probe may travel up to the safe radius at any angle.
    #[default]
    Circle,
    /// Square plate: the allowed radius depends on the angle (walls vs corners).
    Square,
}

/// Safe-radius envelope checked on top of the axis limits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Plate shape
    #[serde(default)]
    pub shape: PlateShape,
    /// Centre-to-edge distance in radial steps
    #[serde(default = "default_safe_radius_steps")]
    pub safe_radius_steps: i64,
}

fn default_safe_radius_steps() -> i64 {
    7300
}

impl Default for Envelope {
    fn default() -> Self {
        Self {
            shape: PlateShape::Circle,
            safe_radius_steps: default_safe_radius_steps(),
        }
    }
}

impl Envelope {
    /// Largest radial step offset (from the radial origin) allowed at
    /// `angle_steps` (from the angular origin), or `None` if unbounded.
    pub fn max_radius_steps(&self, angle_steps: i64, steps_per_turn: f64) -> Option<i64> {
        let safe = self.safe_radius_steps as f64;
        match self.shape {
            PlateShape::None => None,
            PlateShape::Circle => Some(self.safe_radius_steps),
            PlateShape::Square => {
                Some(square_wall_distance(angle_steps as f64, steps_per_turn, safe).floor() as i64)
            }
        }
    }

    /// Smallest [`max_radius_steps`](Self::max_radius_steps) over every angle
    /// step from `from_angle` to `to_angle` inclusive.
    ///
    /// A sweep of a quarter turn or more crosses a wall centre, where the
    /// square is narrowest.
    pub fn min_radius_along(
        &self,
        from_angle: i64,
        to_angle: i64,
        steps_per_turn: f64,
    ) -> Option<i64> {
        match self.shape {
            PlateShape::None => None,
            PlateShape::Circle => Some(self.safe_radius_steps),
            PlateShape::Square => {
                let (lo, hi) = (from_angle.min(to_angle), from_angle.max(to_angle));
                if hi.saturating_sub(lo) as f64 >= steps_per_turn / 4.0 {
                    return Some(self.safe_radius_steps);
                }
                (lo..=hi)
                    .filter_map(|angle| self.max_radius_steps(angle, steps_per_turn))
                    .min()
            }
        }
    }

    /// Whether a radial offset lies outside the circle every angle allows.
    pub fn beyond_safe_radius(&self, radius_steps: i64) -> bool {
        self.shape != PlateShape::None && radius_steps > self.safe_radius_steps
    }
}

/// Distance from the centre of a square of half-width `half_width` to its
/// wall along the ray at `angle_steps`, reduced by the probe-width factor
/// `0.91 + 0.09 cos²(2θ)` (0.91 at the corners, 1.0 at the wall centres).
pub fn square_wall_distance(angle_steps: f64, steps_per_turn: f64, half_width: f64) -> f64 {
    let theta = angle_steps / steps_per_turn * TAU;
    // same factor, written so the wall centres come out exactly 1.0
    let probe_factor = 1.0 - 0.09 * (2.0 * theta).sin().powi(2);
    let sec = (1.0 / theta.cos()).abs();
    let csc = (1.0 / theta.sin()).abs();
    probe_factor * half_width * sec.min(csc)
}

/// Cartesian to polar. Returns `(r, theta)` with theta in radians in
/// `(-π, π]`; `(0, 0)` maps to `(0, 0)`.
pub fn xy_to_polar(x: f64, y: f64) -> (f64, f64) {
    (x.hypot(y), y.atan2(x))
}

/// Polar (theta in radians) to cartesian.
pub fn polar_to_xy(r: f64, theta: f64) -> (f64, f64) {
    (r * theta.cos(), r * theta.sin())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_square_wall_distance_at_wall_and_corner() {
        // wall centre (0 deg): exactly the half width
        let wall = square_wall_distance(0.0, 720.0, 7300.0);
        assert!((wall - 7300.0).abs() < 1e-6);

        // corner (45 deg = 90 steps of 720): sqrt(2) reduced by 0.91
        let corner = square_wall_distance(90.0, 720.0, 7300.0);
        let expected = 0.91 * 7300.0 * std::f64::consts::SQRT_2;
        assert!((corner - expected).abs() < 1e-6);

        // symmetric around the quarter turns
        let quarter = square_wall_distance(180.0, 720.0, 7300.0);
        assert!((quarter - 7300.0).abs() < 1e-6);
    }

    #[test]
    fn test_envelopes() {
        let none = Envelope {
            shape: PlateShape::None,
            safe_radius_steps: 7300,
        };
        assert_eq!(none.max_radius_steps(90, 720.0), None);

        let circle = Envelope::default();
        assert_eq!(circle.shape, PlateShape::Circle);
        assert_eq!(circle.max_radius_steps(90, 720.0), Some(7300));

        let square = Envelope {
            shape: PlateShape::Square,
            safe_radius_steps: 7300,
        };
        assert_eq!(square.max_radius_steps(0, 720.0), Some(7300));
        assert!(square.max_radius_steps(90, 720.0).unwrap() > 9000);
    }

    #[test]
    fn test_narrowest_radius_along_a_sweep() {
        let square = Envelope {
            shape: PlateShape::Square,
            safe_radius_steps: 7300,
        };
        // corner to corner crosses the wall centre at 90 degrees
        assert_eq!(square.min_radius_along(90, 270, 720.0), Some(7300));
        assert_eq!(square.min_radius_along(270, 90, 720.0), Some(7300));
        // a short arc near the corner stays wide
        let near_corner = square.min_radius_along(88, 90, 720.0).unwrap();
        assert_eq!(near_corner, square.max_radius_steps(88, 720.0).unwrap());
        assert!(near_corner > 9000);
        // approaching a wall centre from below
        assert_eq!(square.min_radius_along(100, 180, 720.0), Some(7300));

        assert_eq!(Envelope::default().min_radius_along(0, 500, 720.0), Some(7300));
        let none = Envelope {
            shape: PlateShape::None,
            safe_radius_steps: 7300,
        };
        assert_eq!(none.min_radius_along(0, 500, 720.0), None);
        assert!(!none.beyond_safe_radius(9000));
        assert!(square.beyond_safe_radius(7301));
        assert!(!square.beyond_safe_radius(7300));
    }

    #[test]
    fn test_polar_conversions() {
        let (r, theta) = xy_to_polar(0.0, 10.0);
        assert!((r - 10.0).abs() < 1e-12);
        assert!((theta - std::f64::consts::FRAC_PI_2).abs() < 1e-12);

        assert_eq!(xy_to_polar(0.0, 0.0), (0.0, 0.0));

        let (x, y) = polar_to_xy(r, theta);
        assert!(x.abs() < 1e-9);
        assert!((y - 10.0).abs() < 1e-9);
    }
}

//! Stage configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration, `config/drum.toml` by default)
//! 2. Environment variables (prefixed with `DRUM_`, sections split on `__`)
//!
//! Every field has a default reproducing the original drum apparatus, so an
//! empty or missing file yields a usable configuration.
//!
//! # Environment Variable Overrides
//!
//! ```text
//! DRUM_APPLICATION__LOG_LEVEL=debug
//! DRUM_SERIAL__PORT=/dev/ttyACM0
//! DRUM_TIMEOUTS__HOMING_MS=90000
//! ```
//!
//! # Example
//!
//! ```toml
//! [serial]
//! port = "/dev/ttyACM0"
//! baud_rate = 115200
//!
//! [radius]
//! min_steps = 0
//! max_steps = 10000
//! steps_per_unit = 1.0
//!
//! [angle]
//! min_steps = 0
//! max_steps = 720
//! steps_per_unit = 2.0   # 1 angular step ~ 0.5 degrees
//! wrap_steps = 720
//!
//! [plate]
//! shape = "square"
//! safe_radius_steps = 7300
//! ```

use crate::motion::geometry::{Envelope, PlateShape};
use crate::motion::{Axis, AxisLimits, Scale, StepPosition};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/drum.toml";

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "DRUM_";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Top-level stage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StageConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Serial link to the microcontroller
    pub serial: SerialConfig,
    /// Radial axis
    pub radius: RadiusConfig,
    /// Angular axis
    pub angle: AngleConfig,
    /// Timeouts of hardware-directed operations
    pub timeouts: TimeoutConfig,
    /// Plate envelope
    pub plate: Envelope,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Serial port configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Explicit port; when unset the candidates are probed in order
    pub port: Option<String>,
    /// Baud rate
    pub baud_rate: u32,
    /// Ports probed when `port` is unset
    pub candidates: Vec<String>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        let candidates = if cfg!(windows) {
            (2..10).map(|i| format!("COM{}", i)).collect()
        } else {
            ["/dev/ttyACM0", "/dev/ttyACM1", "/dev/ttyUSB0", "/dev/ttyUSB1"]
                .iter()
                .map(|p| p.to_string())
                .collect()
        };
        Self {
            port: None,
            baud_rate: 115_200,
            candidates,
        }
    }
}

/// Radial axis configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadiusConfig {
    /// Minimum step target
    pub min_steps: i64,
    /// Maximum step target (centre to plate corner)
    pub max_steps: i64,
    /// Steps per application unit
    pub steps_per_unit: f64,
    /// Step counter value at the limit switch
    pub reference_steps: i64,
    /// Motor pulse interval in seconds, programmed on initialize
    pub pulse_interval_s: Option<f64>,
}

impl Default for RadiusConfig {
    fn default() -> Self {
        Self {
            min_steps: 0,
            max_steps: 10_000,
            steps_per_unit: 1.0,
            reference_steps: 0,
            pulse_interval_s: None,
        }
    }
}

/// Angular axis configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AngleConfig {
    /// Minimum step target
    pub min_steps: i64,
    /// Maximum step target
    pub max_steps: i64,
    /// Steps per application unit
    pub steps_per_unit: f64,
    /// Step counter value at the limit switch
    pub reference_steps: i64,
    /// Motor pulse interval in seconds, programmed on initialize
    pub pulse_interval_s: Option<f64>,
    /// Steps in one full turn; targets are wrapped into a single turn when
    /// set. `0` disables wrapping.
    pub wrap_steps: Option<i64>,
    /// Application units in one full turn (360 for degrees)
    pub units_per_turn: f64,
}

impl Default for AngleConfig {
    fn default() -> Self {
        Self {
            min_steps: 0,
            max_steps: 720,
            steps_per_unit: 2.0,
            reference_steps: 0,
            pulse_interval_s: None,
            wrap_steps: Some(720),
            units_per_turn: 360.0,
        }
    }
}

/// Timeouts in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Wait for the acknowledgement of a single command
    pub response_ms: u64,
    /// Travel budget of one axis seeking its limit switch
    pub homing_ms: u64,
    /// Budget for a move to be acknowledged and both motors idle
    pub move_ms: u64,
    /// Pause between idle polls
    pub idle_poll_ms: u64,
    /// Wait for each reset handshake attempt
    pub reset_ms: u64,
    /// Reset handshake attempts before giving up
    pub reset_attempts: u32,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            response_ms: 1000,
            homing_ms: 60_000,
            move_ms: 60_000,
            idle_poll_ms: 100,
            reset_ms: 1000,
            reset_attempts: 5,
        }
    }
}

impl TimeoutConfig {
    /// Command acknowledgement timeout.
    pub fn response(&self) -> Duration {
        Duration::from_millis(self.response_ms)
    }

    /// Per-axis homing budget.
    pub fn homing(&self) -> Duration {
        Duration::from_millis(self.homing_ms)
    }

    /// Move completion budget.
    pub fn motion(&self) -> Duration {
        Duration::from_millis(self.move_ms)
    }

    /// Idle poll interval.
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    /// Reset handshake timeout.
    pub fn reset(&self) -> Duration {
        Duration::from_millis(self.reset_ms)
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl StageConfig {
    /// Load configuration from [`DEFAULT_CONFIG_PATH`] and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// Precedence (highest to lowest): `DRUM_` environment variables, the
    /// file, built-in defaults. A missing file is treated as empty.
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the file cannot be parsed or validation fails.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::from(Serialized::defaults(StageConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| ConfigError::Load(Box::new(e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text (no environment overrides).
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = Figment::from(Serialized::defaults(StageConfig::default()))
            .merge(Toml::string(text))
            .extract()
            .map_err(|e| ConfigError::Load(Box::new(e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Validation(e.to_string()))
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Axis limits are ordered and contain the reference position
    /// - Scale factors are finite and positive
    /// - Timeouts and attempt counts are non-zero
    /// - Angle wrap, units per turn and plate radius are positive
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.serial.baud_rate == 0 {
            return Err(ConfigError::Validation("baud_rate must be non-zero".into()));
        }

        for axis in Axis::ALL {
            self.validate_axis(axis)?;
        }

        if let Some(wrap) = self.angle.wrap_steps {
            if wrap < 0 {
                return Err(ConfigError::Validation(format!(
                    "angle wrap_steps must not be negative, got {}",
                    wrap
                )));
            }
        }
        if !(self.angle.units_per_turn.is_finite() && self.angle.units_per_turn > 0.0) {
            return Err(ConfigError::Validation(format!(
                "angle units_per_turn must be positive, got {}",
                self.angle.units_per_turn
            )));
        }

        let t = &self.timeouts;
        for (name, value) in [
            ("response_ms", t.response_ms),
            ("homing_ms", t.homing_ms),
            ("move_ms", t.move_ms),
            ("idle_poll_ms", t.idle_poll_ms),
            ("reset_ms", t.reset_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Validation(format!(
                    "timeouts.{} must be non-zero",
                    name
                )));
            }
        }
        if t.reset_attempts == 0 {
            return Err(ConfigError::Validation(
                "timeouts.reset_attempts must be at least 1".into(),
            ));
        }

        if self.plate.shape != PlateShape::None && self.plate.safe_radius_steps <= 0 {
            return Err(ConfigError::Validation(format!(
                "plate safe_radius_steps must be positive, got {}",
                self.plate.safe_radius_steps
            )));
        }

        Ok(())
    }

    fn validate_axis(&self, axis: Axis) -> Result<(), ConfigError> {
        let (min, max) = match axis {
            Axis::Radius => (self.radius.min_steps, self.radius.max_steps),
            Axis::Angle => (self.angle.min_steps, self.angle.max_steps),
        };
        if min > max {
            return Err(ConfigError::Validation(format!(
                "{} min_steps {} is greater than max_steps {}",
                axis, min, max
            )));
        }

        let spu = self.scale().get(axis);
        if !(spu.is_finite() && spu > 0.0) {
            return Err(ConfigError::Validation(format!(
                "{} steps_per_unit must be a positive number, got {}",
                axis, spu
            )));
        }

        let reference = self.reference_steps().get(axis);
        if !(min..=max).contains(&reference) {
            return Err(ConfigError::Validation(format!(
                "{} reference_steps {} lies outside [{}, {}]",
                axis, reference, min, max
            )));
        }

        if let Some(dt) = self.pulse_interval(axis) {
            if !(dt.is_finite() && dt > 0.0) {
                return Err(ConfigError::Validation(format!(
                    "{} pulse_interval_s must be positive, got {}",
                    axis, dt
                )));
            }
        }
        Ok(())
    }

    /// Travel limits of `axis`.
    ///
    /// Only meaningful on a validated configuration.
    pub fn limits(&self, axis: Axis) -> AxisLimits {
        match axis {
            Axis::Radius => AxisLimits {
                min_steps: self.radius.min_steps,
                max_steps: self.radius.max_steps,
            },
            Axis::Angle => AxisLimits {
                min_steps: self.angle.min_steps,
                max_steps: self.angle.max_steps,
            },
        }
    }

    /// Steps-per-unit scale factors.
    pub fn scale(&self) -> Scale {
        Scale {
            radius_steps_per_unit: self.radius.steps_per_unit,
            angle_steps_per_unit: self.angle.steps_per_unit,
        }
    }

    /// Step counters at the limit switches; these become the origin offsets.
    pub fn reference_steps(&self) -> StepPosition {
        StepPosition::new(self.radius.reference_steps, self.angle.reference_steps)
    }

    /// Configured pulse interval of `axis`, if any.
    pub fn pulse_interval(&self, axis: Axis) -> Option<f64> {
        match axis {
            Axis::Radius => self.radius.pulse_interval_s,
            Axis::Angle => self.angle.pulse_interval_s,
        }
    }

    /// Effective angle wrap, if enabled.
    pub fn angle_wrap(&self) -> Option<i64> {
        self.angle.wrap_steps.filter(|w| *w > 0)
    }

    /// Angular steps in one full turn.
    pub fn angle_steps_per_turn(&self) -> f64 {
        self.angle.units_per_turn * self.angle.steps_per_unit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_drum_apparatus() {
        let config = StageConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(config.limits(Axis::Angle), AxisLimits { min_steps: 0, max_steps: 720 });
        assert_eq!(config.angle.wrap_steps, Some(720));
        assert!((config.angle_steps_per_turn() - 720.0).abs() < 1e-9);
    }

    #[test]
    fn test_load_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[radius]
max_steps = 1000

[angle]
max_steps = 4000
steps_per_unit = 1.0

[timeouts]
homing_ms = 5000
"#
        )
        .unwrap();

        let config = StageConfig::load_from(file.path()).unwrap();
        assert_eq!(config.radius.max_steps, 1000);
        assert_eq!(config.radius.min_steps, 0);
        assert_eq!(config.angle.max_steps, 4000);
        assert_eq!(config.timeouts.homing_ms, 5000);
        assert_eq!(config.timeouts.response_ms, 1000);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = StageConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, StageConfig::default());
    }

    #[test]
    fn test_inverted_limits_rejected() {
        let result = StageConfig::from_toml_str("[radius]\nmin_steps = 10\nmax_steps = 0\n");
        match result {
            Err(ConfigError::Validation(msg)) => assert!(msg.contains("radius")),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_scale_and_timeouts_rejected() {
        assert!(StageConfig::from_toml_str("[angle]\nsteps_per_unit = 0.0\n").is_err());
        assert!(StageConfig::from_toml_str("[timeouts]\nmove_ms = 0\n").is_err());
        assert!(StageConfig::from_toml_str("[timeouts]\nreset_attempts = 0\n").is_err());
        assert!(StageConfig::from_toml_str("[application]\nlog_level = \"loud\"\n").is_err());
    }

    #[test]
    fn test_zero_wrap_disables_wrapping() {
        let config = StageConfig::from_toml_str("[angle]\nwrap_steps = 0\n").unwrap();
        assert_eq!(config.angle_wrap(), None);
        assert_eq!(StageConfig::default().angle_wrap(), Some(720));
        assert!(StageConfig::from_toml_str("[angle]\nwrap_steps = -1\n").is_err());
    }

    #[test]
    fn test_reference_outside_limits_rejected() {
        let result = StageConfig::from_toml_str("[radius]\nreference_steps = -5\n");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_plate_shape_parses() {
        let config =
            StageConfig::from_toml_str("[plate]\nshape = \"square\"\nsafe_radius_steps = 7300\n")
                .unwrap();
        assert_eq!(config.plate.shape, PlateShape::Square);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = StageConfig::default();
        let text = config.to_toml_string().unwrap();
        assert_eq!(StageConfig::from_toml_str(&text).unwrap(), config);
    }
}

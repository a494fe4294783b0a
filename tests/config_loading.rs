//! Loading the stage configuration from files.

use drum_stage::config::ConfigError;
use drum_stage::motion::geometry::PlateShape;
use drum_stage::{Axis, StageConfig};
use std::io::Write;

#[test]
fn test_example_config_loads() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/drum.toml");
    let config = StageConfig::load_from(path).unwrap();

    assert_eq!(config.limits(Axis::Radius).max_steps, 10_000);
    assert_eq!(config.angle_wrap(), Some(720));
    assert_eq!(config.plate.shape, PlateShape::Square);
    assert_eq!(config.plate.safe_radius_steps, 7300);
}

#[test]
fn test_malformed_file_is_load_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[radius]\nmax_steps = \"far\"").unwrap();

    let err = StageConfig::load_from(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Load(_)));
}

#[test]
fn test_invalid_values_rejected_on_load() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[plate]\nshape = \"circle\"\nsafe_radius_steps = 0").unwrap();

    let err = StageConfig::load_from(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Validation(_)));
}

#[test]
fn test_controller_rejects_invalid_config() {
    let mut config = StageConfig::default();
    config.timeouts.homing_ms = 0;
    let result =
        drum_stage::SafeMotionController::new(drum_stage::adapters::DummyDrum::new(), config);
    assert!(result.is_err());
}

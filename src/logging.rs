//! Tracing subscriber setup.
//!
//! `RUST_LOG` takes precedence over the configured level, so a single run
//! can be made verbose without editing the config file.

use crate::config::StageConfig;
use tracing_subscriber::EnvFilter;

/// Install a `fmt` subscriber filtered at `level`.
///
/// Returns `false` if a global subscriber was already installed (repeated
/// calls are harmless).
pub fn init(level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}

/// Install the subscriber at the level named in `config`.
pub fn init_from_config(config: &StageConfig) -> bool {
    init(&config.application.log_level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_harmless() {
        init("debug");
        assert!(!init("info"));
    }
}

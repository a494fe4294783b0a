//! Unchecked command layer of the drum microcontroller.
//!
//! Protocol Overview:
//! - Format: `<command> [argument]\n`, ASCII, one command per line
//! - Commands per axis are prefixed `r_` (radius) or `a_` (angle)
//! - Every reply starts with the command word it acknowledges
//! - `ERR:` lines are device errors; any other line is logged and skipped
//!
//! | Request         | Reply                | Meaning                               |
//! |-----------------|----------------------|---------------------------------------|
//! | `reset`         | `reset`              | handshake                             |
//! | `status`        | `status ...`         | free-form device status               |
//! | `r_go <int>`    | `r_go ...`           | move by a signed step delta           |
//! | `r_idle`        | `r_idle true\|false` | motor idle query                      |
//! | `r_home`        | `r_home`             | seek limit switch; ack = switch hit   |
//! | `r_set <float>` | `r_set <samples>`    | pulse interval; reply in 48 kHz ticks |
//!
//! The device only moves by deltas and has no position readback. Nothing
//! here checks limits or homing state: that is the controller's job, and this
//! type is not reachable from outside the crate.

use crate::adapters::{Channel, ChannelError};
use crate::error::{StageError, StageResult};
use crate::motion::Axis;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Sample rate of the firmware's pulse timer, in Hz.
const PULSE_CLOCK_HZ: f64 = 48_000.0;

/// Prefix of device error lines.
const ERROR_PREFIX: &str = "ERR:";

/// Raw command encoder/decoder over a [`Channel`].
pub(crate) struct RawDriver<C> {
    channel: C,
    response_timeout: Duration,
}

impl<C: Channel> RawDriver<C> {
    pub(crate) fn new(channel: C, response_timeout: Duration) -> Self {
        Self {
            channel,
            response_timeout,
        }
    }

    /// Write one command line.
    async fn send(&mut self, command: &str) -> StageResult<()> {
        trace!(command, "TX");
        self.channel.write_line(command).await?;
        Ok(())
    }

    /// Wait for the reply whose first word is `expected`.
    ///
    /// Unrelated lines are skipped; the whole wait, skips included, is
    /// bounded by `timeout`.
    async fn await_response(&mut self, expected: &str, timeout: Duration) -> StageResult<String> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let line = self
                .channel
                .read_line(remaining)
                .await
                .map_err(|e| match e {
                    // report the full budget, not the remainder of it
                    ChannelError::Timeout(_) => ChannelError::Timeout(timeout),
                    other => other,
                })?;
            trace!(line = %line, "RX");

            if line.starts_with(ERROR_PREFIX) {
                warn!(command = expected, response = %line, "Device reported an error");
                return Err(StageError::Device { response: line });
            }
            if line.split_whitespace().next() == Some(expected) {
                return Ok(line);
            }
            warn!(expected, line = %line, "Unmatched response");
        }
    }

    async fn transaction(&mut self, command: &str, expected: &str) -> StageResult<String> {
        self.send(command).await?;
        self.await_response(expected, self.response_timeout).await
    }

    /// Handshake: send `reset` until acknowledged, at most `attempts` times.
    pub(crate) async fn reset(&mut self, attempts: u32, timeout: Duration) -> StageResult<()> {
        for attempt in 1..=attempts {
            self.send("reset").await?;
            match self.await_response("reset", timeout).await {
                Ok(_) => {
                    debug!(attempt, "Device reset acknowledged");
                    return Ok(());
                }
                Err(StageError::Communication(ChannelError::Timeout(_))) => {
                    debug!(attempt, attempts, "No reset acknowledgement, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Err(StageError::Communication(ChannelError::Timeout(timeout)))
    }

    /// Move `axis` by `delta` steps. Returns once the device acknowledges the
    /// command, not when the motor stops.
    pub(crate) async fn go(&mut self, axis: Axis, delta: i64) -> StageResult<()> {
        let word = format!("{}_go", axis.command_prefix());
        debug!(%axis, delta, "Stepping motor");
        self.transaction(&format!("{} {}", word, delta), &word).await?;
        Ok(())
    }

    /// Whether the motor of `axis` is at rest.
    pub(crate) async fn idle(&mut self, axis: Axis) -> StageResult<bool> {
        let word = format!("{}_idle", axis.command_prefix());
        let reply = self.transaction(&word, &word).await?;
        match reply.split_whitespace().nth(1) {
            Some("true") => Ok(true),
            Some("false") => Ok(false),
            _ => Err(StageError::UnexpectedResponse {
                command: word,
                response: reply,
            }),
        }
    }

    /// Drive `axis` onto its limit switch, waiting at most `budget` for the
    /// acknowledgement that the switch closed.
    pub(crate) async fn home(&mut self, axis: Axis, budget: Duration) -> StageResult<()> {
        let word = format!("{}_home", axis.command_prefix());
        self.send(&word).await?;
        self.await_response(&word, budget).await?;
        Ok(())
    }

    /// Program the motor pulse interval of `axis`. Returns the interval the
    /// firmware actually applied, in seconds.
    pub(crate) async fn set_pulse_interval(&mut self, axis: Axis, seconds: f64) -> StageResult<f64> {
        let word = format!("{}_set", axis.command_prefix());
        let reply = self
            .transaction(&format!("{} {:.6}", word, seconds), &word)
            .await?;
        let samples = reply
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| StageError::UnexpectedResponse {
                command: word.clone(),
                response: reply.clone(),
            })?;
        Ok(samples as f64 / PULSE_CLOCK_HZ)
    }

    /// Free-form device status line.
    pub(crate) async fn status(&mut self) -> StageResult<String> {
        self.transaction("status", "status").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::DummyDrum;

    fn driver(drum: &DummyDrum) -> RawDriver<DummyDrum> {
        RawDriver::new(drum.clone(), Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_go_encodes_signed_delta() {
        let drum = DummyDrum::new();
        let mut raw = driver(&drum);
        raw.go(Axis::Angle, -15).await.unwrap();
        raw.go(Axis::Radius, 40).await.unwrap();
        assert_eq!(drum.command_log(), vec!["a_go -15", "r_go 40"]);
    }

    #[tokio::test]
    async fn test_idle_parses_flag() {
        let drum = DummyDrum::new();
        drum.set_busy_polls(1);
        let mut raw = driver(&drum);
        raw.go(Axis::Radius, 1).await.unwrap();
        assert!(!raw.idle(Axis::Radius).await.unwrap());
        assert!(raw.idle(Axis::Radius).await.unwrap());
    }

    #[tokio::test]
    async fn test_unmatched_lines_are_skipped() {
        let drum = DummyDrum::new();
        drum.push_unsolicited("debug");
        drum.push_unsolicited("a_idle true");
        let mut raw = driver(&drum);
        raw.go(Axis::Radius, 5).await.unwrap();
    }

    #[tokio::test]
    async fn test_device_error_is_reported() {
        let drum = DummyDrum::new();
        drum.push_unsolicited("ERR: overcurrent");
        let mut raw = driver(&drum);
        let err = raw.go(Axis::Radius, 5).await.unwrap_err();
        match err {
            StageError::Device { response } => assert_eq!(response, "ERR: overcurrent"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_device_times_out() {
        let drum = DummyDrum::new();
        drum.set_muted(true);
        let mut raw = driver(&drum);
        let err = raw.idle(Axis::Angle).await.unwrap_err();
        assert!(matches!(
            err,
            StageError::Communication(ChannelError::Timeout(t)) if t == Duration::from_millis(100)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_gives_up_after_attempts() {
        let drum = DummyDrum::new();
        drum.set_muted(true);
        let mut raw = driver(&drum);
        assert!(raw.reset(3, Duration::from_millis(50)).await.is_err());
        assert_eq!(drum.command_log(), vec!["reset", "reset", "reset"]);
    }

    #[tokio::test]
    async fn test_pulse_interval_converted_from_samples() {
        let drum = DummyDrum::new();
        let mut raw = driver(&drum);
        let applied = raw.set_pulse_interval(Axis::Angle, 0.002).await.unwrap();
        assert!((applied - 0.002).abs() < 1e-9);
        assert_eq!(drum.command_log(), vec!["a_set 0.002000"]);
    }

    #[tokio::test]
    async fn test_status_passthrough() {
        let drum = DummyDrum::new();
        let mut raw = driver(&drum);
        let status = raw.status().await.unwrap();
        assert!(status.starts_with("status"));
    }
}

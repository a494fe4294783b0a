//! Simulated drum microcontroller.
//!
//! `DummyDrum` is an in-process stand-in for the real device that speaks the
//! same line protocol over the [`Channel`] contract. It provides:
//! - A step counter per axis updated by `r_go`/`a_go` and zeroed by homing
//! - Controllable limit switches (a switch that never triggers keeps homing silent)
//! - Simulated busy motors, latency, muted device and write failure injection
//! - A command log for test verification
//!
//! Handles are cheap clones of shared state: a test keeps one handle to
//! inspect and steer the device while the controller owns another.
//!
//! # Example
//!
//! ```
//! use drum_stage::adapters::DummyDrum;
//!
//! let drum = DummyDrum::new();
//! let handle = drum.clone();
//! assert!(handle.command_log().is_empty());
//! ```

use super::{Channel, ChannelError};
use crate::motion::{Axis, StepPosition};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::sleep;
use tracing::trace;

/// Sample rate of the firmware's pulse timer, in Hz.
const PULSE_CLOCK_HZ: f64 = 48_000.0;

#[derive(Debug)]
struct DummyState {
    steps: StepPosition,
    reference_reachable: [bool; 2],
    busy_polls: u32,
    busy_remaining: [u32; 2],
    pulse_samples: [i64; 2],
    latency: Duration,
    muted: bool,
    fail_next_write: bool,
    responses: VecDeque<String>,
    log: Vec<String>,
}

impl Default for DummyState {
    fn default() -> Self {
        Self {
            steps: StepPosition::default(),
            reference_reachable: [true, true],
            busy_polls: 0,
            busy_remaining: [0, 0],
            pulse_samples: [4800, 4800],
            latency: Duration::ZERO,
            muted: false,
            fail_next_write: false,
            responses: VecDeque::new(),
            log: Vec::new(),
        }
    }
}

fn slot(axis: Axis) -> usize {
    match axis {
        Axis::Radius => 0,
        Axis::Angle => 1,
    }
}

fn parse_axis(prefix: &str) -> Option<Axis> {
    match prefix {
        "r" => Some(Axis::Radius),
        "a" => Some(Axis::Angle),
        _ => None,
    }
}

impl DummyState {
    /// Produce the device's reply to `line`, if it sends one.
    fn respond(&mut self, line: &str) -> Option<String> {
        let mut words = line.split_whitespace();
        let command = words.next()?;
        let argument = words.next();

        match command {
            "reset" | "debug" => return Some(command.to_string()),
            "status" => {
                return Some(format!(
                    "status r={} a={} r_busy={} a_busy={}",
                    self.steps.radius_steps,
                    self.steps.angle_steps,
                    self.busy_remaining[0],
                    self.busy_remaining[1]
                ))
            }
            _ => {}
        }

        let Some((prefix, verb)) = command.split_once('_') else {
            return Some(format!("ERR: unknown command '{}'", line));
        };
        let Some(axis) = parse_axis(prefix) else {
            return Some(format!("ERR: unknown command '{}'", line));
        };
        let i = slot(axis);

        match (verb, argument) {
            ("go", Some(arg)) => match arg.parse::<i64>() {
                Ok(delta) => {
                    let steps = self.steps.get(axis).saturating_add(delta);
                    self.steps.set(axis, steps);
                    self.busy_remaining[i] = self.busy_polls;
                    Some(format!("{} {}", command, delta))
                }
                Err(_) => Some(format!("ERR: bad step count '{}'", arg)),
            },
            ("idle", None) => {
                if self.busy_remaining[i] > 0 {
                    self.busy_remaining[i] -= 1;
                    Some(format!("{} false", command))
                } else {
                    Some(format!("{} true", command))
                }
            }
            ("home", None) => {
                if self.reference_reachable[i] {
                    self.steps.set(axis, 0);
                    self.busy_remaining[i] = 0;
                    Some(command.to_string())
                } else {
                    // switch never closes: the firmware keeps seeking
                    None
                }
            }
            ("set", Some(arg)) => match arg.parse::<f64>() {
                Ok(seconds) if seconds.is_finite() && seconds > 0.0 => {
                    let samples = (seconds * PULSE_CLOCK_HZ).round() as i64;
                    self.pulse_samples[i] = samples;
                    Some(format!("{} {}", command, samples))
                }
                _ => Some(format!("ERR: bad pulse interval '{}'", arg)),
            },
            _ => Some(format!("ERR: unknown command '{}'", line)),
        }
    }
}

/// In-process simulation of the drum microcontroller.
#[derive(Debug, Clone, Default)]
pub struct DummyDrum {
    state: Arc<Mutex<DummyState>>,
}

impl DummyDrum {
    /// Create a responsive device at step position (0, 0).
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay applied to every written command.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.lock().latency = latency;
        self
    }

    fn lock(&self) -> MutexGuard<'_, DummyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether homing `axis` reaches its limit switch.
    pub fn set_reference_reachable(&self, axis: Axis, reachable: bool) {
        self.lock().reference_reachable[slot(axis)] = reachable;
    }

    /// Number of idle queries answered `false` after each move.
    pub fn set_busy_polls(&self, polls: u32) {
        self.lock().busy_polls = polls;
    }

    /// A muted device records commands but never answers.
    pub fn set_muted(&self, muted: bool) {
        self.lock().muted = muted;
    }

    /// Make the next `write_line` fail with an I/O error.
    pub fn inject_write_failure(&self) {
        self.lock().fail_next_write = true;
    }

    /// Queue a line the device sends without being asked.
    pub fn push_unsolicited(&self, line: &str) {
        self.lock().responses.push_back(line.to_string());
    }

    /// Every command line received, in order.
    pub fn command_log(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    /// Clear the command log.
    pub fn clear_log(&self) {
        self.lock().log.clear();
    }

    /// Simulated step counters.
    pub fn steps(&self) -> StepPosition {
        self.lock().steps
    }

    /// Last pulse interval programmed on `axis`, in seconds.
    pub fn pulse_interval(&self, axis: Axis) -> f64 {
        self.lock().pulse_samples[slot(axis)] as f64 / PULSE_CLOCK_HZ
    }
}

#[async_trait]
impl Channel for DummyDrum {
    async fn write_line(&mut self, line: &str) -> Result<(), ChannelError> {
        let latency = self.lock().latency;
        if !latency.is_zero() {
            sleep(latency).await;
        }

        let mut state = self.lock();
        if std::mem::take(&mut state.fail_next_write) {
            return Err(ChannelError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "injected write failure",
            )));
        }

        trace!("DummyDrum RX: {}", line);
        state.log.push(line.to_string());
        if !state.muted {
            if let Some(reply) = state.respond(line) {
                state.responses.push_back(reply);
            }
        }
        Ok(())
    }

    async fn read_line(&mut self, timeout: Duration) -> Result<String, ChannelError> {
        let next = self.lock().responses.pop_front();
        match next {
            Some(line) => Ok(line),
            None => {
                sleep(timeout).await;
                Err(ChannelError::Timeout(timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn exchange(drum: &mut DummyDrum, line: &str) -> String {
        drum.write_line(line).await.unwrap();
        drum.read_line(Duration::from_millis(10)).await.unwrap()
    }

    #[tokio::test]
    async fn test_go_updates_step_counter() {
        let mut drum = DummyDrum::new();
        assert_eq!(exchange(&mut drum, "r_go 120").await, "r_go 120");
        assert_eq!(exchange(&mut drum, "a_go -30").await, "a_go -30");
        assert_eq!(drum.steps(), StepPosition::new(120, -30));
        assert_eq!(drum.command_log(), vec!["r_go 120", "a_go -30"]);
    }

    #[tokio::test]
    async fn test_busy_polls_then_idle() {
        let mut drum = DummyDrum::new();
        drum.set_busy_polls(2);
        exchange(&mut drum, "a_go 5").await;
        assert_eq!(exchange(&mut drum, "a_idle").await, "a_idle false");
        assert_eq!(exchange(&mut drum, "a_idle").await, "a_idle false");
        assert_eq!(exchange(&mut drum, "a_idle").await, "a_idle true");
        assert_eq!(exchange(&mut drum, "r_idle").await, "r_idle true");
    }

    #[tokio::test]
    async fn test_home_zeroes_axis() {
        let mut drum = DummyDrum::new();
        exchange(&mut drum, "r_go 400").await;
        assert_eq!(exchange(&mut drum, "r_home").await, "r_home");
        assert_eq!(drum.steps().radius_steps, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_reference_stays_silent() {
        let mut drum = DummyDrum::new();
        drum.set_reference_reachable(Axis::Angle, false);
        drum.write_line("a_home").await.unwrap();
        let err = drum.read_line(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, ChannelError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_pulse_interval_reply_in_samples() {
        let mut drum = DummyDrum::new();
        assert_eq!(exchange(&mut drum, "r_set 0.010000").await, "r_set 480");
        assert!((drum.pulse_interval(Axis::Radius) - 0.01).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_unknown_command_is_device_error() {
        let mut drum = DummyDrum::new();
        assert!(exchange(&mut drum, "z_go 1").await.starts_with("ERR:"));
        assert!(exchange(&mut drum, "launch").await.starts_with("ERR:"));
    }

    #[tokio::test]
    async fn test_injected_write_failure_is_one_shot() {
        let mut drum = DummyDrum::new();
        drum.inject_write_failure();
        assert!(drum.write_line("reset").await.is_err());
        assert!(drum.write_line("reset").await.is_ok());
        assert_eq!(drum.command_log(), vec!["reset"]);
    }
}

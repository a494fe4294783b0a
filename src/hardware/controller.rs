//! Safe motion controller - the public interface of the stage.
//!
//! Every move passes through the same pipeline:
//!
//! 1. Reject unless the stage is `Homed` (`NotHomed`)
//! 2. Reject non-finite coordinates (`InvalidPosition`)
//! 3. Convert units to absolute steps using the homing origin
//! 4. Wrap the angle into a single turn (if configured)
//! 5. Check both axis limits, then the plate envelope (`OutOfRange`)
//! 6. Send the angular then radial step delta and wait until both motors idle.
//!    On a square plate the probe is first retracted if the drum would turn
//!    it into a wall, and a target beyond the safe radius is only driven out
//!    after the rotation.
//!
//! Steps 1-5 are pure: a rejected move sends nothing to the hardware and
//! leaves the controller untouched. Any failure in step 6, like any failure
//! during homing, puts the controller in `Faulted` and drops the origin.
//! So does dropping a move future before the motors are idle. Only
//! [`SafeMotionController::rehome`] recovers.
//!
//! All hardware-directed operations hold one async mutex for their full
//! duration, so concurrent callers never interleave commands. Observers read
//! a published [`StageStatus`] snapshot instead and never wait on motion.
//!
//! # Example
//!
//! ```
//! use drum_stage::adapters::DummyDrum;
//! use drum_stage::config::StageConfig;
//! use drum_stage::hardware::SafeMotionController;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let stage = SafeMotionController::new(DummyDrum::new(), StageConfig::default())?;
//! stage.initialize().await?;
//!
//! stage.move_abs(500.0, 90.0).await?;
//! println!("At {}", stage.current_position().unwrap());
//! # Ok(())
//! # }
//! ```

use super::driver::RawDriver;
use super::homing::{HomingController, HomingPhase};
use super::MotionState;
use crate::adapters::{Channel, ChannelError};
use crate::config::StageConfig;
use crate::error::{Bound, StageError, StageResult};
use crate::motion::convert;
use crate::motion::geometry::{polar_to_xy, xy_to_polar};
use crate::motion::{Axis, OriginOffsets, Position, StepPosition};
use std::f64::consts::TAU;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, instrument, warn};

/// Snapshot of the controller, published after every state change.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StageStatus {
    /// Session state
    pub state: MotionState,
    /// Phase of the last homing attempt
    pub homing_phase: HomingPhase,
    /// Origin offsets (only while `Homed`)
    pub origin: Option<OriginOffsets>,
    /// Last acknowledged step counters (only while `Homed`)
    pub steps: Option<StepPosition>,
    /// Last acknowledged position (only while `Homed`)
    pub position: Option<Position>,
    /// Description of the failure that caused `Faulted`
    pub last_fault: Option<String>,
}

/// Origin and step counters of a homed session.
#[derive(Debug, Clone, Copy)]
struct Session {
    origin: OriginOffsets,
    steps: StepPosition,
}

/// State guarded by the operation lock.
struct Inner<C> {
    driver: RawDriver<C>,
    homing: HomingController,
    state: MotionState,
    /// `Some` exactly when `state == Homed`
    session: Option<Session>,
    last_fault: Option<String>,
}

/// Bounds-checked, homing-gated controller of the two-axis drum stage.
pub struct SafeMotionController<C: Channel> {
    config: StageConfig,
    inner: Mutex<Inner<C>>,
    status: watch::Sender<StageStatus>,
}

impl<C: Channel> SafeMotionController<C> {
    /// Take ownership of `channel` with a validated configuration.
    ///
    /// The stage starts `Uninitialized`; call [`initialize`](Self::initialize)
    /// before moving.
    pub fn new(channel: C, config: StageConfig) -> StageResult<Self> {
        config.validate()?;

        let driver = RawDriver::new(channel, config.timeouts.response());
        let homing = HomingController::new(config.timeouts.homing(), config.reference_steps());
        let (status, _) = watch::channel(StageStatus::default());

        Ok(Self {
            config,
            inner: Mutex::new(Inner {
                driver,
                homing,
                state: MotionState::Uninitialized,
                session: None,
                last_fault: None,
            }),
            status,
        })
    }

    /// Configuration in use.
    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    // =========================================================================
    // Homing
    // =========================================================================

    /// Validate the channel and home both axes.
    ///
    /// Sends the reset handshake, programs configured pulse intervals, then
    /// homes radius and angle. On failure the stage is left `Faulted`.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> StageResult<()> {
        let mut inner = self.inner.lock().await;
        inner.state = MotionState::Homing;
        inner.session = None;
        self.publish(&inner);

        match self.run_homing(&mut inner).await {
            Ok(origin) => {
                inner.state = MotionState::Homed;
                inner.session = Some(Session {
                    origin,
                    steps: origin,
                });
                inner.last_fault = None;
                self.publish(&inner);
                Ok(())
            }
            Err(e) => {
                self.fault(&mut inner, &e);
                Err(e)
            }
        }
    }

    /// Home again from any state, superseding `Faulted` or `Homed`.
    pub async fn rehome(&self) -> StageResult<()> {
        info!(state = %self.state(), "Rehoming stage");
        self.initialize().await
    }

    async fn run_homing(&self, inner: &mut Inner<C>) -> StageResult<OriginOffsets> {
        let timeouts = &self.config.timeouts;
        inner
            .driver
            .reset(timeouts.reset_attempts, timeouts.reset())
            .await?;

        for axis in Axis::ALL {
            if let Some(seconds) = self.config.pulse_interval(axis) {
                let applied = inner.driver.set_pulse_interval(axis, seconds).await?;
                debug!(%axis, requested = seconds, applied, "Pulse interval programmed");
            }
        }

        let result = inner.homing.start_homing(&mut inner.driver).await;
        self.publish(inner);
        result
    }

    // =========================================================================
    // Motion
    // =========================================================================

    /// Move to an absolute position in application units.
    ///
    /// Returns the position actually reached (quantized to whole steps and
    /// with the angle wrapped into one turn).
    pub async fn move_abs(&self, radius: f64, angle: f64) -> StageResult<Position> {
        self.move_with(|_| Position::new(radius, angle)).await
    }

    /// Move by a relative offset; validated exactly like [`move_abs`](Self::move_abs).
    pub async fn move_rel(&self, delta_radius: f64, delta_angle: f64) -> StageResult<Position> {
        self.move_with(|p| Position::new(p.radius + delta_radius, p.angle + delta_angle))
            .await
    }

    /// Move the radial axis only.
    pub async fn rad_move_abs(&self, radius: f64) -> StageResult<Position> {
        self.move_with(|p| Position::new(radius, p.angle)).await
    }

    /// Move the angular axis only.
    pub async fn ang_move_abs(&self, angle: f64) -> StageResult<Position> {
        self.move_with(|p| Position::new(p.radius, angle)).await
    }

    /// Offset the radial axis only.
    pub async fn rad_move_rel(&self, delta_radius: f64) -> StageResult<Position> {
        self.move_with(|p| Position::new(p.radius + delta_radius, p.angle))
            .await
    }

    /// Offset the angular axis only.
    pub async fn ang_move_rel(&self, delta_angle: f64) -> StageResult<Position> {
        self.move_with(|p| Position::new(p.radius, p.angle + delta_angle))
            .await
    }

    /// Move to cartesian `(x, y)`, in radius units, relative to the plate centre.
    pub async fn cart_move_abs(&self, x: f64, y: f64) -> StageResult<Position> {
        let units_per_turn = self.config.angle.units_per_turn;
        self.move_with(|_| cartesian_to_position(x, y, units_per_turn))
            .await
    }

    /// Move by a cartesian offset `(dx, dy)` from the current position.
    pub async fn cart_move_rel(&self, dx: f64, dy: f64) -> StageResult<Position> {
        let units_per_turn = self.config.angle.units_per_turn;
        self.move_with(|p| {
            let (x, y) = position_to_cartesian(p, units_per_turn);
            cartesian_to_position(x + dx, y + dy, units_per_turn)
        })
        .await
    }

    /// Run one move under the operation lock. `target` maps the current
    /// position to the requested one.
    async fn move_with<F>(&self, target: F) -> StageResult<Position>
    where
        F: FnOnce(Position) -> Position + Send,
    {
        let mut inner = self.inner.lock().await;
        let session = Self::require_homed(&inner)?;

        let current = convert::to_position(session.steps, session.origin, self.config.scale());
        let requested = target(current);
        let steps = self.plan(requested, session.origin)?;

        match self.execute(&mut inner, session, steps).await {
            Ok(reached) => Ok(reached),
            Err(e) => {
                self.fault(&mut inner, &e);
                Err(e)
            }
        }
    }

    fn require_homed(inner: &Inner<C>) -> StageResult<Session> {
        match (inner.state, inner.session) {
            (MotionState::Homed, Some(session)) => Ok(session),
            (state, _) => Err(StageError::NotHomed { state }),
        }
    }

    /// Convert and bounds-check a requested position. Never touches hardware.
    fn plan(&self, position: Position, origin: OriginOffsets) -> StageResult<StepPosition> {
        for axis in Axis::ALL {
            let value = position.get(axis);
            if !value.is_finite() {
                return Err(StageError::InvalidPosition { axis, value });
            }
        }

        let mut steps = convert::to_steps(position, origin, self.config.scale());

        if let Some(wrap) = self.config.angle_wrap() {
            steps.angle_steps = wrap_steps(steps.angle_steps, self.config.angle.min_steps, wrap);
        }

        for axis in Axis::ALL {
            let limits = self.config.limits(axis);
            let requested = steps.get(axis);
            if requested < limits.min_steps {
                return Err(StageError::OutOfRange {
                    axis,
                    bound: Bound::Min,
                    requested_steps: requested,
                    limit_steps: limits.min_steps,
                });
            }
            if requested > limits.max_steps {
                return Err(StageError::OutOfRange {
                    axis,
                    bound: Bound::Max,
                    requested_steps: requested,
                    limit_steps: limits.max_steps,
                });
            }
        }

        let relative_angle = steps.angle_steps - origin.angle_steps;
        let relative_radius = steps.radius_steps - origin.radius_steps;
        if let Some(max) = self
            .config
            .plate
            .max_radius_steps(relative_angle, self.config.angle_steps_per_turn())
        {
            if relative_radius > max {
                return Err(StageError::OutOfRange {
                    axis: Axis::Radius,
                    bound: Bound::Envelope,
                    requested_steps: steps.radius_steps,
                    limit_steps: origin.radius_steps.saturating_add(max),
                });
            }
        }

        Ok(steps)
    }

    /// Order the motor commands of a move so the probe stays inside the plate
    /// while it is travelling.
    ///
    /// Turning at a radius beyond the narrowest point of the swept arc first
    /// pulls the probe in to that point. A target beyond the safe radius is
    /// only driven out once the rotation has finished.
    fn route(&self, from: StepPosition, to: StepPosition, origin: OriginOffsets) -> Route {
        let plate = &self.config.plate;
        let steps_per_turn = self.config.angle_steps_per_turn();
        let current_radius = from.radius_steps - origin.radius_steps;

        let retreat = if to.angle_steps != from.angle_steps {
            plate
                .min_radius_along(
                    from.angle_steps - origin.angle_steps,
                    to.angle_steps - origin.angle_steps,
                    steps_per_turn,
                )
                .filter(|&safe| current_radius > safe)
                .map(|safe| origin.radius_steps.saturating_add(safe))
        } else {
            None
        };

        Route {
            retreat,
            angle_first: plate.beyond_safe_radius(to.radius_steps - origin.radius_steps),
        }
    }

    /// Send the step deltas and wait for the motors, bounded by the move timeout.
    ///
    /// From the first command until the motors report idle the controller
    /// counts as `Faulted`: a move dropped halfway leaves step counters that
    /// no longer match the hardware.
    async fn execute(
        &self,
        inner: &mut Inner<C>,
        session: Session,
        target: StepPosition,
    ) -> StageResult<Position> {
        let budget = self.config.timeouts.motion();
        let poll = self.config.timeouts.idle_poll();
        let route = self.route(session.steps, target, session.origin);

        let mut guard = InterruptGuard::new(&self.status);
        if route.retreat.is_some() || target != session.steps {
            inner.state = MotionState::Faulted;
            inner.session = None;
            inner.last_fault = Some(MOVE_INTERRUPTED.to_string());
            guard.arm();
        }

        debug!(from = %session.steps, to = %target, ?route, "Executing move");
        let driver = &mut inner.driver;
        let motion = async {
            let mut radius_from = session.steps.radius_steps;
            if let Some(retreat) = route.retreat {
                info!(radius_steps = retreat, "Retracting probe before turning");
                driver.go(Axis::Radius, retreat - radius_from).await?;
                wait_idle(driver, &[Axis::Radius], poll).await?;
                radius_from = retreat;
            }

            let angle_delta = target.angle_steps - session.steps.angle_steps;
            if angle_delta != 0 {
                driver.go(Axis::Angle, angle_delta).await?;
                if route.angle_first {
                    wait_idle(driver, &[Axis::Angle], poll).await?;
                }
            }

            let radius_delta = target.radius_steps - radius_from;
            if radius_delta != 0 {
                driver.go(Axis::Radius, radius_delta).await?;
            }
            wait_idle(driver, &[Axis::Angle, Axis::Radius], poll).await
        };
        let result = tokio::time::timeout(budget, motion)
            .await
            .map_err(|_| StageError::Communication(ChannelError::Timeout(budget)))
            .and_then(|moved| moved);
        guard.disarm();
        result?;

        inner.state = MotionState::Homed;
        inner.session = Some(Session {
            origin: session.origin,
            steps: target,
        });
        inner.last_fault = None;
        self.publish(inner);

        let reached = convert::to_position(target, session.origin, self.config.scale());
        info!(position = %reached, steps = %target, "Move complete");
        Ok(reached)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Check a position without moving: the step target a move would send.
    ///
    /// Uses the same validation as [`move_abs`](Self::move_abs), including the
    /// homing requirement.
    pub fn validate(&self, position: Position) -> StageResult<StepPosition> {
        let status = self.status.borrow();
        let origin = match (status.state, status.origin) {
            (MotionState::Homed, Some(origin)) => origin,
            (state, _) => return Err(StageError::NotHomed { state }),
        };
        drop(status);
        self.plan(position, origin)
    }

    /// Whether `position` would be accepted by [`move_abs`](Self::move_abs).
    pub fn is_safe(&self, position: Position) -> bool {
        self.validate(position).is_ok()
    }

    /// Last acknowledged position, `None` unless homed. Never waits on motion.
    pub fn current_position(&self) -> Option<Position> {
        self.status.borrow().position
    }

    /// Last acknowledged step counters, `None` unless homed.
    pub fn current_steps(&self) -> Option<StepPosition> {
        self.status.borrow().steps
    }

    /// Current session state.
    pub fn state(&self) -> MotionState {
        self.status.borrow().state
    }

    /// Phase of the last homing attempt.
    pub fn homing_phase(&self) -> HomingPhase {
        self.status.borrow().homing_phase
    }

    /// Description of the failure that left the stage `Faulted`.
    pub fn last_fault(&self) -> Option<String> {
        self.status.borrow().last_fault.clone()
    }

    /// Full status snapshot.
    pub fn snapshot(&self) -> StageStatus {
        self.status.borrow().clone()
    }

    /// Subscribe to status changes.
    pub fn subscribe(&self) -> watch::Receiver<StageStatus> {
        self.status.subscribe()
    }

    // =========================================================================
    // Device Settings
    // =========================================================================

    /// Program the motor pulse interval of `axis` in seconds.
    ///
    /// Returns the interval the firmware applied (quantized to its 48 kHz
    /// clock). Allowed in any state.
    pub async fn set_pulse_interval(&self, axis: Axis, seconds: f64) -> StageResult<f64> {
        if !(seconds.is_finite() && seconds > 0.0) {
            return Err(StageError::InvalidPulseInterval { axis, seconds });
        }

        let mut inner = self.inner.lock().await;
        match inner.driver.set_pulse_interval(axis, seconds).await {
            Ok(applied) => Ok(applied),
            Err(e) => {
                self.fault(&mut inner, &e);
                Err(e)
            }
        }
    }

    /// Raw status line reported by the device.
    pub async fn status(&self) -> StageResult<String> {
        let mut inner = self.inner.lock().await;
        match inner.driver.status().await {
            Ok(line) => Ok(line),
            Err(e) => {
                self.fault(&mut inner, &e);
                Err(e)
            }
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Record a fatal error: `Faulted`, origin dropped.
    fn fault(&self, inner: &mut Inner<C>, err: &StageError) {
        if !err.is_fatal() {
            warn!(error = %err, "Operation rejected");
            return;
        }
        error!(error = %err, previous = %inner.state, "Stage faulted; rehome before moving");
        inner.state = MotionState::Faulted;
        inner.session = None;
        inner.last_fault = Some(err.to_string());
        self.publish(inner);
    }

    fn publish(&self, inner: &Inner<C>) {
        let scale = self.config.scale();
        self.status.send_replace(StageStatus {
            state: inner.state,
            homing_phase: inner.homing.phase(),
            origin: inner.session.map(|s| s.origin),
            steps: inner.session.map(|s| s.steps),
            position: inner
                .session
                .map(|s| convert::to_position(s.steps, s.origin, scale)),
            last_fault: inner.last_fault.clone(),
        });
    }
}

const MOVE_INTERRUPTED: &str = "move interrupted before the motors reported idle";

/// Order of the motor commands of one move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Route {
    /// Absolute radial steps to retract to before turning
    retreat: Option<i64>,
    /// Finish the rotation before driving the radius out
    angle_first: bool,
}

/// Publishes `Faulted` if a move future is dropped while motors may still run.
struct InterruptGuard<'a> {
    status: &'a watch::Sender<StageStatus>,
    armed: bool,
}

impl<'a> InterruptGuard<'a> {
    fn new(status: &'a watch::Sender<StageStatus>) -> Self {
        Self {
            status,
            armed: false,
        }
    }

    fn arm(&mut self) {
        self.armed = true;
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for InterruptGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        error!("{MOVE_INTERRUPTED}; rehome before moving");
        self.status.send_modify(|status| {
            status.state = MotionState::Faulted;
            status.origin = None;
            status.steps = None;
            status.position = None;
            status.last_fault = Some(MOVE_INTERRUPTED.to_string());
        });
    }
}

/// Poll `axes` in order until all of them report idle.
async fn wait_idle<C: Channel>(
    driver: &mut RawDriver<C>,
    axes: &[Axis],
    poll: Duration,
) -> StageResult<()> {
    'poll: loop {
        for &axis in axes {
            if !driver.idle(axis).await? {
                tokio::time::sleep(poll).await;
                continue 'poll;
            }
        }
        return Ok(());
    }
}

/// Wrap `steps` into `[min, min + wrap)`. Saturated targets are left for the
/// limit check to reject.
fn wrap_steps(steps: i64, min: i64, wrap: i64) -> i64 {
    if steps == i64::MAX || steps == i64::MIN {
        return steps;
    }
    match steps.checked_sub(min) {
        Some(relative) => relative.rem_euclid(wrap) + min,
        None => steps,
    }
}

/// Polar position for cartesian `(x, y)`; the angle lands in `[0, units_per_turn)`.
fn cartesian_to_position(x: f64, y: f64, units_per_turn: f64) -> Position {
    let (radius, theta) = xy_to_polar(x, y);
    let angle = (theta / TAU * units_per_turn).rem_euclid(units_per_turn);
    Position::new(radius, angle)
}

fn position_to_cartesian(position: Position, units_per_turn: f64) -> (f64, f64) {
    polar_to_xy(position.radius, position.angle / units_per_turn * TAU)
}

//! Homing supervision.
//!
//! Drives each axis onto its limit switch and establishes the step origin.
//!
//! ## Lifecycle
//!
//! 1. `start_homing()` → `SeekingReference`
//! 2. Axes are homed one at a time in [`HOMING_ORDER`] (radius, then angle),
//!    each bounded by the configured travel budget
//! 3. On success: `Referenced`, origin = configured reference steps
//! 4. On failure: `Failed`, loud error banner, error returned to the caller
//!
//! `Failed` and `Referenced` are only left through another `start_homing()`.
//! There is no automatic retry.

use super::driver::RawDriver;
use crate::adapters::{Channel, ChannelError};
use crate::error::{HomingFailReason, StageError, StageResult};
use crate::motion::{Axis, OriginOffsets};
use std::time::Duration;
use tracing::{debug, error, info};

/// Order in which axes are homed.
///
/// Radius first retracts the probe to the centre, so the drum can then turn
/// without the probe crossing a wall.
pub const HOMING_ORDER: [Axis; 2] = [Axis::Radius, Axis::Angle];

// ─── Homing Phases ──────────────────────────────────────────────────

/// Phase of the homing procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HomingPhase {
    /// Never started.
    #[default]
    Idle,
    /// Axes are being driven to their references.
    SeekingReference,
    /// Both axes referenced.
    Referenced,
    /// Last attempt failed.
    Failed,
}

impl HomingPhase {
    /// Whether `next` is a legal successor of this phase.
    ///
    /// Every path to `Referenced` or `Failed` goes through `SeekingReference`.
    pub fn can_transition_to(&self, next: HomingPhase) -> bool {
        use HomingPhase::*;
        matches!(
            (self, next),
            (Idle | Referenced | Failed, SeekingReference)
                | (SeekingReference, Referenced | Failed)
        )
    }
}

// ─── Homing Controller ──────────────────────────────────────────────

/// Homing state machine for both axes.
#[derive(Debug, Clone)]
pub(crate) struct HomingController {
    /// Current phase.
    phase: HomingPhase,
    /// Per-axis travel budget.
    budget: Duration,
    /// Step counters at the limit switches.
    reference: OriginOffsets,
}

impl HomingController {
    pub(crate) fn new(budget: Duration, reference: OriginOffsets) -> Self {
        Self {
            phase: HomingPhase::Idle,
            budget,
            reference,
        }
    }

    pub(crate) fn phase(&self) -> HomingPhase {
        self.phase
    }

    fn transition(&mut self, next: HomingPhase) {
        debug_assert!(
            self.phase.can_transition_to(next),
            "illegal homing transition {:?} -> {:?}",
            self.phase,
            next
        );
        debug!(from = ?self.phase, to = ?next, "Homing phase change");
        self.phase = next;
    }

    /// Run a complete homing attempt.
    ///
    /// Returns the origin offsets once both axes are referenced. The first
    /// failing axis aborts the attempt.
    pub(crate) async fn start_homing<C: Channel>(
        &mut self,
        driver: &mut RawDriver<C>,
    ) -> StageResult<OriginOffsets> {
        self.transition(HomingPhase::SeekingReference);
        info!(budget = ?self.budget, "Homing stage, please wait");

        for axis in HOMING_ORDER {
            if let Err(e) = self.seek(driver, axis).await {
                self.transition(HomingPhase::Failed);
                announce_failure(&e);
                return Err(e);
            }
            info!(%axis, "Reference switch reached");
        }

        self.transition(HomingPhase::Referenced);
        info!(origin = %self.reference, "Homing completed successfully");
        Ok(self.reference)
    }

    async fn seek<C: Channel>(&self, driver: &mut RawDriver<C>, axis: Axis) -> StageResult<()> {
        driver
            .home(axis, self.budget)
            .await
            .map_err(|e| match e {
                StageError::Communication(ChannelError::Timeout(_)) => StageError::HomingFailure {
                    axis,
                    reason: HomingFailReason::ReferenceNotDetected {
                        budget: self.budget,
                    },
                },
                StageError::Device { response } => StageError::HomingFailure {
                    axis,
                    reason: HomingFailReason::DeviceRejected(response),
                },
                other => other,
            })
    }
}

/// Homing failures must not scroll past unnoticed.
fn announce_failure(err: &StageError) {
    error!("!!!!!!~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~!!!!!!");
    error!("Homing failed: {}", err);
    error!("Check the stage before issuing any other command.");
    error!("If a limit switch is obviously not engaged, rehome; otherwise get help.");
    error!("!!!!!!~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~!!!!!!");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::DummyDrum;
    use crate::motion::StepPosition;
    use tracing_test::traced_test;

    fn setup(drum: &DummyDrum) -> (HomingController, RawDriver<DummyDrum>) {
        (
            HomingController::new(Duration::from_secs(30), StepPosition::new(0, 0)),
            RawDriver::new(drum.clone(), Duration::from_millis(100)),
        )
    }

    #[test]
    fn test_phase_transitions() {
        use HomingPhase::*;
        assert!(Idle.can_transition_to(SeekingReference));
        assert!(Failed.can_transition_to(SeekingReference));
        assert!(Referenced.can_transition_to(SeekingReference));
        assert!(SeekingReference.can_transition_to(Referenced));
        assert!(SeekingReference.can_transition_to(Failed));

        assert!(!Idle.can_transition_to(Referenced));
        assert!(!Failed.can_transition_to(Referenced));
        assert!(!Idle.can_transition_to(Failed));
    }

    #[tokio::test]
    async fn test_homes_radius_then_angle() {
        let drum = DummyDrum::new();
        let (mut homing, mut driver) = setup(&drum);

        let origin = homing.start_homing(&mut driver).await.unwrap();

        assert_eq!(origin, StepPosition::new(0, 0));
        assert_eq!(homing.phase(), HomingPhase::Referenced);
        assert_eq!(drum.command_log(), vec!["r_home", "a_home"]);
    }

    #[tokio::test]
    async fn test_reference_steps_become_origin() {
        let drum = DummyDrum::new();
        let mut homing = HomingController::new(Duration::from_secs(1), StepPosition::new(25, -10));
        let mut driver = RawDriver::new(drum.clone(), Duration::from_millis(100));

        let origin = homing.start_homing(&mut driver).await.unwrap();
        assert_eq!(origin, StepPosition::new(25, -10));
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_missing_reference_fails_loudly() {
        let drum = DummyDrum::new();
        drum.set_reference_reachable(Axis::Radius, false);
        let (mut homing, mut driver) = setup(&drum);

        let err = homing.start_homing(&mut driver).await.unwrap_err();

        assert!(matches!(
            err,
            StageError::HomingFailure {
                axis: Axis::Radius,
                reason: HomingFailReason::ReferenceNotDetected { .. }
            }
        ));
        assert_eq!(homing.phase(), HomingPhase::Failed);
        // angle is never attempted after the radius fails
        assert_eq!(drum.command_log(), vec!["r_home"]);
        assert!(logs_contain("Homing failed"));
        assert!(logs_contain("Check the stage"));
    }

    #[tokio::test]
    async fn test_device_rejection_is_homing_failure() {
        let drum = DummyDrum::new();
        drum.push_unsolicited("ERR: switch wiring");
        let (mut homing, mut driver) = setup(&drum);

        let err = homing.start_homing(&mut driver).await.unwrap_err();
        match err {
            StageError::HomingFailure {
                axis: Axis::Radius,
                reason: HomingFailReason::DeviceRejected(response),
            } => assert_eq!(response, "ERR: switch wiring"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_failure() {
        let drum = DummyDrum::new();
        drum.set_reference_reachable(Axis::Angle, false);
        let (mut homing, mut driver) = setup(&drum);

        assert!(homing.start_homing(&mut driver).await.is_err());
        assert_eq!(homing.phase(), HomingPhase::Failed);

        drum.set_reference_reachable(Axis::Angle, true);
        assert!(homing.start_homing(&mut driver).await.is_ok());
        assert_eq!(homing.phase(), HomingPhase::Referenced);
    }
}

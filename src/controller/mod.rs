//! Coordination controller
//!
//! One controller drives one arm through
//! `IDLE → LISTENING → LOCATING → PLANNING → MOVING → VERIFYING → IDLE`,
//! detouring through `FAULT` when a step fails.
//!
//! Producers never call into the controller. Speech and OCR tasks post to
//! single-slot [`Mailbox`]es and the controller reads them only when its
//! state allows, so a command arriving mid-motion waits (latest wins) and
//! can never interrupt a trajectory.
//!
//! A driver fault is treated as hazardous: the controller homes the arm and
//! latches it in [`ArmStatus::Fault`]. While latched, only a `HOME` command
//! is accepted; it re-homes the driver and clears the latch.

mod arm;
mod mailbox;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

pub use arm::{ArmState, ArmStatus};
pub use mailbox::Mailbox;

use crate::actuation::{Actuator, DEFAULT_MAX_STEP_DEG, JointTrajectory};
use crate::calibration::{CalibrationModel, CalibrationPair};
use crate::events::{SessionStats, StatusEvent, StatusPublisher};
use crate::kinematics::{JointAngles, WorkspacePoint};
use crate::perception::{LocatorConfig, OcrFrame, Target, TargetLocator};
use crate::voice::{CommandKeyword, Intent};
use crate::{Error, Result};

/// Coordination cycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    Idle,
    Listening,
    Locating,
    Planning,
    Moving,
    Verifying,
    Fault,
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "IDLE",
            Self::Listening => "LISTENING",
            Self::Locating => "LOCATING",
            Self::Planning => "PLANNING",
            Self::Moving => "MOVING",
            Self::Verifying => "VERIFYING",
            Self::Fault => "FAULT",
        };
        f.write_str(name)
    }
}

/// Controller tuning
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Label of the on-screen element to tap
    pub target_label: String,
    /// Text expected on screen after a successful tap; `None` skips verification
    pub confirm_label: Option<String>,
    /// Minimum intent confidence for motion commands
    pub confidence_threshold: f64,
    /// Frames without the target tolerated before giving up
    pub locate_retries: u32,
    /// Upper bound on the whole locating step
    pub locate_timeout: Duration,
    /// Frames examined for the confirmation text
    pub verify_retries: u32,
    /// Upper bound on the whole verifying step
    pub verify_timeout: Duration,
    /// Pause after motion before the screen is read again
    pub settle_time: Duration,
    /// Intents older than this are discarded
    pub intent_max_age: Duration,
    /// Hover height above the touch plane (metres)
    pub tap_lift: f64,
    /// Largest joint change between waypoints (degrees)
    pub max_step_deg: f64,
    /// Joint velocity used for trajectory timing (deg/s)
    pub max_velocity: f64,
    pub home_pose: JointAngles,
    /// How often a waiting step checks for `CANCEL`
    pub poll_interval: Duration,
    /// Period of the session statistics log line
    pub stats_interval: Duration,
    pub locator: LocatorConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            target_label: "attendance".to_string(),
            confirm_label: None,
            confidence_threshold: 0.6,
            locate_retries: 3,
            locate_timeout: Duration::from_secs(5),
            verify_retries: 3,
            verify_timeout: Duration::from_secs(5),
            settle_time: Duration::from_millis(500),
            intent_max_age: Duration::from_secs(15),
            tap_lift: 0.02,
            max_step_deg: DEFAULT_MAX_STEP_DEG,
            max_velocity: 90.0,
            home_pose: JointAngles::new(0.0, 90.0, -90.0),
            poll_interval: Duration::from_millis(50),
            stats_interval: Duration::from_secs(60),
            locator: LocatorConfig::default(),
        }
    }
}

/// Result of a verification step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verification {
    Confirmed,
    /// Confirmation text never appeared; reported as a soft failure
    Unconfirmed,
    /// No confirmation label configured
    Skipped,
}

/// How one coordination cycle ended
#[derive(Debug)]
pub enum CycleOutcome {
    /// The target was tapped
    Tapped {
        target: Target,
        point: WorkspacePoint,
        verification: Verification,
    },
    /// The arm returned home
    Homed,
    /// The intent did not start a cycle
    Ignored { reason: String },
    /// The arm is latched in fault and refused the command
    Rejected { reason: String },
    /// `CANCEL` arrived while locating or verifying
    Cancelled,
    /// The cycle failed and was reported as `FAULT`
    Fault(Error),
}

impl CycleOutcome {
    #[must_use]
    pub const fn is_fault(&self) -> bool {
        matches!(self, Self::Fault(_))
    }
}

/// The coordination state machine for one arm
pub struct Controller<A> {
    actuator: A,
    calibration: CalibrationModel,
    config: ControllerConfig,
    locator: TargetLocator,
    verifier: TargetLocator,
    intents: Arc<Mailbox<Intent>>,
    frames: Arc<Mailbox<OcrFrame>>,
    calibrations: Arc<Mailbox<Vec<CalibrationPair>>>,
    publisher: StatusPublisher,
    state: ControllerState,
    arm: ArmState,
    last_intent: Option<Intent>,
    last_target: Option<Target>,
    last_error: Option<String>,
    stats: SessionStats,
}

impl<A: Actuator> Controller<A> {
    /// Create a controller; the arm is assumed to rest at `config.home_pose`
    ///
    /// # Errors
    ///
    /// Returns `InvalidCalibration` if the home pose violates the
    /// calibration's joint limits
    pub fn new(actuator: A, calibration: CalibrationModel, config: ControllerConfig) -> Result<Self> {
        check_home_pose(&calibration, config.home_pose)?;
        Ok(Self {
            actuator,
            calibration,
            locator: TargetLocator::new(config.locator.clone()),
            verifier: TargetLocator::new(config.locator.clone()),
            arm: ArmState::at_home(config.home_pose),
            config,
            intents: Arc::new(Mailbox::new()),
            frames: Arc::new(Mailbox::new()),
            calibrations: Arc::new(Mailbox::new()),
            publisher: StatusPublisher::new(),
            state: ControllerState::Idle,
            last_intent: None,
            last_target: None,
            last_error: None,
            stats: SessionStats::default(),
        })
    }

    /// Publish status on an existing channel instead of a private one
    #[must_use]
    pub fn with_publisher(mut self, publisher: StatusPublisher) -> Self {
        self.publisher = publisher;
        self
    }

    /// Mailbox for recognized intents
    #[must_use]
    pub fn intents(&self) -> Arc<Mailbox<Intent>> {
        self.intents.clone()
    }

    /// Mailbox for OCR frames
    #[must_use]
    pub fn frames(&self) -> Arc<Mailbox<OcrFrame>> {
        self.frames.clone()
    }

    /// Mailbox for replacement calibration point sets, applied between cycles
    #[must_use]
    pub fn calibrations(&self) -> Arc<Mailbox<Vec<CalibrationPair>>> {
        self.calibrations.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.publisher.subscribe()
    }

    #[must_use]
    pub const fn state(&self) -> ControllerState {
        self.state
    }

    #[must_use]
    pub const fn arm(&self) -> ArmState {
        self.arm
    }

    #[must_use]
    pub const fn stats(&self) -> &SessionStats {
        &self.stats
    }

    #[must_use]
    pub const fn calibration(&self) -> &CalibrationModel {
        &self.calibration
    }

    #[must_use]
    pub const fn actuator(&self) -> &A {
        &self.actuator
    }

    #[must_use]
    pub const fn last_error(&self) -> Option<&String> {
        self.last_error.as_ref()
    }

    /// Swap in a new calibration model
    ///
    /// # Errors
    ///
    /// Returns error if the arm is moving or the new limits exclude the home
    /// pose; the current model stays in effect
    pub fn replace_calibration(&mut self, model: CalibrationModel) -> Result<()> {
        if self.arm.is_busy() || self.state != ControllerState::Idle {
            return Err(Error::InvalidCalibration(format!(
                "cannot replace calibration while {}",
                self.state
            )));
        }
        check_home_pose(&model, self.config.home_pose)?;
        tracing::info!(
            points = model.pairs().len(),
            residual = model.fit_residual(),
            "calibration replaced"
        );
        self.calibration = model;
        self.locator.reset_history();
        Ok(())
    }

    /// Refit the calibration from a new point set, keeping arm parameters
    ///
    /// # Errors
    ///
    /// Returns a calibration error for a degenerate point set; the current
    /// model stays in effect
    pub fn recalibrate(&mut self, pairs: Vec<CalibrationPair>) -> Result<()> {
        let model = self.calibration.recalibrate(pairs)?;
        self.replace_calibration(model)
    }

    /// Process intents until `shutdown` flips or its sender goes away
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let intents = self.intents.clone();
        let calibrations = self.calibrations.clone();
        let mut stats_tick =
            tokio::time::interval(self.config.stats_interval.max(Duration::from_secs(1)));
        // First tick completes immediately
        stats_tick.tick().await;

        tracing::info!(arm = %self.arm.pose, "controller running");
        self.publish();

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::info!("controller shutting down");
                    break;
                }
                _ = stats_tick.tick() => self.stats.log(),
                pairs = calibrations.recv() => {
                    if let Err(e) = self.recalibrate(pairs) {
                        tracing::error!(error = %e, "calibration rejected, keeping previous model");
                    }
                }
                intent = intents.recv() => {
                    let outcome = self.handle_intent(intent).await;
                    tracing::debug!(?outcome, "cycle finished");
                }
            }
        }

        self.stats.log();
    }

    /// Run one coordination cycle for `intent`
    pub async fn handle_intent(&mut self, intent: Intent) -> CycleOutcome {
        self.stats.intents += 1;
        tracing::info!(
            keyword = %intent.keyword,
            confidence = intent.confidence,
            utterance = %intent.utterance,
            "intent received"
        );
        self.last_intent = Some(intent.clone());
        self.transition(ControllerState::Listening);

        let outcome = self.dispatch(intent).await;

        if self.state != ControllerState::Idle {
            self.transition(ControllerState::Idle);
        }
        outcome
    }

    async fn dispatch(&mut self, intent: Intent) -> CycleOutcome {
        let age = intent.age().to_std().unwrap_or_default();
        if age > self.config.intent_max_age {
            return self.ignore(format!("stale intent ({:.1}s old)", age.as_secs_f64()));
        }

        match intent.keyword {
            CommandKeyword::Unknown => self.ignore("unrecognized command".into()),
            CommandKeyword::Cancel => self.ignore("nothing to cancel".into()),
            keyword if intent.confidence < self.config.confidence_threshold => self.ignore(format!(
                "{keyword} confidence {:.2} below threshold {:.2}",
                intent.confidence, self.config.confidence_threshold
            )),
            CommandKeyword::MarkAttendance if self.arm.is_faulted() => {
                let reason = "arm is in fault; say HOME to recover".to_string();
                tracing::warn!(%reason, "command rejected");
                self.transition(ControllerState::Idle);
                CycleOutcome::Rejected { reason }
            }
            CommandKeyword::MarkAttendance => self.tap_cycle().await,
            CommandKeyword::Home => self.home_cycle().await,
        }
    }

    async fn tap_cycle(&mut self) -> CycleOutcome {
        self.last_error = None;
        self.transition(ControllerState::Locating);

        let target = match self.locate().await {
            Ok(Some(target)) => target,
            Ok(None) => return self.cancelled(),
            Err(e) => return self.fault(e),
        };
        tracing::info!(
            label = %target.label,
            confidence = target.confidence,
            x = target.center().x,
            y = target.center().y,
            "target located"
        );
        self.last_target = Some(target.clone());

        self.transition(ControllerState::Planning);
        let (point, trajectory) = match self.plan_tap(&target) {
            Ok(plan) => plan,
            Err(e) => return self.fault(e),
        };

        if let Err(e) = self.execute(&trajectory).await {
            return self.fault(e);
        }
        tokio::time::sleep(self.config.settle_time).await;
        self.arm.status = ArmStatus::Idle;

        let Some(verification) = self.verify().await else {
            return self.cancelled();
        };
        if verification == Verification::Unconfirmed {
            self.stats.soft_failures += 1;
            let label = self.config.confirm_label.as_deref().unwrap_or_default();
            let message = format!("tap not confirmed: '{label}' did not appear");
            tracing::warn!(%message, "verification failed");
            self.last_error = Some(message);
        }

        self.transition(ControllerState::Idle);
        CycleOutcome::Tapped {
            target,
            point,
            verification,
        }
    }

    async fn home_cycle(&mut self) -> CycleOutcome {
        self.last_error = None;

        if self.arm.is_faulted() {
            self.transition(ControllerState::Moving);
            return match self.actuator.home().await {
                Ok(_) => {
                    self.arm = ArmState::at_home(self.config.home_pose);
                    tracing::info!("arm re-homed, fault cleared");
                    self.transition(ControllerState::Idle);
                    CycleOutcome::Homed
                }
                Err(e) => self.fault(e),
            };
        }

        let home = self.config.home_pose;
        if !self.calibration.limits().allows(&home) {
            return self.fault(Error::Unreachable(format!(
                "home pose {home} violates joint limits"
            )));
        }

        // HOME goes straight to MOVING
        let trajectory = JointTrajectory::plan(
            self.arm.pose,
            &[home],
            self.config.max_step_deg,
            self.config.max_velocity,
        );
        if let Err(e) = self.execute(&trajectory).await {
            return self.fault(e);
        }
        self.arm.status = ArmStatus::Idle;
        self.transition(ControllerState::Idle);
        CycleOutcome::Homed
    }

    /// Read frames until the target shows up, the miss budget runs out, or
    /// the step times out. `Ok(None)` means the cycle was cancelled.
    async fn locate(&mut self) -> Result<Option<Target>> {
        let deadline = Instant::now() + self.config.locate_timeout;
        let mut misses = 0;

        loop {
            let Some(frame) = self.next_frame(deadline).await? else {
                return Ok(None);
            };
            self.stats.frames += 1;

            match self.locator.locate(&frame, &self.config.target_label) {
                Ok(target) => {
                    self.stats.matches += 1;
                    return Ok(Some(target));
                }
                Err(e) => {
                    misses += 1;
                    tracing::debug!(misses, budget = self.config.locate_retries, error = %e, "target miss");
                    if misses > self.config.locate_retries {
                        return Err(Error::NotFound(format!(
                            "'{}' not found in {misses} frames",
                            self.config.target_label
                        )));
                    }
                }
            }
        }
    }

    /// `None` means the cycle was cancelled
    async fn verify(&mut self) -> Option<Verification> {
        let Some(label) = self.config.confirm_label.clone() else {
            return Some(Verification::Skipped);
        };

        self.transition(ControllerState::Verifying);
        // Frames captured before the tap say nothing about its effect
        self.frames.clear();
        self.verifier.reset_history();
        let deadline = Instant::now() + self.config.verify_timeout;

        for attempt in 1..=self.config.verify_retries.max(1) {
            let frame = match self.next_frame(deadline).await {
                Ok(Some(frame)) => frame,
                Ok(None) => return None,
                Err(e) => {
                    tracing::debug!(error = %e, "verification timed out");
                    break;
                }
            };
            self.stats.frames += 1;

            if self.verifier.locate(&frame, &label).is_ok() {
                tracing::info!(attempt, "tap confirmed");
                return Some(Verification::Confirmed);
            }
            tracing::debug!(attempt, "confirmation not visible yet");
        }

        Some(Verification::Unconfirmed)
    }

    /// Wait for the next frame, checking for `CANCEL` between polls
    async fn next_frame(&mut self, deadline: Instant) -> Result<Option<OcrFrame>> {
        loop {
            if self.cancel_requested() {
                return Ok(None);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout(format!("no usable frame during {}", self.state)));
            }
            let wait = (deadline - now).min(self.config.poll_interval);
            if let Some(frame) = self.frames.recv_timeout(wait).await {
                return Ok(Some(frame));
            }
        }
    }

    fn cancel_requested(&self) -> bool {
        self.intents
            .take_if(|intent| intent.keyword == CommandKeyword::Cancel)
            .is_some()
    }

    /// Resolve the target and solve hover and touch poses
    fn plan_tap(&self, target: &Target) -> Result<(WorkspacePoint, JointTrajectory)> {
        let touch = self.calibration.resolve(target.center())?;
        let hover = touch.raised(self.config.tap_lift);

        let solver = self.calibration.solver();
        let hover_angles = solver.solve(hover)?;
        let touch_angles = solver.solve(touch)?;

        let trajectory = JointTrajectory::plan(
            self.arm.pose,
            &[hover_angles, touch_angles, hover_angles],
            self.config.max_step_deg,
            self.config.max_velocity,
        );

        tracing::debug!(
            x = touch.x,
            y = touch.y,
            z = touch.z,
            touch = %touch_angles,
            waypoints = trajectory.len(),
            duration_ms = trajectory.duration().as_millis(),
            "tap planned"
        );

        Ok((touch, trajectory))
    }

    /// Push a trajectory to the actuator; runs to completion or fault
    async fn execute(&mut self, trajectory: &JointTrajectory) -> Result<()> {
        self.arm.status = ArmStatus::Busy;
        self.transition(ControllerState::Moving);

        match self.actuator.move_trajectory(trajectory).await {
            Ok(ack) => {
                if let Some(last) = trajectory.last() {
                    self.arm.pose = *last;
                }
                self.stats.moves += 1;
                tracing::info!(
                    actuator = self.actuator.name(),
                    commands = ack.commands,
                    elapsed_ms = ack.elapsed.as_millis(),
                    "trajectory executed"
                );
                Ok(())
            }
            Err(e) => {
                let e = if e.is_driver_fault() {
                    e
                } else {
                    Error::DriverFault(e.to_string())
                };
                self.recover(&e).await;
                Err(e)
            }
        }
    }

    /// Home the arm after a driver fault and latch the fault
    async fn recover(&mut self, cause: &Error) {
        tracing::error!(error = %cause, "driver fault during motion, homing arm");
        match self.actuator.home().await {
            Ok(_) => self.arm.pose = self.config.home_pose,
            Err(e) => tracing::error!(error = %e, "recovery home failed"),
        }
        self.arm.status = ArmStatus::Fault;
    }

    fn ignore(&mut self, reason: String) -> CycleOutcome {
        self.stats.ignored_intents += 1;
        tracing::debug!(%reason, "intent ignored");
        self.transition(ControllerState::Idle);
        CycleOutcome::Ignored { reason }
    }

    fn cancelled(&mut self) -> CycleOutcome {
        self.stats.cancellations += 1;
        tracing::info!(state = %self.state, "cycle cancelled");
        self.transition(ControllerState::Idle);
        CycleOutcome::Cancelled
    }

    fn fault(&mut self, error: Error) -> CycleOutcome {
        self.stats.faults += 1;
        tracing::warn!(state = %self.state, error = %error, "cycle failed");
        self.last_error = Some(error.to_string());
        self.transition(ControllerState::Fault);
        self.transition(ControllerState::Idle);
        CycleOutcome::Fault(error)
    }

    fn transition(&mut self, state: ControllerState) {
        if state != self.state {
            tracing::debug!(from = %self.state, to = %state, "state change");
        }
        self.state = state;
        self.publish();
    }

    fn publish(&self) {
        let mut event = StatusEvent::new(self.state, self.arm);
        event.last_intent.clone_from(&self.last_intent);
        event.last_target.clone_from(&self.last_target);
        event.last_error.clone_from(&self.last_error);
        self.publisher.publish(event);
    }
}

fn check_home_pose(calibration: &CalibrationModel, home: JointAngles) -> Result<()> {
    if calibration.limits().allows(&home) {
        Ok(())
    } else {
        Err(Error::InvalidCalibration(format!(
            "home pose {home} violates joint limits"
        )))
    }
}

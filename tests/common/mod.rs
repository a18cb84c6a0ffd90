//! Shared test utilities
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use hrc_arm::actuation::{Ack, Actuator, JointTrajectory};
use hrc_arm::calibration::{CalibrationModel, CalibrationPair};
use hrc_arm::controller::{ControllerConfig, Mailbox};
use hrc_arm::kinematics::{ArmGeometry, JointLimits};
use hrc_arm::perception::{BoundingBox, OcrDetection, OcrFrame};
use hrc_arm::{Error, Result};

/// What the controller asked the actuator to do
#[derive(Debug, Clone)]
pub enum Call {
    Move(JointTrajectory),
    Home,
}

/// Inspects calls made to a [`MockActuator`] after it moved into a controller
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    pub fn moves(&self) -> Vec<JointTrajectory> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Move(t) => Some(t),
                Call::Home => None,
            })
            .collect()
    }

    pub fn homes(&self) -> usize {
        self.calls().iter().filter(|c| matches!(c, Call::Home)).count()
    }
}

/// Actuator that records calls instead of driving hardware
#[derive(Debug, Default)]
pub struct MockActuator {
    log: CallLog,
    /// Simulated execution time per trajectory
    pub move_delay: Duration,
    /// Every `move_trajectory` fails with `DriverFault`
    pub fail_moves: bool,
}

impl MockActuator {
    pub fn new() -> (Self, CallLog) {
        let actuator = Self::default();
        let log = actuator.log.clone();
        (actuator, log)
    }

    pub fn with_delay(move_delay: Duration) -> (Self, CallLog) {
        let (mut actuator, log) = Self::new();
        actuator.move_delay = move_delay;
        (actuator, log)
    }

    pub fn failing() -> (Self, CallLog) {
        let (mut actuator, log) = Self::new();
        actuator.fail_moves = true;
        (actuator, log)
    }
}

#[async_trait]
impl Actuator for MockActuator {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn move_trajectory(&mut self, trajectory: &JointTrajectory) -> Result<Ack> {
        self.log.0.lock().unwrap().push(Call::Move(trajectory.clone()));
        if !self.move_delay.is_zero() {
            tokio::time::sleep(self.move_delay).await;
        }
        if self.fail_moves {
            return Err(Error::DriverFault("servo 2 stalled".into()));
        }
        Ok(Ack {
            commands: trajectory.len(),
            elapsed: self.move_delay,
        })
    }

    async fn home(&mut self) -> Result<Ack> {
        self.log.0.lock().unwrap().push(Call::Home);
        Ok(Ack {
            commands: 1,
            elapsed: Duration::ZERO,
        })
    }
}

/// The three-point calibration used across the end-to-end scenarios
pub fn scenario_pairs() -> Vec<CalibrationPair> {
    vec![
        CalibrationPair::new((10.0, 10.0), (0.05, 0.10)),
        CalibrationPair::new((10.0, 200.0), (0.05, 0.25)),
        CalibrationPair::new((300.0, 10.0), (0.20, 0.10)),
    ]
}

/// Scenario calibration on a 0.15 m + 0.15 m arm, touch plane at shoulder height
pub fn scenario_calibration() -> CalibrationModel {
    CalibrationModel::new(
        scenario_pairs(),
        ArmGeometry::new(0.15, 0.15),
        JointLimits::default(),
        0.0,
    )
    .expect("scenario calibration is valid")
}

/// Controller tuning with short waits for tests
pub fn fast_config() -> ControllerConfig {
    ControllerConfig {
        settle_time: Duration::from_millis(1),
        locate_timeout: Duration::from_secs(2),
        verify_timeout: Duration::from_secs(2),
        poll_interval: Duration::from_millis(5),
        max_velocity: 10_000.0,
        ..ControllerConfig::default()
    }
}

/// A detection whose bounding box is centred on `(cx, cy)`
pub fn detection(text: &str, cx: f64, cy: f64, confidence: f64) -> OcrDetection {
    OcrDetection::new(text, BoundingBox::new(cx - 20.0, cy - 10.0, 40.0, 20.0), confidence)
}

/// Frame showing the attendance button centred on `(cx, cy)`
pub fn attendance_frame(cx: f64, cy: f64) -> OcrFrame {
    OcrFrame::new(vec![
        detection("Welcome", 60.0, 20.0, 0.9),
        detection("Attendance", cx, cy, 0.95),
    ])
}

/// Frame without the attendance button
pub fn blank_frame() -> OcrFrame {
    OcrFrame::new(vec![detection("Welcome", 60.0, 20.0, 0.9)])
}

/// Keep `frames` supplied with copies of `frame` whenever it is empty
pub fn spawn_frame_feeder(frames: Arc<Mailbox<OcrFrame>>, frame: OcrFrame) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let _ = frames.offer(OcrFrame::new(frame.detections.clone()));
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
}

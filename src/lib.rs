//! HRC Arm - voice and OCR driven stylus arm
//!
//! This library provides the coordination core for a 3-DOF arm that taps a
//! touchscreen on spoken command:
//! - Pixel to workspace calibration, persisted between sessions
//! - Inverse kinematics for a base-rotating two-link arm
//! - OCR target selection and voice command interpretation
//! - The coordination state machine and its safety policy
//! - Paced actuation over a servo driver
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐      ┌──────────────────┐
//! │ speech recognizer│      │   OCR pipeline   │   (external processes)
//! └────────┬─────────┘      └────────┬─────────┘
//!          │ lines                   │ lines
//! ┌────────▼─────────┐      ┌────────▼─────────┐
//! │   interpreter    │      │    OcrFrame      │
//! │   + debouncer    │      │                  │
//! └────────┬─────────┘      └────────┬─────────┘
//!          │ Mailbox<Intent>         │ Mailbox<OcrFrame>
//! ┌────────▼─────────────────────────▼─────────┐
//! │                 Controller                  │──▶ StatusEvent stream
//! │  locator │ calibration │ solver │ planner   │
//! └────────────────────┬────────────────────────┘
//!                      │ JointTrajectory
//! ┌────────────────────▼────────────────────────┐
//! │         Actuator (ServoActuator)            │
//! │      ServoDriver: process │ simulated       │
//! └─────────────────────────────────────────────┘
//! ```

pub mod actuation;
pub mod calibration;
pub mod config;
pub mod controller;
pub mod daemon;
pub mod error;
pub mod events;
pub mod kinematics;
pub mod perception;
pub mod supervisor;
pub mod voice;

pub use actuation::{Ack, Actuator, JointTrajectory};
pub use calibration::{CalibrationModel, CalibrationPair, PixelPoint};
pub use config::Config;
pub use controller::{Controller, ControllerConfig, ControllerState, CycleOutcome, Mailbox};
pub use daemon::Daemon;
pub use error::{Error, Result};
pub use events::{SessionStats, StatusEvent, StatusPublisher};
pub use kinematics::{ArmGeometry, JointAngles, JointLimits, Solver, WorkspacePoint};
pub use perception::{OcrDetection, OcrFrame, Target, TargetLocator};
pub use voice::{CommandInterpreter, CommandKeyword, Intent};

//! Actuation boundary
//!
//! The controller talks to an [`Actuator`], which accepts whole joint
//! trajectories and a home command. [`ServoActuator`] implements it on top
//! of a per-command [`ServoDriver`], pacing waypoints so no joint exceeds
//! the configured angular velocity.

mod driver;
mod servo;
mod trajectory;

use std::time::Duration;

use async_trait::async_trait;

pub use driver::{ProcessServoDriver, SimulatedServoDriver};
pub use servo::{PacingConfig, ServoActuator, ServoCommand, ServoDriver};
pub use trajectory::{DEFAULT_MAX_STEP_DEG, JointTrajectory};

use crate::Result;

/// Acknowledgement of a completed actuation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// Commands acknowledged by the driver
    pub commands: usize,
    /// Wall time spent executing
    pub elapsed: Duration,
}

/// Sink for joint commands
///
/// Implementations must run a trajectory to completion or fail; a call is
/// never abandoned half way by the caller.
#[async_trait]
pub trait Actuator: Send {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Execute every waypoint of `trajectory` in order
    ///
    /// # Errors
    ///
    /// Returns `DriverFault` if the driver rejects a waypoint or does not
    /// acknowledge it in time
    async fn move_trajectory(&mut self, trajectory: &JointTrajectory) -> Result<Ack>;

    /// Return the arm to its home pose
    ///
    /// # Errors
    ///
    /// Returns `DriverFault` if the driver cannot home
    async fn home(&mut self) -> Result<Ack>;
}

#[async_trait]
impl<A: Actuator + ?Sized> Actuator for Box<A> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn move_trajectory(&mut self, trajectory: &JointTrajectory) -> Result<Ack> {
        (**self).move_trajectory(trajectory).await
    }

    async fn home(&mut self) -> Result<Ack> {
        (**self).home().await
    }
}

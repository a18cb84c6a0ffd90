//! Waypoint pacing over a servo driver

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{Ack, Actuator, JointTrajectory};
use crate::kinematics::JointAngles;
use crate::{Error, Result};

/// A single command to the servo driver
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ServoCommand {
    /// Drive all three joints to the given angles
    Move(JointAngles),
    /// Run the driver's homing routine
    Home,
}

impl ServoCommand {
    /// Line protocol representation
    #[must_use]
    pub fn to_line(&self) -> String {
        match self {
            Self::Move(a) => format!("MOVE {:.2} {:.2} {:.2}", a.base, a.shoulder, a.elbow),
            Self::Home => "HOME".to_string(),
        }
    }
}

/// Low-level servo driver: one command, one acknowledgement
#[async_trait]
pub trait ServoDriver: Send {
    fn name(&self) -> &'static str;

    /// Send a command and wait for the driver to acknowledge it
    ///
    /// # Errors
    ///
    /// Returns error if the driver rejects the command or is unreachable
    async fn send(&mut self, command: &ServoCommand) -> Result<()>;
}

/// Pacing and timeout parameters
#[derive(Debug, Clone, Copy)]
pub struct PacingConfig {
    /// Maximum joint angular velocity (deg/s)
    pub max_velocity: f64,
    /// How long to wait for each acknowledgement
    pub ack_timeout: Duration,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            max_velocity: 90.0,
            ack_timeout: Duration::from_secs(2),
        }
    }
}

/// [`Actuator`] that streams trajectories to a [`ServoDriver`]
///
/// After each waypoint the actuator waits for the slowest joint to cover
/// the step at `max_velocity`, so the next command never overtakes the
/// mechanism.
pub struct ServoActuator<D> {
    driver: D,
    pacing: PacingConfig,
    home_pose: JointAngles,
    current: JointAngles,
}

impl<D: ServoDriver> ServoActuator<D> {
    /// The arm is assumed to start at `home_pose`
    #[must_use]
    pub const fn new(driver: D, pacing: PacingConfig, home_pose: JointAngles) -> Self {
        Self {
            driver,
            pacing,
            home_pose,
            current: home_pose,
        }
    }

    /// Last pose acknowledged by the driver
    #[must_use]
    pub const fn current(&self) -> JointAngles {
        self.current
    }

    #[must_use]
    pub const fn driver(&self) -> &D {
        &self.driver
    }

    /// Time for the slowest joint to travel between two poses
    #[must_use]
    pub fn travel_time(&self, from: &JointAngles, to: &JointAngles) -> Duration {
        if self.pacing.max_velocity <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(from.max_delta(to) / self.pacing.max_velocity)
    }

    async fn send(&mut self, command: ServoCommand) -> Result<()> {
        match tokio::time::timeout(self.pacing.ack_timeout, self.driver.send(&command)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(Error::DriverFault(msg))) => Err(Error::DriverFault(msg)),
            Ok(Err(e)) => Err(Error::DriverFault(format!("{}: {e}", self.driver.name()))),
            Err(_) => Err(Error::DriverFault(format!(
                "{}: no acknowledgement for {} within {:?}",
                self.driver.name(),
                command.to_line(),
                self.pacing.ack_timeout
            ))),
        }
    }
}

#[async_trait]
impl<D: ServoDriver> Actuator for ServoActuator<D> {
    fn name(&self) -> &'static str {
        self.driver.name()
    }

    async fn move_trajectory(&mut self, trajectory: &JointTrajectory) -> Result<Ack> {
        let started = Instant::now();

        for (i, waypoint) in trajectory.waypoints().iter().enumerate() {
            let settle = self.travel_time(&self.current, waypoint);
            if let Err(e) = self.send(ServoCommand::Move(*waypoint)).await {
                tracing::error!(
                    waypoint = i,
                    total = trajectory.len(),
                    error = %e,
                    "waypoint rejected"
                );
                return Err(e);
            }
            self.current = *waypoint;
            tokio::time::sleep(settle).await;
        }

        tracing::debug!(
            waypoints = trajectory.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "trajectory complete"
        );

        Ok(Ack {
            commands: trajectory.len(),
            elapsed: started.elapsed(),
        })
    }

    async fn home(&mut self) -> Result<Ack> {
        let started = Instant::now();
        self.send(ServoCommand::Home).await?;
        self.current = self.home_pose;
        tracing::info!(driver = self.driver.name(), "arm homed");

        Ok(Ack {
            commands: 1,
            elapsed: started.elapsed(),
        })
    }
}

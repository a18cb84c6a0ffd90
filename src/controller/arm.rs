//! Arm state owned by the controller

use serde::Serialize;

use crate::kinematics::JointAngles;

/// Coarse arm availability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArmStatus {
    Idle,
    Busy,
    /// Latched after a driver fault until the arm is re-homed
    Fault,
}

/// Last commanded pose and availability
///
/// There is exactly one writer: the controller that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ArmState {
    pub pose: JointAngles,
    pub status: ArmStatus,
}

impl ArmState {
    /// Arm resting at `home`
    #[must_use]
    pub const fn at_home(home: JointAngles) -> Self {
        Self {
            pose: home,
            status: ArmStatus::Idle,
        }
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.status == ArmStatus::Busy
    }

    #[must_use]
    pub fn is_faulted(&self) -> bool {
        self.status == ArmStatus::Fault
    }
}

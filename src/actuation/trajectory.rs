//! Joint-space trajectories

use std::time::Duration;

use serde::Serialize;

use crate::kinematics::JointAngles;

/// Default largest joint change between consecutive waypoints (degrees)
pub const DEFAULT_MAX_STEP_DEG: f64 = 5.0;

/// Ordered joint waypoints with a target completion time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JointTrajectory {
    waypoints: Vec<JointAngles>,
    duration: Duration,
}

impl JointTrajectory {
    /// Build a trajectory from explicit waypoints
    #[must_use]
    pub const fn new(waypoints: Vec<JointAngles>, duration: Duration) -> Self {
        Self {
            waypoints,
            duration,
        }
    }

    /// Interpolate from `start` through each pose in `via`
    ///
    /// Each leg is split so no joint moves more than `max_step_deg` between
    /// waypoints. `start` itself is not included; the last waypoint is the
    /// last pose of `via`. The duration assumes every leg runs at
    /// `max_velocity` (deg/s) on its slowest joint.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn plan(start: JointAngles, via: &[JointAngles], max_step_deg: f64, max_velocity: f64) -> Self {
        let step = if max_step_deg > 0.0 {
            max_step_deg
        } else {
            DEFAULT_MAX_STEP_DEG
        };

        let mut waypoints = Vec::new();
        let mut travel = 0.0;
        let mut from = start;

        for to in via {
            let delta = from.max_delta(to);
            travel += delta;
            let segments = ((delta / step).ceil() as usize).max(1);
            for i in 1..segments {
                waypoints.push(from.lerp(to, i as f64 / segments as f64));
            }
            waypoints.push(*to);
            from = *to;
        }

        let duration = if max_velocity > 0.0 {
            Duration::from_secs_f64(travel / max_velocity)
        } else {
            Duration::ZERO
        };

        Self {
            waypoints,
            duration,
        }
    }

    #[must_use]
    pub fn waypoints(&self) -> &[JointAngles] {
        &self.waypoints
    }

    #[must_use]
    pub const fn duration(&self) -> Duration {
        self.duration
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    /// Final pose, where the arm rests after execution
    #[must_use]
    pub fn last(&self) -> Option<&JointAngles> {
        self.waypoints.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_respects_step() {
        let start = JointAngles::new(0.0, 90.0, -90.0);
        let end = JointAngles::new(22.0, 80.0, -60.0);
        let trajectory = JointTrajectory::plan(start, &[end], 5.0, 60.0);

        assert_eq!(trajectory.len(), 6);
        let mut prev = start;
        for wp in trajectory.waypoints() {
            assert!(prev.max_delta(wp) <= 5.0 + 1e-9);
            prev = *wp;
        }
        assert_eq!(trajectory.last(), Some(&end));
        assert_eq!(trajectory.duration(), Duration::from_millis(500));
    }

    #[test]
    fn test_plan_through_via_points() {
        let start = JointAngles::new(0.0, 0.0, 0.0);
        let hover = JointAngles::new(10.0, 0.0, 0.0);
        let touch = JointAngles::new(10.0, -4.0, 0.0);
        let trajectory = JointTrajectory::plan(start, &[hover, touch, hover], 5.0, 10.0);

        // 2 + 1 + 1 segments
        assert_eq!(trajectory.len(), 4);
        assert_eq!(trajectory.waypoints()[1], hover);
        assert_eq!(trajectory.waypoints()[2], touch);
        assert_eq!(trajectory.duration(), Duration::from_secs_f64(1.8));
    }

    #[test]
    fn test_zero_length_leg_still_emits_waypoint() {
        let pose = JointAngles::new(1.0, 2.0, 3.0);
        let trajectory = JointTrajectory::plan(pose, &[pose], 5.0, 10.0);
        assert_eq!(trajectory.len(), 1);
        assert_eq!(trajectory.duration(), Duration::ZERO);
    }
}

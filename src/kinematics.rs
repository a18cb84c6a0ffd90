//! Inverse kinematics for the 3-DOF stylus arm
//!
//! The arm has a base rotation axis followed by a planar two-link chain
//! (shoulder, elbow). The workspace frame has its origin at the shoulder
//! pivot with `z` pointing up.
//!
//! Angle conventions (degrees):
//! - base: `atan2(y, x)`, 0 along +x
//! - shoulder: link `L1` measured from the horizontal plane, positive raised
//! - elbow: link `L2` measured from the extension of `L1`, 0 = straight arm
//!
//! Elbow-up is the negative-elbow solution: the elbow sits above the line
//! from the shoulder to the target.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Slack on reach and joint limits to absorb floating point noise
pub const TOLERANCE: f64 = 1e-6;

/// A point in the arm workspace (metres)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorkspacePoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl WorkspacePoint {
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance to another point
    #[must_use]
    pub fn distance(&self, other: &Self) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2) + (self.z - other.z).powi(2))
            .sqrt()
    }

    /// Same point shifted along `z`
    #[must_use]
    pub const fn raised(&self, dz: f64) -> Self {
        Self {
            x: self.x,
            y: self.y,
            z: self.z + dz,
        }
    }
}

/// Joint angles in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointAngles {
    pub base: f64,
    pub shoulder: f64,
    pub elbow: f64,
}

impl JointAngles {
    #[must_use]
    pub const fn new(base: f64, shoulder: f64, elbow: f64) -> Self {
        Self {
            base,
            shoulder,
            elbow,
        }
    }

    /// Largest single-joint travel between two poses
    #[must_use]
    pub fn max_delta(&self, other: &Self) -> f64 {
        (self.base - other.base)
            .abs()
            .max((self.shoulder - other.shoulder).abs())
            .max((self.elbow - other.elbow).abs())
    }

    /// Linear interpolation, `t` in `[0, 1]`
    #[must_use]
    pub fn lerp(&self, other: &Self, t: f64) -> Self {
        Self {
            base: (other.base - self.base).mul_add(t, self.base),
            shoulder: (other.shoulder - self.shoulder).mul_add(t, self.shoulder),
            elbow: (other.elbow - self.elbow).mul_add(t, self.elbow),
        }
    }

    #[must_use]
    pub const fn as_array(&self) -> [f64; 3] {
        [self.base, self.shoulder, self.elbow]
    }
}

impl std::fmt::Display for JointAngles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "base={:.2}° shoulder={:.2}° elbow={:.2}°",
            self.base, self.shoulder, self.elbow
        )
    }
}

/// Closed angle interval in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct AngleRange {
    pub min: f64,
    pub max: f64,
}

impl AngleRange {
    #[must_use]
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Whether `angle` is inside the range, allowing [`TOLERANCE`] of slack
    #[must_use]
    pub fn contains(&self, angle: f64) -> bool {
        angle >= self.min - TOLERANCE && angle <= self.max + TOLERANCE
    }
}

impl From<[f64; 2]> for AngleRange {
    fn from([min, max]: [f64; 2]) -> Self {
        Self { min, max }
    }
}

impl From<AngleRange> for [f64; 2] {
    fn from(range: AngleRange) -> Self {
        [range.min, range.max]
    }
}

/// Per-joint angle limits
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointLimits {
    pub base: AngleRange,
    pub shoulder: AngleRange,
    pub elbow: AngleRange,
}

impl Default for JointLimits {
    fn default() -> Self {
        Self {
            base: AngleRange::new(-180.0, 180.0),
            shoulder: AngleRange::new(-90.0, 180.0),
            elbow: AngleRange::new(-180.0, 180.0),
        }
    }
}

impl JointLimits {
    /// Whether every joint of `angles` is within its range
    #[must_use]
    pub fn allows(&self, angles: &JointAngles) -> bool {
        self.base.contains(angles.base)
            && self.shoulder.contains(angles.shoulder)
            && self.elbow.contains(angles.elbow)
    }

    /// Check that each range is well formed
    ///
    /// # Errors
    ///
    /// Returns `InvalidCalibration` if any range has `min > max` or a
    /// non-finite bound
    pub fn validate(&self) -> Result<()> {
        for (name, range) in [
            ("base", self.base),
            ("shoulder", self.shoulder),
            ("elbow", self.elbow),
        ] {
            if !range.min.is_finite() || !range.max.is_finite() || range.min > range.max {
                return Err(Error::InvalidCalibration(format!(
                    "{name} limit [{}, {}] is not a valid range",
                    range.min, range.max
                )));
            }
        }
        Ok(())
    }
}

/// Link lengths in metres
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArmGeometry {
    /// Shoulder to elbow
    pub l1: f64,
    /// Elbow to stylus tip
    pub l2: f64,
}

impl ArmGeometry {
    #[must_use]
    pub const fn new(l1: f64, l2: f64) -> Self {
        Self { l1, l2 }
    }

    #[must_use]
    pub fn max_reach(&self) -> f64 {
        self.l1 + self.l2
    }

    #[must_use]
    pub fn min_reach(&self) -> f64 {
        (self.l1 - self.l2).abs()
    }

    /// # Errors
    ///
    /// Returns `InvalidCalibration` if a link length is not strictly positive
    pub fn validate(&self) -> Result<()> {
        if !(self.l1.is_finite() && self.l1 > 0.0 && self.l2.is_finite() && self.l2 > 0.0) {
            return Err(Error::InvalidCalibration(format!(
                "link lengths must be positive (l1={}, l2={})",
                self.l1, self.l2
            )));
        }
        Ok(())
    }
}

/// Which of the two planar solutions to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElbowConfiguration {
    Up,
    Down,
}

/// Inverse/forward kinematics for one arm
#[derive(Debug, Clone, Copy)]
pub struct Solver {
    geometry: ArmGeometry,
    limits: JointLimits,
}

impl Solver {
    #[must_use]
    pub const fn new(geometry: ArmGeometry, limits: JointLimits) -> Self {
        Self { geometry, limits }
    }

    #[must_use]
    pub const fn geometry(&self) -> ArmGeometry {
        self.geometry
    }

    #[must_use]
    pub const fn limits(&self) -> JointLimits {
        self.limits
    }

    /// Solve for joint angles placing the stylus tip at `point`
    ///
    /// Prefers elbow-up and falls back to elbow-down when elbow-up violates
    /// a joint limit.
    ///
    /// # Errors
    ///
    /// Returns `Unreachable` when the point is outside the annulus
    /// `[|L1-L2|, L1+L2]` or both candidates violate the joint limits
    pub fn solve(&self, point: WorkspacePoint) -> Result<JointAngles> {
        let reach = planar_reach(point);
        let max = self.geometry.max_reach();
        let min = self.geometry.min_reach();

        if reach > max + TOLERANCE {
            return Err(Error::Unreachable(format!(
                "point at distance {reach:.6} m is beyond maximum reach {max:.6} m"
            )));
        }
        if reach < min - TOLERANCE {
            return Err(Error::Unreachable(format!(
                "point at distance {reach:.6} m is inside minimum reach {min:.6} m"
            )));
        }

        let mut rejected = Vec::with_capacity(2);
        for configuration in [ElbowConfiguration::Up, ElbowConfiguration::Down] {
            let angles = self.candidate(point, configuration);
            if self.limits.allows(&angles) {
                tracing::trace!(?configuration, %angles, "ik solution");
                return Ok(angles);
            }
            rejected.push(format!("{configuration:?}: {angles}"));
        }

        Err(Error::Unreachable(format!(
            "both elbow solutions violate joint limits ({})",
            rejected.join("; ")
        )))
    }

    /// Raw candidate for one elbow configuration, without limit checks
    ///
    /// Reach is clamped into the valid annulus so boundary points within
    /// [`TOLERANCE`] produce a straight or fully folded arm.
    #[must_use]
    pub fn candidate(&self, point: WorkspacePoint, configuration: ElbowConfiguration) -> JointAngles {
        let ArmGeometry { l1, l2 } = self.geometry;
        let r = point.x.hypot(point.y);
        let base = point.y.atan2(point.x);

        let cos_elbow = ((r * r + point.z * point.z - l1 * l1 - l2 * l2) / (2.0 * l1 * l2))
            .clamp(-1.0, 1.0);
        let magnitude = cos_elbow.acos();
        let elbow = match configuration {
            ElbowConfiguration::Up => -magnitude,
            ElbowConfiguration::Down => magnitude,
        };

        let shoulder =
            point.z.atan2(r) - (l2 * elbow.sin()).atan2(l2.mul_add(elbow.cos(), l1));

        JointAngles::new(base.to_degrees(), shoulder.to_degrees(), elbow.to_degrees())
    }

    /// Stylus tip position for the given joint angles
    #[must_use]
    pub fn forward(&self, angles: &JointAngles) -> WorkspacePoint {
        let ArmGeometry { l1, l2 } = self.geometry;
        let base = angles.base.to_radians();
        let shoulder = angles.shoulder.to_radians();
        let elbow = angles.elbow.to_radians();

        let planar = l1.mul_add(shoulder.cos(), l2 * (shoulder + elbow).cos());
        let z = l1.mul_add(shoulder.sin(), l2 * (shoulder + elbow).sin());

        WorkspacePoint::new(planar * base.cos(), planar * base.sin(), z)
    }
}

/// Distance from the shoulder pivot within the arm plane
fn planar_reach(point: WorkspacePoint) -> f64 {
    point.x.hypot(point.y).hypot(point.z)
}

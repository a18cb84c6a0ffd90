//! Pixel to workspace calibration
//!
//! A calibration is a set of correspondences between camera pixels and
//! points on the touch plane, from which a 2-D affine transform is fitted.
//! Models are immutable: recalibration builds a new model, and a failed
//! recalibration leaves the caller's previous model untouched.

mod file;

pub use file::{CalibrationFile, parse_point_records};

use serde::{Deserialize, Serialize};

use crate::kinematics::{ArmGeometry, JointLimits, Solver, WorkspacePoint};
use crate::{Error, Result};

/// Minimum number of correspondences for an affine fit
pub const MIN_POINTS: usize = 3;

/// Pixels closer than this are considered the same point
const DUPLICATE_EPSILON: f64 = 1e-9;

/// Relative determinant below which the pixel scatter is degenerate
const COLLINEAR_EPSILON: f64 = 1e-9;

/// Default growth of the calibrated region on each side
pub const DEFAULT_MARGIN: f64 = 0.05;

/// A pixel coordinate in the camera frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelPoint {
    pub x: f64,
    pub y: f64,
}

impl PixelPoint {
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    #[must_use]
    pub fn distance(&self, other: &Self) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// One pixel to touch-plane correspondence
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPair {
    pub px: f64,
    pub py: f64,
    pub wx: f64,
    pub wy: f64,
}

impl CalibrationPair {
    #[must_use]
    pub const fn new(pixel: (f64, f64), workspace: (f64, f64)) -> Self {
        Self {
            px: pixel.0,
            py: pixel.1,
            wx: workspace.0,
            wy: workspace.1,
        }
    }

    #[must_use]
    pub const fn pixel(&self) -> PixelPoint {
        PixelPoint::new(self.px, self.py)
    }
}

/// `wx = a*px + b*py + c`, `wy = d*px + e*py + f`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl AffineTransform {
    /// Least-squares fit over the given pairs
    ///
    /// Coordinates are centred before forming the normal equations, which
    /// keeps the fit well conditioned for pixel values in the thousands.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientPoints`, `DuplicatePoint` or `Collinear` for
    /// degenerate input
    #[allow(clippy::cast_precision_loss)]
    pub fn fit(pairs: &[CalibrationPair]) -> Result<Self> {
        validate_pairs(pairs)?;

        let n = pairs.len() as f64;
        let mean = |f: fn(&CalibrationPair) -> f64| pairs.iter().map(f).sum::<f64>() / n;
        let (mpx, mpy) = (mean(|p| p.px), mean(|p| p.py));
        let (mwx, mwy) = (mean(|p| p.wx), mean(|p| p.wy));

        let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
        let (mut sxu, mut syu, mut sxv, mut syv) = (0.0, 0.0, 0.0, 0.0);
        for p in pairs {
            let (x, y) = (p.px - mpx, p.py - mpy);
            let (u, v) = (p.wx - mwx, p.wy - mwy);
            sxx += x * x;
            sxy += x * y;
            syy += y * y;
            sxu += x * u;
            syu += y * u;
            sxv += x * v;
            syv += y * v;
        }

        let det = sxx.mul_add(syy, -(sxy * sxy));
        let scale = (sxx + syy) * (sxx + syy);
        if scale <= 0.0 || det <= COLLINEAR_EPSILON * scale {
            return Err(Error::Collinear);
        }

        let a = syy.mul_add(sxu, -(sxy * syu)) / det;
        let b = sxx.mul_add(syu, -(sxy * sxu)) / det;
        let d = syy.mul_add(sxv, -(sxy * syv)) / det;
        let e = sxx.mul_add(syv, -(sxy * sxv)) / det;

        Ok(Self {
            a,
            b,
            c: mwx - a * mpx - b * mpy,
            d,
            e,
            f: mwy - d * mpx - e * mpy,
        })
    }

    /// Map a pixel onto the touch plane
    #[must_use]
    pub fn apply(&self, pixel: PixelPoint) -> (f64, f64) {
        (
            self.a.mul_add(pixel.x, self.b.mul_add(pixel.y, self.c)),
            self.d.mul_add(pixel.x, self.e.mul_add(pixel.y, self.f)),
        )
    }
}

/// Axis-aligned pixel rectangle that resolved points must fall into
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelRegion {
    pub min: PixelPoint,
    pub max: PixelPoint,
}

impl PixelRegion {
    /// Bounding box of the calibration pixels grown by `margin` on each side
    fn around(pairs: &[CalibrationPair], margin: f64) -> Self {
        let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
        let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for p in pairs {
            min_x = min_x.min(p.px);
            min_y = min_y.min(p.py);
            max_x = max_x.max(p.px);
            max_y = max_y.max(p.py);
        }
        let grow_x = (max_x - min_x) * margin;
        let grow_y = (max_y - min_y) * margin;

        Self {
            min: PixelPoint::new(min_x - grow_x, min_y - grow_y),
            max: PixelPoint::new(max_x + grow_x, max_y + grow_y),
        }
    }

    #[must_use]
    pub fn contains(&self, pixel: PixelPoint) -> bool {
        (self.min.x..=self.max.x).contains(&pixel.x) && (self.min.y..=self.max.y).contains(&pixel.y)
    }
}

/// Calibrated mapping from camera pixels to arm joint space inputs
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationModel {
    pairs: Vec<CalibrationPair>,
    transform: AffineTransform,
    region: PixelRegion,
    geometry: ArmGeometry,
    limits: JointLimits,
    touch_height: f64,
    margin: f64,
}

impl CalibrationModel {
    /// Build and validate a model
    ///
    /// # Errors
    ///
    /// Returns a calibration error if the point set is degenerate or the
    /// arm parameters are invalid
    pub fn new(
        pairs: Vec<CalibrationPair>,
        geometry: ArmGeometry,
        limits: JointLimits,
        touch_height: f64,
    ) -> Result<Self> {
        Self::with_margin(pairs, geometry, limits, touch_height, DEFAULT_MARGIN)
    }

    /// Build a model with an explicit region margin
    ///
    /// # Errors
    ///
    /// See [`CalibrationModel::new`]
    pub fn with_margin(
        pairs: Vec<CalibrationPair>,
        geometry: ArmGeometry,
        limits: JointLimits,
        touch_height: f64,
        margin: f64,
    ) -> Result<Self> {
        geometry.validate()?;
        limits.validate()?;
        if !touch_height.is_finite() {
            return Err(Error::InvalidCalibration("touch height must be finite".into()));
        }
        if !(margin.is_finite() && margin >= 0.0) {
            return Err(Error::InvalidCalibration(format!(
                "region margin must be non-negative, got {margin}"
            )));
        }

        let transform = AffineTransform::fit(&pairs)?;
        let region = PixelRegion::around(&pairs, margin);

        let model = Self {
            pairs,
            transform,
            region,
            geometry,
            limits,
            touch_height,
            margin,
        };

        tracing::debug!(
            points = model.pairs.len(),
            residual = model.fit_residual(),
            "calibration fitted"
        );

        Ok(model)
    }

    /// Build a replacement model from a new point set, keeping arm parameters
    ///
    /// # Errors
    ///
    /// Returns a calibration error for a degenerate point set; `self` is
    /// unaffected either way
    pub fn recalibrate(&self, pairs: Vec<CalibrationPair>) -> Result<Self> {
        Self::with_margin(pairs, self.geometry, self.limits, self.touch_height, self.margin)
    }

    /// Map a pixel to a workspace point on the touch plane
    ///
    /// # Errors
    ///
    /// Returns `OutOfCalibratedRegion` if the pixel lies outside the region
    /// spanned by the calibration points
    pub fn resolve(&self, pixel: PixelPoint) -> Result<WorkspacePoint> {
        if !self.region.contains(pixel) {
            return Err(Error::OutOfCalibratedRegion {
                x: pixel.x,
                y: pixel.y,
            });
        }
        let (x, y) = self.transform.apply(pixel);
        Ok(WorkspacePoint::new(x, y, self.touch_height))
    }

    /// Root-mean-square fit error over the calibration pairs (metres)
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fit_residual(&self) -> f64 {
        let sum: f64 = self
            .pairs
            .iter()
            .map(|p| {
                let (x, y) = self.transform.apply(p.pixel());
                (x - p.wx).powi(2) + (y - p.wy).powi(2)
            })
            .sum();
        (sum / self.pairs.len() as f64).sqrt()
    }

    /// Kinematics solver for this arm
    #[must_use]
    pub const fn solver(&self) -> Solver {
        Solver::new(self.geometry, self.limits)
    }

    #[must_use]
    pub fn pairs(&self) -> &[CalibrationPair] {
        &self.pairs
    }

    #[must_use]
    pub const fn transform(&self) -> AffineTransform {
        self.transform
    }

    #[must_use]
    pub const fn region(&self) -> PixelRegion {
        self.region
    }

    #[must_use]
    pub const fn geometry(&self) -> ArmGeometry {
        self.geometry
    }

    #[must_use]
    pub const fn limits(&self) -> JointLimits {
        self.limits
    }

    #[must_use]
    pub const fn touch_height(&self) -> f64 {
        self.touch_height
    }

    #[must_use]
    pub const fn margin(&self) -> f64 {
        self.margin
    }
}

/// Reject point sets that cannot define a unique affine transform
fn validate_pairs(pairs: &[CalibrationPair]) -> Result<()> {
    if pairs.len() < MIN_POINTS {
        return Err(Error::InsufficientPoints(pairs.len()));
    }

    if let Some(p) = pairs
        .iter()
        .find(|p| !(p.px.is_finite() && p.py.is_finite() && p.wx.is_finite() && p.wy.is_finite()))
    {
        return Err(Error::InvalidCalibration(format!(
            "non-finite calibration record ({}, {}) -> ({}, {})",
            p.px, p.py, p.wx, p.wy
        )));
    }

    for (i, p) in pairs.iter().enumerate() {
        if pairs[i + 1..]
            .iter()
            .any(|q| p.pixel().distance(&q.pixel()) < DUPLICATE_EPSILON)
        {
            return Err(Error::DuplicatePoint { x: p.px, y: p.py });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> Vec<CalibrationPair> {
        vec![
            CalibrationPair::new((10.0, 10.0), (0.05, 0.10)),
            CalibrationPair::new((10.0, 200.0), (0.05, 0.25)),
            CalibrationPair::new((300.0, 10.0), (0.20, 0.10)),
        ]
    }

    fn model(pairs: Vec<CalibrationPair>) -> Result<CalibrationModel> {
        CalibrationModel::new(pairs, ArmGeometry::new(0.15, 0.15), JointLimits::default(), 0.0)
    }

    #[test]
    fn test_exact_fit_through_three_points() {
        let model = model(triangle()).unwrap();
        assert!(model.fit_residual() < 1e-12);

        let p = model.resolve(PixelPoint::new(155.0, 105.0)).unwrap();
        assert!((p.x - 0.125).abs() < 1e-9);
        assert!((p.y - 0.175).abs() < 1e-9);
        assert!(p.z.abs() < f64::EPSILON);
    }

    #[test]
    fn test_least_squares_with_noise() {
        let mut pairs = triangle();
        pairs.push(CalibrationPair::new((300.0, 200.0), (0.2005, 0.2495)));
        let model = model(pairs).unwrap();

        assert!(model.fit_residual() > 0.0);
        assert!(model.fit_residual() < 1e-3);
    }

    #[test]
    fn test_insufficient_points() {
        let pairs = triangle()[..2].to_vec();
        assert!(matches!(model(pairs), Err(Error::InsufficientPoints(2))));
    }

    #[test]
    fn test_collinear_points() {
        let pairs = vec![
            CalibrationPair::new((0.0, 0.0), (0.0, 0.0)),
            CalibrationPair::new((100.0, 100.0), (0.1, 0.1)),
            CalibrationPair::new((200.0, 200.0), (0.2, 0.2)),
        ];
        assert!(matches!(model(pairs), Err(Error::Collinear)));
    }

    #[test]
    fn test_duplicate_points() {
        let mut pairs = triangle();
        pairs.push(CalibrationPair::new((10.0, 10.0), (0.06, 0.11)));
        assert!(matches!(model(pairs), Err(Error::DuplicatePoint { .. })));
    }

    #[test]
    fn test_out_of_region() {
        let model = model(triangle()).unwrap();
        assert!(matches!(
            model.resolve(PixelPoint::new(1000.0, 105.0)),
            Err(Error::OutOfCalibratedRegion { .. })
        ));
        // inside the margin
        assert!(model.resolve(PixelPoint::new(5.0, 5.0)).is_ok());
    }

    #[test]
    fn test_recalibrate_keeps_previous_on_error() {
        let previous = model(triangle()).unwrap();
        let bad = vec![CalibrationPair::new((0.0, 0.0), (0.0, 0.0))];
        assert!(previous.recalibrate(bad).is_err());
        assert_eq!(previous.pairs().len(), 3);
    }
}

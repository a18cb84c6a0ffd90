//! Calibration file persistence
//!
//! The file is TOML with scalar parameters, the arm geometry, joint limits
//! and an ordered `[[points]]` array of `(px, py, wx, wy)` records:
//!
//! ```toml
//! touch_height = 0.0
//! margin = 0.05
//!
//! [arm]
//! l1 = 0.15
//! l2 = 0.15
//!
//! [limits]
//! base = [-180.0, 180.0]
//! shoulder = [-90.0, 180.0]
//! elbow = [-180.0, 180.0]
//!
//! [[points]]
//! px = 10.0
//! py = 10.0
//! wx = 0.05
//! wy = 0.10
//! ```

use std::io::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{CalibrationModel, CalibrationPair, DEFAULT_MARGIN};
use crate::kinematics::{ArmGeometry, JointLimits};
use crate::{Error, Result};

/// On-disk calibration schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationFile {
    /// Height of the touch plane relative to the shoulder pivot (metres)
    #[serde(default)]
    pub touch_height: f64,

    /// Region growth around the calibration pixels
    #[serde(default = "default_margin")]
    pub margin: f64,

    /// Link lengths
    pub arm: ArmGeometry,

    /// Joint limits in degrees
    #[serde(default)]
    pub limits: JointLimits,

    /// Pixel to workspace correspondences, in calibration order
    #[serde(default)]
    pub points: Vec<CalibrationPair>,
}

const fn default_margin() -> f64 {
    DEFAULT_MARGIN
}

impl From<&CalibrationModel> for CalibrationFile {
    fn from(model: &CalibrationModel) -> Self {
        Self {
            touch_height: model.touch_height(),
            margin: model.margin(),
            arm: model.geometry(),
            limits: model.limits(),
            points: model.pairs().to_vec(),
        }
    }
}

impl CalibrationFile {
    /// Validate and build the model this file describes
    ///
    /// # Errors
    ///
    /// Returns a calibration error if the stored data is degenerate
    pub fn into_model(self) -> Result<CalibrationModel> {
        CalibrationModel::with_margin(
            self.points,
            self.arm,
            self.limits,
            self.touch_height,
            self.margin,
        )
    }
}

impl CalibrationModel {
    /// Load and validate a calibration file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, parsed, or describes an
    /// invalid calibration
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let file: CalibrationFile = toml::from_str(&content)?;
        let model = file.into_model()?;

        tracing::info!(
            path = %path.display(),
            points = model.pairs().len(),
            residual = model.fit_residual(),
            "loaded calibration"
        );

        Ok(model)
    }

    /// Persist the model, replacing any existing file atomically
    ///
    /// The content is written to a temporary file in the same directory and
    /// renamed over `path`, so readers never see a partial calibration.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or any filesystem step fails
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(&CalibrationFile::from(self))?;

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| Error::Io(e.error))?;

        tracing::info!(path = %path.display(), points = self.pairs.len(), "saved calibration");
        Ok(())
    }
}

/// Parse `px,py,wx,wy` records, one per line
///
/// Blank lines, `#` comments and a non-numeric header line are skipped.
///
/// # Errors
///
/// Returns `InvalidCalibration` for a line that is neither a record nor
/// skippable
pub fn parse_point_records(content: &str) -> Result<Vec<CalibrationPair>> {
    let mut pairs = Vec::new();

    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let values: Vec<f64> = fields.iter().filter_map(|f| f.parse().ok()).collect();

        if values.len() == 4 && fields.len() == 4 {
            pairs.push(CalibrationPair::new((values[0], values[1]), (values[2], values[3])));
        } else if lineno == 0 && values.is_empty() {
            // header
        } else {
            return Err(Error::InvalidCalibration(format!(
                "line {}: expected px,py,wx,wy but found {line:?}",
                lineno + 1
            )));
        }
    }

    Ok(pairs)
}

//! Error types for the HRC arm controller

use thiserror::Error;

/// Result type alias for HRC operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while calibrating, planning or actuating
#[derive(Debug, Error)]
pub enum Error {
    /// Pixel lies outside the region covered by calibration points
    #[error("pixel ({x:.1}, {y:.1}) is outside the calibrated region")]
    OutOfCalibratedRegion { x: f64, y: f64 },

    /// No joint configuration reaches the requested point
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// OCR produced no acceptable target
    #[error("target not found: {0}")]
    NotFound(String),

    /// Servo driver rejected a command or stopped acknowledging
    #[error("driver fault: {0}")]
    DriverFault(String),

    /// Fewer than three calibration pairs
    #[error("insufficient calibration points: need at least 3, got {0}")]
    InsufficientPoints(usize),

    /// Calibration pixels do not span the plane
    #[error("calibration points are collinear")]
    Collinear,

    /// Two calibration pairs share the same pixel
    #[error("duplicate calibration point at pixel ({x}, {y})")]
    DuplicatePoint { x: f64, y: f64 },

    /// Calibration parameters are inconsistent
    #[error("invalid calibration: {0}")]
    InvalidCalibration(String),

    /// A bounded wait expired
    #[error("timed out: {0}")]
    Timeout(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("toml serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Error {
    /// Whether the error leaves the arm in an unknown physical state
    #[must_use]
    pub const fn is_driver_fault(&self) -> bool {
        matches!(self, Self::DriverFault(_))
    }

    /// Whether the error comes from calibration validation
    #[must_use]
    pub const fn is_calibration(&self) -> bool {
        matches!(
            self,
            Self::InsufficientPoints(_)
                | Self::Collinear
                | Self::DuplicatePoint { .. }
                | Self::InvalidCalibration(_)
        )
    }
}

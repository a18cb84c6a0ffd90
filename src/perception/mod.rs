//! OCR boundary and target selection
//!
//! The OCR engine is an external process. Each processed camera frame
//! arrives as one JSON line:
//!
//! ```json
//! {"timestamp": "2026-01-01T10:00:00Z",
//!  "detections": [{"text": "Attendance", "bbox": {"x": 120, "y": 80, "width": 70, "height": 50}, "confidence": 91}]}
//! ```

mod locator;

pub use locator::{LocatorConfig, MatchKind, TargetLocator, normalize_label};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::calibration::PixelPoint;

/// Pixel rectangle reported by OCR
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    #[must_use]
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Centre pixel, the point the stylus taps
    #[must_use]
    pub fn center(&self) -> PixelPoint {
        PixelPoint::new(self.width.mul_add(0.5, self.x), self.height.mul_add(0.5, self.y))
    }
}

/// One recognized word or phrase in a frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrDetection {
    pub text: String,
    pub bbox: BoundingBox,
    /// Recognition confidence, either in `[0, 1]` or as a percentage
    pub confidence: f64,
}

impl OcrDetection {
    #[must_use]
    pub fn new(text: impl Into<String>, bbox: BoundingBox, confidence: f64) -> Self {
        Self {
            text: text.into(),
            bbox,
            confidence,
        }
    }

    /// Confidence in `[0, 1]`
    ///
    /// Tesseract reports percentages, so values above 1 are scaled down.
    #[must_use]
    pub fn normalized_confidence(&self) -> f64 {
        let c = if self.confidence > 1.0 {
            self.confidence / 100.0
        } else {
            self.confidence
        };
        c.clamp(0.0, 1.0)
    }
}

/// All detections from one processed camera frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrFrame {
    #[serde(default)]
    pub detections: Vec<OcrDetection>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl OcrFrame {
    #[must_use]
    pub fn new(detections: Vec<OcrDetection>) -> Self {
        Self {
            detections,
            timestamp: Utc::now(),
        }
    }

    /// Parse one line of the OCR wire format
    ///
    /// # Errors
    ///
    /// Returns a serialization error for malformed JSON
    pub fn parse_line(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line.trim())?)
    }
}

/// The on-screen element selected for one coordination cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub label: String,
    pub bbox: BoundingBox,
    /// Normalized to `[0, 1]`
    pub confidence: f64,
    pub frame_timestamp: DateTime<Utc>,
}

impl Target {
    #[must_use]
    pub fn center(&self) -> PixelPoint {
        self.bbox.center()
    }
}

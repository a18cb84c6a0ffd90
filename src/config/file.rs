//! TOML configuration file loading
//!
//! Supports `~/.config/hrc/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct HrcConfigFile {
    /// Calibration file location
    #[serde(default)]
    pub calibration: CalibrationFileConfig,

    /// Coordination cycle tuning
    #[serde(default)]
    pub controller: ControllerFileConfig,

    /// OCR label matching
    #[serde(default)]
    pub locator: LocatorFileConfig,

    /// Servo driver and motion pacing
    #[serde(default)]
    pub servo: ServoFileConfig,

    /// External recognizer processes
    #[serde(default)]
    pub sources: SourcesFileConfig,

    /// Command phrases and debouncing
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Status output
    #[serde(default)]
    pub status: StatusFileConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct CalibrationFileConfig {
    pub path: Option<PathBuf>,
}

/// Coordination cycle tuning
#[derive(Debug, Default, Deserialize)]
pub struct ControllerFileConfig {
    /// Label of the element to tap (e.g. "attendance")
    pub target_label: Option<String>,
    /// Text that confirms a successful tap
    pub confirm_label: Option<String>,
    pub confidence_threshold: Option<f64>,
    pub locate_retries: Option<u32>,
    pub locate_timeout_ms: Option<u64>,
    pub verify_retries: Option<u32>,
    pub verify_timeout_ms: Option<u64>,
    pub settle_ms: Option<u64>,
    pub intent_max_age_secs: Option<u64>,
    /// Hover height above the screen (metres)
    pub tap_lift: Option<f64>,
    pub max_step_deg: Option<f64>,
    /// `[base, shoulder, elbow]` in degrees
    pub home_pose: Option<[f64; 3]>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LocatorFileConfig {
    pub min_confidence: Option<f64>,
    pub allow_substring: Option<bool>,
    pub fold_digits: Option<bool>,
    /// OCR text → canonical word
    pub aliases: Option<HashMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServoFileConfig {
    /// Driver process command line
    pub command: Option<String>,
    /// Run without hardware
    pub simulate: Option<bool>,
    /// Maximum joint velocity (deg/s)
    pub max_velocity: Option<f64>,
    pub ack_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SourcesFileConfig {
    /// Speech recognizer command line; stdin is used when unset
    pub speech_command: Option<String>,
    /// OCR pipeline command line
    pub ocr_command: Option<String>,
    pub restart_base_ms: Option<u64>,
    pub restart_max_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    pub cooldown_ms: Option<u64>,
    /// Phrase overrides per command
    pub mark_attendance: Option<Vec<String>>,
    pub cancel: Option<Vec<String>>,
    pub home: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusFileConfig {
    /// JSON lines status file; stdout when unset
    pub path: Option<PathBuf>,
    pub stats_interval_secs: Option<u64>,
}

/// Load the TOML config file from the standard path
///
/// Returns `HrcConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> HrcConfigFile {
    config_file_path().map_or_else(HrcConfigFile::default, |path| load_config_file_from(&path))
}

/// Load a TOML config file from `path`, falling back to defaults
pub fn load_config_file_from(path: &Path) -> HrcConfigFile {
    if !path.exists() {
        return HrcConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                HrcConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            HrcConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/hrc/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("hrc").join("config.toml"))
}

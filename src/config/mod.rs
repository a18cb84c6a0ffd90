//! Configuration management for the HRC arm

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::actuation::PacingConfig;
use crate::controller::ControllerConfig;
use crate::kinematics::JointAngles;
use crate::perception::LocatorConfig;
use crate::supervisor::RestartPolicy;
use crate::voice::{CommandInterpreter, CommandKeyword, DEFAULT_COOLDOWN, default_phrases};
use crate::{Error, Result};

/// Smallest per-waypoint joint step accepted from configuration, in degrees
const MIN_STEP_DEG: f64 = 0.1;

/// HRC arm configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Calibration file
    pub calibration_path: PathBuf,

    /// Path to data directory
    pub data_dir: PathBuf,

    /// Coordination cycle tuning
    pub controller: ControllerConfig,

    /// Servo driver configuration
    pub servo: ServoConfig,

    /// External recognizers
    pub sources: SourcesConfig,

    /// Voice command configuration
    pub voice: VoiceConfig,

    /// JSON lines status file; stdout when `None`
    pub status_path: Option<PathBuf>,
}

/// Servo driver configuration
#[derive(Debug, Clone)]
pub struct ServoConfig {
    /// Driver process command line
    pub command: Option<String>,

    /// Acknowledge commands without hardware
    pub simulate: bool,

    /// Motion pacing
    pub pacing: PacingConfig,
}

/// External recognizer processes
#[derive(Debug, Clone, Default)]
pub struct SourcesConfig {
    /// Speech recognizer; stdin when `None`
    pub speech_command: Option<String>,

    /// OCR pipeline; without one the arm cannot locate targets
    pub ocr_command: Option<String>,

    /// Restart backoff for both
    pub restart: RestartPolicy,
}

/// Voice command configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Same-command suppression window
    pub cooldown: Duration,

    /// Phrase table, highest priority first
    pub phrases: Vec<(CommandKeyword, Vec<String>)>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            cooldown: DEFAULT_COOLDOWN,
            phrases: default_phrases(),
        }
    }
}

impl VoiceConfig {
    /// Interpreter for the configured phrase table
    #[must_use]
    pub fn interpreter(&self) -> CommandInterpreter {
        CommandInterpreter::new(self.phrases.clone())
    }
}

/// Default data directory (`~/.local/share/hrc` on Linux)
#[must_use]
pub fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(|| PathBuf::from("."), |d| d.data_dir().join("hrc"))
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let value = std::env::var(name).ok()?;
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(var = name, value, "ignoring unparseable environment variable");
            None
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

impl Config {
    /// Load configuration from the standard config file and environment
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self> {
        Self::load_with_options(None, false)
    }

    /// Load configuration with overrides
    ///
    /// `config_path` replaces the standard file location; `simulate` forces
    /// the simulated servo driver.
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    #[allow(clippy::too_many_lines)]
    pub fn load_with_options(config_path: Option<&Path>, simulate: bool) -> Result<Self> {
        // Load optional TOML config file (env > toml > default)
        let fc = config_path.map_or_else(file::load_config_file, file::load_config_file_from);

        // Determine data directory (~/.local/share/hrc on Linux)
        let data_dir = std::env::var("HRC_DATA_DIR").map_or_else(|_| default_data_dir(), PathBuf::from);
        std::fs::create_dir_all(&data_dir).ok();

        let calibration_path = std::env::var("HRC_CALIBRATION")
            .ok()
            .map(PathBuf::from)
            .or(fc.calibration.path)
            .unwrap_or_else(|| data_dir.join("calibration.toml"));

        // Controller (env > toml > default)
        let defaults = ControllerConfig::default();
        let c = fc.controller;
        let locator_defaults = LocatorConfig::default();
        let locator = LocatorConfig {
            min_confidence: env_parse("HRC_MIN_OCR_CONFIDENCE")
                .or(fc.locator.min_confidence)
                .unwrap_or(locator_defaults.min_confidence),
            allow_substring: fc
                .locator
                .allow_substring
                .unwrap_or(locator_defaults.allow_substring),
            fold_digits: fc.locator.fold_digits.unwrap_or(locator_defaults.fold_digits),
            aliases: fc.locator.aliases.unwrap_or_default(),
        };
        let controller = ControllerConfig {
            target_label: std::env::var("HRC_TARGET_LABEL")
                .ok()
                .or(c.target_label)
                .unwrap_or(defaults.target_label),
            confirm_label: std::env::var("HRC_CONFIRM_LABEL").ok().or(c.confirm_label),
            confidence_threshold: env_parse("HRC_CONFIDENCE_THRESHOLD")
                .or(c.confidence_threshold)
                .unwrap_or(defaults.confidence_threshold),
            locate_retries: env_parse("HRC_LOCATE_RETRIES")
                .or(c.locate_retries)
                .unwrap_or(defaults.locate_retries),
            locate_timeout: c
                .locate_timeout_ms
                .map_or(defaults.locate_timeout, Duration::from_millis),
            verify_retries: env_parse("HRC_VERIFY_RETRIES")
                .or(c.verify_retries)
                .unwrap_or(defaults.verify_retries),
            verify_timeout: c
                .verify_timeout_ms
                .map_or(defaults.verify_timeout, Duration::from_millis),
            settle_time: c.settle_ms.map_or(defaults.settle_time, Duration::from_millis),
            intent_max_age: c
                .intent_max_age_secs
                .map_or(defaults.intent_max_age, Duration::from_secs),
            tap_lift: c.tap_lift.unwrap_or(defaults.tap_lift),
            max_step_deg: c.max_step_deg.unwrap_or(defaults.max_step_deg),
            max_velocity: fc.servo.max_velocity.unwrap_or(defaults.max_velocity),
            home_pose: c
                .home_pose
                .map_or(defaults.home_pose, |[b, s, e]| JointAngles::new(b, s, e)),
            poll_interval: defaults.poll_interval,
            stats_interval: fc
                .status
                .stats_interval_secs
                .map_or(defaults.stats_interval, Duration::from_secs),
            locator,
        };

        if !(0.0..=1.0).contains(&controller.confidence_threshold) {
            return Err(Error::Config(format!(
                "confidence threshold must be within [0, 1], got {}",
                controller.confidence_threshold
            )));
        }
        if !controller.max_velocity.is_finite() || controller.max_velocity <= 0.0 {
            return Err(Error::Config(format!(
                "servo max_velocity must be positive, got {}",
                controller.max_velocity
            )));
        }
        if !(MIN_STEP_DEG..=180.0).contains(&controller.max_step_deg) {
            return Err(Error::Config(format!(
                "controller max_step_deg must be within [{MIN_STEP_DEG}, 180], got {}",
                controller.max_step_deg
            )));
        }
        if !controller.tap_lift.is_finite() || controller.tap_lift < 0.0 {
            return Err(Error::Config(format!(
                "controller tap_lift must be a non-negative distance, got {}",
                controller.tap_lift
            )));
        }
        if !(0.0..=1.0).contains(&controller.locator.min_confidence) {
            return Err(Error::Config(format!(
                "locator min_confidence must be within [0, 1], got {}",
                controller.locator.min_confidence
            )));
        }

        // Servo driver (flag > env > toml > default)
        let pacing_defaults = PacingConfig::default();
        let servo = ServoConfig {
            command: std::env::var("HRC_SERVO_COMMAND").ok().or(fc.servo.command),
            simulate: simulate
                || env_flag("HRC_SIMULATE")
                    .or(fc.servo.simulate)
                    .unwrap_or(false),
            pacing: PacingConfig {
                max_velocity: controller.max_velocity,
                ack_timeout: fc
                    .servo
                    .ack_timeout_ms
                    .map_or(pacing_defaults.ack_timeout, Duration::from_millis),
            },
        };
        if simulate {
            tracing::info!("servo simulation forced via --simulate");
        }

        let restart_defaults = RestartPolicy::default();
        let sources = SourcesConfig {
            speech_command: std::env::var("HRC_SPEECH_COMMAND")
                .ok()
                .or(fc.sources.speech_command),
            ocr_command: std::env::var("HRC_OCR_COMMAND").ok().or(fc.sources.ocr_command),
            restart: RestartPolicy {
                base_delay: fc
                    .sources
                    .restart_base_ms
                    .map_or(restart_defaults.base_delay, Duration::from_millis),
                max_delay: fc
                    .sources
                    .restart_max_ms
                    .map_or(restart_defaults.max_delay, Duration::from_millis),
            },
        };

        // Overrides replace a keyword's phrases but keep its priority
        let mut overrides = fc.voice;
        let phrases = default_phrases()
            .into_iter()
            .map(|(keyword, builtin)| {
                let custom = match keyword {
                    CommandKeyword::Cancel => overrides.cancel.take(),
                    CommandKeyword::Home => overrides.home.take(),
                    CommandKeyword::MarkAttendance => overrides.mark_attendance.take(),
                    CommandKeyword::Unknown => None,
                };
                (keyword, custom.unwrap_or(builtin))
            })
            .collect();
        let voice = VoiceConfig {
            cooldown: overrides
                .cooldown_ms
                .map_or(DEFAULT_COOLDOWN, Duration::from_millis),
            phrases,
        };

        let status_path = std::env::var("HRC_STATUS_PATH")
            .ok()
            .map(PathBuf::from)
            .or(fc.status.path);

        Ok(Self {
            calibration_path,
            data_dir,
            controller,
            servo,
            sources,
            voice,
            status_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_overlay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            [controller]
            confirm_label = "marked"
            settle_ms = 250

            [servo]
            max_velocity = 45.0

            [voice]
            home = ["park"]
            "#,
        )
        .unwrap();

        let config = Config::load_with_options(Some(&path), true).unwrap();
        assert_eq!(config.controller.confirm_label.as_deref(), Some("marked"));
        assert_eq!(config.controller.settle_time, Duration::from_millis(250));
        assert!((config.servo.pacing.max_velocity - 45.0).abs() < f64::EPSILON);
        assert!(config.servo.simulate);

        let interpreter = config.voice.interpreter();
        assert_eq!(interpreter.interpret("park").keyword, CommandKeyword::Home);
        assert_eq!(
            interpreter.interpret("mark attendance").keyword,
            CommandKeyword::MarkAttendance
        );
    }

    #[test]
    fn test_invalid_velocity_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[servo]\nmax_velocity = 0.0\n").unwrap();

        assert!(matches!(
            Config::load_with_options(Some(&path), true),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_motion_and_locator_bounds_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        for body in [
            "[controller]\nmax_step_deg = 0.0001\n",
            "[controller]\nmax_step_deg = 0.0\n",
            "[controller]\nmax_step_deg = 270.0\n",
            "[controller]\ntap_lift = -0.01\n",
            "[controller]\ntap_lift = nan\n",
            "[locator]\nmin_confidence = 1.5\n",
            "[locator]\nmin_confidence = -0.1\n",
        ] {
            std::fs::write(&path, body).unwrap();
            assert!(
                matches!(
                    Config::load_with_options(Some(&path), true),
                    Err(Error::Config(_))
                ),
                "{body:?}"
            );
        }

        std::fs::write(
            &path,
            "[controller]\nmax_step_deg = 2.5\ntap_lift = 0.0\n\n[locator]\nmin_confidence = 1.0\n",
        )
        .unwrap();
        let config = Config::load_with_options(Some(&path), true).unwrap();
        assert!((config.controller.max_step_deg - 2.5).abs() < f64::EPSILON);
    }
}

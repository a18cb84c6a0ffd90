//! Daemon - the main arm service
//!
//! Orchestrates the speech and OCR recognizers, the coordination controller,
//! and the status stream

use std::path::PathBuf;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, mpsc, watch};

use crate::actuation::{
    Actuator, PacingConfig, ProcessServoDriver, ServoActuator, SimulatedServoDriver,
};
use crate::calibration::CalibrationModel;
use crate::controller::{Controller, Mailbox};
use crate::events::{StatusEvent, StatusPublisher};
use crate::perception::OcrFrame;
use crate::supervisor::{LineSource, supervise_lines};
use crate::voice::{CommandDebouncer, CommandInterpreter, CommandKeyword, Intent, Utterance};
use crate::{Config, Error, Result};

/// Lines buffered between a recognizer and its consumer
const LINE_BUFFER: usize = 32;

/// How long recognizers get to stop after shutdown
const SUPERVISOR_GRACE: Duration = Duration::from_secs(2);

/// Build the actuator selected by the configuration
///
/// # Errors
///
/// Returns error if no driver is configured or the driver process cannot start
pub fn build_actuator(config: &Config) -> Result<Box<dyn Actuator>> {
    let pacing: PacingConfig = config.servo.pacing;
    let home = config.controller.home_pose;

    if config.servo.simulate {
        tracing::info!("using simulated servo driver");
        return Ok(Box::new(ServoActuator::new(
            SimulatedServoDriver::default(),
            pacing,
            home,
        )));
    }

    let command = config.servo.command.as_deref().ok_or_else(|| {
        Error::Config("no servo driver configured; set servo.command or use --simulate".into())
    })?;
    let driver = ProcessServoDriver::spawn(command)?;
    Ok(Box::new(ServoActuator::new(driver, pacing, home)))
}

/// The HRC daemon - wires recognizers to the controller
pub struct Daemon {
    config: Config,
}

impl Daemon {
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run the daemon until interrupted
    ///
    /// # Errors
    ///
    /// Returns error if the calibration cannot be loaded or the servo driver
    /// cannot start
    pub async fn run(self) -> Result<()> {
        let calibration = CalibrationModel::load(&self.config.calibration_path).map_err(|e| {
            Error::Config(format!(
                "cannot load calibration from {}: {e} (run `hrc calibrate` first)",
                self.config.calibration_path.display()
            ))
        })?;
        tracing::info!(
            path = %self.config.calibration_path.display(),
            points = calibration.pairs().len(),
            residual = calibration.fit_residual(),
            "calibration loaded"
        );

        let actuator = build_actuator(&self.config)?;
        let publisher = StatusPublisher::new();
        let mut controller = Controller::new(actuator, calibration, self.config.controller.clone())?
            .with_publisher(publisher.clone());

        // Set up shutdown signal
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
                let _ = shutdown_tx.send(true);
            }
        });

        tokio::spawn(status_sink(
            publisher.subscribe(),
            self.config.status_path.clone(),
        ));

        // Speech: recognizer process or stdin → interpreter → intent mailbox
        let (speech_tx, speech_rx) = mpsc::channel(LINE_BUFFER);
        let (speech_source, raw_text) = self
            .config
            .sources
            .speech_command
            .clone()
            .map_or((LineSource::Stdin, true), |cmd| (LineSource::Process(cmd), false));
        let mut supervisors = vec![tokio::spawn(supervise_lines(
            "speech",
            speech_source,
            self.config.sources.restart.clone(),
            speech_tx,
            shutdown_rx.clone(),
        ))];
        tokio::spawn(intent_pump(
            speech_rx,
            self.config.voice.interpreter(),
            CommandDebouncer::new(self.config.voice.cooldown),
            controller.intents(),
            raw_text,
        ));

        // OCR: recognizer process → frame mailbox
        if let Some(cmd) = self.config.sources.ocr_command.clone() {
            let (ocr_tx, ocr_rx) = mpsc::channel(LINE_BUFFER);
            supervisors.push(tokio::spawn(supervise_lines(
                "ocr",
                LineSource::Process(cmd),
                self.config.sources.restart.clone(),
                ocr_tx,
                shutdown_rx.clone(),
            )));
            tokio::spawn(frame_pump(ocr_rx, controller.frames()));
        } else {
            tracing::warn!("no OCR command configured; targets can never be located");
        }

        tracing::info!(
            target_label = %self.config.controller.target_label,
            simulate = self.config.servo.simulate,
            "hrc arm ready"
        );

        controller.run(shutdown_rx).await;

        // Recognizer children are killed when their supervisors return
        let stopped = futures::future::join_all(supervisors);
        if tokio::time::timeout(SUPERVISOR_GRACE, stopped).await.is_err() {
            tracing::warn!("recognizers did not stop in time");
        }
        Ok(())
    }
}

/// Turn recognizer lines into intents
///
/// `raw_text` treats every line as an utterance (interactive stdin) instead
/// of requiring the recognizer protocol.
pub async fn intent_pump(
    mut lines: mpsc::Receiver<String>,
    interpreter: CommandInterpreter,
    mut debouncer: CommandDebouncer,
    intents: std::sync::Arc<Mailbox<Intent>>,
    raw_text: bool,
) {
    while let Some(line) = lines.recv().await {
        let utterance = if raw_text {
            Some(Utterance {
                text: line.trim().to_string(),
                confidence: None,
                timestamp: None,
            })
        } else {
            Utterance::parse_line(&line)
        };
        let Some(utterance) = utterance else {
            tracing::trace!(line, "recognizer output");
            continue;
        };

        let intent = interpreter.interpret_utterance(&utterance);
        submit_intent(&intents, &mut debouncer, intent);
    }
}

/// Post an intent to the controller mailbox
///
/// Recognized commands replace whatever is pending; noise only fills an
/// empty slot so it never displaces a real command. Repeats inside the
/// debounce window are dropped.
pub fn submit_intent(
    intents: &Mailbox<Intent>,
    debouncer: &mut CommandDebouncer,
    intent: Intent,
) {
    if intent.keyword == CommandKeyword::Unknown {
        if intents.offer(intent).is_none() {
            tracing::trace!("unknown utterance queued");
        }
        return;
    }

    if !debouncer.check(intent.keyword) {
        tracing::debug!(keyword = %intent.keyword, "duplicate command suppressed");
        return;
    }

    if let Some(previous) = intents.post(intent) {
        tracing::debug!(replaced = %previous.keyword, "pending intent replaced");
    }
}

/// Parse OCR lines into frames for the controller
pub async fn frame_pump(mut lines: mpsc::Receiver<String>, frames: std::sync::Arc<Mailbox<OcrFrame>>) {
    while let Some(line) = lines.recv().await {
        match OcrFrame::parse_line(&line) {
            Ok(frame) => {
                tracing::trace!(detections = frame.detections.len(), "ocr frame");
                frames.post(frame);
            }
            Err(e) => tracing::warn!(error = %e, "malformed OCR line"),
        }
    }
}

/// Write status events as JSON lines to a file or stdout
async fn status_sink(mut events: broadcast::Receiver<StatusEvent>, path: Option<PathBuf>) {
    let mut out: Box<dyn tokio::io::AsyncWrite + Send + Unpin> = match &path {
        Some(path) => match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
        {
            Ok(file) => {
                tracing::info!(path = %path.display(), "writing status events");
                Box::new(file)
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "cannot open status file, using stdout");
                Box::new(tokio::io::stdout())
            }
        },
        None => Box::new(tokio::io::stdout()),
    };

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "status sink lagging");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let line = match event.to_json_line() {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize status event");
                continue;
            }
        };
        let written = async {
            out.write_all(line.as_bytes()).await?;
            out.write_all(b"\n").await?;
            out.flush().await
        }
        .await;
        if let Err(e) = written {
            tracing::warn!(error = %e, "failed to write status event");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_unknown_never_displaces_command() {
        let intents = Mailbox::new();
        let mut debouncer = CommandDebouncer::default();

        submit_intent(&intents, &mut debouncer, Intent::new(CommandKeyword::MarkAttendance, 0.9));
        submit_intent(&intents, &mut debouncer, Intent::new(CommandKeyword::Unknown, 0.0));

        assert_eq!(intents.take().unwrap().keyword, CommandKeyword::MarkAttendance);
    }

    #[test]
    fn test_command_replaces_pending() {
        let intents = Mailbox::new();
        let mut debouncer = CommandDebouncer::default();

        submit_intent(&intents, &mut debouncer, Intent::new(CommandKeyword::MarkAttendance, 0.9));
        submit_intent(&intents, &mut debouncer, Intent::new(CommandKeyword::Cancel, 1.0));

        assert_eq!(intents.take().unwrap().keyword, CommandKeyword::Cancel);
    }

    #[test]
    fn test_repeat_debounced() {
        let intents = Mailbox::new();
        let mut debouncer = CommandDebouncer::new(Duration::from_secs(60));

        submit_intent(&intents, &mut debouncer, Intent::new(CommandKeyword::Home, 1.0));
        intents.take();
        submit_intent(&intents, &mut debouncer, Intent::new(CommandKeyword::Home, 1.0));

        assert!(intents.is_empty());
    }

    #[tokio::test]
    async fn test_intent_pump_protocol_lines() {
        let (tx, rx) = mpsc::channel(4);
        let intents = Arc::new(Mailbox::new());
        let pump = tokio::spawn(intent_pump(
            rx,
            CommandInterpreter::default(),
            CommandDebouncer::default(),
            intents.clone(),
            false,
        ));

        tx.send("loading model...".to_string()).await.unwrap();
        tx.send("[COMMAND] mark attendance".to_string()).await.unwrap();
        drop(tx);
        pump.await.unwrap();

        let intent = intents.take().unwrap();
        assert_eq!(intent.keyword, CommandKeyword::MarkAttendance);
        assert_eq!(intent.utterance, "mark attendance");
    }

    #[tokio::test]
    async fn test_frame_pump_skips_malformed() {
        let (tx, rx) = mpsc::channel(4);
        let frames = Arc::new(Mailbox::new());
        let pump = tokio::spawn(frame_pump(rx, frames.clone()));

        tx.send(r#"{"detections": [{"text": "Attendance", "bbox": {"x": 1, "y": 2, "width": 3, "height": 4}, "confidence": 91}]}"#.to_string())
            .await
            .unwrap();
        tx.send("not json".to_string()).await.unwrap();
        drop(tx);
        pump.await.unwrap();

        let frame = frames.take().unwrap();
        assert_eq!(frame.detections.len(), 1);
        assert_eq!(frame.detections[0].text, "Attendance");
    }
}

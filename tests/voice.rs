//! Voice pipeline integration tests
//!
//! Feeds recognizer output lines through the intent pump into a controller

use std::sync::Arc;

use tokio::sync::mpsc;

use hrc_arm::controller::{Controller, CycleOutcome, Mailbox};
use hrc_arm::daemon::intent_pump;
use hrc_arm::voice::{CommandDebouncer, CommandInterpreter, CommandKeyword, Intent, Utterance};

mod common;

use common::{MockActuator, attendance_frame, fast_config, scenario_calibration};

/// Push `lines` through a protocol-mode intent pump and return what got posted
async fn pump_lines(lines: &[&str]) -> Option<Intent> {
    let (tx, rx) = mpsc::channel(lines.len().max(1));
    let intents = Arc::new(Mailbox::new());
    let pump = tokio::spawn(intent_pump(
        rx,
        CommandInterpreter::default(),
        CommandDebouncer::default(),
        intents.clone(),
        false,
    ));

    for line in lines {
        tx.send((*line).to_string()).await.unwrap();
    }
    drop(tx);
    pump.await.unwrap();

    intents.take()
}

#[tokio::test]
async fn test_recognizer_json_line_scales_confidence() {
    let intent = pump_lines(&[r#"{"text": "mark attendance", "confidence": 0.5}"#])
        .await
        .unwrap();

    assert_eq!(intent.keyword, CommandKeyword::MarkAttendance);
    assert!((intent.confidence - 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn test_low_confidence_speech_never_moves_arm() {
    let intent = pump_lines(&[r#"{"text": "mark attendance", "confidence": 0.4}"#])
        .await
        .unwrap();

    let (actuator, log) = MockActuator::new();
    let mut controller = Controller::new(actuator, scenario_calibration(), fast_config()).unwrap();
    controller.frames().post(attendance_frame(155.0, 105.0));

    let outcome = controller.handle_intent(intent).await;
    assert!(matches!(outcome, CycleOutcome::Ignored { .. }));
    assert!(log.calls().is_empty());
}

#[tokio::test]
async fn test_misheard_command_still_taps() {
    let intent = pump_lines(&["[COMMAND] mark atendance please"]).await.unwrap();
    assert_eq!(intent.keyword, CommandKeyword::MarkAttendance);
    assert!((intent.confidence - 0.7).abs() < 1e-9);

    let (actuator, log) = MockActuator::new();
    let mut controller = Controller::new(actuator, scenario_calibration(), fast_config()).unwrap();
    controller.frames().post(attendance_frame(155.0, 105.0));

    let outcome = controller.handle_intent(intent).await;
    assert!(matches!(outcome, CycleOutcome::Tapped { .. }));
    assert_eq!(log.moves().len(), 1);
}

#[tokio::test]
async fn test_chatter_never_displaces_command() {
    let intent = pump_lines(&[
        "[COMMAND] go home",
        "[COMMAND] what a lovely day",
        "model loaded in 1.2s",
    ])
    .await
    .unwrap();

    assert_eq!(intent.keyword, CommandKeyword::Home);
    assert_eq!(intent.utterance, "go home");
}

#[tokio::test]
async fn test_latest_command_wins() {
    let intent = pump_lines(&["[COMMAND] mark attendance", "[COMMAND] stop"])
        .await
        .unwrap();

    assert_eq!(intent.keyword, CommandKeyword::Cancel);
}

#[test]
fn test_cancel_outranks_motion_in_one_phrase() {
    let intent = CommandInterpreter::default().interpret("cancel attendance");
    assert_eq!(intent.keyword, CommandKeyword::Cancel);
}

#[test]
fn test_custom_phrase_table() {
    let interpreter = CommandInterpreter::new(vec![
        (CommandKeyword::Cancel, vec!["halt"]),
        (CommandKeyword::MarkAttendance, vec!["check in"]),
    ]);

    assert_eq!(interpreter.interpret("check in").keyword, CommandKeyword::MarkAttendance);
    assert_eq!(interpreter.interpret("halt").keyword, CommandKeyword::Cancel);
    // Defaults are not merged in
    assert_eq!(interpreter.interpret("go home").keyword, CommandKeyword::Unknown);
}

#[test]
fn test_utterance_timestamp_carried_to_intent() {
    let utterance = Utterance::parse_line(
        r#"{"text": "home", "confidence": 0.9, "timestamp": "2024-03-01T08:00:00Z"}"#,
    )
    .unwrap();
    let intent = CommandInterpreter::default().interpret_utterance(&utterance);

    assert_eq!(intent.keyword, CommandKeyword::Home);
    assert_eq!(intent.timestamp.to_rfc3339(), "2024-03-01T08:00:00+00:00");
    // Far in the past, so the controller would discard it as stale
    assert!(intent.age() > chrono::TimeDelta::hours(1));
}

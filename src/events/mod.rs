//! Status events for displays
//!
//! The controller publishes a [`StatusEvent`] on every state change.
//! Publishing is best-effort: with no subscribers the event is dropped, and
//! subscribers that fall behind lose the oldest events.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::controller::{ArmState, ControllerState};
use crate::perception::Target;
use crate::voice::Intent;

/// Events buffered per subscriber before lagging ones start dropping
const CHANNEL_CAPACITY: usize = 64;

/// Snapshot of the coordination cycle
#[derive(Debug, Clone, Serialize)]
pub struct StatusEvent {
    /// Unique event ID (UUID v4)
    pub id: Uuid,
    pub state: ControllerState,
    pub arm: ArmState,
    pub last_intent: Option<Intent>,
    pub last_target: Option<Target>,
    pub last_error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl StatusEvent {
    #[must_use]
    pub fn new(state: ControllerState, arm: ArmState) -> Self {
        Self {
            id: Uuid::new_v4(),
            state,
            arm,
            last_intent: None,
            last_target: None,
            last_error: None,
            timestamp: Utc::now(),
        }
    }

    /// Serialize as a single JSON line
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json_line(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Fan-out of status events
#[derive(Debug, Clone)]
pub struct StatusPublisher {
    tx: broadcast::Sender<StatusEvent>,
}

impl Default for StatusPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusPublisher {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    /// Publish an event; never fails
    pub fn publish(&self, event: StatusEvent) {
        tracing::trace!(state = ?event.state, "status event");
        // No subscribers is fine
        let _ = self.tx.send(event);
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Running counters for one session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub started_at: DateTime<Utc>,
    /// Intents taken from the mailbox
    pub intents: u64,
    /// Intents that were stale, below threshold, or unknown
    pub ignored_intents: u64,
    /// OCR frames examined
    pub frames: u64,
    /// Frames that produced a target
    pub matches: u64,
    /// Trajectories executed to completion
    pub moves: u64,
    /// Cycles that ended in `FAULT`
    pub faults: u64,
    /// Taps that could not be verified
    pub soft_failures: u64,
    /// Cycles aborted by `CANCEL`
    pub cancellations: u64,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            intents: 0,
            ignored_intents: 0,
            frames: 0,
            matches: 0,
            moves: 0,
            faults: 0,
            soft_failures: 0,
            cancellations: 0,
        }
    }
}

impl SessionStats {
    /// Share of examined frames that matched, as a percentage
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn match_rate(&self) -> f64 {
        if self.frames == 0 {
            return 0.0;
        }
        self.matches as f64 / self.frames as f64 * 100.0
    }

    #[must_use]
    pub fn uptime(&self) -> chrono::TimeDelta {
        Utc::now() - self.started_at
    }

    /// Emit the counters as one structured log line
    pub fn log(&self) {
        tracing::info!(
            uptime_secs = self.uptime().num_seconds(),
            intents = self.intents,
            ignored = self.ignored_intents,
            frames = self.frames,
            matches = self.matches,
            match_rate = format!("{:.1}%", self.match_rate()),
            moves = self.moves,
            faults = self.faults,
            soft_failures = self.soft_failures,
            cancellations = self.cancellations,
            "session stats"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinematics::JointAngles;

    fn event() -> StatusEvent {
        StatusEvent::new(
            ControllerState::Idle,
            ArmState::at_home(JointAngles::new(0.0, 90.0, -90.0)),
        )
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let publisher = StatusPublisher::new();
        let mut rx = publisher.subscribe();
        assert_eq!(publisher.subscriber_count(), 1);

        publisher.publish(event());
        let received = rx.recv().await.unwrap();
        assert_eq!(received.state, ControllerState::Idle);
    }

    #[test]
    fn test_publish_without_subscribers() {
        StatusPublisher::new().publish(event());
    }

    #[test]
    fn test_event_json() {
        let mut event = event();
        event.last_error = Some("target not found".into());

        let line = event.to_json_line().unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["state"], "idle");
        assert_eq!(value["arm"]["status"], "idle");
        assert_eq!(value["last_error"], "target not found");
        assert!(value["last_intent"].is_null());
    }

    #[test]
    fn test_match_rate() {
        let mut stats = SessionStats::default();
        assert!(stats.match_rate().abs() < f64::EPSILON);
        stats.frames = 4;
        stats.matches = 1;
        assert!((stats.match_rate() - 25.0).abs() < 1e-9);
    }
}

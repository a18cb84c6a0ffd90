//! Supervision of external recognizer processes
//!
//! Speech and OCR run as separate programs that print one record per line
//! on stdout. Each is restarted with exponential backoff when it exits, so
//! a crashed recognizer degrades the arm only until it comes back.

use std::process::Stdio;
use std::time::{Duration, SystemTime};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::{Error, Result};

/// A run at least this long resets the backoff
const HEALTHY_RUN: Duration = Duration::from_secs(30);

/// Restart backoff for a supervised process
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    /// Delay before the first restart (doubles each attempt)
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Compute the delay before restart number `attempt` (0-based)
///
/// Follows `min(base_delay * 2^attempt + jitter, max_delay)`. Jitter is
/// 0-25% of the computed delay, derived from `SystemTime`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn delay_for_attempt(policy: &RestartPolicy, attempt: u32) -> Duration {
    let base = policy
        .base_delay
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(policy.max_delay);

    let jitter_nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    let jitter_fraction = f64::from(jitter_nanos % 250) / 1000.0;

    (base + base.mul_f64(jitter_fraction)).min(policy.max_delay)
}

/// Where a stream of text records comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineSource {
    /// Child process command line, split on whitespace
    Process(String),
    /// This process's stdin; not restarted after EOF
    Stdin,
}

/// Forward lines from `source` into `tx` until shutdown
///
/// Process sources are restarted whenever they exit. Returns when shutdown
/// is signalled, the receiver is dropped, or stdin reaches EOF.
pub async fn supervise_lines(
    name: &'static str,
    source: LineSource,
    policy: RestartPolicy,
    tx: mpsc::Sender<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    let command_line = match source {
        LineSource::Stdin => {
            tokio::select! {
                _ = shutdown.changed() => {}
                () = forward_stdin(name, &tx) => {}
            }
            return;
        }
        LineSource::Process(command_line) => command_line,
    };

    let mut attempt = 0u32;
    loop {
        let started = Instant::now();
        let outcome = tokio::select! {
            _ = shutdown.changed() => return,
            outcome = run_once(name, &command_line, &tx) => outcome,
        };

        match outcome {
            Ok(RunEnd::ReceiverClosed) => return,
            Ok(RunEnd::Exited(status)) => {
                tracing::warn!(source = name, %status, "recognizer exited");
            }
            Err(e) => {
                tracing::error!(source = name, error = %e, "recognizer failed");
            }
        }

        if started.elapsed() >= HEALTHY_RUN {
            attempt = 0;
        }
        let delay = delay_for_attempt(&policy, attempt);
        attempt = attempt.saturating_add(1);
        tracing::info!(
            source = name,
            attempt,
            delay_ms = delay.as_millis(),
            "restarting recognizer"
        );

        tokio::select! {
            _ = shutdown.changed() => return,
            () = tokio::time::sleep(delay) => {}
        }
    }
}

enum RunEnd {
    Exited(std::process::ExitStatus),
    ReceiverClosed,
}

async fn run_once(name: &str, command_line: &str, tx: &mpsc::Sender<String>) -> Result<RunEnd> {
    let mut parts = command_line.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| Error::Config(format!("{name} command is empty")))?;

    let mut child = Command::new(program)
        .args(parts)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Config(format!("{name} stdout unavailable")))?;

    tracing::info!(source = name, command = command_line, pid = ?child.id(), "recognizer started");

    let mut lines = BufReader::new(stdout).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        if tx.send(line).await.is_err() {
            return Ok(RunEnd::ReceiverClosed);
        }
    }

    Ok(RunEnd::Exited(child.wait().await?))
}

async fn forward_stdin(name: &str, tx: &mpsc::Sender<String>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    tracing::info!(source = name, "reading from stdin");

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                if tx.send(line).await.is_err() {
                    return;
                }
            }
            Ok(None) => {
                tracing::info!(source = name, "stdin closed");
                return;
            }
            Err(e) => {
                tracing::error!(source = name, error = %e, "stdin read failed");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RestartPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        };

        let first = delay_for_attempt(&policy, 0);
        assert!(first >= Duration::from_millis(100));
        assert!(first <= Duration::from_millis(125));

        let third = delay_for_attempt(&policy, 2);
        assert!(third >= Duration::from_millis(400));

        assert_eq!(delay_for_attempt(&policy, 20), Duration::from_secs(1));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_lines_forwarded_and_restarted() {
        let (tx, mut rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let policy = RestartPolicy {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(20),
        };

        let handle = tokio::spawn(supervise_lines(
            "test",
            LineSource::Process("echo hello".into()),
            policy,
            tx,
            shutdown_rx,
        ));

        // Two lines means the process ran twice
        assert_eq!(rx.recv().await.as_deref(), Some("hello"));
        assert_eq!(rx.recv().await.as_deref(), Some("hello"));

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}

//! Servo driver implementations

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use super::servo::{ServoCommand, ServoDriver};
use crate::{Error, Result};

/// Driver process speaking a line protocol on stdin/stdout
///
/// Each command is written as one line (`MOVE <base> <shoulder> <elbow>` or
/// `HOME`). The driver answers `OK` or `ERR <reason>`; any other output is
/// logged and skipped.
pub struct ProcessServoDriver {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl ProcessServoDriver {
    /// Spawn the driver from a whitespace-separated command line
    ///
    /// # Errors
    ///
    /// Returns error if the command is empty or the process cannot start
    pub fn spawn(command_line: &str) -> Result<Self> {
        let mut parts = command_line.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| Error::Config("servo driver command is empty".into()))?;

        let mut command = Command::new(program);
        command.args(parts);
        Self::from_command(command)
    }

    /// Spawn the driver from a prepared command
    ///
    /// # Errors
    ///
    /// Returns error if the process cannot start
    pub fn from_command(mut command: Command) -> Result<Self> {
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::DriverFault("driver stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::DriverFault("driver stdout unavailable".into()))?;

        tracing::info!(pid = ?child.id(), "servo driver started");

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        })
    }
}

#[async_trait]
impl ServoDriver for ProcessServoDriver {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn send(&mut self, command: &ServoCommand) -> Result<()> {
        let line = command.to_line();
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;

        loop {
            let Some(reply) = self.stdout.next_line().await? else {
                let status = self.child.try_wait().ok().flatten();
                return Err(Error::DriverFault(format!(
                    "driver exited while handling {line} ({status:?})"
                )));
            };
            let reply = reply.trim();

            if reply.eq_ignore_ascii_case("ok") {
                return Ok(());
            }
            if let Some(reason) = reply.strip_prefix("ERR") {
                return Err(Error::DriverFault(reason.trim().to_string()));
            }
            tracing::debug!(output = reply, "servo driver output");
        }
    }
}

/// Driver that acknowledges everything, for running without hardware
#[derive(Debug, Clone, Default)]
pub struct SimulatedServoDriver {
    latency: Duration,
    commands: Arc<AtomicUsize>,
}

impl SimulatedServoDriver {
    #[must_use]
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            commands: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Commands acknowledged so far
    #[must_use]
    pub fn commands(&self) -> usize {
        self.commands.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ServoDriver for SimulatedServoDriver {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn send(&mut self, command: &ServoCommand) -> Result<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.commands.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(command = %command.to_line(), "simulated servo command");
        Ok(())
    }
}

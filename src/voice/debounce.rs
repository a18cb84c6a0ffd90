//! Repeated-command suppression
//!
//! Recognizers often emit the same command several times for one spoken
//! phrase (partial and final results). A repeat of the most recent keyword
//! within the cooldown is dropped.

use std::time::{Duration, Instant};

use super::CommandKeyword;

/// Default window in which a repeated keyword is ignored
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(1);

/// Suppresses back-to-back duplicates of the same keyword
#[derive(Debug, Clone)]
pub struct CommandDebouncer {
    cooldown: Duration,
    last: Option<(CommandKeyword, Instant)>,
}

impl Default for CommandDebouncer {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

impl CommandDebouncer {
    #[must_use]
    pub const fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last: None,
        }
    }

    /// Check if `keyword` should be forwarded now. Returns true if allowed.
    pub fn check(&mut self, keyword: CommandKeyword) -> bool {
        self.check_at(keyword, Instant::now())
    }

    /// Same as [`check`](Self::check) with an explicit clock reading
    pub fn check_at(&mut self, keyword: CommandKeyword, now: Instant) -> bool {
        if let Some((last, at)) = self.last {
            if last == keyword && now.duration_since(at) < self.cooldown {
                tracing::debug!(%keyword, "cooldown active, dropping repeat");
                return false;
            }
        }
        self.last = Some((keyword, now));
        true
    }
}

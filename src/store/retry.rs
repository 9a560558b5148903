//! Retry policy for rate-limited reads.

use serde::Deserialize;
use std::time::Duration;

/// Fallback wait used when a 429 carries no `Retry-After`.
pub const DEFAULT_FALLBACK_DELAY: Duration = Duration::from_secs(30);

/// Fallback wait for hosts that throttle background timers.
pub const DEFAULT_THROTTLED_FALLBACK_DELAY: Duration = Duration::from_secs(60);

/// Total attempts (first try included) before a read gives up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// The kind of host the client runs on.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClientEnvironment {
  /// Timers fire on schedule
  #[default]
  Standard,
  /// Host suspends or slows idle processes, so short waits tend to fire late
  /// into another rate-limit window
  Throttled,
}

/// How long to wait between rate-limited attempts and when to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  pub max_attempts: u32,
  pub environment: ClientEnvironment,
  pub fallback_delay: Duration,
  pub throttled_fallback_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: DEFAULT_MAX_ATTEMPTS,
      environment: ClientEnvironment::Standard,
      fallback_delay: DEFAULT_FALLBACK_DELAY,
      throttled_fallback_delay: DEFAULT_THROTTLED_FALLBACK_DELAY,
    }
  }
}

impl RetryPolicy {
  #[cfg(test)]
  pub fn with_environment(mut self, environment: ClientEnvironment) -> Self {
    self.environment = environment;
    self
  }

  /// Whether another attempt may follow `attempt` (1-based) rate-limited attempts.
  pub fn allows_retry(&self, attempt: u32) -> bool {
    attempt < self.max_attempts
  }

  /// Base wait when the server gives no hint.
  pub fn base_delay(&self) -> Duration {
    match self.environment {
      ClientEnvironment::Standard => self.fallback_delay,
      ClientEnvironment::Throttled => self.throttled_fallback_delay.max(self.fallback_delay),
    }
  }

  /// Wait before the next attempt. The server's hint always wins.
  pub fn delay(&self, retry_after: Option<Duration>) -> Duration {
    retry_after.unwrap_or_else(|| self.base_delay())
  }
}

/// Parse a `Retry-After` header holding delta-seconds.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
  value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

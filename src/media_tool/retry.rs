//! Bounded retry with exponential backoff for media tool calls.

use super::ToolError;
use std::time::Duration;

const MAX_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            backoff_multiplier: 2.0,
        }
    }

    /// `attempt` is 1-based: the number of attempts already made.
    pub fn should_retry(&self, error: &ToolError, attempt: u32) -> bool {
        error.is_transient() && attempt < self.max_attempts
    }

    /// Delay to wait after failed attempt number `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exp);
        Duration::from_secs_f64(secs.min(MAX_BACKOFF.as_secs_f64()))
    }
}

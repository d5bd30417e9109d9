//! Auto-Recovery Mechanisms
//!
//! Re-establishes a feed subscription after a transport error, with
//! exponential backoff between attempts.

use crate::session::FeedSession;
use crate::{FeedError, Result};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Maximum number of resubscribe attempts before giving up
const MAX_RESUBSCRIBE_ATTEMPTS: u32 = 5;

/// Initial resubscribe delay
const INITIAL_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(2);

/// Maximum resubscribe delay
const MAX_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(60);

/// Resubscribe strategy with exponential backoff
#[derive(Debug, Clone)]
pub struct ResubscribeStrategy {
    /// Current attempt number
    pub attempt: u32,
    /// Maximum number of attempts
    pub max_attempts: u32,
    /// Delay before the first attempt
    pub initial_delay: Duration,
    /// Current delay between attempts
    pub current_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
}

impl Default for ResubscribeStrategy {
    fn default() -> Self {
        Self {
            attempt: 0,
            max_attempts: MAX_RESUBSCRIBE_ATTEMPTS,
            initial_delay: INITIAL_RESUBSCRIBE_DELAY,
            current_delay: INITIAL_RESUBSCRIBE_DELAY,
            max_delay: MAX_RESUBSCRIBE_DELAY,
        }
    }
}

impl ResubscribeStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different starting delay
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self.current_delay = delay;
        self
    }

    /// Use a different attempt budget
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Reset after a successful resubscribe
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.current_delay = self.initial_delay;
    }

    /// Check if more attempts are available
    pub fn has_attempts_remaining(&self) -> bool {
        self.attempt < self.max_attempts
    }

    /// Get next delay with exponential backoff
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.has_attempts_remaining() {
            return None;
        }

        let delay = self.current_delay;
        self.attempt += 1;
        self.current_delay = std::cmp::min(self.current_delay * 2, self.max_delay);

        Some(delay)
    }

    /// Get human-readable status
    pub fn status(&self) -> String {
        format!(
            "Attempt {}/{}, next delay: {:?}",
            self.attempt, self.max_attempts, self.current_delay
        )
    }
}

/// Resubscribe `session`, backing off between failed attempts
///
/// Returns the last error once the strategy runs out of attempts. The
/// strategy is reset on success.
pub async fn resubscribe_with_backoff(
    session: &FeedSession,
    strategy: &mut ResubscribeStrategy,
) -> Result<()> {
    let mut last_error = None;

    while let Some(delay) = strategy.next_delay() {
        debug!("Resubscribing in {:?} ({})", delay, strategy.status());
        sleep(delay).await;

        match session.resubscribe().await {
            Ok(()) => {
                info!("Feed resubscribed after {} attempt(s)", strategy.attempt);
                strategy.reset();
                return Ok(());
            }
            Err(e) => {
                warn!("Resubscribe attempt {} failed: {}", strategy.attempt, e);
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        FeedError::invalid_state("No resubscribe attempts remaining")
    }))
}

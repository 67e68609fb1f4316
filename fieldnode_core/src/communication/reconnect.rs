//! Retry timing for link and bus reconnection
//!
//! Decisions compare the current clock reading against a stored anchor each
//! iteration; nothing here sleeps.
use std::time::Duration;

/// Fixed delay between bus connect attempts
pub const BUS_RETRY_DELAY: Duration = Duration::from_secs(10);

/// When to retry and when to give up
#[derive(Debug, Clone, PartialEq)]
pub struct RetryStrategy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    pub max_retries: usize, // 0 = infinite
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::fixed(BUS_RETRY_DELAY)
    }
}

impl RetryStrategy {
    /// Constant delay after every failure, never give up
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_backoff: delay,
            max_backoff: delay,
            multiplier: 1.0,
            max_retries: 0,
        }
    }

    /// Retry on every step, never give up
    pub fn immediate() -> Self {
        Self::fixed(Duration::ZERO)
    }

    /// Builder: stop after `max_retries` failed attempts
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay to wait after `failures` consecutive failed attempts
    pub fn backoff_delay(&self, failures: usize) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }

        let delay_ms = self.initial_backoff.as_millis() as f64
            * self.multiplier.powi((failures - 1) as i32);

        Duration::from_millis(delay_ms as u64).min(self.max_backoff)
    }

    /// Whether another attempt is allowed after `failures` failures
    pub fn should_retry(&self, failures: usize) -> bool {
        self.max_retries == 0 || failures < self.max_retries
    }
}

/// Connection state tracker for monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionHealth {
    Connected,
    Reconnecting { attempt: usize },
    Failed { attempts: usize },
}

/// Anchor-based retry gate
#[derive(Debug, Clone)]
pub struct RetryTimer {
    strategy: RetryStrategy,
    failures: usize,
    anchor: Option<Duration>,
    delay: Duration,
    health: ConnectionHealth,
}

impl RetryTimer {
    pub fn new(strategy: RetryStrategy) -> Self {
        Self {
            strategy,
            failures: 0,
            anchor: None,
            delay: Duration::ZERO,
            health: ConnectionHealth::Connected,
        }
    }

    pub fn strategy(&self) -> &RetryStrategy {
        &self.strategy
    }

    pub fn failures(&self) -> usize {
        self.failures
    }

    pub fn health(&self) -> &ConnectionHealth {
        &self.health
    }

    /// Clock reading of the last failed attempt
    pub fn anchor(&self) -> Option<Duration> {
        self.anchor
    }

    /// True once the strategy refuses further attempts
    pub fn is_exhausted(&self) -> bool {
        !self.strategy.should_retry(self.failures)
    }

    /// First attempt, or the backoff since the last failure has elapsed
    pub fn ready(&self, now: Duration) -> bool {
        if self.is_exhausted() {
            return false;
        }

        match self.anchor {
            None => true,
            Some(anchor) => now.saturating_sub(anchor) >= self.delay,
        }
    }

    /// Time left until [`RetryTimer::ready`] turns true
    pub fn remaining(&self, now: Duration) -> Duration {
        match self.anchor {
            None => Duration::ZERO,
            Some(anchor) => (anchor + self.delay).saturating_sub(now),
        }
    }

    /// Record a failed attempt at `now`
    pub fn mark_failed(&mut self, now: Duration) {
        self.failures += 1;
        self.anchor = Some(now);
        self.delay = self.strategy.backoff_delay(self.failures);
        self.health = if self.is_exhausted() {
            ConnectionHealth::Failed {
                attempts: self.failures,
            }
        } else {
            ConnectionHealth::Reconnecting {
                attempt: self.failures,
            }
        };
    }

    /// Clear the anchor and failure count
    pub fn mark_connected(&mut self) {
        self.failures = 0;
        self.anchor = None;
        self.delay = Duration::ZERO;
        self.health = ConnectionHealth::Connected;
    }
}

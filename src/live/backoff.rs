//! Reconnection policy for the live channel.
//!
//! Exponential backoff with jitter and a cap, a bounded number of
//! consecutive failures, then periodic re-upgrade attempts while consumers
//! sit in polling mode.

use rand::Rng;
use std::time::Duration;

use crate::config::ReconnectConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the delay randomly added or removed (0.0 = none)
    pub jitter: f64,
    /// Wait between upgrade attempts once `max_attempts` is spent; `None` gives up
    pub upgrade_retry: Option<Duration>,
    /// Minimum session length for a drop to reset the failure count
    pub stable_after: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDelay {
    /// Regular reconnect attempt after this delay
    Retry(Duration),
    /// Attempts spent; try the upgrade again after this delay
    Exhausted(Duration),
    /// Attempts spent and no re-upgrade configured
    GiveUp,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&ReconnectConfig::default())
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms.max(config.initial_delay_ms)),
            multiplier: config.multiplier.max(1.0),
            jitter: config.jitter.clamp(0.0, 1.0),
            upgrade_retry: (config.upgrade_retry_secs > 0)
                .then(|| Duration::from_secs(config.upgrade_retry_secs)),
            stable_after: Duration::from_secs(config.stable_after_secs),
        }
    }

    /// Flat 1s delay, 5 attempts, never re-upgrades
    pub fn legacy() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(1),
            multiplier: 1.0,
            jitter: 0.0,
            upgrade_retry: None,
            stable_after: Duration::from_secs(10),
        }
    }

    /// Un-jittered delay before reconnect attempt number `attempt` (0-based)
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(64) as i32);
        let millis = (self.initial_delay.as_millis() as f64 * factor)
            .min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    /// Whether a session that lasted `uptime` ends the current run of failures
    pub fn is_stable(&self, uptime: Duration) -> bool {
        uptime >= self.stable_after
    }

    /// Delay before the next attempt, given how many attempts have failed in a row
    pub fn next_delay(&self, consecutive_failures: u32) -> ReconnectDelay {
        if consecutive_failures >= self.max_attempts {
            return match self.upgrade_retry {
                Some(delay) => ReconnectDelay::Exhausted(delay),
                None => ReconnectDelay::GiveUp,
            };
        }
        ReconnectDelay::Retry(self.jittered(self.base_delay(consecutive_failures)))
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return delay;
        }
        let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        let millis = (delay.as_millis() as f64 * (1.0 + spread)).max(0.0);
        Duration::from_millis(millis as u64).min(self.max_delay)
    }
}

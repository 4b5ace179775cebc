//! Reconnection backoff

use crate::config::ReconnectStrategy;
use rand::Rng;
use std::time::Duration;

/// Exponential backoff schedule derived from a [`ReconnectStrategy`]
#[derive(Debug, Clone)]
pub struct Backoff {
    strategy: ReconnectStrategy,
}

impl Backoff {
    pub fn new(strategy: ReconnectStrategy) -> Self {
        Self { strategy }
    }

    /// Number of retries after the first failed attempt
    pub fn retries(&self) -> u32 {
        self.strategy.num_of_retries
    }

    pub fn cap(&self) -> Duration {
        self.strategy.max_delay()
    }

    /// Delay before retry `attempt` (0-based), without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let cap_ms = self.strategy.max_delay_ms as f64;
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let millis = self.strategy.factor * (self.strategy.exponent_base as f64).powi(exponent);

        if !millis.is_finite() || millis >= cap_ms {
            self.cap()
        } else {
            Duration::from_micros((millis.max(0.0) * 1000.0).round() as u64)
        }
    }

    /// Delay before retry `attempt` (0-based) with jitter applied
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        std::cmp::min(
            apply_jitter(base, self.strategy.jitter_percent),
            self.cap(),
        )
    }
}

/// Scale `delay` by a random factor in `[1 - p%, 1 + p%]`
fn apply_jitter(delay: Duration, jitter_percent: u32) -> Duration {
    if jitter_percent == 0 {
        return delay;
    }
    let jitter = f64::from(jitter_percent.min(100)) / 100.0;
    let mut rng = rand::thread_rng();
    let factor = 1.0 + rng.gen_range(-jitter..=jitter);
    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}

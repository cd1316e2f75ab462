//! Exponential backoff with jitter for channel reactivation.
//!
//! Jitter uses `std::time::SystemTime` UNIX nanos as a seed to avoid
//! requiring the `rand` crate as a dependency.

use chatsync_types::config::RetrySettings;
use std::time::Duration;

/// Compute the delay before reactivation attempt `attempt` (0-indexed).
///
/// Formula: `min(min_delay * 2^attempt, max_delay) * (1 + random * jitter)`,
/// clamped to `max_delay`.
pub fn compute_backoff(settings: &RetrySettings, attempt: u32) -> Duration {
    let base = settings
        .min_delay_ms
        .saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX));
    let capped = base.min(settings.max_delay_ms);

    if settings.jitter <= 0.0 {
        return Duration::from_millis(capped);
    }

    let frac = pseudo_random_fraction();
    let with_jitter = (capped as f64) * (1.0 + frac * settings.jitter);
    Duration::from_millis((with_jitter as u64).min(settings.max_delay_ms))
}

/// Return a pseudo-random fraction in `[0, 1]` using the current system time
/// nanos. This is NOT cryptographically secure, but good enough for jitter.
fn pseudo_random_fraction() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    let mixed = nanos.wrapping_mul(2654435761); // Knuth multiplicative hash
    (mixed as f64) / (u32::MAX as f64)
}

/// Consecutive failed activations of one channel.
///
/// A successful activation resets the budget. Once `max_attempts` failures
/// accumulate the channel is given up on.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    settings: RetrySettings,
    failed: u32,
}

impl RetryBudget {
    pub fn new(settings: RetrySettings) -> Self {
        Self {
            settings,
            failed: 0,
        }
    }

    /// Record a failed activation. Returns the delay before the next attempt,
    /// or `None` when the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.failed = self.failed.saturating_add(1);
        if self.failed >= self.settings.max_attempts {
            return None;
        }
        Some(compute_backoff(&self.settings, self.failed - 1))
    }

    /// Delay before reactivating a channel whose session broke.
    pub fn reconnect_delay(&self) -> Duration {
        compute_backoff(&self.settings, 0)
    }

    pub fn reset(&mut self) {
        self.failed = 0;
    }

    /// Failed activations in the current episode.
    pub fn failed(&self) -> u32 {
        self.failed
    }
}

//! Reconnection delay policy.

use std::time::Duration;

/// How long the transport waits before its next connection attempt.
///
/// `attempt` counts consecutive failures since the last successful open,
/// starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Same delay every time, forever.
    Fixed(Duration),
    /// Exponential backoff capped at `max`:
    /// attempt 1: base, attempt 2: base * 2, attempt n: min(base * 2^(n-1), max)
    Backoff { base: Duration, max: Duration },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Fixed(Duration::from_millis(1000))
    }
}

impl ReconnectPolicy {
    /// Build from the `[transport]` config knobs. A zero cap keeps the fixed
    /// delay.
    pub fn from_millis(delay_ms: u64, max_ms: u64) -> Self {
        let delay = Duration::from_millis(delay_ms);
        if max_ms == 0 {
            ReconnectPolicy::Fixed(delay)
        } else {
            ReconnectPolicy::Backoff {
                base: delay,
                max: Duration::from_millis(max_ms.max(delay_ms)),
            }
        }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match *self {
            ReconnectPolicy::Fixed(delay) => delay,
            ReconnectPolicy::Backoff { base, max } => {
                let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1));
                std::cmp::min(base.saturating_mul(multiplier), max)
            }
        }
    }
}

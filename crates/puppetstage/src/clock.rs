//! Shared monotonic stage clock
//!
//! Every time value exchanged between components (a playback's planned start,
//! a timeline's `start_at`) is seconds on this clock. One clock is created at
//! process start and handed out by clone, so all of them agree on zero.
//!
//! Built on `tokio::time::Instant` so paused-time tests advance it.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct StageClock {
    origin: Instant,
}

impl StageClock {
    /// Start a clock at zero, now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Seconds since the clock started.
    pub fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    /// How long from now until `at` (seconds on this clock). Zero if `at` has
    /// already passed, `Duration::MAX` if it is too far out to represent.
    pub fn until(&self, at: f64) -> Duration {
        let remaining = at - self.now();
        if remaining.is_nan() || remaining <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(remaining).unwrap_or(Duration::MAX)
    }
}

impl Default for StageClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn advances_with_tokio_time() {
        let clock = StageClock::new();
        assert_eq!(clock.now(), 0.0);

        tokio::time::advance(Duration::from_millis(1500)).await;
        assert!((clock.now() - 1.5).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn clones_share_origin() {
        let clock = StageClock::new();
        tokio::time::advance(Duration::from_secs(2)).await;
        let copy = clock;
        assert_eq!(copy.now(), clock.now());
    }

    #[tokio::test(start_paused = true)]
    async fn until_clamps_past_to_zero() {
        let clock = StageClock::new();
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(clock.until(0.5), Duration::ZERO);
        assert_eq!(clock.until(f64::NAN), Duration::ZERO);
        assert_eq!(clock.until(1.25), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn until_saturates_far_future() {
        let clock = StageClock::new();
        assert_eq!(clock.until(1e30), Duration::MAX);
        assert_eq!(clock.until(f64::INFINITY), Duration::MAX);
    }
}

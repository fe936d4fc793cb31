//! Time source and deadline used by the reservation wait loop.
//!
//! The loop asks a [`Clock`] for the current instant and to sleep between poll
//! attempts. [`TokioClock`] is the real implementation; tests substitute a clock
//! that advances instantly so timeouts can be exercised without waiting.
use async_trait::async_trait;
use std::time::{Duration, Instant};

/// Source of monotonic time and of sleeping.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    async fn sleep(&self, duration: Duration);
}

/// Wall-clock time, sleeping on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// The instant after which a wait gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    start: Instant,
    timeout: Duration,
}

impl Deadline {
    pub fn new(start: Instant, timeout: Duration) -> Self {
        Self { start, timeout }
    }

    /// True once `timeout` has fully elapsed since `start`.
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.start) >= self.timeout
    }
}

/// Clock whose sleeps return immediately and advance its time.
#[cfg(test)]
#[derive(Debug)]
pub(crate) struct ManualClock {
    base: Instant,
    elapsed: std::sync::Mutex<Duration>,
}

#[cfg(test)]
impl ManualClock {
    pub(crate) fn new() -> Self {
        Self {
            base: Instant::now(),
            elapsed: std::sync::Mutex::new(Duration::ZERO),
        }
    }

    pub(crate) fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap()
    }

    pub(crate) fn advance(&self, by: Duration) {
        *self.elapsed.lock().unwrap() += by;
    }
}

#[cfg(test)]
#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_timeout_expires_immediately() {
        let now = Instant::now();
        let deadline = Deadline::new(now, Duration::ZERO);
        assert!(deadline.is_expired(now));
    }

    #[test]
    fn expires_exactly_at_timeout() {
        let clock = ManualClock::new();
        let deadline = Deadline::new(clock.now(), Duration::from_secs(3));

        clock.advance(Duration::from_millis(2999));
        assert!(!deadline.is_expired(clock.now()));

        clock.advance(Duration::from_millis(1));
        assert!(deadline.is_expired(clock.now()));
    }

    #[test]
    fn earlier_instant_is_not_expired() {
        let clock = ManualClock::new();
        clock.advance(Duration::from_secs(10));
        let deadline = Deadline::new(clock.now(), Duration::from_secs(1));
        assert!(!deadline.is_expired(clock.base));
    }

    #[tokio::test]
    async fn manual_sleep_advances_time_without_waiting() {
        let clock = ManualClock::new();
        let before = Instant::now();
        clock.sleep(Duration::from_secs(3600)).await;
        assert_eq!(clock.elapsed(), Duration::from_secs(3600));
        assert!(before.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_clock_sleeps_on_the_runtime_timer() {
        let start = tokio::time::Instant::now();
        TokioClock.sleep(Duration::from_secs(2)).await;
        assert!(start.elapsed() >= Duration::from_secs(2));
    }
}

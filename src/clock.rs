use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use tokio::time::Instant;

/// Monotonic time source, measured from an arbitrary fixed origin.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
}

/// Wall-independent monotonic clock backed by [`tokio::time::Instant`], so paused tokio test time
/// drives it too.
#[derive(Debug)]
pub struct MonotonicClock {
    boot: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self {
            boot: Instant::now(),
        }
    }
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.boot.elapsed()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(duration_nanos(by), Ordering::SeqCst);
    }

    /// Move to `to`; never moves backwards.
    pub fn advance_to(&self, to: Duration) {
        self.nanos.fetch_max(duration_nanos(to), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

pub(crate) fn duration_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// An optional instant packed into an atomic: zero means "never", otherwise nanos + 1.
#[derive(Debug, Default)]
pub(crate) struct AtomicStamp(AtomicU64);

impl AtomicStamp {
    pub(crate) fn encode(at: Duration) -> u64 {
        duration_nanos(at).saturating_add(1)
    }

    pub(crate) fn decode(raw: u64) -> Option<Duration> {
        raw.checked_sub(1).map(Duration::from_nanos)
    }

    pub(crate) fn load_raw(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn load(&self) -> Option<Duration> {
        Self::decode(self.load_raw())
    }

    /// Raise the stamp to `at` unless it is already later.
    pub(crate) fn advance(&self, at: Duration) {
        self.0.fetch_max(Self::encode(at), Ordering::SeqCst);
    }

    /// Set the stamp to `at` only if it still holds `expected_raw`.
    pub(crate) fn compare_and_set(&self, expected_raw: u64, at: Duration) -> bool {
        self.0
            .compare_exchange(expected_raw, Self::encode(at), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_only_moves_forward() {
        let clock = ManualClock::new();
        assert_eq!(clock.now(), Duration::ZERO);
        clock.advance(Duration::from_millis(5));
        clock.advance_to(Duration::from_millis(3));
        assert_eq!(clock.now(), Duration::from_millis(5));
        clock.advance_to(Duration::from_millis(9));
        assert_eq!(clock.now(), Duration::from_millis(9));
    }

    #[test]
    fn stamp_distinguishes_never_from_origin() {
        let stamp = AtomicStamp::default();
        assert_eq!(stamp.load(), None);
        stamp.advance(Duration::ZERO);
        assert_eq!(stamp.load(), Some(Duration::ZERO));
        stamp.advance(Duration::from_millis(7));
        stamp.advance(Duration::from_millis(2));
        assert_eq!(stamp.load(), Some(Duration::from_millis(7)));
    }

    #[test]
    fn stamp_compare_and_set_has_one_winner() {
        let stamp = AtomicStamp::default();
        let seen = stamp.load_raw();
        assert!(stamp.compare_and_set(seen, Duration::from_millis(1)));
        assert!(!stamp.compare_and_set(seen, Duration::from_millis(2)));
        assert_eq!(stamp.load(), Some(Duration::from_millis(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn monotonic_clock_follows_tokio_time() {
        let clock = MonotonicClock::new();
        tokio::time::sleep(Duration::from_millis(250)).await;
        let now = clock.now();
        assert!(now >= Duration::from_millis(250) && now < Duration::from_millis(260), "{now:?}");
    }
}

//! Monotonic millisecond clock shared by the logger and the runtime.

use std::cell::Cell;
use std::fmt;
use std::time::Instant;

/// Source of monotonic timestamps in milliseconds since runtime start.
pub trait Clock: fmt::Debug {
    /// Milliseconds elapsed since the clock started. Never decreases.
    fn now_ms(&self) -> u64;
}

/// Wall-independent clock backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    /// Start a clock at zero now.
    #[must_use]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::start()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<u64>,
}

impl ManualClock {
    /// A clock reading `ms`.
    #[must_use]
    pub fn at(ms: u64) -> Self {
        Self { now: Cell::new(ms) }
    }

    /// Move the clock forward.
    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get().saturating_add(ms));
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_never_decreases() {
        let clock = MonotonicClock::start();
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
    }

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::at(120_000);
        assert_eq!(clock.now_ms(), 120_000);
        clock.advance(5);
        assert_eq!(clock.now_ms(), 120_005);
    }

    #[test]
    fn test_manual_clock_saturates() {
        let clock = ManualClock::at(u64::MAX - 1);
        clock.advance(10);
        assert_eq!(clock.now_ms(), u64::MAX);
    }
}

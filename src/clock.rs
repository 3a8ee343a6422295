//! Time Source
//!
//! Capabilities carry creation/expiry stamps and cache entries carry a
//! last-access stamp. The core never reads hardware timers itself; it asks a
//! [`Clock`] supplied at construction.

use core::sync::atomic::{AtomicU64, Ordering};

/// A monotonic tick source.
pub trait Clock: Send + Sync {
    /// Current time in ticks. Must never go backwards.
    fn now(&self) -> u64;
}

/// Logical clock that advances by one on every read.
///
/// Used when no platform timer is wired in. Ordering of stamps is preserved,
/// which is all expiry and last-access bookkeeping need.
#[derive(Debug, Default)]
pub struct TickClock {
    ticks: AtomicU64,
}

impl TickClock {
    pub const fn new() -> Self {
        Self {
            ticks: AtomicU64::new(1),
        }
    }
}

impl Clock for TickClock {
    fn now(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::Relaxed)
    }
}

/// Clock whose value is set explicitly.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub const fn new(start: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::Release);
    }

    pub fn advance(&self, ticks: u64) {
        self.now.fetch_add(ticks, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_clock_is_monotonic() {
        let clock = TickClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b > a);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(10);
        assert_eq!(clock.now(), 10);
        clock.advance(5);
        assert_eq!(clock.now(), 15);
        clock.set(3);
        assert_eq!(clock.now(), 3);
    }
}

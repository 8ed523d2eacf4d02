/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! Time sources for the gateway.
//!
//! Two distinct clocks are required and must not be conflated:
//! - [`EpochClock`]: wall-clock milliseconds, used for deadlines carried in
//!   the public log
//! - [`NanoClock`]: a monotonic nanosecond counter, used for UUID and request
//!   timestamp construction and for bounding idle waits

use chrono::Utc;
use std::cell::Cell;
use std::time::Instant;

/// Source of wall-clock milliseconds since the Unix epoch.
pub trait EpochClock {
    /// Returns the current wall-clock time in milliseconds.
    fn time_millis(&self) -> u64;
}

/// Source of monotonic nanoseconds.
///
/// The absolute value has no meaning; only differences and sub-millisecond
/// remainders are used.
pub trait NanoClock {
    /// Returns the current monotonic nanosecond counter value.
    fn nano_time(&self) -> u64;
}

/// Wall clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEpochClock;

impl EpochClock for SystemEpochClock {
    fn time_millis(&self) -> u64 {
        Utc::now().timestamp_millis() as u64
    }
}

/// Monotonic clock anchored at its own construction.
#[derive(Debug, Clone)]
pub struct SystemNanoClock {
    origin: Instant,
}

impl SystemNanoClock {
    /// Creates a monotonic clock anchored at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemNanoClock {
    fn default() -> Self {
        Self::new()
    }
}

impl NanoClock for SystemNanoClock {
    fn nano_time(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

/// Manually advanced clock implementing both time sources.
///
/// Useful for deterministic tests and simulations; the worker is
/// single-threaded so interior mutability via [`Cell`] is sufficient.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: Cell<u64>,
    nanos: Cell<u64>,
}

impl ManualClock {
    /// Creates a manual clock starting at the given wall-clock milliseconds.
    #[must_use]
    pub fn new(millis: u64) -> Self {
        Self {
            millis: Cell::new(millis),
            nanos: Cell::new(0),
        }
    }

    /// Sets the wall-clock time in milliseconds.
    pub fn set_millis(&self, millis: u64) {
        self.millis.set(millis);
    }

    /// Advances the wall-clock time by the given number of milliseconds.
    pub fn advance_millis(&self, delta: u64) {
        self.millis.set(self.millis.get() + delta);
    }

    /// Sets the monotonic nanosecond counter.
    pub fn set_nanos(&self, nanos: u64) {
        self.nanos.set(nanos);
    }
}

impl EpochClock for ManualClock {
    fn time_millis(&self) -> u64 {
        self.millis.get()
    }
}

impl NanoClock for ManualClock {
    fn nano_time(&self) -> u64 {
        self.nanos.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_epoch_clock_is_plausible() {
        // 2020-01-01 in epoch millis.
        assert!(SystemEpochClock.time_millis() > 1_577_836_800_000);
    }

    #[test]
    fn test_system_nano_clock_is_monotonic() {
        let clock = SystemNanoClock::new();
        let a = clock.nano_time();
        let b = clock.nano_time();
        assert!(b >= a);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.time_millis(), 1_000);

        clock.advance_millis(500);
        assert_eq!(clock.time_millis(), 1_500);

        clock.set_nanos(42);
        assert_eq!(clock.nano_time(), 42);
    }
}

//! Clock abstraction for testable time handling.
//!
//! Signature freshness checks and stale-claim recovery both depend on wall
//! clock time; injecting the clock keeps those paths deterministic in tests.

use std::{
    fmt,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
};

use chrono::{DateTime, Duration, TimeZone, Utc};

/// Source of the current UTC time.
///
/// Production code uses [`SystemClock`]; tests inject [`TestClock`] to
/// control timestamp-sensitive behavior such as the signature tolerance
/// window.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current time in UTC.
    fn now_utc(&self) -> DateTime<Utc>;
}

/// Real clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Creates a new system clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Controllable clock for deterministic tests.
///
/// Stores milliseconds since the Unix epoch in an atomic so clones observe
/// the same advancing time.
#[derive(Debug, Clone)]
pub struct TestClock {
    millis: Arc<AtomicI64>,
}

impl TestClock {
    /// Creates a test clock starting at the current system time.
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Creates a test clock starting at a specific instant.
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self { millis: Arc::new(AtomicI64::new(start.timestamp_millis())) }
    }

    /// Advances the clock by the given duration.
    pub fn advance(&self, duration: Duration) {
        self.millis.fetch_add(duration.num_milliseconds(), Ordering::AcqRel);
    }

    /// Jumps the clock to a specific instant. May move backwards.
    pub fn set(&self, time: DateTime<Utc>) {
        self.millis.store(time.timestamp_millis(), Ordering::Release);
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now_utc(&self) -> DateTime<Utc> {
        let millis = self.millis.load(Ordering::Acquire);
        Utc.timestamp_millis_opt(millis).single().unwrap_or_else(Utc::now)
    }
}

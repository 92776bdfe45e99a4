//! # Mealshare Testing
//!
//! Testing utilities and helpers for the mealshare crates.
//!
//! This crate provides:
//! - A fixed clock for deterministic timestamps
//! - [`ReducerTest`], a Given-When-Then harness for reducers
//! - Tracing setup for tests that want to see log output
//!
//! ## Example
//!
//! ```ignore
//! use mealshare_testing::{test_clock, ReducerTest};
//!
//! ReducerTest::new(VoucherReducer::new())
//!     .with_env(VoucherEnvironment::new(Arc::new(test_clock()), ClaimWindow::AnyDay, utc))
//!     .given_state(active_voucher())
//!     .when_command(VoucherCommand::Claim { staff })
//!     .then_state(|voucher| assert_eq!(voucher.status, VoucherStatus::Claimed))
//!     .run();
//! ```


use chrono::{DateTime, Utc};
use mealshare_core::environment::Clock;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use chrono::{NaiveDate, TimeZone};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use mealshare_testing::mocks::FixedClock;
    /// use mealshare_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }

        /// Clock pinned to noon UTC on the given day.
        ///
        /// Returns `None` for an impossible calendar date.
        #[must_use]
        pub fn at_noon(year: i32, month: u32, day: u32) -> Option<Self> {
            let date = NaiveDate::from_ymd_opt(year, month, day)?;
            let time = date.and_hms_opt(12, 0, 0)?;
            Some(Self::new(Utc.from_utc_datetime(&time)))
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2024-01-15 08:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2024-01-15T08:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Install a `tracing` subscriber for the current test binary.
///
/// Honours `RUST_LOG`; safe to call from every test since only the first
/// call installs anything.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use mocks::{FixedClock, test_clock};
pub use reducer_test::{assertions, ReducerTest};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[test]
    fn test_clock_at_noon() {
        let clock = FixedClock::at_noon(2024, 1, 15);
        assert!(clock.is_some());
        assert!(FixedClock::at_noon(2024, 2, 30).is_none());
    }
}

//! Time sources and helpers
//!
//! All protocol timestamps are coarse wall-clock readings in milliseconds
//! since the Unix epoch. Workers read time through the [`Clock`] trait so
//! that tests can drive them with a [`ManualClock`].

mod clock;

pub use self::clock::{Clock, ManualClock, SharedClock, SystemClock};

/// Utility functions for time values
pub mod util {
    use chrono::{DateTime, SecondsFormat};

    /// Renders epoch milliseconds as an RFC 3339 string for logs
    ///
    /// Values outside chrono's representable range fall back to the raw number.
    pub fn format_millis(millis: i64) -> String {
        DateTime::from_timestamp_millis(millis)
            .map(|time| time.to_rfc3339_opts(SecondsFormat::Millis, true))
            .unwrap_or_else(|| format!("{}ms", millis))
    }
}

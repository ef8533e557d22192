//! The persistent quota record.

use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};

use crate::policy::TierPolicy;

/// A single identity's quota state for the current window.
///
/// The identity key itself is the index the record is stored under, in
/// both the hot tier and the durable hash; it is not duplicated here.
/// This struct is also the durable wire format: camelCase JSON with
/// `resetTime` as epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaRecord {
    /// Requests left in the current window.
    pub remaining: u32,
    /// Ceiling for the current window. Immutable for the record's lifetime.
    pub limit: u32,
    /// Moment the window expires and must be replaced by a fresh one.
    #[serde(with = "jiff::fmt::serde::timestamp::millisecond::required")]
    pub reset_time: Timestamp,
    /// Whether the identity key is a credential rather than an address.
    #[serde(default)]
    pub is_token_based: bool,
    /// Whether this record enforces the image manipulation tier.
    #[serde(default)]
    pub is_image_manipulation: bool,
}

impl QuotaRecord {
    /// Create a fresh, unconsumed record for a window starting at `now`.
    pub fn new(tier: &TierPolicy, token_based: bool, now: Timestamp) -> Self {
        let window = SignedDuration::try_from(tier.window).unwrap_or(SignedDuration::MAX);
        let reset_time = now.checked_add(window).unwrap_or(Timestamp::MAX);

        // The wire format carries epoch milliseconds; keep the record at
        // that precision so a flush/reload cycle reproduces it exactly.
        let reset_time = Timestamp::from_millisecond(reset_time.as_millisecond()).unwrap_or(reset_time);

        Self {
            remaining: tier.limit,
            limit: tier.limit,
            reset_time,
            is_token_based: token_based,
            is_image_manipulation: tier.image_manipulation,
        }
    }

    /// An expired record must never admit or deny a request; it is
    /// treated as absent and recreated.
    pub fn expired(&self, now: Timestamp) -> bool {
        self.reset_time <= now
    }

    /// The authoritative deny condition: out of requests in a window
    /// that is still running.
    pub fn exceeded(&self, now: Timestamp) -> bool {
        !self.expired(now) && self.remaining == 0
    }

    /// Consume one request, flooring at zero.
    pub fn consume(self) -> Self {
        Self {
            remaining: self.remaining.saturating_sub(1),
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn tier(limit: u32, window_secs: u64) -> TierPolicy {
        TierPolicy {
            limit,
            window: Duration::from_secs(window_secs),
            image_manipulation: false,
        }
    }

    #[test]
    fn consume_decrements_and_floors_at_zero() {
        let mut record = QuotaRecord::new(&tier(3, 60), false, Timestamp::UNIX_EPOCH);

        for n in 1..=5u32 {
            record = record.consume();
            assert_eq!(record.remaining, 3u32.saturating_sub(n));
        }

        assert_eq!(record.remaining, 0);
        assert_eq!(record.limit, 3);
    }

    #[test]
    fn expired_iff_reset_time_passed() {
        let now = Timestamp::UNIX_EPOCH;
        let record = QuotaRecord::new(&tier(10, 60), false, now);

        assert!(!record.expired(now));
        assert!(!record.expired(now + SignedDuration::from_secs(59)));
        assert!(record.expired(now + SignedDuration::from_secs(60)));
        assert!(record.expired(now + SignedDuration::from_secs(120)));
    }

    #[test]
    fn exceeded_requires_a_running_window() {
        let now = Timestamp::UNIX_EPOCH;
        let mut record = QuotaRecord::new(&tier(1, 60), false, now);
        record = record.consume();

        assert!(record.exceeded(now));
        // Once the window has lapsed the record no longer denies anything.
        assert!(!record.exceeded(now + SignedDuration::from_secs(61)));
    }

    #[test]
    fn serializes_to_the_durable_wire_format() {
        let record = QuotaRecord {
            remaining: 99,
            limit: 100,
            reset_time: Timestamp::from_millisecond(1_650_000_000_123).unwrap(),
            is_token_based: true,
            is_image_manipulation: true,
        };

        let value = serde_json::to_value(&record).unwrap();

        assert_eq!(value["remaining"], 99);
        assert_eq!(value["limit"], 100);
        assert_eq!(value["resetTime"], 1_650_000_000_123i64);
        assert_eq!(value["isTokenBased"], true);
        assert_eq!(value["isImageManipulation"], true);

        let back: QuotaRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn flag_fields_default_when_absent() {
        let record: QuotaRecord =
            serde_json::from_str(r#"{"remaining": 5, "limit": 10, "resetTime": 1000}"#).unwrap();

        assert!(!record.is_token_based);
        assert!(!record.is_image_manipulation);
    }
}

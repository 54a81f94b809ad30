// Cache entry records with freshness metadata.
// Generic entries wrap any JSON value with a fetch time and time-to-live.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::elapsed_between;

/// Default TTL for cached entries and widget payloads: 5 minutes.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Wrapper for cached data with freshness metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T = Value> {
    /// The cached value.
    pub value: T,
    /// When the value was fetched.
    #[serde(with = "timestamp_millis")]
    pub fetched_at: DateTime<Utc>,
    /// How long the value stays fresh.
    #[serde(with = "ttl_millis", default = "default_ttl")]
    pub ttl: Duration,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T, fetched_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            value,
            fetched_at,
            ttl,
        }
    }

    /// Age of the entry at `now`.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        elapsed_between(self.fetched_at, now)
    }

    /// Stale once strictly more than `ttl` has elapsed.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.age(now) > self.ttl
    }
}

/// Result of a freshness-aware read.
#[derive(Debug, Clone, PartialEq)]
pub struct Lookup<T = Value> {
    pub value: T,
    pub is_stale: bool,
    pub fetched_at: DateTime<Utc>,
}

fn default_ttl() -> Duration {
    DEFAULT_TTL
}

/// TTLs are persisted as integer milliseconds.
pub(crate) mod ttl_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ttl: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        // A zero or missing TTL falls back to the default.
        let millis = u64::deserialize(deserializer)?;
        if millis == 0 {
            Ok(super::DEFAULT_TTL)
        } else {
            Ok(Duration::from_millis(millis))
        }
    }
}

/// Timestamps are persisted as Unix milliseconds.
pub(crate) mod timestamp_millis {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(at.timestamp_millis())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let millis = i64::deserialize(deserializer)?;
        DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {}", millis)))
    }
}

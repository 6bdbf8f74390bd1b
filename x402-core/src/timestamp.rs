//! Unix timestamps for payment validity windows.
//!
//! Authorizations carry `validAfter` and `validBefore` as stringified seconds
//! since the Unix epoch. [`UnixTimestamp`] keeps the number as `u64` and handles
//! the string form on the wire.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::ops::Add;
use std::time::{Duration, SystemTime};

/// Seconds since 1970-01-01T00:00:00Z.
///
/// Serialized as a string so that `JavaScript` peers never lose precision:
///
/// ```json
/// "1699999999"
/// ```
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Ord, Eq, Hash)]
pub struct UnixTimestamp(u64);

impl Serialize for UnixTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for UnixTimestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let ts = s
            .parse::<u64>()
            .map_err(|_| serde::de::Error::custom("timestamp must be a non-negative integer"))?;
        Ok(Self(ts))
    }
}

impl Display for UnixTimestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add<u64> for UnixTimestamp {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0.saturating_add(rhs))
    }
}

impl UnixTimestamp {
    /// Creates a timestamp from raw seconds.
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// Current system time. A clock set before the epoch reads as zero.
    #[must_use]
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs();
        Self(secs)
    }

    /// Raw seconds.
    #[must_use]
    pub const fn as_secs(&self) -> u64 {
        self.0
    }

    /// Shifts the timestamp by a signed number of seconds, saturating at the
    /// bounds of `u64`.
    #[must_use]
    pub const fn offset(self, seconds: i64) -> Self {
        Self(self.0.saturating_add_signed(seconds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_string() {
        let ts = UnixTimestamp::from_secs(1_699_999_999);
        assert_eq!(serde_json::to_string(&ts).unwrap(), "\"1699999999\"");
        let back: UnixTimestamp = serde_json::from_str("\"1699999999\"").unwrap();
        assert_eq!(back, ts);
    }

    #[test]
    fn rejects_negative_and_numeric_forms() {
        assert!(serde_json::from_str::<UnixTimestamp>("\"-5\"").is_err());
        assert!(serde_json::from_str::<UnixTimestamp>("12").is_err());
    }

    #[test]
    fn offset_saturates() {
        assert_eq!(UnixTimestamp::from_secs(30).offset(-60).as_secs(), 0);
        assert_eq!(UnixTimestamp::from_secs(30).offset(60).as_secs(), 90);
    }
}

//! Unix-seconds timestamps with decimal-string wire encoding

use std::fmt;
use std::ops::Add;
use std::time::{SystemTime, SystemTimeError, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Seconds since the Unix epoch.
///
/// Serialized as a decimal string: every numeric field of the payment
/// payload travels as a string to keep the full integer range intact
/// across JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnixTimestamp(pub u64);

impl UnixTimestamp {
    /// The current wall-clock time.
    pub fn try_now() -> Result<Self, SystemTimeError> {
        let elapsed = SystemTime::now().duration_since(UNIX_EPOCH)?;
        Ok(UnixTimestamp(elapsed.as_secs()))
    }

    pub fn seconds_since_epoch(&self) -> u64 {
        self.0
    }

    /// Seconds from `self` until `later`; zero when `later` is not later.
    pub fn seconds_until(&self, later: UnixTimestamp) -> u64 {
        later.0.saturating_sub(self.0)
    }
}

impl Add<u64> for UnixTimestamp {
    type Output = UnixTimestamp;

    fn add(self, seconds: u64) -> UnixTimestamp {
        UnixTimestamp(self.0.saturating_add(seconds))
    }
}

impl fmt::Display for UnixTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for UnixTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for UnixTimestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let seconds = s.parse().map_err(serde::de::Error::custom)?;
        Ok(UnixTimestamp(seconds))
    }
}

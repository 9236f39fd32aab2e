use crate::error::ParseError;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, de::Error};
use smol_str::{SmolStr, SmolStrBuilder};
use std::fmt;
use std::sync::LazyLock;
use std::{ops::Deref, str::FromStr};

const S32_CHAR: &[u8] = b"234567abcdefghijklmnopqrstuvwxyz";

fn s32_encode(mut i: u64) -> SmolStr {
    let mut buf = [0u8; 13];
    for slot in buf.iter_mut().rev() {
        *slot = S32_CHAR[(i & 0x1F) as usize];
        i >>= 5;
    }

    let mut builder = SmolStrBuilder::new();
    for c in buf {
        builder.push(c as char);
    }
    builder.finish()
}

fn s32_decode(s: &str) -> u64 {
    s.bytes().fold(0u64, |acc, c| {
        let digit = S32_CHAR.iter().position(|&x| x == c).unwrap_or(0) as u64;
        (acc << 5) | digit
    })
}

static TID_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[234567abcdefghij][234567abcdefghijklmnopqrstuvwxyz]{12}$").unwrap()
});

/// A [Timestamp Identifier].
///
/// 64 bits (top bit zero, 53 bits of microseconds since the epoch, 10 bits of clock id)
/// encoded as 13 characters of sortable base32. Lexicographic order of the string equals
/// numeric order of the timestamp, so TIDs are used directly as repository revisions.
///
/// [Timestamp Identifier]: https://atproto.com/specs/tid
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Hash)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Tid(SmolStr);

impl Tid {
    /// Parses a `TID` from the given string.
    pub fn new(tid: impl AsRef<str>) -> Result<Self, ParseError> {
        let tid = tid.as_ref();
        if tid.len() > 13 {
            Err(ParseError::too_long("tid", tid, 13))
        } else if tid.len() < 13 {
            Err(ParseError::too_short("tid", tid, 13))
        } else if !TID_REGEX.is_match(tid) {
            Err(ParseError::format("tid", tid, "didn't match schema"))
        } else {
            Ok(Self(SmolStr::new_inline(tid)))
        }
    }

    /// Builds a TID from a microsecond timestamp and a clock id (low 10 bits used).
    pub fn from_parts(micros: u64, clkid: u16) -> Self {
        // 0TTTTTTTTTTTTTTT TTTTTTTTTTTTTTTT TTTTTTTTTTTTTTTT TTTTTTCCCCCCCCCC
        let tid = (micros << 10) & 0x7FFF_FFFF_FFFF_FC00 | (clkid as u64 & 0x3FF);
        Self(s32_encode(tid))
    }

    /// Construct a TID for the given time.
    ///
    /// If you are only using a single clock source, you can just specify `0` for `clkid`.
    pub fn from_datetime(clkid: u16, time: chrono::DateTime<chrono::Utc>) -> Self {
        Self::from_parts(time.timestamp_micros().max(0) as u64, clkid)
    }

    /// Construct a TID for the current time.
    ///
    /// Two calls in the same microsecond return the same value; use a [`Ticker`] when
    /// uniqueness matters.
    pub fn now(clkid: u16) -> Self {
        Self::from_datetime(clkid, chrono::Utc::now())
    }

    /// Microseconds since the Unix epoch encoded in this TID
    pub fn timestamp_micros(&self) -> u64 {
        s32_decode(&self.0) >> 10
    }

    /// Clock id encoded in this TID
    pub fn clock_id(&self) -> u16 {
        (s32_decode(&self.0) & 0x3FF) as u16
    }

    /// Returns the TID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Tid {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for Tid {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value: String = Deserialize::deserialize(deserializer)?;
        Self::new(value).map_err(D::Error::custom)
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Tid> for String {
    fn from(value: Tid) -> Self {
        value.0.to_string()
    }
}

impl From<Tid> for SmolStr {
    fn from(value: Tid) -> Self {
        value.0
    }
}

impl AsRef<str> for Tid {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Deref for Tid {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

/// Hands out strictly increasing TIDs.
///
/// Each call to [`Ticker::next`] returns a TID greater than every TID this ticker
/// issued before and greater than the optional `prev` TID (typically the repository's
/// current revision), even if the wall clock stalls or steps backwards.
#[derive(Debug, Clone)]
pub struct Ticker {
    last_micros: u64,
    clock_id: u16,
}

impl Ticker {
    /// New ticker with a random clock id
    pub fn new() -> Self {
        Self::with_clock_id(rand::random::<u16>() & 0x3FF)
    }

    /// New ticker with a fixed clock id
    pub fn with_clock_id(clock_id: u16) -> Self {
        Self {
            last_micros: 0,
            clock_id: clock_id & 0x3FF,
        }
    }

    /// Next TID, strictly greater than `prev` and anything previously issued
    pub fn next(&mut self, prev: Option<&Tid>) -> Tid {
        let now = chrono::Utc::now().timestamp_micros().max(0) as u64;
        let mut micros = now.max(self.last_micros + 1);
        if let Some(prev) = prev {
            micros = micros.max(prev.timestamp_micros() + 1);
        }
        self.last_micros = micros;
        Tid::from_parts(micros, self.clock_id)
    }
}

impl Default for Ticker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_tids() {
        assert!(Tid::new("3jzfcijpj2z2a").is_ok());
        assert!(Tid::new("7777777777777").is_ok());
        assert!(Tid::new("2222222222222").is_ok());
    }

    #[test]
    fn invalid_tids() {
        assert!(Tid::new("3jzfcijpj2z2").is_err());
        assert!(Tid::new("3jzfcijpj2z2aa").is_err());
        // high bit must be zero
        assert!(Tid::new("zzzzzzzzzzzzz").is_err());
        assert!(Tid::new("3jzfcijpj2z21").is_err());
        assert!(Tid::new("3JZFCIJPJ2Z2A").is_err());
    }

    #[test]
    fn parts_roundtrip() {
        let tid = Tid::from_parts(1_700_000_000_123_456, 42);
        assert_eq!(tid.len(), 13);
        assert!(Tid::new(tid.as_str()).is_ok());
        assert_eq!(tid.timestamp_micros(), 1_700_000_000_123_456);
        assert_eq!(tid.clock_id(), 42);
    }

    #[test]
    fn string_order_matches_time_order() {
        let a = Tid::from_parts(1_000, 1023);
        let b = Tid::from_parts(1_001, 0);
        assert!(a < b);
        assert!(a.as_str() < b.as_str());
    }

    #[test]
    fn ticker_is_strictly_increasing() {
        let mut ticker = Ticker::with_clock_id(7);
        let mut last = ticker.next(None);
        for _ in 0..1000 {
            let next = ticker.next(None);
            assert!(next > last, "{next} <= {last}");
            last = next;
        }
    }

    #[test]
    fn ticker_respects_prev_from_the_future() {
        let mut ticker = Ticker::with_clock_id(0);
        let future = Tid::from_parts(
            chrono::Utc::now().timestamp_micros() as u64 + 60_000_000,
            1023,
        );
        let next = ticker.next(Some(&future));
        assert!(next > future);
        let after = ticker.next(None);
        assert!(after > next);
    }
}

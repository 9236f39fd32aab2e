//! Opaque listing cursors

use std::fmt;
use std::str::FromStr;

use crate::error::PdsError;

/// Position in a creation-ordered listing: `(created_at micros, tiebreak id)`
///
/// Rendered as `{micros}::{id}`. Listings run newest first, so a cursor selects the
/// items strictly older than it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cursor {
    /// Creation time in microseconds
    pub micros: u64,
    /// DID or CID breaking ties between equal timestamps
    pub id: String,
}

impl Cursor {
    /// Cursor for the given position
    pub fn new(micros: u64, id: impl Into<String>) -> Self {
        Self {
            micros,
            id: id.into(),
        }
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.micros, self.id)
    }
}

impl FromStr for Cursor {
    type Err = PdsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || PdsError::input("InvalidRequest", format!("malformed cursor: {s}"));
        let (micros, id) = s.split_once("::").ok_or_else(malformed)?;
        let micros = micros.parse().map_err(|_| malformed())?;
        if id.is_empty() {
            return Err(malformed());
        }
        Ok(Cursor::new(micros, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_what_it_prints() {
        let cursor = Cursor::new(1_700_000_000_000_000, "did:plc:abc");
        assert_eq!(cursor.to_string(), "1700000000000000::did:plc:abc");
        assert_eq!(cursor.to_string().parse::<Cursor>().unwrap(), cursor);
    }

    #[test]
    fn rejects_garbage() {
        for bad in ["", "123", "abc::did:plc:x", "123::", "::x"] {
            let err = bad.parse::<Cursor>().unwrap_err();
            assert_eq!(err.error_name(), "InvalidRequest", "{bad}");
        }
    }
}

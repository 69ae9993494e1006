//! Change log cursor.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A position in the remote change log.
///
/// The server hands out cursors as `since`/`till` pairs: a batch fetched
/// with `since = c` carries every change after `c` up to and including
/// `till`. A fresh cache starts at [`ChangeCursor::INITIAL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeCursor(i64);

impl ChangeCursor {
    /// Cursor of an empty cache (`-1`).
    pub const INITIAL: ChangeCursor = ChangeCursor(-1);

    /// Creates a cursor from its raw value.
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }

    /// Returns true if nothing has been synced yet.
    #[must_use]
    pub fn is_initial(self) -> bool {
        self == Self::INITIAL
    }
}

impl Default for ChangeCursor {
    fn default() -> Self {
        Self::INITIAL
    }
}

impl From<i64> for ChangeCursor {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for ChangeCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_cursor() {
        assert_eq!(ChangeCursor::default(), ChangeCursor::INITIAL);
        assert!(ChangeCursor::new(-1).is_initial());
        assert!(!ChangeCursor::new(0).is_initial());
    }

    #[test]
    fn cursors_order_by_value() {
        assert!(ChangeCursor::new(100) > ChangeCursor::new(50));
        assert!(ChangeCursor::INITIAL < ChangeCursor::new(0));
    }

    #[test]
    fn serializes_as_plain_integer() {
        let json = serde_json::to_string(&ChangeCursor::new(1_506_703_262_916)).unwrap();
        assert_eq!(json, "1506703262916");

        let cursor: ChangeCursor = serde_json::from_str("-1").unwrap();
        assert!(cursor.is_initial());
    }
}

//! Change batches as fetched and as processed.

use crate::cursor::ChangeCursor;
use crate::error::{ProtocolError, ProtocolResult};
use crate::flag::FeatureFlag;
use serde::{Deserialize, Serialize};

/// A change batch exactly as the server returned it.
///
/// Entries are kept as raw JSON values so that one undecodable entry does
/// not fail the whole envelope. Only the cursors are mandatory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawChangeBatch {
    /// Cursor the batch was fetched from.
    #[serde(default)]
    pub since: Option<ChangeCursor>,
    /// Cursor the batch brings the cache to.
    #[serde(default)]
    pub till: Option<ChangeCursor>,
    /// Raw flag entries.
    #[serde(default, rename = "splits")]
    pub entries: Vec<serde_json::Value>,
}

impl RawChangeBatch {
    /// Creates an empty batch between two cursors.
    pub fn new(since: ChangeCursor, till: ChangeCursor) -> Self {
        Self {
            since: Some(since),
            till: Some(till),
            entries: Vec::new(),
        }
    }

    /// Creates a batch carrying the given flag definitions.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Json`] if a flag cannot be encoded.
    pub fn from_flags(
        since: ChangeCursor,
        till: ChangeCursor,
        flags: impl IntoIterator<Item = FeatureFlag>,
    ) -> ProtocolResult<Self> {
        let entries = flags
            .into_iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            since: Some(since),
            till: Some(till),
            entries,
        })
    }

    /// Appends a raw entry.
    #[must_use]
    pub fn with_raw_entry(mut self, entry: serde_json::Value) -> Self {
        self.entries.push(entry);
        self
    }

    /// Decodes a batch from a JSON response body.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Json`] if the body is not a JSON object of
    /// the expected shape.
    pub fn from_json(body: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(body)?)
    }

    /// Returns the `(since, till)` pair.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MissingCursor`] if either cursor is absent.
    pub fn cursors(&self) -> ProtocolResult<(ChangeCursor, ChangeCursor)> {
        let since = self.since.ok_or(ProtocolError::MissingCursor("since"))?;
        let till = self.till.ok_or(ProtocolError::MissingCursor("till"))?;
        Ok((since, till))
    }
}

/// A normalized change ready to be applied to the flags store.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedChange {
    /// Cursor the change was fetched from.
    pub since: ChangeCursor,
    /// Cursor the store advances to.
    pub till: ChangeCursor,
    /// Definitions to insert or replace.
    pub to_add: Vec<FeatureFlag>,
    /// Names to remove.
    pub to_remove: Vec<String>,
}

impl ProcessedChange {
    /// Creates an empty change between two cursors.
    pub fn new(since: ChangeCursor, till: ChangeCursor) -> Self {
        Self {
            since,
            till,
            to_add: Vec::new(),
            to_remove: Vec::new(),
        }
    }

    /// Returns true if there is nothing to add or remove.
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

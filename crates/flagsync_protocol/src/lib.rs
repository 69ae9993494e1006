//! # flagsync Protocol
//!
//! Wire types and change processing for flagsync.
//!
//! This crate provides:
//! - [`ChangeCursor`] for positions in the remote change log
//! - [`FeatureFlag`] definitions and their structural validation
//! - [`RawChangeBatch`] / [`ProcessedChange`] and the pure [`ChangeProcessor`]
//! - Segment membership payloads
//! - Stream notifications delivered by the push transport
//! - Recorded usage: [`Event`] and [`Impression`]
//!
//! This is a pure protocol crate with no I/O operations.
//!
//! ## Key Invariants
//!
//! - A malformed batch envelope (missing cursor) fails as a whole
//! - A malformed individual entry never fails the batch
//! - An ACTIVE entry that fails validation is removed, never applied

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change;
mod cursor;
mod error;
mod flag;
mod notification;
mod processor;
mod record;
mod segments;

pub use change::{ProcessedChange, RawChangeBatch};
pub use cursor::ChangeCursor;
pub use error::{ProtocolError, ProtocolResult};
pub use flag::{
    Condition, ConditionType, FeatureFlag, FlagStatus, Matcher, MatcherGroup, Partition,
    CONTROL_TREATMENT,
};
pub use notification::StreamNotification;
pub use processor::ChangeProcessor;
pub use record::{validate_key, Event, Impression, InBytesSizable, MAX_KEY_LENGTH};
pub use segments::{MySegment, MySegmentsResponse};

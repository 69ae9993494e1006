//! # flagsync Storage
//!
//! Persistent cache interfaces and implementations for flagsync.
//!
//! This crate provides the cold-start side of the SDK. The in-memory stores
//! in the engine are authoritative while running; everything here is a
//! write-through copy that is only read back once, at construction.
//!
//! ## Design Principles
//!
//! - Storages know nothing about cursors ordering or readiness
//! - Writes replace whole snapshots, so a crash leaves either the old or the
//!   new file, never a mix
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Storages
//!
//! - [`InMemoryFlagsStorage`], [`InMemorySegmentsStorage`],
//!   [`InMemoryRecordStorage`] - For testing and ephemeral caches
//! - [`StorageDir`] - A locked cache directory handing out CBOR file storages
//!
//! ## Example
//!
//! ```rust
//! use flagsync_protocol::{ChangeCursor, FeatureFlag};
//! use flagsync_storage::{FlagsUpdate, InMemoryFlagsStorage, PersistentFlagsStorage};
//!
//! let storage = InMemoryFlagsStorage::new();
//! storage
//!     .persist(&FlagsUpdate {
//!         upserts: vec![FeatureFlag::active("checkout", "user")],
//!         removals: vec![],
//!         cursor: ChangeCursor::new(100),
//!     })
//!     .unwrap();
//!
//! let snapshot = storage.load_snapshot().unwrap();
//! assert_eq!(snapshot.cursor, ChangeCursor::new(100));
//! assert_eq!(snapshot.flags.len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::{
    FlagsSnapshot, FlagsUpdate, PersistentFlagsStorage, PersistentRecordStorage,
    PersistentSegmentsStorage,
};
pub use error::{StorageError, StorageResult};
pub use file::{FileFlagsStorage, FileRecordStorage, FileSegmentsStorage, StorageDir};
pub use memory::{InMemoryFlagsStorage, InMemoryRecordStorage, InMemorySegmentsStorage};

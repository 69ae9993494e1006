//! # flagsync Testkit
//!
//! Test utilities for flagsync.
//!
//! This crate provides:
//! - Flag, batch and record fixtures
//! - Scripted fetchers, senders and authenticators
//! - A fake streaming transport driven from the test
//! - Persistent storage that fails on demand
//! - Property-based test generators using proptest
//! - A harness wiring a complete [`FlagsContext`](flagsync_engine::FlagsContext)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use flagsync_testkit::prelude::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn becomes_ready() {
//!     let harness = TestHarness::polling();
//!     harness.remote.flags.push_batch(batch(-1, 100, [flag("a")]));
//!     harness.context.start().unwrap();
//!     settle().await;
//!     assert!(harness.context.readiness().is_ready());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod remote;
pub mod storage;
pub mod streaming;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::remote::*;
    pub use crate::storage::*;
    pub use crate::streaming::*;
    pub use crate::init_tracing;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use remote::*;
pub use storage::*;
pub use streaming::*;

/// Installs a `tracing` subscriber honoring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

//! # Tally Testkit
//!
//! Test utilities for the Tally sync engine.
//!
//! This crate provides:
//! - Record builders and a fully wired [`TestHarness`]
//! - Property-based test generators using proptest
//! - Tracing setup for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tally_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn pushes_new_workspace() {
//!     let harness = TestHarness::new();
//!     harness.seed(vec![workspace("Acme")]);
//!     let report = harness.manager.sync(SyncMode::Push).await.unwrap();
//!     assert_eq!(report.pushed, 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod logging;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
    pub use tally_core::*;
    pub use tally_sync_engine::*;
}

pub use fixtures::*;
pub use generators::*;
pub use logging::*;

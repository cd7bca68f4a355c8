//! # MedSync Testkit
//!
//! Test utilities for MedSync.
//!
//! This crate provides:
//! - Scripted executors and recording notification sinks
//! - A ready-made orchestrator harness over an in-memory store
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use medsync_testkit::prelude::*;
//!
//! #[test]
//! fn drains_when_online() {
//!     let harness = TestSync::builder().build();
//!     harness.queue_operation(OperationType::Create, "adherence", "dose-1", None, Priority::Critical).unwrap();
//!     assert_eq!(harness.sync_now().unwrap().succeeded, 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;

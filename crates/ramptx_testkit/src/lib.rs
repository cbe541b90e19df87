//! # RampTx Testkit
//!
//! Test utilities for RampTx.
//!
//! This crate provides:
//! - A fault-injecting store wrapper (transient failures, lost replies,
//!   crashes)
//! - Fixtures wiring coordinators and recovery to a shared store
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use ramptx_testkit::prelude::*;
//!
//! let world = TestWorld::new();
//! world.faulty.crash_after(3);
//! let _ = world.coordinator().execute([("a", "jeff"), ("b", "mike")]);
//!
//! world.recover();
//! assert!(world.staged_keys().is_empty());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;

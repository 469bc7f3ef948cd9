//! # Vellum Testkit
//!
//! Test utilities for Vellum.
//!
//! This crate provides:
//! - Temporary environment fixtures, on disk and in memory
//! - Property-based test generators using proptest
//! - Crash simulation against the data file
//!
//! ## Usage
//!
//! ```rust
//! use vellum_testkit::prelude::*;
//!
//! with_temp_env(|env| {
//!     let txn = env.begin_write().unwrap();
//!     txn.commit().unwrap();
//! });
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

//! # OrbitKV Testkit
//!
//! Test utilities for OrbitKV.
//!
//! This crate provides:
//! - The planet/moon schema and record fixtures
//! - A synchronous adapter wrapper for property tests
//! - Temporary snapshot directories
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use orbitkv_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_adapter() {
//!     let test = TestAdapter::planets();
//!     test.add("planet", planet("p1", "Jupiter", "gas giant")).unwrap();
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

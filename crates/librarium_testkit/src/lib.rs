//! # Librarium Testkit
//!
//! Test utilities for the Librarium sync stack.
//!
//! This crate provides:
//! - Deterministic fixture builders for server payloads and local records
//! - A coherent sample library scenario for end-to-end sync tests
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use librarium_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn pulls_a_small_library() {
//!     let library = scenarios::small_library();
//!     let api = MockApi::new();
//!     api.set_manifest(library.manifest());
//!     api.books.script_pages(library.books.clone(), 50);
//!     // ... drive the engine
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

//! Shared test utilities for the drives workspace.
//!
//! Dev-dependency only, never published.
//!
//! # Modules
//!
//! - [`dir`]: [`TestDir`] builder for source and destination trees

pub mod dir;

pub use dir::TestDir;

//! Common test utilities and helpers
//!
//! - Temporary queue files and configs
//! - Request builders for typical field writes
//! - Custom assertion macros

pub mod fixtures;

pub use fixtures::*;

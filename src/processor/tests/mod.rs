//! Integration tests for the processor module
//!
//! Builds source reports and templates on disk and runs the full
//! reconciliation pipeline over them.

pub mod error_handling;
pub mod fixtures;

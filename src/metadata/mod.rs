//! Metadata structures of .NET method bodies.
//!
//! # Key Components
//!
//! - [`method`] - Method headers, exception handling sections and header summaries
//! - [`token`] - Metadata table row references used to identify methods

/// Method body headers and exception handling clauses
pub mod method;
/// Metadata tokens
pub mod token;

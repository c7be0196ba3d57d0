//! Method body structures: headers, exception handling clauses and header summaries.
//!
//! # Key Components
//! - [`MethodBody`] - Parsed tiny or fat header with its exception handlers
//! - [`ExceptionHandler`] - A single try/handler clause
//! - [`HeaderInfo`] / [`HeaderInfoProvider`] - What the rewriter needs to know about a body
//! - [`BodyScanner`] - Default provider that scans the code itself
//!
//! # Example
//!
//! ```rust
//! use cilwrap::metadata::method::{BodyScanner, HeaderInfoProvider};
//!
//! // tiny header, code: ldc.i4.0, ret
//! let info = BodyScanner.header_info(&[0x0A, 0x16, 0x2A])?;
//! assert_eq!(info.return_count, 1);
//! assert_eq!(info.code_size, 2);
//! # Ok::<(), cilwrap::Error>(())
//! ```

mod body;
mod exceptions;
mod header;
mod types;

pub use body::{write_fat_header, MethodBody};
pub use exceptions::{write_fat_section, ExceptionHandler, ExceptionHandlerFlags};
pub use header::{BodyScanner, HeaderInfo, HeaderInfoProvider};
pub use types::*;

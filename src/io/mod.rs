//! Low-level byte order and cursor utilities for reading and writing CIL method bodies.
//!
//! Everything that touches raw method-body bytes goes through this module: the opcode decoder,
//! the header and exception-section parsers, and the rewriter when it patches branch operands.
//! All operations are bounds checked and report [`crate::Error::OutOfBounds`] instead of panicking.
//!
//! # Key Components
//!
//! - [`CilIO`] - Trait describing primitives that can be read and written in little-endian order
//! - [`read_le`] / [`read_le_at`] - Bounds-checked reads from a slice
//! - [`write_le_at`] - Bounds-checked writes into a slice
//! - [`push_le`] - Append a value to a growing output buffer
//! - [`Parser`] - Cursor over a byte slice for sequential decoding
//!
//! # Example
//!
//! ```rust
//! use cilwrap::io::{read_le_at, write_le_at};
//!
//! let mut data = [0u8; 6];
//! let mut offset = 2;
//! write_le_at(&mut data, &mut offset, 0x0102_0304_u32)?;
//! assert_eq!(offset, 6);
//!
//! let mut offset = 2;
//! let value: u32 = read_le_at(&data, &mut offset)?;
//! assert_eq!(value, 0x0102_0304);
//! assert_eq!(offset, 6);
//! # Ok::<(), cilwrap::Error>(())
//! ```

mod le;
mod parser;

pub use le::{push_le, read_le, read_le_at, write_le_at, CilIO};
pub use parser::Parser;

// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

//! # cilwrap
//!
//! The method body rewriting core of a .NET profiling agent.
//!
//! An agent that wants to attach tracing code to a method has to be able to run something on
//! every way out of that method. `cilwrap` takes the CIL body the runtime hands to the profiler
//! during JIT or ReJIT compilation and rewrites it into a single-exit form: every `ret` but the
//! last becomes a jump to the end of the code, the last one becomes a `nop`, branches are widened
//! when the code grows past what one-byte jumps can reach, and the exception handling table is
//! moved along with the instructions. Before a rewritten body is handed back it is decoded again
//! from scratch, so a body the runtime would refuse never leaves the crate.
//!
//! ## Features
//!
//! - **Complete opcode table** - All one- and two-byte CIL opcodes with operand and flow class
//! - **Arena based instruction model** - Jumps refer to instructions, not to byte offsets
//! - **Tiny and fat headers** - Tiny bodies are promoted, fat header fields are carried over
//! - **Exception clause relocation** - Small and fat sections in, fat sections out
//! - **Self-validation** - Every rewritten body is re-parsed and re-decoded
//! - **Profiler glue** - Generic method tracking, body cache and policy refresh
//!
//! ## Quick Start
//!
//! ```rust
//! use cilwrap::prelude::*;
//!
//! // tiny header, code: ldarg.0, brtrue.s +1, ret, ret
//! let body = [0x16, 0x02, 0x2D, 0x01, 0x2A, 0x2A];
//!
//! let info = BodyScanner.header_info(&body)?;
//! assert_eq!(info.return_count, 2);
//!
//! let rewritten = BodyRewriter::new(&body, &info, &RewriterConfig::default()).rewrite()?;
//!
//! // The result always carries a 12-byte fat header
//! let parsed = MethodBody::from(&rewritten)?;
//! assert!(parsed.is_fat);
//! assert_eq!(parsed.size_code, 6);
//! # Ok::<(), cilwrap::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`io`] - Bounds-checked little-endian helpers and a byte cursor
//! - [`disassembler`] - Opcode table, decoder and the instruction arena
//! - [`metadata`] - Tokens, method headers and exception clauses
//! - [`rewriter`] - The single-exit transformation
//! - [`profiler`] - Identifiers, host traits and the state kept between compilation callbacks
//!
//! ## Error Handling
//!
//! Nothing in this crate panics on bad input. Every fallible operation returns
//! [`Result<T>`], and a failed rewrite simply means the method is left as it was.
//!
//! ## Thread Safety
//!
//! [`rewriter::BodyRewriter`] holds no shared state and can be used from any number of threads.
//! [`profiler::GenericMethodResolver`], [`profiler::MethodBodyCache`] and
//! [`profiler::Instrumentor`] are `Send + Sync` and are meant to be shared between the threads
//! that deliver compilation callbacks.

#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use cilwrap::prelude::*;
///
/// let config = RewriterConfig::default();
/// assert_eq!(config.long_branch_threshold, 127);
/// ```
pub mod prelude;

/// Little-endian reading and writing and the [`io::Parser`] cursor
pub mod io;

/// Instructions, decoder and the instruction arena based on ECMA-335
///
/// This module provides everything needed to turn method code into instructions and back:
///
/// - **Opcode Table**: Static descriptors for every one- and two-byte opcode
/// - **Instruction Decoding**: Linear decode with jump target resolution
/// - **Emission**: Two-phase write with placeholder jumps patched afterwards
///
/// # Examples
///
/// ```rust
/// use cilwrap::{disassembler::decode_instruction, io::Parser};
///
/// let bytecode = &[0x00, 0x2A]; // nop, ret
/// let mut parser = Parser::new(bytecode);
/// let instruction = decode_instruction(&mut parser)?;
///
/// assert_eq!(instruction.opcode().mnemonic, "nop");
/// assert_eq!(parser.pos(), 1);
/// # Ok::<(), cilwrap::Error>(())
/// ```
pub mod disassembler;

/// Metadata tokens and method body structures based on ECMA-335
///
/// - [`metadata::token`] - Metadata tokens identifying methods
/// - [`metadata::method`] - Tiny and fat method headers, exception clauses, header summaries
pub mod metadata;

/// Single-exit rewriting of method bodies
pub mod rewriter;

/// The profiler-facing side: identifiers, host traits, generic method tracking, body cache and
/// the instrumentor that ties them to compilation callbacks.
pub mod profiler;

/// `cilwrap` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
/// This is used consistently throughout the crate for all fallible operations.
pub type Result<T> = std::result::Result<T, Error>;

/// `cilwrap` Error type
///
/// The main error type for all operations in this crate.
///
/// # Examples
///
/// ```rust
/// use cilwrap::{disassembler::decode_code, Error};
///
/// match decode_code(&[0x24]) {
///     Err(Error::InvalidOpcode { offset, opcode }) => {
///         assert_eq!(offset, 0);
///         assert_eq!(opcode, 0x24);
///     }
///     other => panic!("unexpected {:?}", other.map(|map| map.len())),
/// }
/// ```
pub use error::Error;

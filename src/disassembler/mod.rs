//! CIL instruction decoding and the instruction model used for rewriting.
//!
//! This module turns the raw code of a method body into an arena of [`Instruction`]s whose jumps
//! refer to each other by [`InstructionId`], and writes such an arena back to bytes.
//!
//! # Key Types
//! - [`OpCode`] - Static descriptor of a CIL opcode
//! - [`OpcodeDescriptor`] - Size information for the instruction at a code position
//! - [`Instruction`] / [`Operation`] - A decoded instruction and what it does
//! - [`InstructionMap`] - Arena of instructions keyed by original offset
//!
//! # Main Functions
//! - [`decode_instruction`] - Decode a single instruction
//! - [`decode_code`] - Decode a complete code buffer and resolve jump targets
//! - [`long_form_branch`] - Map a short branch to its long form
//!
//! # Example
//! ```rust
//! use cilwrap::disassembler::decode_code;
//!
//! let code = [0x00, 0x2A]; // nop, ret
//! let map = decode_code(&code)?;
//! assert_eq!(map.len(), 2);
//! assert!(map.all_valid());
//! # Ok::<(), cilwrap::Error>(())
//! ```

mod decoder;
mod instruction;
mod opcode;
pub mod opcodes;

pub use decoder::{decode_code, decode_instruction};
pub use instruction::{Instruction, InstructionId, InstructionMap, Operation};
pub use opcode::{
    long_form_branch, lookup, FlowType, OpCode, OpcodeDescriptor, OperandType, INSTRUCTIONS,
    INSTRUCTIONS_FE,
};

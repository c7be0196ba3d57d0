//! Linear decoding of CIL instruction streams.
//!
//! Method bodies handed to the rewriter are decoded front to back: every byte of the code must
//! belong to exactly one instruction, so there is no need to follow control flow. Once the whole
//! stream is known, jump targets are resolved in a second step, which allows forward references.
//!
//! # Example
//!
//! ```rust
//! use cilwrap::{io::Parser, disassembler::{decode_instruction, Operation}};
//!
//! let code = [0x2B, 0x00, 0x2A]; // br.s +0, ret
//! let mut parser = Parser::new(&code);
//!
//! let branch = decode_instruction(&mut parser)?;
//! assert!(matches!(branch.operation, Operation::Branch { .. }));
//! assert_eq!(parser.pos(), 2);
//!
//! let ret = decode_instruction(&mut parser)?;
//! assert!(ret.is_return());
//! # Ok::<(), cilwrap::Error>(())
//! ```

use crate::{
    disassembler::{
        opcodes, FlowType, Instruction, InstructionMap, OpcodeDescriptor, Operation,
    },
    io::Parser,
    Error::{Empty, OutOfBounds},
    Result,
};

/// Decode the instruction under the parser's cursor and advance past it.
///
/// The instruction is recorded at the parser's current position. Jump targets are left
/// unresolved; see [`InstructionMap::resolve_targets`].
///
/// # Errors
/// Returns [`crate::Error::InvalidOpcode`] for reserved or unknown opcodes and
/// [`crate::Error::OutOfBounds`] for a truncated instruction.
pub fn decode_instruction(parser: &mut Parser) -> Result<Instruction> {
    let position = parser.pos();
    let descriptor = OpcodeDescriptor::decode(parser.data(), position)?;
    let offset = u32::try_from(position).map_err(|_| OutOfBounds)?;

    let opcode = descriptor.opcode;
    let operation = match opcode.flow {
        FlowType::Return if opcode.code == opcodes::RET => Operation::Return,
        FlowType::Switch => Operation::Switch {
            targets: vec![None; (descriptor.operand_size - 4) / 4],
        },
        flow if flow.is_branch() => Operation::Branch {
            opcode,
            target: None,
            target_offset: None,
        },
        _ => Operation::Sequential(opcode),
    };

    parser.advance_by(descriptor.total_size)?;
    Ok(Instruction::new(operation, offset))
}

/// Decode a complete code buffer into an [`InstructionMap`] and resolve all jump targets.
///
/// Instructions whose targets can not be resolved are kept, but marked invalid; check
/// [`InstructionMap::all_valid`] before relying on the result.
///
/// # Errors
/// Returns [`crate::Error::Empty`] for an empty buffer, and the errors of
/// [`decode_instruction`] if any instruction fails to decode.
pub fn decode_code(code: &[u8]) -> Result<InstructionMap> {
    if code.is_empty() {
        return Err(Empty);
    }

    let mut parser = Parser::new(code);
    let mut map = InstructionMap::with_capacity(code.len() / 2);

    while parser.has_more_data() {
        let instruction = decode_instruction(&mut parser)?;
        map.insert(instruction);
    }

    map.resolve_targets(code);
    Ok(map)
}

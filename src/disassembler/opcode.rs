//! Static opcode descriptors for every defined CIL instruction.
//!
//! Each [`OpCode`] describes one entry of the ECMA-335 opcode space: its mnemonic, encoding, the
//! type of its inline operand and how it affects control flow. The tables are indexed by the
//! opcode byte ([`INSTRUCTIONS`]) or by the byte following the `0xFE` prefix
//! ([`INSTRUCTIONS_FE`]). Reserved slots carry an empty mnemonic.
//!
//! [`OpcodeDescriptor::decode`] classifies the instruction at a position in a code buffer and
//! reports how many bytes it occupies, which is all a linear decoder needs to stay in sync.
//!
//! # Example
//!
//! ```rust
//! use cilwrap::disassembler::{FlowType, OpcodeDescriptor};
//!
//! // switch with two arms
//! let code = [0x45, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00];
//! let descriptor = OpcodeDescriptor::decode(&code, 0)?;
//!
//! assert_eq!(descriptor.opcode.mnemonic, "switch");
//! assert_eq!(descriptor.opcode.flow, FlowType::Switch);
//! assert_eq!(descriptor.operand_size, 12);
//! assert_eq!(descriptor.total_size, 13);
//! # Ok::<(), cilwrap::Error>(())
//! ```

use strum::{Display, EnumIter};

use crate::{
    disassembler::opcodes,
    io::Parser,
    Error::{InvalidOpcode, OutOfBounds},
    Result,
};

/// The type of the inline operand that follows an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter)]
pub enum OperandType {
    /// No operand present
    None,
    /// Signed 8-bit integer, also used for short branch distances
    Int8,
    /// Unsigned 8-bit integer
    UInt8,
    /// Unsigned 16-bit integer
    UInt16,
    /// Signed 32-bit integer, also used for long branch distances
    Int32,
    /// Signed 64-bit integer
    Int64,
    /// 32-bit floating point
    Float32,
    /// 64-bit floating point
    Float64,
    /// Metadata token reference
    Token,
    /// Switch table operand
    Switch,
}

impl OperandType {
    /// Returns the size in bytes of this operand type.
    ///
    /// Returns `None` for [`OperandType::Switch`], whose size depends on the arm count stored in
    /// the instruction stream.
    #[must_use]
    pub const fn size(&self) -> Option<usize> {
        match self {
            OperandType::None => Some(0),
            OperandType::Int8 | OperandType::UInt8 => Some(1),
            OperandType::UInt16 => Some(2),
            OperandType::Int32 | OperandType::Float32 | OperandType::Token => Some(4),
            OperandType::Int64 | OperandType::Float64 => Some(8),
            OperandType::Switch => None,
        }
    }
}

/// How an instruction affects control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter)]
pub enum FlowType {
    /// Normal execution continues to next instruction
    Sequential,
    /// Conditional branch to another location
    ConditionalBranch,
    /// Always branches to another location
    UnconditionalBranch,
    /// Call to another method
    Call,
    /// Returns from current method
    Return,
    /// Multi-way branch
    Switch,
    /// Exception throwing
    Throw,
    /// End of a finally or filter block
    EndFinally,
    /// Leave protected region
    Leave,
}

impl FlowType {
    /// Returns `true` for the flow classes whose operand is a single relative jump.
    #[must_use]
    pub fn is_branch(&self) -> bool {
        matches!(
            self,
            FlowType::ConditionalBranch | FlowType::UnconditionalBranch | FlowType::Leave
        )
    }
}

/// Static description of a single CIL opcode.
#[derive(Debug, PartialEq, Eq)]
pub struct OpCode {
    /// Mnemonic, empty for reserved slots
    pub mnemonic: &'static str,
    /// `0xFE` for two-byte opcodes, `0` otherwise
    pub prefix: u8,
    /// The opcode byte (second byte for two-byte opcodes)
    pub code: u8,
    /// Type of the inline operand
    pub operand: OperandType,
    /// Control flow class
    pub flow: FlowType,
}

impl OpCode {
    /// Returns `true` if this slot does not hold a defined instruction.
    #[must_use]
    pub fn is_reserved(&self) -> bool {
        self.mnemonic.is_empty()
    }

    /// Number of bytes used by the opcode itself (1 or 2).
    #[must_use]
    pub fn instruction_size(&self) -> usize {
        if self.prefix == opcodes::FE_PREFIX {
            2
        } else {
            1
        }
    }

    /// The opcode as a 16-bit value, two-byte opcodes as `0xFEXX`.
    #[must_use]
    pub fn value(&self) -> u16 {
        (u16::from(self.prefix) << 8) | u16::from(self.code)
    }

    /// Returns `true` for branches whose jump distance is encoded in a single signed byte.
    #[must_use]
    pub fn is_short_branch(&self) -> bool {
        self.flow.is_branch() && self.operand == OperandType::Int8
    }

    /// Append the opcode byte(s) to `out`.
    pub fn write(&self, out: &mut Vec<u8>) {
        if self.prefix == opcodes::FE_PREFIX {
            out.push(opcodes::FE_PREFIX);
        }
        out.push(self.code);
    }
}

const fn op(
    mnemonic: &'static str,
    prefix: u8,
    code: u8,
    operand: OperandType,
    flow: FlowType,
) -> OpCode {
    OpCode {
        mnemonic,
        prefix,
        code,
        operand,
        flow,
    }
}

const fn reserved(prefix: u8, code: u8) -> OpCode {
    op("", prefix, code, OperandType::None, FlowType::Sequential)
}

/// Single-byte opcodes, indexed by opcode byte (`0x00` - `0xE0`).
pub static INSTRUCTIONS: [OpCode; 225] = [
    op("nop", 0x00, 0x00, OperandType::None, FlowType::Sequential),
    op("break", 0x00, 0x01, OperandType::None, FlowType::Sequential),
    op("ldarg.0", 0x00, 0x02, OperandType::None, FlowType::Sequential),
    op("ldarg.1", 0x00, 0x03, OperandType::None, FlowType::Sequential),
    op("ldarg.2", 0x00, 0x04, OperandType::None, FlowType::Sequential),
    op("ldarg.3", 0x00, 0x05, OperandType::None, FlowType::Sequential),
    op("ldloc.0", 0x00, 0x06, OperandType::None, FlowType::Sequential),
    op("ldloc.1", 0x00, 0x07, OperandType::None, FlowType::Sequential),
    op("ldloc.2", 0x00, 0x08, OperandType::None, FlowType::Sequential),
    op("ldloc.3", 0x00, 0x09, OperandType::None, FlowType::Sequential),
    op("stloc.0", 0x00, 0x0A, OperandType::None, FlowType::Sequential),
    op("stloc.1", 0x00, 0x0B, OperandType::None, FlowType::Sequential),
    op("stloc.2", 0x00, 0x0C, OperandType::None, FlowType::Sequential),
    op("stloc.3", 0x00, 0x0D, OperandType::None, FlowType::Sequential),
    op("ldarg.s", 0x00, 0x0E, OperandType::UInt8, FlowType::Sequential),
    op("ldarga.s", 0x00, 0x0F, OperandType::UInt8, FlowType::Sequential),
    op("starg.s", 0x00, 0x10, OperandType::UInt8, FlowType::Sequential),
    op("ldloc.s", 0x00, 0x11, OperandType::UInt8, FlowType::Sequential),
    op("ldloca.s", 0x00, 0x12, OperandType::UInt8, FlowType::Sequential),
    op("stloc.s", 0x00, 0x13, OperandType::UInt8, FlowType::Sequential),
    op("ldnull", 0x00, 0x14, OperandType::None, FlowType::Sequential),
    op("ldc.i4.m1", 0x00, 0x15, OperandType::None, FlowType::Sequential),
    op("ldc.i4.0", 0x00, 0x16, OperandType::None, FlowType::Sequential),
    op("ldc.i4.1", 0x00, 0x17, OperandType::None, FlowType::Sequential),
    op("ldc.i4.2", 0x00, 0x18, OperandType::None, FlowType::Sequential),
    op("ldc.i4.3", 0x00, 0x19, OperandType::None, FlowType::Sequential),
    op("ldc.i4.4", 0x00, 0x1A, OperandType::None, FlowType::Sequential),
    op("ldc.i4.5", 0x00, 0x1B, OperandType::None, FlowType::Sequential),
    op("ldc.i4.6", 0x00, 0x1C, OperandType::None, FlowType::Sequential),
    op("ldc.i4.7", 0x00, 0x1D, OperandType::None, FlowType::Sequential),
    op("ldc.i4.8", 0x00, 0x1E, OperandType::None, FlowType::Sequential),
    op("ldc.i4.s", 0x00, 0x1F, OperandType::Int8, FlowType::Sequential),
    op("ldc.i4", 0x00, 0x20, OperandType::Int32, FlowType::Sequential),
    op("ldc.i8", 0x00, 0x21, OperandType::Int64, FlowType::Sequential),
    op("ldc.r4", 0x00, 0x22, OperandType::Float32, FlowType::Sequential),
    op("ldc.r8", 0x00, 0x23, OperandType::Float64, FlowType::Sequential),
    reserved(0x00, 0x24),
    op("dup", 0x00, 0x25, OperandType::None, FlowType::Sequential),
    op("pop", 0x00, 0x26, OperandType::None, FlowType::Sequential),
    op("jmp", 0x00, 0x27, OperandType::Token, FlowType::Call),
    op("call", 0x00, 0x28, OperandType::Token, FlowType::Call),
    op("calli", 0x00, 0x29, OperandType::Token, FlowType::Call),
    op("ret", 0x00, 0x2A, OperandType::None, FlowType::Return),
    op("br.s", 0x00, 0x2B, OperandType::Int8, FlowType::UnconditionalBranch),
    op("brfalse.s", 0x00, 0x2C, OperandType::Int8, FlowType::ConditionalBranch),
    op("brtrue.s", 0x00, 0x2D, OperandType::Int8, FlowType::ConditionalBranch),
    op("beq.s", 0x00, 0x2E, OperandType::Int8, FlowType::ConditionalBranch),
    op("bge.s", 0x00, 0x2F, OperandType::Int8, FlowType::ConditionalBranch),
    op("bgt.s", 0x00, 0x30, OperandType::Int8, FlowType::ConditionalBranch),
    op("ble.s", 0x00, 0x31, OperandType::Int8, FlowType::ConditionalBranch),
    op("blt.s", 0x00, 0x32, OperandType::Int8, FlowType::ConditionalBranch),
    op("bne.un.s", 0x00, 0x33, OperandType::Int8, FlowType::ConditionalBranch),
    op("bge.un.s", 0x00, 0x34, OperandType::Int8, FlowType::ConditionalBranch),
    op("bgt.un.s", 0x00, 0x35, OperandType::Int8, FlowType::ConditionalBranch),
    op("ble.un.s", 0x00, 0x36, OperandType::Int8, FlowType::ConditionalBranch),
    op("blt.un.s", 0x00, 0x37, OperandType::Int8, FlowType::ConditionalBranch),
    op("br", 0x00, 0x38, OperandType::Int32, FlowType::UnconditionalBranch),
    op("brfalse", 0x00, 0x39, OperandType::Int32, FlowType::ConditionalBranch),
    op("brtrue", 0x00, 0x3A, OperandType::Int32, FlowType::ConditionalBranch),
    op("beq", 0x00, 0x3B, OperandType::Int32, FlowType::ConditionalBranch),
    op("bge", 0x00, 0x3C, OperandType::Int32, FlowType::ConditionalBranch),
    op("bgt", 0x00, 0x3D, OperandType::Int32, FlowType::ConditionalBranch),
    op("ble", 0x00, 0x3E, OperandType::Int32, FlowType::ConditionalBranch),
    op("blt", 0x00, 0x3F, OperandType::Int32, FlowType::ConditionalBranch),
    op("bne.un", 0x00, 0x40, OperandType::Int32, FlowType::ConditionalBranch),
    op("bge.un", 0x00, 0x41, OperandType::Int32, FlowType::ConditionalBranch),
    op("bgt.un", 0x00, 0x42, OperandType::Int32, FlowType::ConditionalBranch),
    op("ble.un", 0x00, 0x43, OperandType::Int32, FlowType::ConditionalBranch),
    op("blt.un", 0x00, 0x44, OperandType::Int32, FlowType::ConditionalBranch),
    op("switch", 0x00, 0x45, OperandType::Switch, FlowType::Switch),
    op("ldind.i1", 0x00, 0x46, OperandType::None, FlowType::Sequential),
    op("ldind.u1", 0x00, 0x47, OperandType::None, FlowType::Sequential),
    op("ldind.i2", 0x00, 0x48, OperandType::None, FlowType::Sequential),
    op("ldind.u2", 0x00, 0x49, OperandType::None, FlowType::Sequential),
    op("ldind.i4", 0x00, 0x4A, OperandType::None, FlowType::Sequential),
    op("ldind.u4", 0x00, 0x4B, OperandType::None, FlowType::Sequential),
    op("ldind.i8", 0x00, 0x4C, OperandType::None, FlowType::Sequential),
    op("ldind.i", 0x00, 0x4D, OperandType::None, FlowType::Sequential),
    op("ldind.r4", 0x00, 0x4E, OperandType::None, FlowType::Sequential),
    op("ldind.r8", 0x00, 0x4F, OperandType::None, FlowType::Sequential),
    op("ldind.ref", 0x00, 0x50, OperandType::None, FlowType::Sequential),
    op("stind.ref", 0x00, 0x51, OperandType::None, FlowType::Sequential),
    op("stind.i1", 0x00, 0x52, OperandType::None, FlowType::Sequential),
    op("stind.i2", 0x00, 0x53, OperandType::None, FlowType::Sequential),
    op("stind.i4", 0x00, 0x54, OperandType::None, FlowType::Sequential),
    op("stind.i8", 0x00, 0x55, OperandType::None, FlowType::Sequential),
    op("stind.r4", 0x00, 0x56, OperandType::None, FlowType::Sequential),
    op("stind.r8", 0x00, 0x57, OperandType::None, FlowType::Sequential),
    op("add", 0x00, 0x58, OperandType::None, FlowType::Sequential),
    op("sub", 0x00, 0x59, OperandType::None, FlowType::Sequential),
    op("mul", 0x00, 0x5A, OperandType::None, FlowType::Sequential),
    op("div", 0x00, 0x5B, OperandType::None, FlowType::Sequential),
    op("div.un", 0x00, 0x5C, OperandType::None, FlowType::Sequential),
    op("rem", 0x00, 0x5D, OperandType::None, FlowType::Sequential),
    op("rem.un", 0x00, 0x5E, OperandType::None, FlowType::Sequential),
    op("and", 0x00, 0x5F, OperandType::None, FlowType::Sequential),
    op("or", 0x00, 0x60, OperandType::None, FlowType::Sequential),
    op("xor", 0x00, 0x61, OperandType::None, FlowType::Sequential),
    op("shl", 0x00, 0x62, OperandType::None, FlowType::Sequential),
    op("shr", 0x00, 0x63, OperandType::None, FlowType::Sequential),
    op("shr.un", 0x00, 0x64, OperandType::None, FlowType::Sequential),
    op("neg", 0x00, 0x65, OperandType::None, FlowType::Sequential),
    op("not", 0x00, 0x66, OperandType::None, FlowType::Sequential),
    op("conv.i1", 0x00, 0x67, OperandType::None, FlowType::Sequential),
    op("conv.i2", 0x00, 0x68, OperandType::None, FlowType::Sequential),
    op("conv.i4", 0x00, 0x69, OperandType::None, FlowType::Sequential),
    op("conv.i8", 0x00, 0x6A, OperandType::None, FlowType::Sequential),
    op("conv.r4", 0x00, 0x6B, OperandType::None, FlowType::Sequential),
    op("conv.r8", 0x00, 0x6C, OperandType::None, FlowType::Sequential),
    op("conv.u4", 0x00, 0x6D, OperandType::None, FlowType::Sequential),
    op("conv.u8", 0x00, 0x6E, OperandType::None, FlowType::Sequential),
    op("callvirt", 0x00, 0x6F, OperandType::Token, FlowType::Call),
    op("cpobj", 0x00, 0x70, OperandType::Token, FlowType::Sequential),
    op("ldobj", 0x00, 0x71, OperandType::Token, FlowType::Sequential),
    op("ldstr", 0x00, 0x72, OperandType::Token, FlowType::Sequential),
    op("newobj", 0x00, 0x73, OperandType::Token, FlowType::Call),
    op("castclass", 0x00, 0x74, OperandType::Token, FlowType::Sequential),
    op("isinst", 0x00, 0x75, OperandType::Token, FlowType::Sequential),
    op("conv.r.un", 0x00, 0x76, OperandType::None, FlowType::Sequential),
    reserved(0x00, 0x77),
    reserved(0x00, 0x78),
    op("unbox", 0x00, 0x79, OperandType::Token, FlowType::Sequential),
    op("throw", 0x00, 0x7A, OperandType::None, FlowType::Throw),
    op("ldfld", 0x00, 0x7B, OperandType::Token, FlowType::Sequential),
    op("ldflda", 0x00, 0x7C, OperandType::Token, FlowType::Sequential),
    op("stfld", 0x00, 0x7D, OperandType::Token, FlowType::Sequential),
    op("ldsfld", 0x00, 0x7E, OperandType::Token, FlowType::Sequential),
    op("ldsflda", 0x00, 0x7F, OperandType::Token, FlowType::Sequential),
    op("stsfld", 0x00, 0x80, OperandType::Token, FlowType::Sequential),
    op("stobj", 0x00, 0x81, OperandType::Token, FlowType::Sequential),
    op("conv.ovf.i1.un", 0x00, 0x82, OperandType::None, FlowType::Sequential),
    op("conv.ovf.i2.un", 0x00, 0x83, OperandType::None, FlowType::Sequential),
    op("conv.ovf.i4.un", 0x00, 0x84, OperandType::None, FlowType::Sequential),
    op("conv.ovf.i8.un", 0x00, 0x85, OperandType::None, FlowType::Sequential),
    op("conv.ovf.u1.un", 0x00, 0x86, OperandType::None, FlowType::Sequential),
    op("conv.ovf.u2.un", 0x00, 0x87, OperandType::None, FlowType::Sequential),
    op("conv.ovf.u4.un", 0x00, 0x88, OperandType::None, FlowType::Sequential),
    op("conv.ovf.u8.un", 0x00, 0x89, OperandType::None, FlowType::Sequential),
    op("conv.ovf.i.un", 0x00, 0x8A, OperandType::None, FlowType::Sequential),
    op("conv.ovf.u.un", 0x00, 0x8B, OperandType::None, FlowType::Sequential),
    op("box", 0x00, 0x8C, OperandType::Token, FlowType::Sequential),
    op("newarr", 0x00, 0x8D, OperandType::Token, FlowType::Sequential),
    op("ldlen", 0x00, 0x8E, OperandType::None, FlowType::Sequential),
    op("ldelema", 0x00, 0x8F, OperandType::Token, FlowType::Sequential),
    op("ldelem.i1", 0x00, 0x90, OperandType::None, FlowType::Sequential),
    op("ldelem.u1", 0x00, 0x91, OperandType::None, FlowType::Sequential),
    op("ldelem.i2", 0x00, 0x92, OperandType::None, FlowType::Sequential),
    op("ldelem.u2", 0x00, 0x93, OperandType::None, FlowType::Sequential),
    op("ldelem.i4", 0x00, 0x94, OperandType::None, FlowType::Sequential),
    op("ldelem.u4", 0x00, 0x95, OperandType::None, FlowType::Sequential),
    op("ldelem.i8", 0x00, 0x96, OperandType::None, FlowType::Sequential),
    op("ldelem.i", 0x00, 0x97, OperandType::None, FlowType::Sequential),
    op("ldelem.r4", 0x00, 0x98, OperandType::None, FlowType::Sequential),
    op("ldelem.r8", 0x00, 0x99, OperandType::None, FlowType::Sequential),
    op("ldelem.ref", 0x00, 0x9A, OperandType::None, FlowType::Sequential),
    op("stelem.i", 0x00, 0x9B, OperandType::None, FlowType::Sequential),
    op("stelem.i1", 0x00, 0x9C, OperandType::None, FlowType::Sequential),
    op("stelem.i2", 0x00, 0x9D, OperandType::None, FlowType::Sequential),
    op("stelem.i4", 0x00, 0x9E, OperandType::None, FlowType::Sequential),
    op("stelem.i8", 0x00, 0x9F, OperandType::None, FlowType::Sequential),
    op("stelem.r4", 0x00, 0xA0, OperandType::None, FlowType::Sequential),
    op("stelem.r8", 0x00, 0xA1, OperandType::None, FlowType::Sequential),
    op("stelem.ref", 0x00, 0xA2, OperandType::None, FlowType::Sequential),
    op("ldelem", 0x00, 0xA3, OperandType::Token, FlowType::Sequential),
    op("stelem", 0x00, 0xA4, OperandType::Token, FlowType::Sequential),
    op("unbox.any", 0x00, 0xA5, OperandType::Token, FlowType::Sequential),
    reserved(0x00, 0xA6),
    reserved(0x00, 0xA7),
    reserved(0x00, 0xA8),
    reserved(0x00, 0xA9),
    reserved(0x00, 0xAA),
    reserved(0x00, 0xAB),
    reserved(0x00, 0xAC),
    reserved(0x00, 0xAD),
    reserved(0x00, 0xAE),
    reserved(0x00, 0xAF),
    reserved(0x00, 0xB0),
    reserved(0x00, 0xB1),
    reserved(0x00, 0xB2),
    op("conv.ovf.i1", 0x00, 0xB3, OperandType::None, FlowType::Sequential),
    op("conv.ovf.u1", 0x00, 0xB4, OperandType::None, FlowType::Sequential),
    op("conv.ovf.i2", 0x00, 0xB5, OperandType::None, FlowType::Sequential),
    op("conv.ovf.u2", 0x00, 0xB6, OperandType::None, FlowType::Sequential),
    op("conv.ovf.i4", 0x00, 0xB7, OperandType::None, FlowType::Sequential),
    op("conv.ovf.u4", 0x00, 0xB8, OperandType::None, FlowType::Sequential),
    op("conv.ovf.i8", 0x00, 0xB9, OperandType::None, FlowType::Sequential),
    op("conv.ovf.u8", 0x00, 0xBA, OperandType::None, FlowType::Sequential),
    reserved(0x00, 0xBB),
    reserved(0x00, 0xBC),
    reserved(0x00, 0xBD),
    reserved(0x00, 0xBE),
    reserved(0x00, 0xBF),
    reserved(0x00, 0xC0),
    reserved(0x00, 0xC1),
    op("refanyval", 0x00, 0xC2, OperandType::Token, FlowType::Sequential),
    op("ckfinite", 0x00, 0xC3, OperandType::None, FlowType::Sequential),
    reserved(0x00, 0xC4),
    reserved(0x00, 0xC5),
    op("mkrefany", 0x00, 0xC6, OperandType::Token, FlowType::Sequential),
    reserved(0x00, 0xC7),
    reserved(0x00, 0xC8),
    reserved(0x00, 0xC9),
    reserved(0x00, 0xCA),
    reserved(0x00, 0xCB),
    reserved(0x00, 0xCC),
    reserved(0x00, 0xCD),
    reserved(0x00, 0xCE),
    reserved(0x00, 0xCF),
    op("ldtoken", 0x00, 0xD0, OperandType::Token, FlowType::Sequential),
    op("conv.u2", 0x00, 0xD1, OperandType::None, FlowType::Sequential),
    op("conv.u1", 0x00, 0xD2, OperandType::None, FlowType::Sequential),
    op("conv.i", 0x00, 0xD3, OperandType::None, FlowType::Sequential),
    op("conv.ovf.i", 0x00, 0xD4, OperandType::None, FlowType::Sequential),
    op("conv.ovf.u", 0x00, 0xD5, OperandType::None, FlowType::Sequential),
    op("add.ovf", 0x00, 0xD6, OperandType::None, FlowType::Sequential),
    op("add.ovf.un", 0x00, 0xD7, OperandType::None, FlowType::Sequential),
    op("mul.ovf", 0x00, 0xD8, OperandType::None, FlowType::Sequential),
    op("mul.ovf.un", 0x00, 0xD9, OperandType::None, FlowType::Sequential),
    op("sub.ovf", 0x00, 0xDA, OperandType::None, FlowType::Sequential),
    op("sub.ovf.un", 0x00, 0xDB, OperandType::None, FlowType::Sequential),
    op("endfinally", 0x00, 0xDC, OperandType::None, FlowType::EndFinally),
    op("leave", 0x00, 0xDD, OperandType::Int32, FlowType::Leave),
    op("leave.s", 0x00, 0xDE, OperandType::Int8, FlowType::Leave),
    op("stind.i", 0x00, 0xDF, OperandType::None, FlowType::Sequential),
    op("conv.u", 0x00, 0xE0, OperandType::None, FlowType::Sequential),
];

/// Two-byte opcodes, indexed by the byte following the `0xFE` prefix (`0x00` - `0x1E`).
pub static INSTRUCTIONS_FE: [OpCode; 31] = [
    op("arglist", 0xFE, 0x00, OperandType::None, FlowType::Sequential),
    op("ceq", 0xFE, 0x01, OperandType::None, FlowType::Sequential),
    op("cgt", 0xFE, 0x02, OperandType::None, FlowType::Sequential),
    op("cgt.un", 0xFE, 0x03, OperandType::None, FlowType::Sequential),
    op("clt", 0xFE, 0x04, OperandType::None, FlowType::Sequential),
    op("clt.un", 0xFE, 0x05, OperandType::None, FlowType::Sequential),
    op("ldftn", 0xFE, 0x06, OperandType::Token, FlowType::Sequential),
    op("ldvirtftn", 0xFE, 0x07, OperandType::Token, FlowType::Sequential),
    reserved(0xFE, 0x08),
    op("ldarg", 0xFE, 0x09, OperandType::UInt16, FlowType::Sequential),
    op("ldarga", 0xFE, 0x0A, OperandType::UInt16, FlowType::Sequential),
    op("starg", 0xFE, 0x0B, OperandType::UInt16, FlowType::Sequential),
    op("ldloc", 0xFE, 0x0C, OperandType::UInt16, FlowType::Sequential),
    op("ldloca", 0xFE, 0x0D, OperandType::UInt16, FlowType::Sequential),
    op("stloc", 0xFE, 0x0E, OperandType::UInt16, FlowType::Sequential),
    op("localloc", 0xFE, 0x0F, OperandType::None, FlowType::Sequential),
    reserved(0xFE, 0x10),
    op("endfilter", 0xFE, 0x11, OperandType::None, FlowType::EndFinally),
    op("unaligned.", 0xFE, 0x12, OperandType::UInt8, FlowType::Sequential),
    op("volatile.", 0xFE, 0x13, OperandType::None, FlowType::Sequential),
    op("tail.", 0xFE, 0x14, OperandType::None, FlowType::Sequential),
    op("initobj", 0xFE, 0x15, OperandType::Token, FlowType::Sequential),
    op("constrained.", 0xFE, 0x16, OperandType::Token, FlowType::Sequential),
    op("cpblk", 0xFE, 0x17, OperandType::None, FlowType::Sequential),
    op("initblk", 0xFE, 0x18, OperandType::None, FlowType::Sequential),
    op("no.", 0xFE, 0x19, OperandType::UInt8, FlowType::Sequential),
    op("rethrow", 0xFE, 0x1A, OperandType::None, FlowType::Throw),
    reserved(0xFE, 0x1B),
    op("sizeof", 0xFE, 0x1C, OperandType::Token, FlowType::Sequential),
    op("refanytype", 0xFE, 0x1D, OperandType::None, FlowType::Sequential),
    op("readonly.", 0xFE, 0x1E, OperandType::None, FlowType::Sequential),
];

/// Look up the descriptor for an opcode. Returns `None` for reserved or undefined values.
#[must_use]
pub fn lookup(prefix: u8, code: u8) -> Option<&'static OpCode> {
    let opcode = match prefix {
        0 => INSTRUCTIONS.get(code as usize)?,
        opcodes::FE_PREFIX => INSTRUCTIONS_FE.get(code as usize)?,
        _ => return None,
    };

    if opcode.is_reserved() {
        None
    } else {
        Some(opcode)
    }
}

/// Map a short-form branch to its long-form counterpart.
///
/// `br.s` becomes `br`, `leave.s` becomes `leave` and so on for all thirteen short branches.
/// Every other opcode maps to itself.
#[must_use]
pub fn long_form_branch(opcode: &'static OpCode) -> &'static OpCode {
    if opcode.prefix != 0 {
        return opcode;
    }

    match opcode.code {
        opcodes::BR_S..=opcodes::BLT_UN_S => {
            &INSTRUCTIONS[(opcode.code - opcodes::BR_S + opcodes::BR) as usize]
        }
        opcodes::LEAVE_S => &INSTRUCTIONS[opcodes::LEAVE as usize],
        _ => opcode,
    }
}

/// Size information for the instruction found at a position in a code buffer.
#[derive(Debug, Clone, Copy)]
pub struct OpcodeDescriptor {
    /// The classified opcode
    pub opcode: &'static OpCode,
    /// Bytes used by the opcode (1 or 2)
    pub instruction_size: usize,
    /// Bytes used by the inline operand. For `switch` this is `4 + 4 * arm_count`
    pub operand_size: usize,
    /// `instruction_size + operand_size`
    pub total_size: usize,
}

impl OpcodeDescriptor {
    /// Classify the instruction starting at `position` in `data`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOpcode`] for reserved or undefined opcodes and
    /// [`crate::Error::OutOfBounds`] when the prefix, the switch arm count or the operand is
    /// truncated.
    pub fn decode(data: &[u8], position: usize) -> Result<Self> {
        let Some(&first) = data.get(position) else {
            return Err(OutOfBounds);
        };

        let opcode = if first == opcodes::FE_PREFIX {
            let Some(&second) = data.get(position + 1) else {
                return Err(OutOfBounds);
            };
            lookup(opcodes::FE_PREFIX, second).ok_or(InvalidOpcode {
                offset: position,
                opcode: (u16::from(opcodes::FE_PREFIX) << 8) | u16::from(second),
            })?
        } else {
            lookup(0, first).ok_or(InvalidOpcode {
                offset: position,
                opcode: u16::from(first),
            })?
        };

        let instruction_size = opcode.instruction_size();
        let operand_size = match opcode.operand.size() {
            Some(size) => size,
            None => {
                let mut parser = Parser::new(data);
                parser.seek(position + instruction_size)?;
                let arms = parser.read_le::<u32>()? as usize;
                arms.checked_mul(4)
                    .and_then(|size| size.checked_add(4))
                    .ok_or(OutOfBounds)?
            }
        };

        let total_size = instruction_size + operand_size;
        match position.checked_add(total_size) {
            Some(end) if end <= data.len() => Ok(OpcodeDescriptor {
                opcode,
                instruction_size,
                operand_size,
                total_size,
            }),
            _ => Err(OutOfBounds),
        }
    }
}

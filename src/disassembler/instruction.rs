//! Decoded instruction model used by the rewriter.
//!
//! Instructions live in an arena owned by [`InstructionMap`] and refer to each other through
//! [`InstructionId`] indices. The map keeps the arena ordered by the *original* offset of every
//! instruction, so after the code has been re-emitted at new offsets it can still answer "where
//! did the instruction that used to start at offset X end up".
//!
//! Writing is two-phase. [`InstructionMap::emit`] appends every instruction to a fresh buffer,
//! copying non-branch operands verbatim from the original code and leaving placeholder bytes for
//! jump distances. Once all final offsets are known, [`InstructionMap::patch_branches`] fills in
//! the distances and marks every instruction whose jump can not be encoded as invalid.
//!
//! # Example
//!
//! ```rust
//! use cilwrap::disassembler::decode_code;
//!
//! // br.s +1, nop, ret
//! let code = [0x2B, 0x01, 0x00, 0x2A];
//! let mut map = decode_code(&code)?;
//! assert_eq!(map.len(), 3);
//!
//! let mut out = map.emit(&code, code.len())?;
//! map.patch_branches(&mut out);
//! assert!(map.all_valid());
//! assert_eq!(out, code);
//! # Ok::<(), cilwrap::Error>(())
//! ```

use std::{collections::BTreeMap, fmt};

use crate::{
    disassembler::{long_form_branch, opcodes, OpCode, OperandType, INSTRUCTIONS},
    io::{push_le, read_le_at, write_le_at},
    Error::OutOfBounds,
    Result,
};

/// Index of an instruction inside an [`InstructionMap`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstructionId(pub usize);

/// What an instruction does, as far as the rewriter is concerned.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Any instruction without a relative jump operand. Operands are copied verbatim
    Sequential(&'static OpCode),
    /// `ret`
    Return,
    /// `nop`, produced when the final `ret` is neutralized
    Nop,
    /// Single relative jump (`br`, conditional branches, `leave`)
    Branch {
        /// Short or long form branch opcode
        opcode: &'static OpCode,
        /// The instruction this branch jumps to
        target: Option<InstructionId>,
        /// Original absolute target offset, as decoded
        target_offset: Option<u32>,
    },
    /// `switch`, one target per arm
    Switch {
        /// Arm targets in encoding order
        targets: Vec<Option<InstructionId>>,
    },
}

/// A single decoded instruction.
#[derive(Debug, Clone)]
pub struct Instruction {
    /// What this instruction does
    pub operation: Operation,
    /// Current offset. Equal to `original_offset` until the instruction has been emitted
    pub offset: u32,
    /// Offset in the original code, where verbatim operand bytes are read from
    pub original_offset: u32,
    valid: bool,
}

impl Instruction {
    /// Create a new instruction located at `original_offset` in the source code.
    #[must_use]
    pub fn new(operation: Operation, original_offset: u32) -> Self {
        Instruction {
            operation,
            offset: original_offset,
            original_offset,
            valid: true,
        }
    }

    /// Create an unconditional branch to `target` that takes the place of the instruction at
    /// `original_offset`.
    #[must_use]
    pub fn branch(opcode: &'static OpCode, target: InstructionId, original_offset: u32) -> Self {
        Instruction::new(
            Operation::Branch {
                opcode,
                target: Some(target),
                target_offset: None,
            },
            original_offset,
        )
    }

    /// Returns `false` once a target could not be resolved or a jump could not be encoded.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Mark this instruction as invalid.
    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    /// The opcode this instruction is encoded with.
    #[must_use]
    pub fn opcode(&self) -> &'static OpCode {
        match &self.operation {
            Operation::Sequential(opcode) | Operation::Branch { opcode, .. } => *opcode,
            Operation::Return => &INSTRUCTIONS[opcodes::RET as usize],
            Operation::Nop => &INSTRUCTIONS[opcodes::NOP as usize],
            Operation::Switch { .. } => &INSTRUCTIONS[opcodes::SWITCH as usize],
        }
    }

    /// Encoded size in bytes, for the current operation.
    #[must_use]
    pub fn size(&self) -> usize {
        match &self.operation {
            Operation::Return | Operation::Nop => 1,
            Operation::Sequential(opcode) | Operation::Branch { opcode, .. } => {
                opcode.instruction_size() + opcode.operand.size().unwrap_or(0)
            }
            Operation::Switch { targets } => 1 + 4 + 4 * targets.len(),
        }
    }

    /// Returns `true` for `ret`.
    #[must_use]
    pub fn is_return(&self) -> bool {
        matches!(self.operation, Operation::Return)
    }

    /// Returns `true` for a branch with a one-byte distance operand.
    #[must_use]
    pub fn is_short_branch(&self) -> bool {
        matches!(&self.operation, Operation::Branch { opcode, .. } if opcode.is_short_branch())
    }

    /// Convert a short branch to its long form. Returns `true` if the encoding changed.
    pub fn expand_branch(&mut self) -> bool {
        if let Operation::Branch { opcode, .. } = &mut self.operation {
            let long = long_form_branch(*opcode);
            if !std::ptr::eq(long, *opcode) {
                *opcode = long;
                return true;
            }
        }
        false
    }

    /// All instructions this one jumps to.
    #[must_use]
    pub fn targets(&self) -> Vec<Option<InstructionId>> {
        match &self.operation {
            Operation::Branch { target, .. } => vec![*target],
            Operation::Switch { targets } => targets.clone(),
            _ => Vec::new(),
        }
    }

    /// Read the raw jump operands from `code` and look up the instructions they land on.
    ///
    /// Distances are measured from the end of the instruction (for `switch`, the end of the
    /// whole arm table). A target that is negative or does not start an instruction leaves the
    /// slot empty and marks this instruction invalid.
    pub fn resolve_targets(&mut self, code: &[u8], offsets: &BTreeMap<u32, InstructionId>) {
        let start = i64::from(self.original_offset);
        let end = start + self.size() as i64;

        let lookup = |delta: i64| -> (Option<u32>, Option<InstructionId>) {
            match u32::try_from(end + delta) {
                Ok(target) => (Some(target), offsets.get(&target).copied()),
                Err(_) => (None, None),
            }
        };

        let mut resolved = true;
        match &mut self.operation {
            Operation::Branch {
                opcode,
                target,
                target_offset,
            } => {
                let mut cursor = self.original_offset as usize + opcode.instruction_size();
                let delta = match opcode.operand {
                    OperandType::Int8 => read_le_at::<i8>(code, &mut cursor).map(i64::from),
                    OperandType::Int32 => read_le_at::<i32>(code, &mut cursor).map(i64::from),
                    _ => Err(OutOfBounds),
                };

                match delta {
                    Ok(delta) => {
                        (*target_offset, *target) = lookup(delta);
                        resolved = target.is_some();
                    }
                    Err(_) => resolved = false,
                }
            }
            Operation::Switch { targets } => {
                let mut cursor = self.original_offset as usize + 5;
                for slot in targets.iter_mut() {
                    match read_le_at::<i32>(code, &mut cursor) {
                        Ok(delta) => {
                            *slot = lookup(i64::from(delta)).1;
                            resolved &= slot.is_some();
                        }
                        Err(_) => resolved = false,
                    }
                }
            }
            _ => {}
        }

        if !resolved {
            self.valid = false;
        }
    }

    /// Repoint every jump that lands on `old` to `new`.
    pub fn on_instruction_change(&mut self, old: InstructionId, new: InstructionId) {
        match &mut self.operation {
            Operation::Branch { target, .. } => {
                if *target == Some(old) {
                    *target = Some(new);
                }
            }
            Operation::Switch { targets } => {
                for slot in targets.iter_mut().filter(|slot| **slot == Some(old)) {
                    *slot = Some(new);
                }
            }
            _ => {}
        }
    }

    /// Append this instruction to `out` and record its new offset.
    ///
    /// Operands of sequential instructions are copied from `original_code`. Jump distances are
    /// written as [`opcodes::BRANCH_PLACEHOLDER`] bytes and filled in by [`Self::write_branches`].
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the operand bytes are not present in
    /// `original_code` or the output grows past `u32::MAX`.
    pub fn write(&mut self, original_code: &[u8], out: &mut Vec<u8>) -> Result<()> {
        self.offset = u32::try_from(out.len()).map_err(|_| OutOfBounds)?;

        match &self.operation {
            Operation::Sequential(opcode) => {
                opcode.write(out);

                let start = self.original_offset as usize + opcode.instruction_size();
                let size = opcode.operand.size().ok_or(OutOfBounds)?;
                let operand = original_code.get(start..start + size).ok_or(OutOfBounds)?;
                out.extend_from_slice(operand);
            }
            Operation::Return => out.push(opcodes::RET),
            Operation::Nop => out.push(opcodes::NOP),
            Operation::Branch { opcode, .. } => {
                opcode.write(out);

                let size = opcode.operand.size().unwrap_or(0);
                out.resize(out.len() + size, opcodes::BRANCH_PLACEHOLDER);
            }
            Operation::Switch { targets } => {
                out.push(opcodes::SWITCH);
                push_le(out, u32::try_from(targets.len()).map_err(|_| OutOfBounds)?);
                out.resize(out.len() + 4 * targets.len(), opcodes::BRANCH_PLACEHOLDER);
            }
        }

        Ok(())
    }

    /// Patch the jump distances of this instruction into `out`.
    ///
    /// `arena` supplies the final offsets of the targets. Returns `false`, leaving the
    /// placeholder in place, if a target is missing or invalid, the placeholder was already
    /// overwritten, or the distance does not fit the operand.
    #[must_use]
    pub fn write_branches(&self, out: &mut [u8], arena: &[Instruction]) -> bool {
        let end = i64::from(self.offset) + self.size() as i64;
        let distance = |target: &Option<InstructionId>| -> Option<i64> {
            let target = arena.get(target.as_ref()?.0)?;
            if !target.valid {
                return None;
            }
            Some(i64::from(target.offset) - end)
        };

        match &self.operation {
            Operation::Branch { opcode, target, .. } => {
                let Some(delta) = distance(target) else {
                    return false;
                };

                let position = self.offset as usize + opcode.instruction_size();
                match opcode.operand {
                    OperandType::Int8 => {
                        let Ok(delta) = i8::try_from(delta) else {
                            return false;
                        };
                        match out.get_mut(position) {
                            Some(byte) if *byte == opcodes::BRANCH_PLACEHOLDER => {
                                *byte = delta.to_le_bytes()[0];
                                true
                            }
                            _ => false,
                        }
                    }
                    OperandType::Int32 => {
                        let Ok(delta) = i32::try_from(delta) else {
                            return false;
                        };
                        patch_i32(out, position, delta)
                    }
                    _ => false,
                }
            }
            Operation::Switch { targets } => {
                let mut position = self.offset as usize + 5;
                for target in targets {
                    let Some(delta) = distance(target).and_then(|d| i32::try_from(d).ok()) else {
                        return false;
                    };
                    if !patch_i32(out, position, delta) {
                        return false;
                    }
                    position += 4;
                }
                true
            }
            _ => true,
        }
    }
}

fn patch_i32(out: &mut [u8], position: usize, value: i32) -> bool {
    let placeholder = [opcodes::BRANCH_PLACEHOLDER; 4];
    if out.get(position..position + 4) != Some(&placeholder[..]) {
        return false;
    }

    let mut cursor = position;
    write_le_at(out, &mut cursor, value).is_ok()
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let marker = if self.valid { "" } else { "*" };
        write!(
            f,
            "{}[0x{:04X}] : {}",
            marker,
            self.offset,
            self.opcode().mnemonic
        )?;

        match &self.operation {
            Operation::Branch {
                target_offset: Some(target),
                ..
            } => write!(f, " -> 0x{:04X}", target),
            Operation::Branch { target: None, .. } => write!(f, " -> ?"),
            Operation::Switch { targets } => write!(f, " ({} arms)", targets.len()),
            _ => Ok(()),
        }
    }
}

/// Arena of decoded instructions, ordered by their original offset.
#[derive(Debug, Default)]
pub struct InstructionMap {
    arena: Vec<Instruction>,
    offsets: BTreeMap<u32, InstructionId>,
}

impl InstructionMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        InstructionMap::default()
    }

    /// Create an empty map with room for `capacity` instructions.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        InstructionMap {
            arena: Vec::with_capacity(capacity),
            offsets: BTreeMap::new(),
        }
    }

    /// Add an instruction, keyed by its original offset.
    pub fn insert(&mut self, instruction: Instruction) -> InstructionId {
        let id = InstructionId(self.arena.len());
        self.offsets.insert(instruction.original_offset, id);
        self.arena.push(instruction);
        id
    }

    /// Number of live instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Returns `true` if there are no live instructions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Look up an instruction by id.
    #[must_use]
    pub fn get(&self, id: InstructionId) -> Option<&Instruction> {
        self.arena.get(id.0)
    }

    /// Look up an instruction by id, mutably.
    pub fn get_mut(&mut self, id: InstructionId) -> Option<&mut Instruction> {
        self.arena.get_mut(id.0)
    }

    /// Id of the live instruction that started at `original_offset`.
    #[must_use]
    pub fn id_at(&self, original_offset: u32) -> Option<InstructionId> {
        self.offsets.get(&original_offset).copied()
    }

    /// Id of the live instruction with the highest original offset.
    #[must_use]
    pub fn last_id(&self) -> Option<InstructionId> {
        self.offsets.values().next_back().copied()
    }

    /// Ids of all live instructions, in original order.
    #[must_use]
    pub fn ids(&self) -> Vec<InstructionId> {
        self.offsets.values().copied().collect()
    }

    /// Live instructions, in original order.
    pub fn iter(&self) -> impl Iterator<Item = &Instruction> {
        self.offsets.values().map(move |id| &self.arena[id.0])
    }

    /// Replace the instruction that started at `original_offset` and repoint every jump that
    /// landed on it. The old instruction stays in the arena but is no longer emitted.
    ///
    /// Returns the id of the new instruction, or `None` if no instruction starts there.
    pub fn replace(
        &mut self,
        original_offset: u32,
        instruction: Instruction,
    ) -> Option<InstructionId> {
        let old = self.id_at(original_offset)?;
        let new = InstructionId(self.arena.len());
        self.arena.push(instruction);
        self.offsets.insert(original_offset, new);

        for existing in &mut self.arena {
            existing.on_instruction_change(old, new);
        }

        Some(new)
    }

    /// Resolve the jump targets of every live instruction against the original offsets.
    pub fn resolve_targets(&mut self, code: &[u8]) {
        for id in self.offsets.values() {
            self.arena[id.0].resolve_targets(code, &self.offsets);
        }
    }

    /// Write all live instructions into a new buffer, recording their final offsets.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if an operand can not be copied from `code`.
    pub fn emit(&mut self, code: &[u8], capacity: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(capacity);
        for id in self.offsets.values() {
            self.arena[id.0].write(code, &mut out)?;
        }
        Ok(out)
    }

    /// Fill in the jump distances of every emitted instruction.
    ///
    /// Instructions whose distances can not be written are marked invalid, and so is every
    /// instruction that jumps to an invalid one.
    pub fn patch_branches(&mut self, out: &mut [u8]) {
        let mut failed = Vec::new();
        for id in self.offsets.values() {
            if !self.arena[id.0].write_branches(out, &self.arena) {
                failed.push(*id);
            }
        }
        for id in failed {
            self.arena[id.0].invalidate();
        }

        loop {
            let tainted: Vec<InstructionId> = self
                .iter_ids_with(|instruction, arena| {
                    instruction.valid
                        && instruction
                            .targets()
                            .iter()
                            .flatten()
                            .any(|target| !arena[target.0].valid)
                });
            if tainted.is_empty() {
                break;
            }
            for id in tainted {
                self.arena[id.0].invalidate();
            }
        }
    }

    fn iter_ids_with<F>(&self, predicate: F) -> Vec<InstructionId>
    where
        F: Fn(&Instruction, &[Instruction]) -> bool,
    {
        self.offsets
            .values()
            .filter(|id| predicate(&self.arena[id.0], &self.arena))
            .copied()
            .collect()
    }

    /// The offset that the instruction originally at `original_offset` was emitted at.
    #[must_use]
    pub fn final_offset(&self, original_offset: u32) -> Option<u32> {
        self.id_at(original_offset).map(|id| self.arena[id.0].offset)
    }

    /// Number of live instructions marked invalid.
    #[must_use]
    pub fn invalid_count(&self) -> usize {
        self.iter().filter(|instruction| !instruction.valid).count()
    }

    /// Returns `true` if every live instruction is valid.
    #[must_use]
    pub fn all_valid(&self) -> bool {
        self.iter().all(Instruction::is_valid)
    }

    /// Log every live instruction at trace level.
    pub fn dump(&self) {
        if log::log_enabled!(log::Level::Trace) {
            for instruction in self.iter() {
                log::trace!("{}", instruction);
            }
        }
    }
}

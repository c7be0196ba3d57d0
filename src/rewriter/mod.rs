//! Single-exit rewriting of CIL method bodies.
//!
//! Instrumentation wraps a method in code that has to run on every way out of it. That is only
//! practical when there is exactly one way out, so [`BodyRewriter`] turns a method with several
//! `ret` instructions into one that ends in a single exit point:
//!
//! - the final `ret` becomes a `nop`, leaving the end of the code free for appended code
//! - every other `ret` becomes an unconditional branch to that final instruction
//! - when the body is large enough that short branches might fall out of range, every branch in
//!   the method is widened to its long form
//! - the exception handling table is moved to the new instruction offsets
//!
//! The result is decoded again from scratch before it is returned. Any failure along the way
//! leaves the caller with an [`crate::Error`] and no output, so the method can simply be skipped.
//!
//! # Example
//!
//! ```rust
//! use cilwrap::{
//!     metadata::method::{BodyScanner, HeaderInfoProvider},
//!     rewriter::{BodyRewriter, RewriterConfig},
//! };
//!
//! // tiny header; brtrue.s +1, ret, ret
//! let body = [0x12, 0x2D, 0x01, 0x2A, 0x2A];
//! let info = BodyScanner.header_info(&body)?;
//! let rewritten = BodyRewriter::new(&body, &info, &RewriterConfig::default()).rewrite()?;
//!
//! // fat header, then: brtrue.s +2, br.s +0, nop
//! assert_eq!(&rewritten[12..], &[0x2D, 0x02, 0x2B, 0x00, 0x00]);
//! # Ok::<(), cilwrap::Error>(())
//! ```

mod config;

pub use config::RewriterConfig;

use crate::{
    disassembler::{decode_code, opcodes, Instruction, InstructionMap, Operation, INSTRUCTIONS},
    metadata::method::{
        write_fat_header, write_fat_section, ExceptionHandler, HeaderInfo, MethodBody,
        MethodBodyFlags, FAT_CLAUSE_SIZE, FAT_HEADER_SIZE, SECTION_HEADER_SIZE,
    },
    Error::{Empty, InvalidInstructions, OutOfBounds, ValidationFailed},
    Result,
};

/// Header fields carried over from the original body.
struct OriginalHeader {
    flags: MethodBodyFlags,
    max_stack: u16,
    local_var_sig_token: u32,
    exception_handlers: Vec<ExceptionHandler>,
}

/// Rewrites one method body into single-exit form.
///
/// The rewriter borrows its inputs and holds no other state, so distinct bodies can be
/// rewritten concurrently from different threads.
pub struct BodyRewriter<'a> {
    body: &'a [u8],
    info: &'a HeaderInfo,
    config: &'a RewriterConfig,
}

impl<'a> BodyRewriter<'a> {
    /// Create a rewriter for `body`, described by `info`.
    #[must_use]
    pub fn new(body: &'a [u8], info: &'a HeaderInfo, config: &'a RewriterConfig) -> Self {
        BodyRewriter { body, info, config }
    }

    /// Produce the rewritten body.
    ///
    /// - Without `ret` instructions the body is returned unchanged.
    /// - With a single `ret`, which must be the last code byte, that byte becomes a `nop`.
    ///   Nothing else moves.
    /// - Otherwise the body is fully rewritten and re-emitted with a fat header.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the code does not end in `ret` or the header does
    /// not describe the body, a decoding error if the code can not be decoded,
    /// [`crate::Error::InvalidInstructions`] if jumps can not be encoded, and
    /// [`crate::Error::ValidationFailed`] if the output fails the self-check.
    pub fn rewrite(&self) -> Result<Vec<u8>> {
        if self.info.return_count == 0 {
            log::trace!("No returns, leaving body unchanged");
            return Ok(self.body.to_vec());
        }

        let code = self.code()?;
        if code.last() != Some(&opcodes::RET) {
            return Err(malformed_error!(
                "Code of {} bytes does not end in ret",
                code.len()
            ));
        }

        if self.info.return_count == 1 {
            let end = self.info.code_end()?;
            let mut out = self.body.to_vec();
            out[end - 1] = opcodes::NOP;
            return Ok(out);
        }

        self.rewrite_returns(code)
    }

    /// Like [`Self::rewrite`], but logs the failure and returns `None` instead of an error.
    #[must_use]
    pub fn try_rewrite(&self) -> Option<Vec<u8>> {
        match self.rewrite() {
            Ok(body) => Some(body),
            Err(error) => {
                log::warn!("Skipping method body: {}", error);
                None
            }
        }
    }

    fn code(&self) -> Result<&'a [u8]> {
        if self.info.code_size == 0 {
            return Err(Empty);
        }

        let end = self.info.code_end()?;
        self.body
            .get(self.info.code_offset..end)
            .ok_or_else(|| {
                malformed_error!(
                    "Header places {} bytes of code at {} in a body of {} bytes",
                    self.info.code_size,
                    self.info.code_offset,
                    self.body.len()
                )
            })
    }

    fn original_header(&self) -> Result<OriginalHeader> {
        let parsed = MethodBody::from(self.body)?;
        if parsed.is_fat == self.info.is_tiny
            || parsed.size_header != self.info.code_offset
            || parsed.size_code != self.info.code_size
        {
            return Err(malformed_error!(
                "Header describes {} code at {}..{}, expected {} code at {}..{}",
                header_format(parsed.is_fat),
                parsed.size_header,
                parsed.size(),
                header_format(!self.info.is_tiny),
                self.info.code_offset,
                self.info.code_end()?
            ));
        }

        if !parsed.is_fat {
            return Ok(OriginalHeader {
                flags: MethodBodyFlags::empty(),
                max_stack: self.config.promoted_max_stack,
                local_var_sig_token: 0,
                exception_handlers: Vec::new(),
            });
        }

        Ok(OriginalHeader {
            flags: parsed.flags & MethodBodyFlags::INIT_LOCALS,
            max_stack: u16::try_from(parsed.max_stack).map_err(|_| OutOfBounds)?,
            local_var_sig_token: parsed.local_var_sig_token,
            exception_handlers: parsed.exception_handlers,
        })
    }

    fn rewrite_returns(&self, code: &[u8]) -> Result<Vec<u8>> {
        let long = self
            .config
            .uses_long_branches(code.len(), self.info.return_count);
        log::debug!(
            "Rewriting {} returns in {} bytes of code (long branches: {})",
            self.info.return_count,
            code.len(),
            long
        );

        let mut map = decode_code(code)?;

        let last = map.last_id().ok_or(Empty)?;
        match map.get_mut(last) {
            Some(instruction) if instruction.is_return() => instruction.operation = Operation::Nop,
            _ => return Err(malformed_error!("Last instruction is not ret")),
        }

        let branch = &INSTRUCTIONS[usize::from(if long { opcodes::BR } else { opcodes::BR_S })];
        let returns: Vec<u32> = map
            .iter()
            .filter(|instruction| instruction.is_return())
            .map(|instruction| instruction.original_offset)
            .collect();
        for offset in &returns {
            map.replace(*offset, Instruction::branch(branch, last, *offset));
        }

        let mut expanded = 0;
        if long {
            for id in map.ids() {
                if map.get_mut(id).is_some_and(Instruction::expand_branch) {
                    expanded += 1;
                }
            }
        }

        let growth_per_return = branch.operand.size().unwrap_or(0);
        let capacity = code.len() + returns.len() * growth_per_return + expanded * 3;
        let mut new_code = map.emit(code, capacity)?;
        map.patch_branches(&mut new_code);

        if !map.all_valid() {
            let invalid = map.invalid_count();
            log::error!("{} instructions could not be rewritten", invalid);
            map.dump();
            return Err(InvalidInstructions(invalid));
        }

        let header = self.original_header()?;
        let handlers = relocate_handlers(
            &header.exception_handlers,
            &map,
            code.len(),
            new_code.len(),
        )?;
        let output = assemble(&header, &new_code, &handlers)?;

        if self.config.verify_output {
            verify(&output, &handlers).inspect_err(|error| {
                log::error!("Rewritten body rejected: {}", error);
            })?;
        }

        log::debug!(
            "Rewrote {} bytes of code into {} ({} returns, {} widened branches)",
            code.len(),
            new_code.len(),
            returns.len(),
            expanded
        );
        Ok(output)
    }
}

fn header_format(is_fat: bool) -> &'static str {
    if is_fat {
        "fat"
    } else {
        "tiny"
    }
}

/// Move every clause to the new offsets of the instructions it referred to.
///
/// A boundary equal to the old code size refers to the end of the code and maps to the new code
/// size.
fn relocate_handlers(
    handlers: &[ExceptionHandler],
    map: &InstructionMap,
    old_size: usize,
    new_size: usize,
) -> Result<Vec<ExceptionHandler>> {
    let new_size = u32::try_from(new_size).map_err(|_| OutOfBounds)?;
    let translate = |offset: u32| {
        if offset as usize == old_size {
            Some(new_size)
        } else {
            map.final_offset(offset)
        }
    };

    handlers
        .iter()
        .map(|handler| {
            handler.relocate(translate).ok_or_else(|| {
                malformed_error!(
                    "Exception clause {:?} does not line up with instruction boundaries",
                    handler
                )
            })
        })
        .collect()
}

/// Lay out `[fat header][code][padding][exception section]`.
fn assemble(
    header: &OriginalHeader,
    code: &[u8],
    handlers: &[ExceptionHandler],
) -> Result<Vec<u8>> {
    let section_size = if handlers.is_empty() {
        0
    } else {
        3 + SECTION_HEADER_SIZE + handlers.len() * FAT_CLAUSE_SIZE
    };
    let mut out = Vec::with_capacity(FAT_HEADER_SIZE + code.len() + section_size);

    let mut flags = header.flags;
    flags.set(MethodBodyFlags::MORE_SECTS, !handlers.is_empty());
    write_fat_header(
        &mut out,
        flags,
        header.max_stack,
        u32::try_from(code.len()).map_err(|_| OutOfBounds)?,
        header.local_var_sig_token,
    );
    out.extend_from_slice(code);

    if !handlers.is_empty() {
        while out.len() % 4 != 0 {
            out.push(0);
        }
        write_fat_section(handlers, &mut out)?;
    }

    Ok(out)
}

/// Parse and decode an assembled body from scratch.
fn verify(output: &[u8], handlers: &[ExceptionHandler]) -> Result<()> {
    let parsed = MethodBody::from(output).map_err(|error| ValidationFailed(error.to_string()))?;
    let code = output
        .get(parsed.code_range())
        .ok_or_else(|| ValidationFailed("declared code size exceeds body".to_string()))?;

    let map = decode_code(code).map_err(|error| ValidationFailed(error.to_string()))?;
    if !map.all_valid() {
        map.dump();
        return Err(ValidationFailed(format!(
            "{} instructions invalid after re-decoding",
            map.invalid_count()
        )));
    }

    if parsed.exception_handlers != handlers {
        return Err(ValidationFailed(
            "exception section does not read back".to_string(),
        ));
    }

    for handler in handlers {
        for boundary in handler.boundaries() {
            let lands = boundary
                .is_some_and(|offset| offset as usize == code.len() || map.id_at(offset).is_some());
            if !lands {
                return Err(ValidationFailed(format!(
                    "exception clause boundary {:?} is not an instruction start",
                    boundary
                )));
            }
        }
    }

    Ok(())
}

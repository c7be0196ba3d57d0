//! Summary of a method body needed to decide how to rewrite it.
//!
//! The rewriter does not scan the code itself to find out how many `ret` instructions a method
//! has. That information comes from a [`HeaderInfoProvider`], which lets a host that already
//! inspected the body (for example while deciding whether to instrument it) pass its findings
//! along. [`BodyScanner`] is the provider used when nothing else is available.

use crate::{
    disassembler::{opcodes, OpcodeDescriptor},
    metadata::method::MethodBody,
    Result,
};

/// Location and shape of the code inside a method body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderInfo {
    /// Number of `ret` instructions in the code
    pub return_count: usize,
    /// Offset of the first code byte from the start of the body
    pub code_offset: usize,
    /// Number of code bytes
    pub code_size: usize,
    /// Size of the header in bytes
    pub header_size: usize,
    /// Header uses the one-byte tiny format
    pub is_tiny: bool,
    /// Exception-handling sections follow the code
    pub has_exception_data: bool,
    /// Number of branches with a one-byte distance
    pub short_branch_count: usize,
    /// Maximum evaluation stack depth declared by the header
    pub max_stack: u16,
}

impl HeaderInfo {
    /// Info for a body with a tiny header describing `code_size` bytes of code.
    ///
    /// Counts start at zero and are expected to be filled in by the caller.
    #[must_use]
    pub fn tiny(code_size: usize) -> Self {
        HeaderInfo {
            return_count: 0,
            code_offset: 1,
            code_size,
            header_size: 1,
            is_tiny: true,
            has_exception_data: false,
            short_branch_count: 0,
            max_stack: 8,
        }
    }

    /// Info derived from a parsed [`MethodBody`]. Counts start at zero.
    #[must_use]
    pub fn from_body(body: &MethodBody) -> Self {
        HeaderInfo {
            return_count: 0,
            code_offset: body.size_header,
            code_size: body.size_code,
            header_size: body.size_header,
            is_tiny: !body.is_fat,
            has_exception_data: body.is_exception_data,
            short_branch_count: 0,
            max_stack: u16::try_from(body.max_stack).unwrap_or(u16::MAX),
        }
    }

    /// One past the last code byte.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if offset and size overflow.
    pub fn code_end(&self) -> Result<usize> {
        self.code_offset
            .checked_add(self.code_size)
            .ok_or_else(|| {
                malformed_error!(
                    "{} bytes of code at {} overflow",
                    self.code_size,
                    self.code_offset
                )
            })
    }
}

/// Supplies the [`HeaderInfo`] for a method body.
pub trait HeaderInfoProvider: Send + Sync {
    /// Describe `body`, which starts with its method header.
    ///
    /// # Errors
    /// Returns an error if the header or the code can not be parsed.
    fn header_info(&self, body: &[u8]) -> Result<HeaderInfo>;
}

/// Default [`HeaderInfoProvider`] that parses the header and linearly scans the code.
#[derive(Debug, Default, Clone, Copy)]
pub struct BodyScanner;

impl HeaderInfoProvider for BodyScanner {
    fn header_info(&self, body: &[u8]) -> Result<HeaderInfo> {
        let parsed = MethodBody::from(body)?;
        let mut info = HeaderInfo::from_body(&parsed);

        let code = &body[parsed.code_range()];
        let mut position = 0;
        while position < code.len() {
            let descriptor = OpcodeDescriptor::decode(code, position)?;
            let opcode = descriptor.opcode;

            if opcode.prefix == 0 && opcode.code == opcodes::RET {
                info.return_count += 1;
            } else if opcode.is_short_branch() {
                info.short_branch_count += 1;
            }

            position += descriptor.total_size;
        }

        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{disassembler::opcodes::*, Error};

    #[test]
    fn scan_tiny() {
        // brtrue.s +1, ret, ret
        let body = [0x12, BRTRUE_S, 0x01, RET, RET];
        let info = BodyScanner.header_info(&body).unwrap();

        assert!(info.is_tiny);
        assert_eq!(info.code_offset, 1);
        assert_eq!(info.code_size, 4);
        assert_eq!(info.code_end().unwrap(), 5);
        assert_eq!(info.return_count, 2);
        assert_eq!(info.short_branch_count, 1);
    }

    #[test]
    fn scan_ignores_ret_bytes_in_operands() {
        // ldc.i4 0x2A2A2A2A, ret
        let body = [0x1A, LDC_I4, 0x2A, 0x2A, 0x2A, 0x2A, RET];
        let info = BodyScanner.header_info(&body).unwrap();
        assert_eq!(info.return_count, 1);
    }

    #[test]
    fn scan_rejects_unknown_opcode() {
        let body = [0x0A, 0x24, RET];
        assert!(matches!(
            BodyScanner.header_info(&body),
            Err(Error::InvalidOpcode { .. })
        ));
    }

    #[test]
    fn tiny_defaults() {
        let info = HeaderInfo::tiny(3);
        assert_eq!(info.code_end().unwrap(), 4);
        assert_eq!(info.return_count, 0);
        assert_eq!(info.max_stack, 8);
    }

    #[test]
    fn code_end_overflow() {
        let info = HeaderInfo::tiny(usize::MAX);
        assert!(matches!(info.code_end(), Err(Error::Malformed { .. })));
    }
}

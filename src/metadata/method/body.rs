//! Parsing and emission of CIL method body headers and their exception sections.
//!
//! A method body is laid out as `[header][code][padding][sections]`. The header comes in two
//! formats: a single-byte *tiny* header for small methods without locals or exception handlers,
//! and a 12-byte *fat* header. Extra data sections, which currently can only hold exception
//! handling clauses, start at the first DWORD boundary after the code.
//!
//! # Examples
//!
//! ```rust
//! use cilwrap::metadata::method::MethodBody;
//!
//! // tiny header, 1 byte of code: ret
//! let body = MethodBody::from(&[0x06, 0x2A])?;
//! assert!(!body.is_fat);
//! assert_eq!(body.size_code, 1);
//! assert_eq!(body.code_range(), 1..2);
//! # Ok::<(), cilwrap::Error>(())
//! ```
//!
//! # References
//! - ECMA-335 6th Edition, Partition II, Section 25.4 - Method Header Format

use std::ops::Range;

use crate::{
    io::{push_le, read_le, Parser},
    metadata::method::{
        ExceptionHandler, ExceptionHandlerFlags, MethodBodyFlags, SectionFlags,
        FAT_CLAUSE_SIZE, FAT_HEADER_DWORDS, FAT_HEADER_SIZE, SECTION_HEADER_SIZE,
        SMALL_CLAUSE_SIZE,
    },
    Error::OutOfBounds,
    Result,
};

/// The parsed header and exception handlers of one method body.
#[derive(Debug, Clone)]
pub struct MethodBody {
    /// Size of the code in bytes, not counting the header
    pub size_code: usize,
    /// Size of the method header in bytes
    pub size_header: usize,
    /// `MetaData` token for the local variable signature. 0 == no local variables
    pub local_var_sig_token: u32,
    /// Maximum number of items on the operand stack
    pub max_stack: usize,
    /// Flags as stored in the header
    pub flags: MethodBodyFlags,
    /// Flag, indicating the type of the method header
    pub is_fat: bool,
    /// Flag, indicating to call default constructor on all local variables
    pub is_init_local: bool,
    /// Flag, indicating if this method does have exception handlers
    pub is_exception_data: bool,
    /// A list of exception handlers this method has
    pub exception_handlers: Vec<ExceptionHandler>,
}

impl MethodBody {
    /// Parse the header and exception sections from the start of `data`.
    ///
    /// # Arguments
    /// * `data` - The method body, starting with its header
    ///
    /// # Errors
    /// Returns an error if the data is empty, out of bounds, or the header is neither tiny nor
    /// fat.
    pub fn from(data: &[u8]) -> Result<MethodBody> {
        if data.is_empty() {
            return Err(malformed_error!("Provided data for body parsing is empty"));
        }

        let first_byte = read_le::<u8>(data)?;
        match MethodBodyFlags::from_bits_truncate(u16::from(first_byte & 0b_00000011_u8)) {
            MethodBodyFlags::TINY_FORMAT => {
                let size_code = (first_byte >> 2) as usize;
                if size_code + 1 > data.len() {
                    return Err(OutOfBounds);
                }

                Ok(MethodBody {
                    size_code,
                    size_header: 1,
                    local_var_sig_token: 0,
                    max_stack: 8,
                    flags: MethodBodyFlags::TINY_FORMAT,
                    is_fat: false,
                    is_init_local: false,
                    is_exception_data: false,
                    exception_handlers: Vec::new(),
                })
            }
            MethodBodyFlags::FAT_FORMAT => {
                if data.len() < FAT_HEADER_SIZE {
                    return Err(OutOfBounds);
                }

                let mut parser = Parser::new(data);
                let first_duo = parser.read_le::<u16>()?;
                let size_header = ((first_duo >> 12) * 4) as usize;
                if size_header < FAT_HEADER_SIZE {
                    return Err(malformed_error!(
                        "Fat header declares a size of {} bytes",
                        size_header
                    ));
                }

                let flags = MethodBodyFlags::from_bits_truncate(first_duo & 0x0FFF);
                let max_stack = parser.read_le::<u16>()? as usize;
                let size_code = parser.read_le::<u32>()? as usize;
                let local_var_sig_token = parser.read_le::<u32>()?;
                match size_code.checked_add(size_header) {
                    Some(size) if size <= data.len() => {}
                    _ => return Err(OutOfBounds),
                }

                let exception_handlers = if flags.contains(MethodBodyFlags::MORE_SECTS) {
                    Self::read_sections(data, size_header + size_code)?
                } else {
                    Vec::new()
                };

                Ok(MethodBody {
                    size_code,
                    size_header,
                    local_var_sig_token,
                    max_stack,
                    flags,
                    is_fat: true,
                    is_init_local: flags.contains(MethodBodyFlags::INIT_LOCALS),
                    is_exception_data: !exception_handlers.is_empty(),
                    exception_handlers,
                })
            }
            _ => Err(malformed_error!(
                "MethodHeader is neither FAT nor TINY - {}",
                first_byte
            )),
        }
    }

    /// Exception Handling -> II.25.4.6
    fn read_sections(data: &[u8], code_end: usize) -> Result<Vec<ExceptionHandler>> {
        let mut exception_handlers = Vec::new();
        let mut parser = Parser::new(data);
        let mut cursor = (code_end + 3) & !3;

        while data.len() >= cursor + SECTION_HEADER_SIZE {
            parser.seek(cursor)?;
            let section_flags = SectionFlags::from_bits_truncate(parser.peek_byte()?);
            if !section_flags.contains(SectionFlags::EHTABLE) {
                break;
            }

            let is_fat = section_flags.contains(SectionFlags::FAT_FORMAT);
            let section_size = if is_fat {
                (parser.peek_le::<u32>()? >> 8) as usize
            } else {
                (parser.peek_le::<u16>()? >> 8) as usize
            };
            if section_size < SECTION_HEADER_SIZE || data.len() < cursor + section_size {
                return Err(malformed_error!(
                    "Exception section at {} declares {} bytes",
                    cursor,
                    section_size
                ));
            }

            let section_end = cursor + section_size;
            parser.advance_by(SECTION_HEADER_SIZE)?;

            if is_fat {
                for _ in 0..(section_size - SECTION_HEADER_SIZE) / FAT_CLAUSE_SIZE {
                    // Only the low 16 bits carry clause flags
                    #[allow(clippy::cast_possible_truncation)]
                    let flags = parser.read_le::<u32>()? as u16;
                    exception_handlers.push(ExceptionHandler {
                        flags: ExceptionHandlerFlags::from_bits_retain(flags),
                        try_offset: parser.read_le::<u32>()?,
                        try_length: parser.read_le::<u32>()?,
                        handler_offset: parser.read_le::<u32>()?,
                        handler_length: parser.read_le::<u32>()?,
                        filter_offset: parser.read_le::<u32>()?,
                    });
                }
            } else {
                for _ in 0..(section_size - SECTION_HEADER_SIZE) / SMALL_CLAUSE_SIZE {
                    exception_handlers.push(ExceptionHandler {
                        flags: ExceptionHandlerFlags::from_bits_retain(parser.read_le::<u16>()?),
                        try_offset: u32::from(parser.read_le::<u16>()?),
                        try_length: u32::from(parser.read_le::<u8>()?),
                        handler_offset: u32::from(parser.read_le::<u16>()?),
                        handler_length: u32::from(parser.read_le::<u8>()?),
                        filter_offset: parser.read_le::<u32>()?,
                    });
                }
            }

            if !section_flags.contains(SectionFlags::MORE_SECTS) {
                break;
            }
            cursor = (section_end + 3) & !3;
        }

        Ok(exception_handlers)
    }

    /// Get the full size of header and code
    #[must_use]
    pub fn size(&self) -> usize {
        self.size_code + self.size_header
    }

    /// Byte range of the code within the parsed data
    #[must_use]
    pub fn code_range(&self) -> Range<usize> {
        self.size_header..self.size()
    }
}

/// Append a 12-byte fat method header to `out`.
///
/// The header size nibble is always 3 DWORDs and the format bits are always set to fat.
pub fn write_fat_header(
    out: &mut Vec<u8>,
    flags: MethodBodyFlags,
    max_stack: u16,
    code_size: u32,
    local_var_sig_token: u32,
) {
    let flags = (flags | MethodBodyFlags::FAT_FORMAT).bits() & 0x0FFF;
    push_le(out, (FAT_HEADER_DWORDS << 12) | flags);
    push_le(out, max_stack);
    push_le(out, code_size);
    push_le(out, local_var_sig_token);
}

//! Exception handler clauses of CIL method bodies.
//!
//! Clauses are parsed from either the small or the fat section format (see
//! [`crate::metadata::method::MethodBody`]) and always written back in the fat format, which has
//! no limits on offsets or lengths.

use bitflags::bitflags;

use crate::{
    io::push_le,
    metadata::method::{SectionFlags, FAT_CLAUSE_SIZE, SECTION_HEADER_SIZE},
    Result,
};

bitflags! {
    /// Exception handler flags defining the type of exception handling clause.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExceptionHandlerFlags: u16 {
        /// A typed exception clause. `filter_offset` holds the class token
        const EXCEPTION = 0x0000;
        /// An exception filter and handler clause. `filter_offset` holds the filter code offset
        const FILTER = 0x0001;
        /// A finally clause
        const FINALLY = 0x0002;
        /// A fault clause (finally that executes only on exception)
        const FAULT = 0x0004;
    }
}

/// Exception handler defining a protected region and its handler within a method.
///
/// # Layout in IL
///
/// ```text
/// try {
///     // try_offset -> try_offset + try_length
/// }
/// catch / filter / finally / fault {
///     // handler_offset -> handler_offset + handler_length
/// }
/// ```
///
/// # References
/// - ECMA-335 6th Edition, Partition II, Section 25.4.6 - Exception Handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Flags describing the type of exception handler (catch, filter, finally, fault).
    pub flags: ExceptionHandlerFlags,
    /// Offset in bytes of try block from start of the code.
    pub try_offset: u32,
    /// Length in bytes of the try block.
    pub try_length: u32,
    /// Location of the handler for this try block.
    pub handler_offset: u32,
    /// Size of the handler code in bytes.
    pub handler_length: u32,
    /// Filter code offset for filter clauses, class token for typed clauses.
    pub filter_offset: u32,
}

impl ExceptionHandler {
    /// Returns `true` if `filter_offset` refers to code rather than a class token.
    #[must_use]
    pub fn is_filter(&self) -> bool {
        self.flags.contains(ExceptionHandlerFlags::FILTER)
    }

    /// First byte after the protected region.
    #[must_use]
    pub fn try_end(&self) -> Option<u32> {
        self.try_offset.checked_add(self.try_length)
    }

    /// First byte after the handler.
    #[must_use]
    pub fn handler_end(&self) -> Option<u32> {
        self.handler_offset.checked_add(self.handler_length)
    }

    /// All code offsets this clause refers to: region starts, region ends and the filter start.
    #[must_use]
    pub fn boundaries(&self) -> Vec<Option<u32>> {
        let mut boundaries = vec![
            Some(self.try_offset),
            self.try_end(),
            Some(self.handler_offset),
            self.handler_end(),
        ];
        if self.is_filter() {
            boundaries.push(Some(self.filter_offset));
        }
        boundaries
    }

    /// Move this clause to new code offsets.
    ///
    /// `map` translates an original offset (a region start or end, or the filter start) into
    /// its new position. Lengths are recomputed from the translated ends. Returns `None` if any
    /// boundary can not be translated or a region would end before it starts.
    #[must_use]
    pub fn relocate<F>(&self, map: F) -> Option<ExceptionHandler>
    where
        F: Fn(u32) -> Option<u32>,
    {
        let try_offset = map(self.try_offset)?;
        let try_end = map(self.try_end()?)?;
        let handler_offset = map(self.handler_offset)?;
        let handler_end = map(self.handler_end()?)?;
        let filter_offset = if self.is_filter() {
            map(self.filter_offset)?
        } else {
            self.filter_offset
        };

        Some(ExceptionHandler {
            flags: self.flags,
            try_offset,
            try_length: try_end.checked_sub(try_offset)?,
            handler_offset,
            handler_length: handler_end.checked_sub(handler_offset)?,
            filter_offset,
        })
    }

    /// Append this clause in the 24-byte fat format.
    pub fn write_fat(&self, out: &mut Vec<u8>) {
        push_le(out, u32::from(self.flags.bits()));
        push_le(out, self.try_offset);
        push_le(out, self.try_length);
        push_le(out, self.handler_offset);
        push_le(out, self.handler_length);
        push_le(out, self.filter_offset);
    }
}

/// Append a single fat exception-handling section holding `handlers` to `out`.
///
/// The caller is responsible for the DWORD alignment of `out` before the section starts.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if the section would exceed the 24-bit size field.
pub fn write_fat_section(handlers: &[ExceptionHandler], out: &mut Vec<u8>) -> Result<()> {
    let size = handlers
        .len()
        .checked_mul(FAT_CLAUSE_SIZE)
        .and_then(|size| size.checked_add(SECTION_HEADER_SIZE))
        .filter(|size| *size <= 0x00FF_FFFF)
        .ok_or_else(|| malformed_error!("Too many exception clauses - {}", handlers.len()))?;

    #[allow(clippy::cast_possible_truncation)]
    let header = u32::from((SectionFlags::EHTABLE | SectionFlags::FAT_FORMAT).bits())
        | ((size as u32) << 8);
    push_le(out, header);

    for handler in handlers {
        handler.write_fat(out);
    }

    Ok(())
}

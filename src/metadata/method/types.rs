//! Method body header and data section flags.
//!
//! # Key Types
//! - [`MethodBodyFlags`]: Flags stored in the low 12 bits of a fat header, or the low 2 bits of a
//!   tiny header
//! - [`SectionFlags`]: Flags of an extra data section following the code

use bitflags::bitflags;

/// Size in bytes of a fat method header
pub const FAT_HEADER_SIZE: usize = 12;
/// Size of a fat method header in DWORDs, stored in the top 4 bits of the flags word
pub const FAT_HEADER_DWORDS: u16 = 3;
/// Size in bytes of one fat exception clause
pub const FAT_CLAUSE_SIZE: usize = 24;
/// Size in bytes of one small exception clause
pub const SMALL_CLAUSE_SIZE: usize = 12;
/// Size in bytes of a data section header
pub const SECTION_HEADER_SIZE: usize = 4;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Flags that a method body can have
    pub struct MethodBodyFlags: u16 {
        /// Tiny method header format
        const TINY_FORMAT = 0x2;
        /// Fat method header format
        const FAT_FORMAT = 0x3;
        /// More data sections follow the code
        const MORE_SECTS = 0x8;
        /// Zero-initialize all local variables
        const INIT_LOCALS = 0x10;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Flags that a method body section can have
    pub struct SectionFlags: u8 {
        /// Exception handling data
        const EHTABLE = 0x1;
        /// Reserved, shall be 0
        const OPT_ILTABLE = 0x2;
        /// The section uses the fat (24 byte clause) format
        const FAT_FORMAT = 0x40;
        /// Another section follows this one
        const MORE_SECTS = 0x80;
    }
}

//! Cursor-based byte stream parser for CIL instruction streams and method headers.
//!
//! The [`Parser`] maintains a position inside a borrowed byte slice and offers bounds-checked
//! sequential reads. The decoder walks instruction streams with it, the opcode table reads switch
//! arm counts through it and the header parser uses it for fat headers and exception sections.
//!
//! # Example
//!
//! ```rust
//! use cilwrap::io::Parser;
//!
//! let data = [0x45, 0x02, 0x00, 0x00, 0x00];
//! let mut parser = Parser::new(&data);
//!
//! assert_eq!(parser.read_le::<u8>()?, 0x45);
//! assert_eq!(parser.read_le::<u32>()?, 2);
//! assert!(!parser.has_more_data());
//! # Ok::<(), cilwrap::Error>(())
//! ```

use crate::{
    io::{read_le_at, CilIO},
    Error::OutOfBounds,
    Result,
};

/// A generic binary data parser for reading CIL bytecode and method-body structures.
///
/// All read operations validate that enough bytes remain and never panic on malformed input.
pub struct Parser<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a new `Parser` positioned at the start of `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Returns `true` while the cursor has not reached the end of the buffer.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Move the cursor to an absolute position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `pos` is past the end of the buffer.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(OutOfBounds);
        }

        self.position = pos;
        Ok(())
    }

    /// Move the cursor forward by `step` bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if this would move past the end of the buffer.
    pub fn advance_by(&mut self, step: usize) -> Result<()> {
        let end = self.calc_end_position(step)?;
        self.position = end;
        Ok(())
    }

    /// Current cursor position.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// The complete underlying buffer.
    #[must_use]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Peek at the byte under the cursor without advancing.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] at the end of the buffer.
    pub fn peek_byte(&self) -> Result<u8> {
        if self.position >= self.data.len() {
            return Err(OutOfBounds);
        }
        Ok(self.data[self.position])
    }

    /// Peek at a little-endian value under the cursor without advancing.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if not enough bytes remain.
    pub fn peek_le<T: CilIO>(&self) -> Result<T> {
        let mut temp_position = self.position;
        read_le_at::<T>(self.data, &mut temp_position)
    }

    /// Read a little-endian value and advance past it.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if not enough bytes remain.
    pub fn read_le<T: CilIO>(&mut self) -> Result<T> {
        read_le_at::<T>(self.data, &mut self.position)
    }

    /// Position `length` bytes ahead of the cursor, if it lies inside the buffer
    fn calc_end_position(&self, length: usize) -> Result<usize> {
        let end = self.position.checked_add(length).ok_or(OutOfBounds)?;

        if end > self.data.len() {
            return Err(OutOfBounds);
        }

        Ok(end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_reads() {
        let data = [0x01, 0x02, 0x00, 0x03, 0x00, 0x00, 0x00];
        let mut parser = Parser::new(&data);

        assert_eq!(parser.read_le::<u8>().unwrap(), 1);
        assert_eq!(parser.read_le::<u16>().unwrap(), 2);
        assert_eq!(parser.read_le::<u32>().unwrap(), 3);
        assert!(!parser.has_more_data());
        assert!(parser.read_le::<u8>().is_err());
    }

    #[test]
    fn peek_does_not_advance() {
        let data = [0xFE, 0x01];
        let parser = Parser::new(&data);

        assert_eq!(parser.peek_byte().unwrap(), 0xFE);
        assert_eq!(parser.peek_le::<u16>().unwrap(), 0x01FE);
        assert_eq!(parser.pos(), 0);
    }

    #[test]
    fn seek_to_end_is_allowed() {
        let data = [0x00, 0x2A];
        let mut parser = Parser::new(&data);

        parser.seek(2).unwrap();
        assert!(!parser.has_more_data());
        assert!(parser.peek_byte().is_err());
        assert!(parser.seek(3).is_err());
    }

    #[test]
    fn advance_by_overflow() {
        let data = [0x00; 4];
        let mut parser = Parser::new(&data);

        parser.advance_by(3).unwrap();
        assert!(parser.advance_by(usize::MAX).is_err());
        assert_eq!(parser.pos(), 3);
    }
}

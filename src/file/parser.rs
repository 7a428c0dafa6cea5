//! Cursor-based, bounds-checked reader over a byte slice.
//!
//! [`Parser`] is used for everything that is read sequentially: metadata stream headers,
//! method body headers, nettrace blocks and the event payloads inside them. All reads
//! validate the remaining length first and report [`crate::Error::OutOfBounds`] rather than
//! panicking on truncated input.
//!
//! # Examples
//!
//! ```rust
//! use dotslim::Parser;
//!
//! let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
//! let mut parser = Parser::new(&data);
//!
//! let first = parser.read_le::<u32>()?;
//! assert_eq!(first, 0x04030201);
//!
//! parser.seek(6)?;
//! assert_eq!(parser.read_le::<u16>()?, 0x0807);
//! # Ok::<(), dotslim::Error>(())
//! ```

use widestring::U16String;

use crate::{
    file::io::{read_le_at, CilIO},
    Result,
};

/// A generic binary data parser for little-endian structures.
///
/// The parser keeps a position cursor into the borrowed data. Reads advance the cursor,
/// failed reads leave it untouched.
pub struct Parser<'a> {
    /// The binary data being parsed
    data: &'a [u8],
    /// Current position within the data buffer
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a new [`Parser`] from a byte slice.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Returns the length of the underlying data buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the parser has no data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `true` if there is more data available to parse.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Number of bytes between the cursor and the end of the data.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Move the current position to the specified index.
    ///
    /// Seeking to exactly the end of the data is allowed, it leaves nothing to read.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if position is beyond the data length.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        self.position = pos;
        Ok(())
    }

    /// Move the position forward by the specified number of bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if advancing by step would exceed the data length.
    pub fn advance_by(&mut self, step: usize) -> Result<()> {
        match self.position.checked_add(step) {
            Some(end) if end <= self.data.len() => {
                self.position = end;
                Ok(())
            }
            _ => Err(out_of_bounds_error!()),
        }
    }

    /// Get the current position of the parser within the data buffer.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Get access to the underlying data buffer.
    #[must_use]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Peek at the next byte without advancing the position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if position is at or beyond the data length.
    pub fn peek_byte(&self) -> Result<u8> {
        self.data
            .get(self.position)
            .copied()
            .ok_or(out_of_bounds_error!())
    }

    /// Advance the position to the next multiple of `alignment`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the padding would exceed the data length.
    pub fn align(&mut self, alignment: usize) -> Result<()> {
        let padding = (alignment - (self.position % alignment)) % alignment;
        self.advance_by(padding)
    }

    /// Read a type `T` from the current position in little-endian format and advance.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if reading would exceed the data length.
    pub fn read_le<T: CilIO>(&mut self) -> Result<T> {
        read_le_at::<T>(self.data, &mut self.position)
    }

    /// Borrow the next `len` bytes and advance past them.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than `len` bytes remain.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let start = self.position;
        self.advance_by(len)?;
        Ok(&self.data[start..self.position])
    }

    /// Read a LEB128 encoded unsigned integer of up to 32 bits.
    ///
    /// Compressed nettrace event headers store ids, sizes and deltas this way.
    ///
    /// # Errors
    /// Returns an error if the data ends early or the encoding exceeds 5 bytes.
    pub fn read_var_u32(&mut self) -> Result<u32> {
        let start = self.position;
        let value = self.read_varint(5)?;
        u32::try_from(value).map_err(|_| {
            self.position = start;
            malformed_error!("Varint exceeds 32 bits - {}", value)
        })
    }

    /// Read a LEB128 encoded unsigned integer of up to 64 bits.
    ///
    /// # Errors
    /// Returns an error if the data ends early or the encoding exceeds 10 bytes.
    pub fn read_var_u64(&mut self) -> Result<u64> {
        self.read_varint(10)
    }

    fn read_varint(&mut self, max_bytes: usize) -> Result<u64> {
        let start = self.position;
        let mut value = 0_u64;

        for index in 0..max_bytes {
            let byte = match self.read_le::<u8>() {
                Ok(byte) => byte,
                Err(error) => {
                    self.position = start;
                    return Err(error);
                }
            };

            value |= u64::from(byte & 0x7F) << (7 * index);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }

        self.position = start;
        Err(malformed_error!("Varint too long at offset {}", start))
    }

    /// Read a NUL-terminated UTF-16LE string, consuming the terminator.
    ///
    /// This is the string encoding of EventPipe payloads and metadata.
    ///
    /// # Errors
    /// Returns an error if no terminator is found before the end of data.
    pub fn read_utf16z(&mut self) -> Result<String> {
        let start = self.position;
        let mut units = Vec::new();

        loop {
            let unit = match self.read_le::<u16>() {
                Ok(unit) => unit,
                Err(error) => {
                    self.position = start;
                    return Err(error);
                }
            };

            if unit == 0 {
                break;
            }
            units.push(unit);
        }

        Ok(U16String::from_vec(units).to_string_lossy())
    }

    /// Read a NUL-terminated ASCII/UTF-8 string, consuming the terminator.
    ///
    /// # Errors
    /// Returns an error if no terminator is found or the bytes are not valid UTF-8.
    pub fn read_string_utf8z(&mut self) -> Result<&'a str> {
        let rest = &self.data[self.position..];
        let Some(end) = rest.iter().position(|byte| *byte == 0) else {
            return Err(out_of_bounds_error!());
        };

        let value = std::str::from_utf8(&rest[..end]).map_err(|_| {
            malformed_error!("Invalid UTF-8 string at offset {}", self.position)
        })?;

        self.position += end + 1;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn navigation() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05];
        let mut parser = Parser::new(&data);

        parser.advance_by(1).unwrap();
        parser.align(4).unwrap();
        assert_eq!(parser.pos(), 4);
        assert_eq!(parser.peek_byte().unwrap(), 0x05);
        assert_eq!(parser.remaining(), 1);

        parser.seek(5).unwrap();
        assert!(!parser.has_more_data());
        assert!(parser.peek_byte().is_err());
        assert!(parser.seek(6).is_err());
        assert!(parser.advance_by(1).is_err());
    }

    #[test]
    fn varints() {
        let data = [0x05, 0xE5, 0x8E, 0x26, 0xFF, 0xFF, 0xFF, 0xFF, 0x7F];
        let mut parser = Parser::new(&data);

        assert_eq!(parser.read_var_u32().unwrap(), 5);
        assert_eq!(parser.read_var_u32().unwrap(), 624_485);
        assert_eq!(parser.read_var_u64().unwrap(), 0x7_FFFF_FFFF);
        assert!(!parser.has_more_data());
    }

    #[test]
    fn varint_too_wide() {
        let data = [0xFF, 0xFF, 0xFF, 0xFF, 0x7F];
        let mut parser = Parser::new(&data);

        assert!(parser.read_var_u32().is_err());
        assert_eq!(parser.pos(), 0);
    }

    #[test]
    fn utf16_strings() {
        let data = [b'A', 0, b'b', 0, 0, 0, 0, 0, b'x', 0];
        let mut parser = Parser::new(&data);

        assert_eq!(parser.read_utf16z().unwrap(), "Ab");
        assert_eq!(parser.read_utf16z().unwrap(), "");
        assert!(parser.read_utf16z().is_err());
        assert_eq!(parser.pos(), 8);
    }

    #[test]
    fn utf8_strings() {
        let data = *b"#~\0#Strings\0\0";
        let mut parser = Parser::new(&data);

        assert_eq!(parser.read_string_utf8z().unwrap(), "#~");
        assert_eq!(parser.read_string_utf8z().unwrap(), "#Strings");
        assert_eq!(parser.read_string_utf8z().unwrap(), "");
        assert!(parser.read_string_utf8z().is_err());
    }
}

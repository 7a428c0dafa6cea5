use crate::{file::parser::Parser, Result};

/// A stream header provides the name, position and length of a particular table or heap. The
/// length of a header is not fixed, its name is a NUL-terminated string padded to a 4-byte
/// boundary.
///
/// ## Reference
/// * '<https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf>' - II.24.2.2
pub struct StreamHeader {
    /// Offset of the stream, relative to the metadata root
    pub offset: u32,
    /// Size of this stream in bytes, shall be a multiple of 4
    pub size: u32,
    /// Name of the stream, at most 32 characters
    pub name: String,
}

impl StreamHeader {
    /// Read one stream header at the parser position, leaving the parser at the next header.
    ///
    /// # Errors
    /// Returns an error if the header is truncated or its name is longer than 32 characters.
    pub fn read(parser: &mut Parser) -> Result<StreamHeader> {
        let offset = parser.read_le::<u32>()?;
        let size = parser.read_le::<u32>()?;
        let name = parser.read_string_utf8z()?;
        if name.is_empty() || name.len() > 32 {
            return Err(malformed_error!("Invalid stream header name - {}", name));
        }

        let name = name.to_string();
        parser.align(4)?;

        Ok(StreamHeader { offset, size, name })
    }
}

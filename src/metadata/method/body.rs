//! Parsing of CIL method body headers.
//!
//! The slimmer never decodes instructions; it only needs to know how many bytes a body
//! occupies (header, code and trailing exception sections) to decide whether a stub fits in
//! place, and whether a body already is the stub.
//!
//! # References
//! - ECMA-335 6th Edition, Partition II, Section 25.4 - Method Header Format

use crate::{
    file::io::{read_le, read_le_at},
    metadata::method::{MethodBodyFlags, SectionFlags},
    Error::OutOfBounds,
    Result,
};

/// Replacement body: tiny header for three bytes of code, then `nop`, `ldnull`, `throw`.
pub const STUB_BODY: [u8; 4] = [0x0E, 0x00, 0x14, 0x7A];

/// Header information and extent of one method body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodBody {
    /// Size of the IL code in bytes
    pub size_code: usize,
    /// Size of the header in bytes
    pub size_header: usize,
    /// Size of the extra data sections, including the padding in front of them
    pub size_sections: usize,
    /// `StandAloneSig` token of the locals, 0 when there are none
    pub local_var_sig_token: u32,
    /// Maximum evaluation stack depth
    pub max_stack: usize,
    /// Whether the fat header format is used
    pub is_fat: bool,
    /// Whether locals are zero-initialized
    pub is_init_local: bool,
    /// Number of exception handling clauses
    pub exception_clauses: usize,
}

impl MethodBody {
    /// Parse the body header at the start of `data` and measure the whole body.
    ///
    /// # Errors
    /// Returns an error if the header is neither tiny nor fat, or the body runs past `data`.
    pub fn from(data: &[u8]) -> Result<MethodBody> {
        if data.is_empty() {
            return Err(malformed_error!("Provided data for body parsing is empty"));
        }

        let first_byte = read_le::<u8>(data)?;
        match MethodBodyFlags::from_bits_truncate(u16::from(first_byte & 0b11)) {
            MethodBodyFlags::TINY_FORMAT => {
                let size_code = (first_byte >> 2) as usize;
                if size_code + 1 > data.len() {
                    return Err(OutOfBounds);
                }

                Ok(MethodBody {
                    size_code,
                    size_header: 1,
                    size_sections: 0,
                    local_var_sig_token: 0,
                    max_stack: 8,
                    is_fat: false,
                    is_init_local: false,
                    exception_clauses: 0,
                })
            }
            MethodBodyFlags::FAT_FORMAT => {
                if data.len() < 12 {
                    return Err(OutOfBounds);
                }

                let first_duo = read_le::<u16>(data)?;
                let size_header = ((first_duo >> 12) * 4) as usize;
                if size_header < 12 {
                    return Err(malformed_error!(
                        "Fat method header too small - {}",
                        size_header
                    ));
                }

                let flags = MethodBodyFlags::from_bits_truncate(first_duo & 0x0FFF);
                let max_stack = read_le::<u16>(&data[2..])? as usize;
                let size_code = read_le::<u32>(&data[4..])? as usize;
                let local_var_sig_token = read_le::<u32>(&data[8..])?;

                let code_end = size_header.checked_add(size_code).ok_or(OutOfBounds)?;
                if code_end > data.len() {
                    return Err(OutOfBounds);
                }

                let mut end = code_end;
                let mut exception_clauses = 0;
                if flags.contains(MethodBodyFlags::MORE_SECTS) {
                    let mut cursor = (code_end + 3) & !3;

                    loop {
                        let mut header = cursor;
                        let section_flags =
                            SectionFlags::from_bits_truncate(read_le_at::<u8>(data, &mut header)?);

                        let (section_size, clause_size) =
                            if section_flags.contains(SectionFlags::FAT_FORMAT) {
                                let mut size_at = cursor;
                                let raw = read_le_at::<u32>(data, &mut size_at)?;
                                ((raw >> 8) as usize, 24)
                            } else {
                                (read_le_at::<u8>(data, &mut header)? as usize, 12)
                            };

                        if section_size < 4 || cursor + section_size > data.len() {
                            return Err(OutOfBounds);
                        }

                        if section_flags.contains(SectionFlags::EHTABLE) {
                            exception_clauses += (section_size - 4) / clause_size;
                        }

                        cursor += section_size;
                        end = cursor;

                        if !section_flags.contains(SectionFlags::MORE_SECTS) {
                            break;
                        }
                        cursor = (cursor + 3) & !3;
                    }
                }

                Ok(MethodBody {
                    size_code,
                    size_header,
                    size_sections: end - code_end,
                    local_var_sig_token,
                    max_stack,
                    is_fat: true,
                    is_init_local: flags.contains(MethodBodyFlags::INIT_LOCALS),
                    exception_clauses,
                })
            }
            _ => Err(malformed_error!(
                "MethodHeader is neither FAT nor TINY - {}",
                first_byte
            )),
        }
    }

    /// Header plus code
    #[must_use]
    pub fn size(&self) -> usize {
        self.size_code + self.size_header
    }

    /// Every byte the body occupies, exception sections included
    #[must_use]
    pub fn total_size(&self) -> usize {
        self.size() + self.size_sections
    }

    /// True if `data` starts with the throwing stub body
    #[must_use]
    pub fn is_stub(data: &[u8]) -> bool {
        data.starts_with(&STUB_BODY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiny() {
        let data = [0x16, 0x00, 0x2A, 0x00, 0x00, 0x00];
        let body = MethodBody::from(&data).unwrap();

        assert!(!body.is_fat);
        assert_eq!(body.size_code, 5);
        assert_eq!(body.total_size(), 6);
    }

    #[test]
    fn stub_is_tiny() {
        let body = MethodBody::from(&STUB_BODY).unwrap();

        assert_eq!(body.size_code, 3);
        assert_eq!(body.total_size(), 4);
        assert!(MethodBody::is_stub(&STUB_BODY));
        assert!(!MethodBody::is_stub(&[0x0E, 0x00, 0x14]));
    }

    #[test]
    fn fat_with_exceptions() {
        #[rustfmt::skip]
        let mut data = vec![
            0x1B, 0x30, 0x02, 0x00,
            0x05, 0x00, 0x00, 0x00,
            0x01, 0x00, 0x00, 0x11,
            0x00, 0x00, 0x00, 0x00, 0x2A,
            // padding to a 4-byte boundary
            0x00, 0x00, 0x00,
            // small EH section with one clause
            0x01, 0x10, 0x00, 0x00,
        ];
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(&[0xFF; 8]);

        let body = MethodBody::from(&data).unwrap();
        assert!(body.is_fat);
        assert!(body.is_init_local);
        assert_eq!(body.max_stack, 2);
        assert_eq!(body.size(), 17);
        assert_eq!(body.local_var_sig_token, 0x1100_0001);
        assert_eq!(body.exception_clauses, 1);
        assert_eq!(body.total_size(), 36);
    }

    #[test]
    fn fat_section_truncated() {
        #[rustfmt::skip]
        let data = [
            0x0B, 0x30, 0x08, 0x00,
            0x01, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x2A, 0x00, 0x00, 0x00,
            0x41, 0x1C, 0x00, 0x00,
        ];
        assert!(MethodBody::from(&data).is_err());
    }

    #[test]
    fn invalid() {
        assert!(MethodBody::from(&[]).is_err());
        assert!(MethodBody::from(&[0x00]).is_err());
        assert!(MethodBody::from(&[0x1A]).is_err());
    }
}

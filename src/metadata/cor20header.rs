//! CLR 2.0 runtime header (ECMA-335 II.25.3.3).

use crate::{file::parser::Parser, Error::OutOfBounds, Result};

/// The main header of CIL, located at the beginning of the `IMAGE_DIRECTORY_ENTRY_COM_DESCRIPTOR`
/// data directory of PE files.
///
/// Only the fields the trimming engine consumes are kept; the remaining directory entries
/// (resources, strong name, vtable fixups, ...) are skipped over.
pub struct Cor20Header {
    /// Size of header in bytes, always 72
    pub cb: u32,
    /// The minimum version of runtime required to run this program
    pub major_runtime_version: u16,
    /// The minor portion of the version
    pub minor_runtime_version: u16,
    /// RVA of the `MetaData`
    pub meta_data_rva: u32,
    /// Size of the `MetaData`
    pub meta_data_size: u32,
    /// Flags describing this runtime image
    pub flags: u32,
    /// Token for the `MethodDef` or File of the entry point for the image
    pub entry_point_token: u32,
    /// RVA of the ReadyToRun header, 0 for IL-only images
    pub managed_native_header_rva: u32,
    /// Size of the ReadyToRun header
    pub managed_native_header_size: u32,
}

impl Cor20Header {
    /// Offset of `Flags` within the header
    pub const FLAGS_OFFSET: usize = 16;
    /// Offset of the `ManagedNativeHeader` directory within the header
    pub const MANAGED_NATIVE_HEADER_OFFSET: usize = 64;
    /// `COMIMAGE_FLAGS_IL_LIBRARY`, set on ReadyToRun images
    pub const FLAG_IL_LIBRARY: u32 = 0x0000_0004;

    /// Create a `Cor20Header` object from a sequence of bytes
    ///
    /// # Errors
    /// Returns an error if the data is too short, the size field is not 72, or the metadata
    /// directory is empty.
    pub fn read(data: &[u8]) -> Result<Cor20Header> {
        if data.len() < 72 {
            return Err(OutOfBounds);
        }

        let mut parser = Parser::new(data);

        let cb = parser.read_le::<u32>()?;
        if cb != 72 {
            return Err(malformed_error!(
                "Invalid CLR header size: expected 72, got {}",
                cb
            ));
        }

        let major_runtime_version = parser.read_le::<u16>()?;
        let minor_runtime_version = parser.read_le::<u16>()?;
        let meta_data_rva = parser.read_le::<u32>()?;
        let meta_data_size = parser.read_le::<u32>()?;
        if meta_data_rva == 0 || meta_data_size == 0 {
            return Err(malformed_error!("CLR header has an empty metadata directory"));
        }

        let flags = parser.read_le::<u32>()?;
        let entry_point_token = parser.read_le::<u32>()?;

        parser.seek(Self::MANAGED_NATIVE_HEADER_OFFSET)?;
        let managed_native_header_rva = parser.read_le::<u32>()?;
        let managed_native_header_size = parser.read_le::<u32>()?;

        Ok(Cor20Header {
            cb,
            major_runtime_version,
            minor_runtime_version,
            meta_data_rva,
            meta_data_size,
            flags,
            entry_point_token,
            managed_native_header_rva,
            managed_native_header_size,
        })
    }

    /// True if the image carries precompiled ReadyToRun code
    #[must_use]
    pub fn is_ready_to_run(&self) -> bool {
        self.managed_native_header_rva != 0
    }
}

//! PE image access for managed modules.
//!
//! [`File`] owns the raw bytes of a module (memory-mapped from disk or held in memory) together
//! with the `goblin` parse of its PE headers, and answers the few questions the trimming
//! engine has about the container: where the CLR runtime header lives and how relative
//! virtual addresses map onto file offsets.
//!
//! Loading fails unless the image carries a CLR runtime header directory, which makes
//! [`File::is_managed`] the format sniff used when scanning a deployment.
//!
//! # Examples
//!
//! ```rust,no_run
//! use dotslim::File;
//! use std::path::Path;
//!
//! let file = File::from_file(Path::new("app/Library.dll"))?;
//! let (clr_rva, clr_size) = file.clr()?;
//! let clr_offset = file.rva_to_offset(clr_rva)?;
//! let clr_data = file.data_slice(clr_offset, clr_size)?;
//! println!("CLR header starts with: {:02x?}", &clr_data[0..8]);
//! # Ok::<(), dotslim::Error>(())
//! ```

pub mod io;
pub mod parser;

mod memory;
mod physical;

use std::path::Path;

use goblin::pe::{section_table::SectionTable, PE};
use memory::Memory;
use ouroboros::self_referencing;
use physical::Physical;

use crate::{
    Error::{Empty, GoblinErr},
    Result,
};

/// Backend trait for file data sources.
///
/// Abstracts over where the image bytes live, so that the same [`File`] logic serves both
/// memory-mapped modules on disk and buffers built in memory.
pub trait Backend: Send + Sync {
    /// Returns the entire data buffer.
    fn data(&self) -> &[u8];

    /// Returns the total length of the data buffer.
    fn len(&self) -> usize {
        self.data().len()
    }

    /// Returns a bounds-checked slice of the data.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if the requested range exceeds the data.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let Some(offset_end) = offset.checked_add(len) else {
            return Err(out_of_bounds_error!());
        };

        self.data()
            .get(offset..offset_end)
            .ok_or(out_of_bounds_error!())
    }
}

#[self_referencing]
/// A loaded PE image that is known to contain .NET metadata.
///
/// The parsed PE borrows from the owned data, which is why the struct is built through
/// `ouroboros`.
pub struct File {
    /// The underlying data source (memory or file).
    data: Box<dyn Backend>,
    /// The parsed PE structure, referencing the data.
    #[borrows(data)]
    #[not_covariant]
    pe: PE<'this>,
}

impl File {
    /// Loads a PE file from the given path using a read-only memory map.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, is empty, is not a PE image, or has no
    /// CLR runtime header.
    pub fn from_file(file: &Path) -> Result<File> {
        let input = Physical::new(file)?;

        Self::load(input)
    }

    /// Loads a PE file from a memory buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is empty, is not a PE image, or has no CLR runtime
    /// header.
    pub fn from_mem(data: Vec<u8>) -> Result<File> {
        let input = Memory::new(data);

        Self::load(input)
    }

    /// Format sniff: `true` if `path` is a readable PE image with a CLR runtime header.
    ///
    /// Native libraries and anything else that merely shares the module extension fail this
    /// test.
    #[must_use]
    pub fn is_managed(path: &Path) -> bool {
        match Self::from_file(path) {
            Ok(_) => true,
            Err(error) => {
                log::debug!("{} is not a managed module - {}", path.display(), error);
                false
            }
        }
    }

    fn load<T: Backend + 'static>(data: T) -> Result<File> {
        if data.len() == 0 {
            return Err(Empty);
        }

        let data = Box::new(data);

        File::try_new(data, |data| match PE::parse(data.data()) {
            Ok(pe) => match pe.header.optional_header {
                Some(optional_header) => {
                    if optional_header
                        .data_directories
                        .get_clr_runtime_header()
                        .is_none()
                    {
                        Err(malformed_error!(
                            "File does not have a CLR runtime header directory"
                        ))
                    } else {
                        Ok(pe)
                    }
                }
                None => Err(malformed_error!("File does not have an OptionalHeader")),
            },
            Err(error) => Err(GoblinErr(error)),
        })
    }

    /// Returns the total size of the loaded image in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.with_data(|data| data.len())
    }

    /// Returns `true` if the image has no data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the raw bytes of the image.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.with_data(|data| data.data())
    }

    /// Returns a bounds-checked slice of the image.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if the range exceeds the image.
    pub fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.with_data(|data| data.data_slice(offset, len))
    }

    /// Returns the RVA and size of the CLR runtime header.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory is missing, which [`File::from_file`] already rules
    /// out for any successfully loaded image.
    pub fn clr(&self) -> Result<(usize, usize)> {
        self.with_pe(|pe| {
            let Some(optional_header) = pe.header.optional_header else {
                return Err(malformed_error!("File does not have an OptionalHeader"));
            };

            match optional_header.data_directories.get_clr_runtime_header() {
                Some(clr_dir) => Ok((clr_dir.virtual_address as usize, clr_dir.size as usize)),
                None => Err(malformed_error!(
                    "File does not have a CLR runtime header directory"
                )),
            }
        })
    }

    /// Returns the section headers of the image.
    #[must_use]
    pub fn sections(&self) -> Vec<SectionTable> {
        self.with_pe(|pe| pe.sections.clone())
    }

    /// Converts a relative virtual address into a file offset.
    ///
    /// # Errors
    ///
    /// Returns an error if no section maps the RVA onto raw file data.
    pub fn rva_to_offset(&self, rva: usize) -> Result<usize> {
        let rva_u32 =
            u32::try_from(rva).map_err(|_| malformed_error!("RVA too large to fit in u32: {}", rva))?;

        self.with_pe(|pe| section_offset(&pe.sections, rva_u32))
    }
}

/// Maps `rva` onto a file offset through the given section headers.
///
/// # Errors
///
/// Returns an error if no section maps the RVA onto raw file data.
pub fn section_offset(sections: &[SectionTable], rva: u32) -> Result<usize> {
    for section in sections {
        let span = section.virtual_size.max(section.size_of_raw_data);
        let Some(section_max) = section.virtual_address.checked_add(span) else {
            return Err(malformed_error!(
                "Section malformed, causing integer overflow - {} + {}",
                section.virtual_address,
                span
            ));
        };

        if section.virtual_address <= rva && rva < section_max {
            let delta = rva - section.virtual_address;
            if delta >= section.size_of_raw_data {
                return Err(malformed_error!(
                    "RVA 0x{:X} has no raw data in its section",
                    rva
                ));
            }

            return Ok(section.pointer_to_raw_data as usize + delta as usize);
        }
    }

    Err(malformed_error!(
        "RVA could not be converted to offset - {}",
        rva
    ))
}

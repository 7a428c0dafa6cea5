//! Metadata streams.
//!
//! Only the streams the trimming engine consumes are parsed:
//!
//! - **`#Strings`** ([`Strings`]) - UTF-8 identifier heap holding type and method names
//! - **`#~`** ([`TablesHeader`]) - the compressed metadata tables
//!
//! `#Blob`, `#GUID` and `#US` are located through their [`StreamHeader`] but never decoded,
//! since slimming leaves signatures, identities and literals untouched.
//!
//! # References
//!
//! - ECMA-335 6th Edition, Partition II, Section 24.2.2 - Stream Headers

mod streamheader;
mod strings;
mod tablesheader;

pub use streamheader::StreamHeader;
pub use strings::Strings;
pub use tablesheader::TablesHeader;

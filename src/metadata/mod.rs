//! Metadata parsing and rewriting for managed modules.
//!
//! This module reads just enough of the ECMA-335 metadata to decide which type definitions
//! of a module may be slimmed, and patches method bodies and `MethodDef` RVAs in place.
//!
//! # Key Components
//!
//! - [`cor20header`] - the CLI header pointing at the metadata
//! - [`root`] - metadata root and stream directory
//! - [`streams`] - the `#Strings` heap and the `#~` tables stream
//! - [`tables`] - table schema, coded indices and typed rows
//! - [`method`] - method body headers and attribute flags
//! - [`module`] - [`module::ManagedModule`], the loaded and mutable module
//! - [`token`] - metadata tokens
//!
//! # Examples
//!
//! ```rust,no_run
//! use dotslim::ManagedModule;
//!
//! let module = ManagedModule::from_file("app/Library.dll".as_ref())?;
//! for ty in module.types() {
//!     println!("{} ({} methods)", ty.full_name(), ty.methods.len());
//! }
//! # Ok::<(), dotslim::Error>(())
//! ```

/// Implementation of the Header of CIL
pub mod cor20header;
/// Implementation of method body headers and method flags
pub mod method;
/// Implementation of a loaded, mutable managed module
pub mod module;
/// Implementation of the root metadata structure
pub mod root;
/// Implementation of the metadata streams that are consumed
pub mod streams;
/// Implementation of the .NET metadata table schema
pub mod tables;
/// Commonly used metadata token type
pub mod token;

// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]
//#![deny(unsafe_code)]
// - 'file/physical.rs' uses mmap to map a file into memory

//! # dotslim
//!
//! Trims a published .NET application down to what it actually uses at runtime.
//!
//! The application is launched under an EventPipe trace. Every module the runtime probes,
//! resolves or loads, and every type it loads, is recorded. Afterwards the deployment
//! directory is reduced in three steps:
//!
//! - **Module diff** - managed modules on disk that were never observed are deleted,
//!   together with their paired symbol files
//! - **Module slimming** - in every used module, the methods of types that were never
//!   loaded get a minimal body that throws, constructors excepted
//! - **Manifest tidy** - entries for the deleted modules are removed from the `runtime`
//!   maps of the `*.deps.json` dependency manifests
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dotslim::prelude::*;
//!
//! let launcher = Launcher::new("dotnet").arg("publish/App.dll").working_dir("publish");
//! let report = Trimmer::new(TrimOptions::new("publish"))
//!     .run(&launcher, &SessionConfig::default())?;
//!
//! println!(
//!     "Removed {} modules, {} bytes",
//!     report.removed_modules.len(),
//!     report.freed_bytes
//! );
//! # Ok::<(), dotslim::Error>(())
//! ```
//!
//! A trace recorded earlier can be replayed instead of launching the application:
//!
//! ```rust,no_run
//! use dotslim::prelude::*;
//!
//! let mut usage = Usage::default();
//! let trace = std::fs::File::open("app.nettrace")?;
//! TraceCollector::new(&mut usage).consume(trace)?;
//!
//! let report = Trimmer::new(TrimOptions::new("publish").with_dry_run(true)).trim(&usage)?;
//! for module in &report.removed_modules {
//!     println!("unused: {}", module.display());
//! }
//! # Ok::<(), dotslim::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`trace`] - nettrace decoding and the used-module and used-type sets
//! - [`diagnostics`] - the diagnostics IPC protocol for starting sessions (Unix only)
//! - [`launcher`] - starting, cancelling and stopping the traced process
//! - [`trim`] - module diff, slimming, manifest tidy and the [`Trimmer`] pipeline
//! - [`metadata`] - the ECMA-335 subset needed to rewrite method bodies
//! - [`Error`] and [`Result`] - error handling

#[macro_use]
pub(crate) mod error;
pub(crate) mod file;

/// Shared functionality which is used in unit- and integration-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types.
///
/// # Example
///
/// ```rust,no_run
/// use dotslim::prelude::*;
///
/// let usage = Usage::default();
/// let report = Trimmer::new(TrimOptions::new("publish").with_dry_run(true)).trim(&usage)?;
/// println!("{} modules unused", report.removed_modules.len());
/// # Ok::<(), dotslim::Error>(())
/// ```
pub mod prelude;

/// Definitions, parsing and rewriting of CIL metadata based on ECMA-355
///
/// Only the parts needed to enumerate types and methods and to replace method bodies in
/// place are implemented.
///
/// # Key Components
///
/// - [`metadata::cor20header`] - CLR 2.0 header information
/// - [`metadata::root`] - Metadata root and stream directory
/// - [`metadata::streams`] - the `#Strings` heap and the tables stream header
/// - [`metadata::tables`] - row layout of the tables that are read
/// - [`metadata::method`] - method body headers and the stub body
/// - [`metadata::module`] - [`ManagedModule`], a loaded module that can be slimmed
///
/// # Examples
///
/// ```rust,no_run
/// use dotslim::ManagedModule;
/// use std::collections::HashSet;
///
/// let mut module = ManagedModule::from_file("publish/Lib.dll".as_ref())?;
/// let used: HashSet<String> = ["Lib.Service".to_string()].into_iter().collect();
///
/// let outcome = module.slim(&used)?;
/// if module.is_modified() {
///     module.save()?;
/// }
/// println!("{} methods stubbed", outcome.methods_stubbed);
/// # Ok::<(), dotslim::Error>(())
/// ```
pub mod metadata;

/// Trace collection and the observed usage
///
/// # Key Types
///
/// - [`trace::Usage`] - the used-module and used-type sets
/// - [`trace::TraceCollector`] - fills a [`trace::Usage`] from a nettrace stream
/// - [`trace::TraceRecord`] - a runtime event reduced to what trimming needs
pub mod trace;

/// Diagnostics IPC client and reverse server
#[cfg(unix)]
pub mod diagnostics;

/// Launching, cancelling and stopping the traced process
pub mod launcher;

/// The trimming phases and the pipeline that sequences them
pub mod trim;

/// `dotslim` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
///
/// # Examples
///
/// ```rust,no_run
/// use dotslim::{ManagedModule, Result};
///
/// fn load(path: &str) -> Result<ManagedModule> {
///     ManagedModule::from_file(std::path::Path::new(path))
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// `dotslim` Error type
///
/// # Examples
///
/// ```rust,no_run
/// use dotslim::{Error, ManagedModule};
///
/// match ManagedModule::from_file(std::path::Path::new("publish/native.dll")) {
///     Ok(_) => println!("Loaded successfully"),
///     Err(Error::NotSupported) => println!("Not a managed module"),
///     Err(Error::Malformed { message, .. }) => println!("Malformed: {}", message),
///     Err(e) => println!("Error: {}", e),
/// }
/// ```
pub use error::Error;

/// Low-level file access and parsing.
///
/// [`File::is_managed`] is the sniff used to tell managed modules from native ones.
///
/// # Example
///
/// ```rust,no_run
/// use dotslim::File;
///
/// if File::is_managed(std::path::Path::new("publish/App.dll")) {
///     println!("managed");
/// }
/// ```
pub use file::{parser::Parser, File};

pub use launcher::{CancellationToken, Launcher, StopHandle, TargetProcess};
pub use metadata::module::{ManagedModule, SlimOutcome};
pub use trace::{TraceCollector, Usage};
pub use trim::{TrimOptions, TrimReport, Trimmer};

//! Reducing a deployment to what was used.
//!
//! The phases are usable on their own, but are normally sequenced by [`Trimmer`]:
//!
//! 1. [`diff`] - managed modules on disk minus the observed ones, then deletion
//! 2. [`slim`] - stub out the methods of unused types in every used module
//! 3. [`manifest`] - drop deleted modules from the dependency manifests

pub mod diff;
pub mod manifest;
mod options;
mod pipeline;
pub mod slim;

pub use diff::{ModuleDiff, Removal};
pub use manifest::ManifestOutcome;
pub use options::TrimOptions;
pub use pipeline::{LogListener, NullListener, TrimListener, TrimReport, Trimmer};
pub use slim::{SkipReason, SkippedModule, SlimReport, SlimmedModule};

//! # dotslim Prelude
//!
//! The types needed for the common tracing and trimming workflows.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all dotslim operations
pub use crate::Error;

/// The result type used throughout dotslim
pub use crate::Result;

// ================================================================================================
// Tracing
// ================================================================================================

/// Observed usage and the collector that fills it
pub use crate::trace::{TraceCollector, TraceSummary, Usage};

/// Diagnostics session configuration
#[cfg(unix)]
pub use crate::diagnostics::{ProviderConfig, SessionConfig};

/// Process control
pub use crate::launcher::{CancellationToken, Launcher, StopHandle, TargetProcess};

// ================================================================================================
// Trimming
// ================================================================================================

/// Pipeline, configuration and progress reporting
pub use crate::trim::{
    LogListener, NullListener, TrimListener, TrimOptions, TrimReport, Trimmer,
};

/// Per-phase outcomes
pub use crate::trim::{ManifestOutcome, ModuleDiff, SkipReason, SlimReport};

// ================================================================================================
// Metadata
// ================================================================================================

/// A loaded managed module and the outcome of slimming it
pub use crate::metadata::module::{ManagedModule, SlimOutcome};

/// Low-level file parsing utilities
pub use crate::{File, Parser};

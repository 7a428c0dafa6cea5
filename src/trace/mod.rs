//! Trace collection: from a nettrace stream to the sets of used modules and types.
//!
//! # Key Components
//!
//! - [`nettrace`] - streaming decoder for the EventPipe serialization format
//! - [`events`] - classification of runtime events into [`TraceRecord`]s
//! - [`Usage`] - the accumulated used-module and used-type sets
//! - [`TraceCollector`] - drives the decoder and fills a [`Usage`]

mod collector;
pub mod events;
pub mod nettrace;
mod usage;

pub use collector::{TraceCollector, TraceSummary};
pub use events::{RecordKind, TraceRecord};
pub use usage::Usage;

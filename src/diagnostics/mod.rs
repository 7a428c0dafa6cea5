//! Diagnostics IPC with a running .NET runtime over Unix domain sockets.
//!
//! Two transports are supported. [`DiagnosticsClient`] connects to the socket every runtime
//! opens in its temporary directory, which is enough to trace an already running process.
//! [`ReverseServer`] is a listening socket the runtime connects to at startup when launched
//! with `DOTNET_DiagnosticPorts`; combined with the `suspend` flag this allows a session to
//! be started before the first managed instruction runs.
//!
//! # Examples
//!
//! ```rust,no_run
//! use dotslim::diagnostics::{DiagnosticsClient, SessionConfig};
//! use std::io::Read;
//!
//! let mut session = DiagnosticsClient::new(4242).start_session(&SessionConfig::default())?;
//! let mut trace = Vec::new();
//! session.read_to_end(&mut trace)?;
//! # Ok::<(), dotslim::Error>(())
//! ```

mod client;
pub mod ipc;
mod reverse;
mod session;

pub use client::{collect_tracing, resume_runtime, stop_tracing, DiagnosticsClient};
pub use ipc::{IpcHeader, IpcMessage};
pub use reverse::{Advertise, ReverseServer};
pub use session::{EventSession, ProviderConfig, SessionConfig, LEVEL_INFORMATIONAL};

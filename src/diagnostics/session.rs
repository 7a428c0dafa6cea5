use std::{io::Read, time::Duration};

use crate::trace::events::RUNTIME_PROVIDER;

/// Informational verbosity
pub const LEVEL_INFORMATIONAL: u32 = 4;

/// One provider enabled in a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Provider name
    pub name: String,
    /// Keyword mask
    pub keywords: u64,
    /// Maximum level
    pub level: u32,
    /// Provider specific filter data
    pub filter: String,
}

impl ProviderConfig {
    /// `name` with every keyword at informational level
    #[must_use]
    pub fn new(name: &str) -> ProviderConfig {
        ProviderConfig {
            name: name.to_string(),
            keywords: u64::MAX,
            level: LEVEL_INFORMATIONAL,
            filter: String::new(),
        }
    }
}

/// Parameters of a tracing session.
///
/// The default enables the runtime provider with full keyword coverage at informational
/// level, a 256 MB circular buffer and rundown at session end.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Providers to enable
    pub providers: Vec<ProviderConfig>,
    /// Circular buffer size in MB
    pub circular_buffer_mb: u32,
    /// Ask the runtime for rundown events when the session ends
    pub request_rundown: bool,
    /// How long to wait for the runtime to connect to a reverse port
    pub connect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            providers: vec![ProviderConfig::new(RUNTIME_PROVIDER)],
            circular_buffer_mb: 256,
            request_rundown: true,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl SessionConfig {
    /// Replace the provider list
    #[must_use]
    pub fn with_providers(mut self, providers: Vec<ProviderConfig>) -> Self {
        self.providers = providers;
        self
    }

    /// Set the circular buffer size
    #[must_use]
    pub fn with_buffer_size(mut self, megabytes: u32) -> Self {
        self.circular_buffer_mb = megabytes;
        self
    }

    /// Enable or disable rundown
    #[must_use]
    pub fn with_rundown(mut self, enabled: bool) -> Self {
        self.request_rundown = enabled;
        self
    }

    /// Set the reverse port connect timeout
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// A started session: the connection the runtime streams nettrace data over.
pub struct EventSession<S> {
    stream: S,
    session_id: u64,
}

impl<S: Read> EventSession<S> {
    pub(crate) fn new(stream: S, session_id: u64) -> EventSession<S> {
        EventSession { stream, session_id }
    }

    /// Id the runtime assigned to the session
    #[must_use]
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// The underlying connection
    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: Read> Read for EventSession<S> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stream.read(buf)
    }
}

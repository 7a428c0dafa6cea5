use std::{
    collections::HashMap,
    io::{BufReader, Read},
    time::Duration,
};

use log::{debug, info};

use crate::{
    trace::{
        events::{RecordKind, TraceRecord},
        nettrace::NettraceReader,
        Usage,
    },
    Result,
};

#[cfg(unix)]
use crate::{
    diagnostics::{self, DiagnosticsClient, ReverseServer, SessionConfig},
    launcher::TargetProcess,
};

/// Counters over one consumed trace.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TraceSummary {
    /// Process id from the `Trace` object
    pub process_id: Option<i32>,
    /// Events decoded
    pub events: u64,
    /// Metadata entries registered
    pub metadata: u64,
    /// Classified records per kind
    pub records: HashMap<RecordKind, u64>,
    /// Events that carried no usage fact
    pub ignored: u64,
    /// Records that only carried blank values
    pub blank: u64,
}

impl TraceSummary {
    /// Number of records of `kind`
    #[must_use]
    pub fn count(&self, kind: RecordKind) -> u64 {
        self.records.get(&kind).copied().unwrap_or(0)
    }
}

/// Drains a nettrace stream into a [`Usage`].
///
/// The collector only mutates the usage it was given; it performs no filesystem access.
/// Consumption is strictly sequential, and any decode failure ends it with an error so a
/// partial trace is never mistaken for a complete one.
///
/// # Examples
///
/// ```rust,no_run
/// use dotslim::trace::{TraceCollector, Usage};
///
/// let mut usage = Usage::default();
/// let file = std::fs::File::open("session.nettrace")?;
/// let summary = TraceCollector::new(&mut usage).consume(file)?;
///
/// println!("{} events, {} modules", summary.events, usage.modules().len());
/// # Ok::<(), dotslim::Error>(())
/// ```
pub struct TraceCollector<'a> {
    usage: &'a mut Usage,
}

impl<'a> TraceCollector<'a> {
    /// Collect into `usage`
    pub fn new(usage: &'a mut Usage) -> TraceCollector<'a> {
        TraceCollector { usage }
    }

    /// Decode `reader` until the stream ends.
    ///
    /// # Errors
    /// Returns an error on I/O failure, truncation or any malformed object or event.
    pub fn consume<R: Read>(&mut self, reader: R) -> Result<TraceSummary> {
        let mut reader = NettraceReader::new(BufReader::new(reader))?;
        let mut summary = TraceSummary::default();

        while let Some(event) = reader.next_event()? {
            summary.events += 1;

            match TraceRecord::decode(&event.provider, event.event_id, &event.payload)? {
                Some(record) => {
                    *summary.records.entry(record.kind()).or_default() += 1;
                    if !self.usage.record(&record) {
                        summary.blank += 1;
                    }
                }
                None => summary.ignored += 1,
            }
        }

        summary.metadata = reader.stats().metadata;
        summary.process_id = reader.info().map(|info| info.process_id);

        debug!(
            "Trace drained: {} events, {} metadata, {} bytes",
            summary.events,
            summary.metadata,
            reader.stats().bytes
        );

        Ok(summary)
    }

    /// Open a session in the already running process `pid` and consume it until the process
    /// exits.
    ///
    /// # Errors
    /// Returns an error if no diagnostics socket exists for `pid`, the runtime rejects the
    /// session, or the stream fails to decode.
    #[cfg(unix)]
    pub fn attach(&mut self, pid: u32, config: &SessionConfig) -> Result<TraceSummary> {
        let session = DiagnosticsClient::new(pid).start_session(config)?;
        info!("Tracing process {} (session {:#x})", pid, session.session_id());

        self.consume(session)
    }

    /// Trace a process that was started suspended on `server`'s reverse port.
    ///
    /// The first runtime connection carries the session, the second resumes the runtime, so
    /// no startup event is missed. Returns once the process closed the stream.
    ///
    /// # Errors
    /// Returns an error if the runtime never connects within the configured timeout, exits
    /// first, rejects a command, or the stream fails to decode.
    #[cfg(unix)]
    pub fn launched(
        &mut self,
        target: &TargetProcess,
        server: &ReverseServer,
        config: &SessionConfig,
    ) -> Result<TraceSummary> {
        let is_alive = || target.is_running();

        let (advertise, stream) = server.accept(config.connect_timeout, is_alive)?;
        debug!(
            "Runtime {} connected (pid {})",
            advertise.cookie, advertise.process_id
        );
        let session = diagnostics::collect_tracing(stream, config)?;
        info!(
            "Tracing process {} (session {:#x})",
            target.pid(),
            session.session_id()
        );

        let (_, mut resume) = server.accept(config.connect_timeout, is_alive)?;
        diagnostics::resume_runtime(&mut resume)?;
        drop(resume);

        let summary = self.consume(session)?;
        target.wait_timeout(Duration::from_secs(5))?;

        Ok(summary)
    }
}

use std::{
    env, fs,
    io::{Read, Write},
    os::unix::net::UnixStream,
    path::{Path, PathBuf},
};

use log::debug;

use crate::{
    diagnostics::{ipc, EventSession, IpcMessage, SessionConfig},
    file::parser::Parser,
    Error, Result,
};

/// Start a session on a fresh connection to the runtime.
///
/// The connection turns into the event stream once the runtime accepted the command.
///
/// # Errors
/// Returns an error on I/O failure or if the runtime rejects the session.
pub fn collect_tracing<S: Read + Write>(
    mut stream: S,
    config: &SessionConfig,
) -> Result<EventSession<S>> {
    let response = ipc::request(&mut stream, &IpcMessage::collect_tracing(config))?;
    let session_id = Parser::new(&response).read_le::<u64>()?;

    Ok(EventSession::new(stream, session_id))
}

/// Resume a runtime that was started suspended.
///
/// # Errors
/// Returns an error on I/O failure or if the runtime rejects the command.
pub fn resume_runtime<S: Read + Write>(stream: &mut S) -> Result<()> {
    ipc::request(stream, &IpcMessage::resume_runtime())?;
    Ok(())
}

/// Stop the session `session_id` from a second connection.
///
/// # Errors
/// Returns an error on I/O failure or if the runtime rejects the command.
pub fn stop_tracing<S: Read + Write>(stream: &mut S, session_id: u64) -> Result<()> {
    ipc::request(stream, &IpcMessage::stop_tracing(session_id))?;
    Ok(())
}

/// Client for the diagnostics socket a runtime listens on by default.
///
/// The runtime creates `dotnet-diagnostic-{pid}-{key}-socket` in its temporary directory and
/// handles one command per connection.
pub struct DiagnosticsClient {
    pid: u32,
    socket_dir: PathBuf,
}

impl DiagnosticsClient {
    /// Client for process `pid`, looking for the socket in `$TMPDIR`
    #[must_use]
    pub fn new(pid: u32) -> DiagnosticsClient {
        DiagnosticsClient {
            pid,
            socket_dir: env::temp_dir(),
        }
    }

    /// Look for the socket in `dir` instead
    #[must_use]
    pub fn with_socket_dir(mut self, dir: &Path) -> DiagnosticsClient {
        self.socket_dir = dir.to_path_buf();
        self
    }

    /// Locate the diagnostics socket of the process.
    ///
    /// When several sockets match, the one with the greatest key is taken since the key
    /// grows with process start time.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be read or no socket matches.
    pub fn socket_path(&self) -> Result<PathBuf> {
        let prefix = format!("dotnet-diagnostic-{}-", self.pid);

        let mut found: Option<(u64, PathBuf)> = None;
        for entry in fs::read_dir(&self.socket_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(key) = name
                .to_str()
                .and_then(|name| name.strip_prefix(&prefix))
                .and_then(|rest| rest.strip_suffix("-socket"))
                .and_then(|key| key.parse::<u64>().ok())
            else {
                continue;
            };

            if found.as_ref().map_or(true, |(current, _)| key > *current) {
                found = Some((key, entry.path()));
            }
        }

        found.map(|(_, path)| path).ok_or_else(|| {
            Error::Error(format!(
                "No diagnostics socket for process {} in {}",
                self.pid,
                self.socket_dir.display()
            ))
        })
    }

    fn connect(&self) -> Result<UnixStream> {
        let path = self.socket_path()?;
        debug!("Connecting to {}", path.display());
        Ok(UnixStream::connect(path)?)
    }

    /// Start a session; the returned stream ends when the process exits.
    ///
    /// # Errors
    /// Returns an error if the socket cannot be found or the runtime rejects the session.
    pub fn start_session(&self, config: &SessionConfig) -> Result<EventSession<UnixStream>> {
        collect_tracing(self.connect()?, config)
    }

    /// Resume the runtime if it waits at startup.
    ///
    /// # Errors
    /// Returns an error if the socket cannot be found or the runtime rejects the command.
    pub fn resume_runtime(&self) -> Result<()> {
        resume_runtime(&mut self.connect()?)
    }

    /// Stop a session started earlier.
    ///
    /// # Errors
    /// Returns an error if the socket cannot be found or the runtime rejects the command.
    pub fn stop_session(&self, session_id: u64) -> Result<()> {
        stop_tracing(&mut self.connect()?, session_id)
    }
}

#[cfg(test)]
mod tests {
    use std::{os::unix::net::UnixListener, thread};

    use super::*;
    use crate::diagnostics::ipc::HEADER_SIZE;

    #[test]
    fn session_over_socket_pair() {
        let (mut runtime, client) = UnixStream::pair().unwrap();

        let server = thread::spawn(move || {
            let request = IpcMessage::read_from(&mut runtime).unwrap();
            IpcMessage::new(0xFF, 0x00, 7u64.to_le_bytes().to_vec())
                .write_to(&mut runtime)
                .unwrap();
            runtime.write_all(b"Nettrace").unwrap();
            request
        });

        let mut session = collect_tracing(client, &SessionConfig::default()).unwrap();
        assert_eq!(session.session_id(), 7);

        let mut rest = Vec::new();
        session.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"Nettrace");

        let request = server.join().unwrap();
        assert_eq!((request.command_set, request.command_id), (0x02, 0x03));
    }

    #[test]
    fn rejected_resume() {
        let (mut runtime, mut client) = UnixStream::pair().unwrap();

        let server = thread::spawn(move || {
            let request = IpcMessage::read_from(&mut runtime).unwrap();
            IpcMessage::new(0xFF, 0xFF, 0x8000_4005u32.to_le_bytes().to_vec())
                .write_to(&mut runtime)
                .unwrap();
            request
        });

        match resume_runtime(&mut client) {
            Err(Error::Ipc { hresult }) => assert_eq!(hresult, 0x8000_4005),
            other => panic!("unexpected {:?}", other),
        }
        let request = server.join().unwrap();
        assert_eq!(request.to_bytes().unwrap().len(), HEADER_SIZE);
    }

    #[test]
    fn finds_socket_by_pid() {
        let dir = tempfile::tempdir().unwrap();
        let _sockets: Vec<_> = ["4242-100", "4242-200", "42-300", "4242-abc"]
            .iter()
            .map(|key| {
                UnixListener::bind(dir.path().join(format!("dotnet-diagnostic-{key}-socket")))
                    .unwrap()
            })
            .collect();

        let client = DiagnosticsClient::new(4242).with_socket_dir(dir.path());
        assert_eq!(
            client.socket_path().unwrap(),
            dir.path().join("dotnet-diagnostic-4242-200-socket")
        );

        let _later = UnixListener::bind(dir.path().join("dotnet-diagnostic-4242-1000-socket"))
            .unwrap();
        assert_eq!(
            client.socket_path().unwrap(),
            dir.path().join("dotnet-diagnostic-4242-1000-socket")
        );

        assert!(DiagnosticsClient::new(7)
            .with_socket_dir(dir.path())
            .socket_path()
            .is_err());
    }
}

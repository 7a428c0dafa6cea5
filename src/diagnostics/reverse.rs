use std::{
    io::{ErrorKind, Read},
    os::unix::net::{UnixListener, UnixStream},
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use tempfile::TempDir;
use uguid::Guid;

use crate::{file::parser::Parser, Error, Result};

/// Magic opening every reverse connection
pub const ADVERTISE_MAGIC: &[u8; 8] = b"ADVR_V1\0";
/// Size of the advertise message
pub const ADVERTISE_SIZE: usize = 34;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Advertise message sent by the runtime when it connects to a reverse port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Advertise {
    /// Runtime instance cookie
    pub cookie: Guid,
    /// Process id of the runtime
    pub process_id: u64,
}

impl Advertise {
    /// Read an advertise message.
    ///
    /// # Errors
    /// Returns an error on I/O failure or a wrong magic.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Advertise> {
        let mut data = [0u8; ADVERTISE_SIZE];
        reader.read_exact(&mut data)?;

        if &data[..ADVERTISE_MAGIC.len()] != ADVERTISE_MAGIC {
            return Err(malformed_error!("Invalid reverse diagnostics advertise magic"));
        }

        let mut parser = Parser::new(&data[ADVERTISE_MAGIC.len()..]);
        let mut cookie = [0u8; 16];
        cookie.copy_from_slice(parser.read_bytes(16)?);

        Ok(Advertise {
            cookie: Guid::from_bytes(cookie),
            process_id: parser.read_le::<u64>()?,
        })
    }
}

/// Listening socket a runtime connects back to at startup.
///
/// The socket lives in a private temporary directory that is removed with the server. Pass
/// [`ReverseServer::env_value`] to the child as `DOTNET_DiagnosticPorts`; the `suspend`
/// flag makes the runtime wait for a `ResumeRuntime` command before running any managed
/// code.
pub struct ReverseServer {
    _dir: TempDir,
    path: PathBuf,
    listener: UnixListener,
}

impl ReverseServer {
    /// Name of the environment variable that configures diagnostic ports
    pub const ENV_NAME: &'static str = "DOTNET_DiagnosticPorts";

    /// Bind a fresh socket.
    ///
    /// # Errors
    /// Returns an error if the directory or the socket cannot be created.
    pub fn bind() -> Result<ReverseServer> {
        let dir = tempfile::Builder::new().prefix("dotslim-").tempdir()?;
        let path = dir.path().join("diagnostics.sock");
        let listener = UnixListener::bind(&path)?;
        listener.set_nonblocking(true)?;

        Ok(ReverseServer {
            _dir: dir,
            path,
            listener,
        })
    }

    /// Socket path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Value for `DOTNET_DiagnosticPorts`
    #[must_use]
    pub fn env_value(&self) -> String {
        format!("{},connect,suspend", self.path.display())
    }

    /// Wait for the next runtime connection and read its advertise message.
    ///
    /// `is_alive` is polled while waiting so a child that exits without connecting is
    /// noticed before the timeout.
    ///
    /// # Errors
    /// Returns an error on timeout, when `is_alive` reports the child gone, or if the
    /// connection does not start with a valid advertise message.
    pub fn accept<F>(&self, timeout: Duration, mut is_alive: F) -> Result<(Advertise, UnixStream)>
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + timeout;

        loop {
            match self.listener.accept() {
                Ok((mut stream, _)) => {
                    stream.set_nonblocking(false)?;
                    let advertise = Advertise::read_from(&mut stream)?;
                    return Ok((advertise, stream));
                }
                Err(error) if error.kind() == ErrorKind::WouldBlock => {
                    if !is_alive() {
                        return Err(Error::Error(
                            "Target process exited before connecting to the diagnostics port"
                                .to_string(),
                        ));
                    }
                    if Instant::now() >= deadline {
                        return Err(Error::FileError(std::io::Error::new(
                            ErrorKind::TimedOut,
                            format!(
                                "Runtime did not connect to {} within {:?}",
                                self.path.display(),
                                timeout
                            ),
                        )));
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(error) if error.kind() == ErrorKind::Interrupted => {}
                Err(error) => return Err(error.into()),
            }
        }
    }
}

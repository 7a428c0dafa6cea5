//! Diagnostics IPC message framing.
//!
//! Every message starts with a 20 byte header: the `DOTNET_IPC_V1` magic, the total message
//! size, a command set, a command id and a reserved field. Commands are answered with a
//! message in the server command set, either `OK` with a command specific payload or
//! `Error` carrying an HRESULT.

use std::io::{Read, Write};

use crate::{
    diagnostics::SessionConfig,
    file::{io::read_le, parser::Parser},
    Error, Result,
};

/// Magic at the start of every IPC message
pub const IPC_MAGIC: &[u8; 14] = b"DOTNET_IPC_V1\0";
/// Size of [`IpcHeader`] on the wire
pub const HEADER_SIZE: usize = 20;

/// Command sets
pub mod command_set {
    /// EventPipe session control
    pub const EVENT_PIPE: u8 = 0x02;
    /// Process control
    pub const PROCESS: u8 = 0x04;
    /// Responses
    pub const SERVER: u8 = 0xFF;
}

/// EventPipe commands
pub mod event_pipe {
    /// Stop a running session
    pub const STOP_TRACING: u8 = 0x01;
    /// Start a session, with rundown control
    pub const COLLECT_TRACING_2: u8 = 0x03;
}

/// Process commands
pub mod process {
    /// Resume a runtime suspended at startup
    pub const RESUME_RUNTIME: u8 = 0x01;
}

/// Server responses
pub mod server {
    /// Command succeeded
    pub const OK: u8 = 0x00;
    /// Command failed, payload is a `u32` HRESULT
    pub const ERROR: u8 = 0xFF;
}

/// Output format requested from EventPipe
const FORMAT_NETTRACE: u32 = 1;

/// Decoded IPC header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IpcHeader {
    /// Total message size, header included
    pub size: u16,
    /// Command set
    pub command_set: u8,
    /// Command id within the set
    pub command_id: u8,
}

impl IpcHeader {
    /// Parse a header.
    ///
    /// # Errors
    /// Returns an error if the magic does not match or the size cannot hold the header.
    pub fn parse(data: &[u8; HEADER_SIZE]) -> Result<IpcHeader> {
        if &data[..IPC_MAGIC.len()] != IPC_MAGIC {
            return Err(malformed_error!("Invalid diagnostics IPC magic"));
        }

        let size = read_le::<u16>(&data[14..])?;
        if (size as usize) < HEADER_SIZE {
            return Err(malformed_error!("IPC message size too small - {}", size));
        }

        Ok(IpcHeader {
            size,
            command_set: data[16],
            command_id: data[17],
        })
    }
}

/// One IPC message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IpcMessage {
    /// Command set
    pub command_set: u8,
    /// Command id within the set
    pub command_id: u8,
    /// Command specific payload
    pub payload: Vec<u8>,
}

impl IpcMessage {
    /// A message with an arbitrary payload
    #[must_use]
    pub fn new(command_set: u8, command_id: u8, payload: Vec<u8>) -> IpcMessage {
        IpcMessage {
            command_set,
            command_id,
            payload,
        }
    }

    /// `CollectTracing2` for the providers in `config`
    #[must_use]
    pub fn collect_tracing(config: &SessionConfig) -> IpcMessage {
        let mut payload = Vec::new();
        payload.extend_from_slice(&config.circular_buffer_mb.to_le_bytes());
        payload.extend_from_slice(&FORMAT_NETTRACE.to_le_bytes());
        payload.push(u8::from(config.request_rundown));
        payload.extend_from_slice(&(config.providers.len() as u32).to_le_bytes());

        for provider in &config.providers {
            payload.extend_from_slice(&provider.keywords.to_le_bytes());
            payload.extend_from_slice(&provider.level.to_le_bytes());
            write_string(&mut payload, &provider.name);
            write_string(&mut payload, &provider.filter);
        }

        IpcMessage::new(
            command_set::EVENT_PIPE,
            event_pipe::COLLECT_TRACING_2,
            payload,
        )
    }

    /// `StopTracing` for `session_id`
    #[must_use]
    pub fn stop_tracing(session_id: u64) -> IpcMessage {
        IpcMessage::new(
            command_set::EVENT_PIPE,
            event_pipe::STOP_TRACING,
            session_id.to_le_bytes().to_vec(),
        )
    }

    /// `ResumeRuntime`
    #[must_use]
    pub fn resume_runtime() -> IpcMessage {
        IpcMessage::new(command_set::PROCESS, process::RESUME_RUNTIME, Vec::new())
    }

    /// Serialize header and payload.
    ///
    /// # Errors
    /// Returns an error if the message does not fit the 16 bit size field.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let size = u16::try_from(HEADER_SIZE + self.payload.len()).map_err(|_| {
            malformed_error!("IPC payload too large - {} bytes", self.payload.len())
        })?;

        let mut bytes = Vec::with_capacity(size as usize);
        bytes.extend_from_slice(IPC_MAGIC);
        bytes.extend_from_slice(&size.to_le_bytes());
        bytes.push(self.command_set);
        bytes.push(self.command_id);
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&self.payload);

        Ok(bytes)
    }

    /// Write the message to `writer`.
    ///
    /// # Errors
    /// Returns an error if serialization or the write fails.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.to_bytes()?)?;
        writer.flush()?;
        Ok(())
    }

    /// Read one message from `reader`.
    ///
    /// # Errors
    /// Returns an error on I/O failure or an invalid header.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<IpcMessage> {
        let mut header = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header)?;
        let header = IpcHeader::parse(&header)?;

        let mut payload = vec![0u8; header.size as usize - HEADER_SIZE];
        reader.read_exact(&mut payload)?;

        Ok(IpcMessage::new(
            header.command_set,
            header.command_id,
            payload,
        ))
    }

    /// Interpret the message as a response, returning the `OK` payload.
    ///
    /// # Errors
    /// Returns [`Error::Ipc`] for an error response and a malformed error for anything that
    /// is not a response.
    pub fn into_response(self) -> Result<Vec<u8>> {
        match (self.command_set, self.command_id) {
            (command_set::SERVER, server::OK) => Ok(self.payload),
            (command_set::SERVER, server::ERROR) => {
                let hresult = Parser::new(&self.payload).read_le::<u32>()?;
                Err(Error::Ipc { hresult })
            }
            (set, id) => Err(malformed_error!(
                "Unexpected IPC response - set {:#04x}, id {:#04x}",
                set,
                id
            )),
        }
    }
}

/// Send `message` and wait for its response payload.
///
/// # Errors
/// Returns an error on I/O failure or an error response.
pub fn request<S: Read + Write>(stream: &mut S, message: &IpcMessage) -> Result<Vec<u8>> {
    message.write_to(stream)?;
    IpcMessage::read_from(stream)?.into_response()
}

/// IPC string: `u32` character count including the terminator, then UTF-16LE. Empty strings
/// are a bare zero count.
fn write_string(out: &mut Vec<u8>, value: &str) {
    if value.is_empty() {
        out.extend_from_slice(&0u32.to_le_bytes());
        return;
    }

    let units: Vec<u16> = value.encode_utf16().chain(std::iter::once(0)).collect();
    out.extend_from_slice(&(units.len() as u32).to_le_bytes());
    for unit in units {
        out.extend_from_slice(&unit.to_le_bytes());
    }
}

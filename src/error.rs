use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Errors fall into three groups: parsing failures of PE images, metadata or trace streams
/// ([`Error::Malformed`], [`Error::OutOfBounds`], [`Error::NotSupported`], [`Error::Empty`]),
/// failures of the surrounding environment ([`Error::FileError`], [`Error::WalkDir`],
/// [`Error::Json`], [`Error::Ipc`]) and run control ([`Error::Cancelled`]).
///
/// Any error raised before the trace has fully drained means that nothing on disk has been
/// touched yet.
///
/// # Examples
///
/// ```rust,no_run
/// use dotslim::{Error, ManagedModule};
/// use std::path::Path;
///
/// match ManagedModule::from_file(Path::new("app/Library.dll")) {
///     Ok(module) => println!("{} types", module.types().len()),
///     Err(Error::NotSupported) => eprintln!("not a managed module"),
///     Err(Error::Malformed { message, file, line }) => {
///         eprintln!("Malformed file: {} ({}:{})", message, file, line);
///     }
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The input is damaged and could not be parsed.
    ///
    /// The error includes the source location where the malformation was detected for
    /// debugging purposes.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// This file type or stream layout is not supported.
    #[error("This file type is not supported")]
    NotSupported,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error, also used for socket and process I/O.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),

    /// Error from the goblin crate during PE parsing.
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),

    /// A dependency manifest could not be parsed or serialized.
    #[error("{0}")]
    Json(#[from] serde_json::Error),

    /// The deployment tree could not be enumerated.
    #[error("{0}")]
    WalkDir(#[from] walkdir::Error),

    /// The runtime rejected a diagnostics IPC command.
    ///
    /// The associated value is the HRESULT carried by the error response.
    #[error("Diagnostics IPC command failed - hresult 0x{hresult:08X}")]
    Ipc {
        /// HRESULT reported by the runtime
        hresult: u32,
    },

    /// The run was interrupted; no destructive step has been taken.
    #[error("The run was cancelled")]
    Cancelled,
}

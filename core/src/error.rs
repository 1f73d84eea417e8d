use thiserror::Error;

use crate::transport::TransportError;

/// Coarse classification of a [`DiveError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The caller broke an API contract (bad fingerprint length, index out of range).
    InvalidArgs,
    /// A buffer of the size the instrument reported could not be allocated.
    NoMemory,
    /// The transport failed, timed out, or the instrument refused a command.
    Io,
    /// Bytes failed checksum or structural validation, or were too short.
    DataFormat,
    /// The request is well formed but this family does not provide it.
    Unsupported,
}

/// Error type for device communication and dive record decoding.
#[derive(Error, Debug, Clone, PartialEq, uniffi::Error)]
#[uniffi(flat_error)]
pub enum DiveError {
    #[error("invalid argument: {0}")]
    InvalidArgs(String),

    #[error("failed to allocate {0} bytes")]
    NoMemory(usize),

    #[error("transport error: {0}")]
    Io(#[from] TransportError),

    #[error("failed to configure transport: {0}")]
    Configure(TransportError),

    #[error("instrument rejected command 0x{command:02x} (code {code})")]
    Nak { command: u8, code: u8 },

    #[error("checksum mismatch: expected 0x{expected:04x}, computed 0x{computed:04x}")]
    Checksum { expected: u32, computed: u32 },

    #[error("data format error: {0}")]
    DataFormat(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl DiveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DiveError::InvalidArgs(_) => ErrorKind::InvalidArgs,
            DiveError::NoMemory(_) => ErrorKind::NoMemory,
            DiveError::Io(_) | DiveError::Configure(_) | DiveError::Nak { .. } => ErrorKind::Io,
            DiveError::Checksum { .. } | DiveError::DataFormat(_) => ErrorKind::DataFormat,
            DiveError::Unsupported(_) => ErrorKind::Unsupported,
        }
    }

    pub(crate) fn data_format(message: impl Into<String>) -> Self {
        DiveError::DataFormat(message.into())
    }
}

pub type Result<T> = std::result::Result<T, DiveError>;

use std::array::TryFromSliceError;
use thiserror::Error;

/// The primary error type for the `tcm-lib` library.
///
/// Every variant carries owned, cloneable data so a single failure on the
/// read path can be reported both to the poll caller and to the task blocked
/// on the outstanding command.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TcmError {
    #[error("Bus transaction failed: {0}")]
    Bus(String),

    #[error("Framing error: {0}")]
    Framing(String),

    #[error("Timed out after {timeout_ms} ms waiting for response to command {command:#04x}")]
    Timeout { command: u8, timeout_ms: u64 },

    #[error("Buffer error: {0}")]
    Buffer(String),

    #[error("Report decode error: {0}")]
    Decode(String),

    #[error("Device reported an error for command {command:#04x} (error code {error_code:?})")]
    DeviceReported { command: u8, error_code: Option<u8> },

    #[error("Device was reset while command {command:#04x} was pending")]
    DeviceReset { command: u8 },

    #[error("Another command is already in flight")]
    CommandPending,

    #[error("Invalid firmware mode: {0}")]
    InvalidMode(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl TcmError {
    /// True for failures raised by the transport or the envelope checks.
    pub fn is_link_failure(&self) -> bool {
        matches!(self, TcmError::Bus(_) | TcmError::Framing(_))
    }
}

impl From<TryFromSliceError> for TcmError {
    fn from(_: TryFromSliceError) -> Self {
        TcmError::Buffer("Failed to convert slice to array".to_string())
    }
}

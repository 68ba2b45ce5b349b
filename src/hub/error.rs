//! Errors returned by the hub client API.

use crate::network::error::Error as NetworkError;

/// Errors returned synchronously to the caller.
///
/// Network failures never show up here: they are absorbed by the retry
/// engine and surface through the connection-status callback and operation
/// timeouts instead.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ClientError {
    /// Bad caller input: a missing field, an empty buffer, a context without a callback.
    InvalidArgument,
    /// The operation could not be carried out (protocol failure, subscribe rejection).
    OperationFailed,
    /// The transport is not connected yet; retried on the next poll.
    NotConnected,
    /// The transport cannot take the item right now; retried on the next poll.
    Continue,
    /// The requested time was never recorded.
    IndefiniteTime,
    /// A fixed-capacity buffer (topic, token) was too small for the input.
    BufferTooSmall,
    /// A device is already registered with this transport.
    AlreadyRegistered,
}

impl core::fmt::Display for ClientError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let text = match self {
            ClientError::InvalidArgument => "invalid argument",
            ClientError::OperationFailed => "operation failed",
            ClientError::NotConnected => "not connected",
            ClientError::Continue => "try again later",
            ClientError::IndefiniteTime => "time was never recorded",
            ClientError::BufferTooSmall => "buffer too small",
            ClientError::AlreadyRegistered => "device already registered",
        };
        f.write_str(text)
    }
}

impl From<NetworkError> for ClientError {
    fn from(error: NetworkError) -> Self {
        match error {
            NetworkError::UnsupportedOption => ClientError::InvalidArgument,
            NetworkError::BufferOverflow => ClientError::BufferTooSmall,
            _ => ClientError::OperationFailed,
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ClientError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            ClientError::InvalidArgument => defmt::write!(f, "InvalidArgument"),
            ClientError::OperationFailed => defmt::write!(f, "OperationFailed"),
            ClientError::NotConnected => defmt::write!(f, "NotConnected"),
            ClientError::Continue => defmt::write!(f, "Continue"),
            ClientError::IndefiniteTime => defmt::write!(f, "IndefiniteTime"),
            ClientError::BufferTooSmall => defmt::write!(f, "BufferTooSmall"),
            ClientError::AlreadyRegistered => defmt::write!(f, "AlreadyRegistered"),
        }
    }
}

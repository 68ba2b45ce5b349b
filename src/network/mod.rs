//! A byte-stream abstraction for the device's IO transport
//!
//! The hub client never opens sockets itself. It consumes whatever the device
//! provides (a TLS socket, a modem AT channel, an in-memory pipe in tests)
//! through the small set of traits below. `Read` is expected to be
//! non-blocking: returning `Ok(0)` means "nothing available right now".
//!

#![allow(missing_docs)]
#![deny(unsafe_code)]

/// Common error types for network operations
pub mod error;

/// Protocol clients layered on top of a [`Connection`]
pub mod application;

pub trait Read {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Read available data from the connection, `Ok(0)` when nothing is pending
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;
}

pub trait Write {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Write data to the connection
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error>;
    /// Flush the write buffer
    fn flush(&mut self) -> Result<(), Self::Error>;
}

pub trait Close {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Close the connection
    fn close(self) -> Result<(), Self::Error>;
}

/// A synchronous connection
pub trait Connection: Read + Write + Close {}

/// A value handed to an option setter.
///
/// Options travel from the public client API down to the byte-stream layer
/// unchanged when no upper layer recognises them, so the value type is
/// shared by every layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionValue<'a> {
    /// A boolean flag.
    Bool(bool),
    /// An unsigned integer (milliseconds, seconds, counts).
    U64(u64),
    /// A UTF-8 string (PEM material, proxy host names).
    Str(&'a str),
}

impl<'a> OptionValue<'a> {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OptionValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            OptionValue::U64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&'a str> {
        match self {
            OptionValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// A synchronous connector (client)
pub trait Connect {
    /// Associated connection type
    type Connection: Connection;
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Open a connection; this is the only call allowed to block (DNS, TCP, TLS)
    fn connect(&mut self, remote: &str, port: u16) -> Result<Self::Connection, Self::Error>;

    /// Apply a connector-specific option, such as TLS certificate material.
    ///
    /// Connectors that accept no options keep the default, which rejects
    /// everything.
    fn set_option(&mut self, name: &str, value: &OptionValue<'_>) -> Result<(), error::Error> {
        let _ = (name, value);
        Err(error::Error::UnsupportedOption)
    }
}

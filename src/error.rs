#[cfg(not(feature = "std"))]
use alloc::string::String;

use crate::std;
use std::{fmt, result};

pub type Result<T> = result::Result<T, Error>;

/// Protocol-tier errors surfaced by the frame reader.
///
/// A protocol error poisons the current reassembly slot: the reader discards all
/// following continuation records until a fresh first record arrives. Protocol errors are
/// never fatal to the engine.
#[repr(i16)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ProtocolError {
    /// Identifier does not carry the v2 layout (legacy v1 frame)
    UnknownVersion = 1,
    /// A continuation record was expected, a first record arrived
    ExtensionMissing = 2,
    /// A continuation record arrived with no reassembly in progress
    ExtensionUnexpected = 3,
    /// Reassembly buffer capacity exceeded, or no free reader slot
    BufferOverflow = 4,
    /// More payload bytes arrived than the header announced
    PayloadOverflow = 5,
    /// Completed payload came up short while parsing fields
    PayloadUnderflow = 6,
    /// Completed record has not been taken by the engine yet
    DataInUse = 7,
    /// Basic record payload is not 5 or 8 bytes
    BasicDecode = 8,
    /// Compound header fields could not be parsed
    CompoundDecode = 9,
}

impl From<ProtocolError> for &'static str {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::UnknownVersion => "unknown protocol version",
            ProtocolError::ExtensionMissing => "extension record missing",
            ProtocolError::ExtensionUnexpected => "unexpected extension record",
            ProtocolError::BufferOverflow => "buffer overflow",
            ProtocolError::PayloadOverflow => "payload overflow",
            ProtocolError::PayloadUnderflow => "payload underflow",
            ProtocolError::DataInUse => "completed data still in use",
            ProtocolError::BasicDecode => "basic record decode",
            ProtocolError::CompoundDecode => "compound record decode",
        }
    }
}

impl From<&ProtocolError> for &'static str {
    fn from(err: &ProtocolError) -> Self {
        (*err).into()
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", <&'static str>::from(self))
    }
}

/// Basic error type for bus communication
#[derive(Clone, Debug, PartialEq)]
pub struct Error {
    code: ErrorCode,
    message: String,
}

impl Error {
    /// Create a generic failure Error
    pub fn failure<S>(message: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            code: ErrorCode::Failure,
            message: message.into(),
        }
    }

    /// Create a protocol failure Error
    pub fn protocol<S>(message: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            code: ErrorCode::Protocol,
            message: message.into(),
        }
    }

    /// Create a transport failure Error
    pub fn transport<S>(message: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            code: ErrorCode::Transport,
            message: message.into(),
        }
    }

    /// Create a timeout Error
    pub fn timeout<S>(message: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            code: ErrorCode::Timeout,
            message: message.into(),
        }
    }

    /// Create a serial port failure Error
    pub fn serial<S>(message: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            code: ErrorCode::SerialPort,
            message: message.into(),
        }
    }

    /// Get the error code
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        self.message.as_str()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code: {}, message: {}", self.code, self.message)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Self::protocol(format!("protocol error: {err}"))
    }
}

#[cfg(feature = "std")]
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self {
            code: ErrorCode::Failure,
            message: format!("I/O error: {}", err),
        }
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(err: std::str::Utf8Error) -> Self {
        Self {
            code: ErrorCode::Failure,
            message: format!("Utf8 error: {}", err),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self {
            code: ErrorCode::Failure,
            message: format!("JSON error: {err}"),
        }
    }
}

impl From<serialport::Error> for Error {
    fn from(err: serialport::Error) -> Self {
        Self {
            code: ErrorCode::SerialPort,
            message: format!("Serial port error: {err}"),
        }
    }
}

#[cfg(feature = "std")]
impl<T> From<std::sync::mpsc::SendError<T>> for Error {
    fn from(err: std::sync::mpsc::SendError<T>) -> Self {
        Self::transport(format!("failed to queue an outbound frame: {err}"))
    }
}

/// Error codes for failures surfaced by the library
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ErrorCode {
    /// Generic failure code
    Failure = -1,
    /// Failure code originating from frame decoding
    Protocol = -2,
    /// Failure code originating from the transport sink
    Transport = -3,
    /// A timed wait expired without a matching response
    Timeout = -4,
    /// Failure code originating from the serial port connection
    SerialPort = -5,
}

impl From<ErrorCode> for &'static str {
    fn from(e: ErrorCode) -> Self {
        match e {
            ErrorCode::Failure => "failure",
            ErrorCode::Protocol => "protocol",
            ErrorCode::Transport => "transport",
            ErrorCode::Timeout => "timeout",
            ErrorCode::SerialPort => "serial port",
        }
    }
}

impl From<&ErrorCode> for &'static str {
    fn from(e: &ErrorCode) -> Self {
        (*e).into()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", <&'static str>::from(self))
    }
}

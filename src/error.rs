//! Error types
//!
//! Each area of the crate has its own error enum; [`Error`] aggregates them
//! for APIs that cross areas (ports, own announcements, bridges).

use std::fmt;
use std::io;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// Socket or other I/O failure
    Io(io::Error),
    /// Malformed or unsupported SAP packet
    Protocol(ProtocolError),
    /// Dynamic set contract violation
    Set(SetError),
    /// SDP payload could not be interpreted
    Sdp(SdpError),
    /// Byte-identical payload is already announced
    DuplicatePayload(String),
    /// Every 16-bit message identification hash is in use
    IdentifierSpaceExhausted,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
            Error::Set(e) => write!(f, "Set error: {}", e),
            Error::Sdp(e) => write!(f, "SDP error: {}", e),
            Error::DuplicatePayload(id) => write!(f, "Payload already announced: {}", id),
            Error::IdentifierSpaceExhausted => {
                write!(f, "No free message identification hash left")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Protocol(e) => Some(e),
            Error::Set(e) => Some(e),
            Error::Sdp(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

impl From<SetError> for Error {
    fn from(e: SetError) -> Self {
        Error::Set(e)
    }
}

impl From<SdpError> for Error {
    fn from(e: SdpError) -> Self {
        Error::Sdp(e)
    }
}

/// Dynamic set operation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetError {
    /// `add` on an id that is already present
    DuplicateId(String),
    /// `update`, `delete` or a wait on an id that is not present
    UnknownId(String),
    /// The set was closed
    Closed,
    /// The entry being watched for changes was deleted
    Deleted(String),
}

impl fmt::Display for SetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetError::DuplicateId(id) => write!(f, "Entry with id {} already exists", id),
            SetError::UnknownId(id) => write!(f, "Entry with id {} does not exist", id),
            SetError::Closed => write!(f, "Set is closed"),
            SetError::Deleted(id) => write!(f, "Entry with id {} was deleted", id),
        }
    }
}

impl std::error::Error for SetError {}

/// Packet features this implementation cannot encode or decode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    /// IPv6 originating source
    Ipv6,
    /// Encrypted payload
    Encryption,
    /// zlib compressed payload
    Compression,
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Feature::Ipv6 => write!(f, "IPv6 source address"),
            Feature::Encryption => write!(f, "encryption"),
            Feature::Compression => write!(f, "compression"),
        }
    }
}

/// SAP packet codec errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Version field is not 1
    UnsupportedVersion(u8),
    /// A flag requests a feature that is not implemented
    UnsupportedFeature(Feature),
    /// Packet ends before the fixed header or auth data is complete
    Truncated,
    /// Payload type string is not NUL terminated
    MissingPayloadType,
    /// Auth data is not a multiple of 4 bytes or is too long
    InvalidAuthLength(usize),
    /// Payload type contains a NUL byte or non-ASCII text
    InvalidPayloadType,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::UnsupportedVersion(v) => write!(f, "Bad SAP packet version: {}", v),
            ProtocolError::UnsupportedFeature(feature) => {
                write!(f, "Unsupported feature: {}", feature)
            }
            ProtocolError::Truncated => write!(f, "Packet truncated"),
            ProtocolError::MissingPayloadType => write!(f, "Payload type is not terminated"),
            ProtocolError::InvalidAuthLength(len) => {
                write!(f, "Invalid authentication data length: {}", len)
            }
            ProtocolError::InvalidPayloadType => write!(f, "Invalid payload type"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// SDP interpretation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdpError {
    /// Packet payload type is not `application/sdp`
    NotSdp(String),
    /// Required field is missing
    FieldNotFound(char),
    /// Field that must be unique appears more than once
    FieldNotUnique(char),
    /// Origin line does not have six parts
    MalformedOrigin,
    /// Payload is not valid UTF-8
    InvalidEncoding,
}

impl fmt::Display for SdpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpError::NotSdp(ty) => write!(f, "Payload type is not SDP: {}", ty),
            SdpError::FieldNotFound(c) => write!(f, "Field not found: {}=", c),
            SdpError::FieldNotUnique(c) => write!(f, "Field is not unique: {}=", c),
            SdpError::MalformedOrigin => write!(f, "Malformed origin line"),
            SdpError::InvalidEncoding => write!(f, "Payload is not valid UTF-8"),
        }
    }
}

impl std::error::Error for SdpError {}

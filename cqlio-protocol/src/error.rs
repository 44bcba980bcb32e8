//! Protocol and codec error types.

use thiserror::Error;

/// Protocol-level errors raised while framing or parsing message bodies.
///
/// Every variant here is a violation of the wire contract. A connection
/// that observes one of these on its inbound stream cannot trust anything
/// that follows and must shut down.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("buffer underflow: need {needed} bytes, {available} available")]
    Underflow { needed: usize, available: usize },

    #[error("unsupported frame version: {0:#04x}")]
    UnsupportedVersion(u8),

    #[error("unknown opcode: {0:#04x}")]
    UnknownOpcode(u8),

    #[error("unknown consistency level: {0:#06x}")]
    UnknownConsistency(u16),

    #[error("frame body too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("string too long: {len} bytes (max {max})")]
    StringTooLong { len: usize, max: usize },

    #[error("byte value too long: {len} bytes (max {max})")]
    BytesTooLong { len: usize, max: usize },

    #[error("invalid inet address length: {0}")]
    InvalidInetLength(u8),

    #[error("negative count: {0}")]
    NegativeCount(i32),

    #[error("unknown event name: {0}")]
    UnknownEvent(String),

    #[error("invalid UTF-8 in wire string")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

/// Errors raised while converting column values to or from their wire
/// form.
///
/// These are local to the value that triggered them: a rejected value
/// fails its own call and nothing else.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("non-ascii byte {byte:#04x} in ascii value")]
    NonAscii { byte: u8 },

    #[error("invalid UTF-8 in {ctype} value")]
    InvalidUtf8 { ctype: String },

    #[error("cannot encode {value} value as {ctype}")]
    TypeMismatch { ctype: String, value: &'static str },

    #[error("wrong byte length for {ctype}: expected {expected}, got {actual}")]
    InvalidLength {
        ctype: String,
        expected: usize,
        actual: usize,
    },

    #[error("row has {actual} values but metadata describes {expected} columns")]
    ColumnCountMismatch { expected: usize, actual: usize },
}

//! Client error types.

use cqlio_protocol::{CodecError, Opcode, ProtocolError};
use thiserror::Error;

/// Client errors.
///
/// Fatal kinds (`Protocol`, `Auth`, `ConnectionClosed` and I/O failures
/// on the shared transport) fan out to every in-flight and queued
/// request and leave the connection closed. The rest are local to the
/// call that raised them.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("not connected")]
    NotConnected,

    #[error("connect timeout")]
    ConnectTimeout,

    #[error("connection closed: {reason}")]
    ConnectionClosed { reason: String },

    #[error("server error {code:#010x}: {message}")]
    Server { code: i32, message: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("unexpected {opcode} response to {request}")]
    UnexpectedResponse {
        request: &'static str,
        opcode: Opcode,
    },

    #[error("{request} returned an unexpected result kind")]
    UnexpectedResult { request: &'static str },

    #[error("unknown result kind: {kind:#010x}")]
    UnknownResult { kind: i32 },

    #[error("bind error: {0}")]
    Binding(String),

    #[error("request cancelled")]
    Canceled,
}

impl ClientError {
    pub(crate) fn closed(reason: impl Into<String>) -> Self {
        ClientError::ConnectionClosed {
            reason: reason.into(),
        }
    }
}

//! # cqlio-protocol
//!
//! Wire codec for the Cassandra native binary protocol v1 (CQL 3).
//!
//! This crate provides:
//! - Big-endian typed primitive packing and unpacking (`CqlBuffer`)
//! - 8-byte header framing (`Frame`)
//! - Scalar column-value codecs keyed by CQL type id
//! - Column metadata parsing with derived short names
//! - RESULT body decoding
//! - CQL identifier and literal quoting helpers
//!
//! The connection layer lives in `cqlio-client`; this crate has no I/O.

pub mod buffer;
pub mod consistency;
pub mod error;
pub mod frame;
pub mod metadata;
pub mod opcode;
pub mod quote;
pub mod result;
pub mod types;
pub mod value;

pub use buffer::CqlBuffer;
pub use consistency::Consistency;
pub use error::{CodecError, ProtocolError};
pub use frame::{Frame, FRAME_HEADER_SIZE, MAX_BODY_SIZE};
pub use metadata::{ColumnSpec, Metadata};
pub use opcode::Opcode;
pub use quote::{quote_identifier, quote_value};
pub use result::{CqlResult, Rows};
pub use types::CqlType;
pub use value::{decode_value, encode_value, CqlValue};

/// Version byte on request frames.
pub const REQUEST_VERSION: u8 = 0x01;

/// Version byte on response frames.
pub const RESPONSE_VERSION: u8 = 0x81;

/// Default port a Cassandra node listens on.
pub const DEFAULT_PORT: u16 = 9042;

/// The CQL version declared in STARTUP.
pub const CQL_VERSION: &str = "3.0.0";

/// STARTUP option key carrying [`CQL_VERSION`].
pub const CQL_VERSION_KEY: &str = "CQL_VERSION";

/// Number of stream ids a connection may have in flight: ids 1..=127.
pub const MAX_STREAMS: usize = 127;

/// Stream id on unsolicited server messages.
pub const UNSOLICITED_STREAM: i8 = 0;

/// Stream id on server-pushed event frames.
pub const EVENT_STREAM: i8 = -1;

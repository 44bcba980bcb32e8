//! Column type descriptors.

use crate::buffer::CqlBuffer;
use crate::error::ProtocolError;
use std::fmt;

/// Wire ids for the column type descriptor union.
pub mod id {
    pub const CUSTOM: u16 = 0x0000;
    pub const ASCII: u16 = 0x0001;
    pub const BIGINT: u16 = 0x0002;
    pub const BLOB: u16 = 0x0003;
    pub const BOOLEAN: u16 = 0x0004;
    pub const COUNTER: u16 = 0x0005;
    pub const DECIMAL: u16 = 0x0006;
    pub const DOUBLE: u16 = 0x0007;
    pub const FLOAT: u16 = 0x0008;
    pub const INT: u16 = 0x0009;
    pub const TEXT: u16 = 0x000A;
    pub const TIMESTAMP: u16 = 0x000B;
    pub const UUID: u16 = 0x000C;
    pub const VARCHAR: u16 = 0x000D;
    pub const VARINT: u16 = 0x000E;
    pub const TIMEUUID: u16 = 0x000F;
    pub const INET: u16 = 0x0010;
    pub const LIST: u16 = 0x0020;
    pub const MAP: u16 = 0x0021;
    pub const SET: u16 = 0x0022;
}

/// A column type descriptor: a tagged union keyed by a u16 id.
///
/// CUSTOM carries the server-side class name, and the collection
/// variants carry their element descriptors. Ids this implementation
/// does not know are preserved as `Other` so the value layer can fall
/// back to passing bytes through.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CqlType {
    Custom(String),
    Ascii,
    Bigint,
    Blob,
    Boolean,
    Counter,
    Decimal,
    Double,
    Float,
    Int,
    Text,
    Timestamp,
    Uuid,
    Varchar,
    Varint,
    Timeuuid,
    Inet,
    List(Box<CqlType>),
    Map(Box<CqlType>, Box<CqlType>),
    Set(Box<CqlType>),
    Other(u16),
}

impl CqlType {
    /// Parses a type descriptor (`option` in the protocol grammar) from
    /// the buffer.
    pub fn unpack(buf: &mut CqlBuffer) -> Result<Self, ProtocolError> {
        let type_id = buf.unpack_short()?;
        Ok(match type_id {
            id::CUSTOM => CqlType::Custom(buf.unpack_string()?),
            id::ASCII => CqlType::Ascii,
            id::BIGINT => CqlType::Bigint,
            id::BLOB => CqlType::Blob,
            id::BOOLEAN => CqlType::Boolean,
            id::COUNTER => CqlType::Counter,
            id::DECIMAL => CqlType::Decimal,
            id::DOUBLE => CqlType::Double,
            id::FLOAT => CqlType::Float,
            id::INT => CqlType::Int,
            id::TEXT => CqlType::Text,
            id::TIMESTAMP => CqlType::Timestamp,
            id::UUID => CqlType::Uuid,
            id::VARCHAR => CqlType::Varchar,
            id::VARINT => CqlType::Varint,
            id::TIMEUUID => CqlType::Timeuuid,
            id::INET => CqlType::Inet,
            id::LIST => CqlType::List(Box::new(Self::unpack(buf)?)),
            id::MAP => {
                let key = Box::new(Self::unpack(buf)?);
                let value = Box::new(Self::unpack(buf)?);
                CqlType::Map(key, value)
            }
            id::SET => CqlType::Set(Box::new(Self::unpack(buf)?)),
            other => CqlType::Other(other),
        })
    }

    /// The descriptor's wire id.
    pub fn type_id(&self) -> u16 {
        match self {
            CqlType::Custom(_) => id::CUSTOM,
            CqlType::Ascii => id::ASCII,
            CqlType::Bigint => id::BIGINT,
            CqlType::Blob => id::BLOB,
            CqlType::Boolean => id::BOOLEAN,
            CqlType::Counter => id::COUNTER,
            CqlType::Decimal => id::DECIMAL,
            CqlType::Double => id::DOUBLE,
            CqlType::Float => id::FLOAT,
            CqlType::Int => id::INT,
            CqlType::Text => id::TEXT,
            CqlType::Timestamp => id::TIMESTAMP,
            CqlType::Uuid => id::UUID,
            CqlType::Varchar => id::VARCHAR,
            CqlType::Varint => id::VARINT,
            CqlType::Timeuuid => id::TIMEUUID,
            CqlType::Inet => id::INET,
            CqlType::List(_) => id::LIST,
            CqlType::Map(_, _) => id::MAP,
            CqlType::Set(_) => id::SET,
            CqlType::Other(other) => *other,
        }
    }
}

impl fmt::Display for CqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CqlType::Custom(class) => write!(f, "custom<{class}>"),
            CqlType::Ascii => f.write_str("ascii"),
            CqlType::Bigint => f.write_str("bigint"),
            CqlType::Blob => f.write_str("blob"),
            CqlType::Boolean => f.write_str("boolean"),
            CqlType::Counter => f.write_str("counter"),
            CqlType::Decimal => f.write_str("decimal"),
            CqlType::Double => f.write_str("double"),
            CqlType::Float => f.write_str("float"),
            CqlType::Int => f.write_str("int"),
            CqlType::Text => f.write_str("text"),
            CqlType::Timestamp => f.write_str("timestamp"),
            CqlType::Uuid => f.write_str("uuid"),
            CqlType::Varchar => f.write_str("varchar"),
            CqlType::Varint => f.write_str("varint"),
            CqlType::Timeuuid => f.write_str("timeuuid"),
            CqlType::Inet => f.write_str("inet"),
            CqlType::List(elem) => write!(f, "list<{elem}>"),
            CqlType::Map(key, value) => write!(f, "map<{key}, {value}>"),
            CqlType::Set(elem) => write!(f, "set<{elem}>"),
            CqlType::Other(type_id) => write!(f, "unknown<{type_id:#06x}>"),
        }
    }
}

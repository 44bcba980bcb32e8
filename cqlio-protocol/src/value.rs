//! Column values and the scalar codec registry.
//!
//! `encode_value` and `decode_value` convert between `CqlValue` and the
//! raw cell bytes of a column, dispatching on the column's `CqlType`.
//! Null never reaches the codecs: a null cell is represented as `None`
//! at the `bytes` framing layer and bypasses this module entirely.
//!
//! Types without a codec (UUID, INET, collections, CUSTOM and unknown
//! ids) fall back to `CqlValue::Raw`: decoding warns and hands the bytes
//! back unmodified, encoding echoes them. That keeps the library usable
//! against servers that send types it does not model.

use crate::error::CodecError;
use crate::types::CqlType;
use chrono::{DateTime, Utc};
use num_bigint::BigInt;
use std::fmt;

/// A decoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum CqlValue {
    Ascii(String),
    Bigint(i64),
    Blob(Vec<u8>),
    Boolean(bool),
    Counter(i64),
    Decimal { scale: u32, unscaled: BigInt },
    Double(f64),
    Float(f32),
    Int(i32),
    Text(String),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
    Varint(BigInt),
    /// Bytes of a type with no codec, passed through unmodified.
    Raw(Vec<u8>),
}

impl CqlValue {
    /// Builds a timestamp value from fractional seconds since the Unix
    /// epoch, multiplying into the wire's millisecond unit.
    pub fn timestamp_from_secs_f64(secs: f64) -> Self {
        CqlValue::Timestamp((secs * 1000.0).round() as i64)
    }

    /// The timestamp value as a `chrono` datetime, when it is one.
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            CqlValue::Timestamp(millis) => DateTime::from_timestamp_millis(*millis),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CqlValue::Ascii(s) | CqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CqlValue::Bigint(v) | CqlValue::Counter(v) | CqlValue::Timestamp(v) => Some(*v),
            CqlValue::Int(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    /// Short name of the variant, used in codec error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            CqlValue::Ascii(_) => "ascii",
            CqlValue::Bigint(_) => "bigint",
            CqlValue::Blob(_) => "blob",
            CqlValue::Boolean(_) => "boolean",
            CqlValue::Counter(_) => "counter",
            CqlValue::Decimal { .. } => "decimal",
            CqlValue::Double(_) => "double",
            CqlValue::Float(_) => "float",
            CqlValue::Int(_) => "int",
            CqlValue::Text(_) => "text",
            CqlValue::Timestamp(_) => "timestamp",
            CqlValue::Varint(_) => "varint",
            CqlValue::Raw(_) => "raw",
        }
    }
}

impl fmt::Display for CqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CqlValue::Ascii(s) | CqlValue::Text(s) => f.write_str(s),
            CqlValue::Bigint(v) | CqlValue::Counter(v) | CqlValue::Timestamp(v) => {
                write!(f, "{v}")
            }
            CqlValue::Boolean(v) => write!(f, "{v}"),
            CqlValue::Decimal { scale, unscaled } => write!(f, "{unscaled}e-{scale}"),
            CqlValue::Double(v) => write!(f, "{v}"),
            CqlValue::Float(v) => write!(f, "{v}"),
            CqlValue::Int(v) => write!(f, "{v}"),
            CqlValue::Varint(v) => write!(f, "{v}"),
            CqlValue::Blob(bytes) | CqlValue::Raw(bytes) => {
                f.write_str("0x")?;
                for byte in bytes {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<&str> for CqlValue {
    fn from(s: &str) -> Self {
        CqlValue::Text(s.to_string())
    }
}

impl From<String> for CqlValue {
    fn from(s: String) -> Self {
        CqlValue::Text(s)
    }
}

impl From<i32> for CqlValue {
    fn from(v: i32) -> Self {
        CqlValue::Int(v)
    }
}

impl From<i64> for CqlValue {
    fn from(v: i64) -> Self {
        CqlValue::Bigint(v)
    }
}

impl From<bool> for CqlValue {
    fn from(v: bool) -> Self {
        CqlValue::Boolean(v)
    }
}

impl From<f32> for CqlValue {
    fn from(v: f32) -> Self {
        CqlValue::Float(v)
    }
}

impl From<f64> for CqlValue {
    fn from(v: f64) -> Self {
        CqlValue::Double(v)
    }
}

impl From<Vec<u8>> for CqlValue {
    fn from(v: Vec<u8>) -> Self {
        CqlValue::Blob(v)
    }
}

impl From<BigInt> for CqlValue {
    fn from(v: BigInt) -> Self {
        CqlValue::Varint(v)
    }
}

impl From<DateTime<Utc>> for CqlValue {
    fn from(dt: DateTime<Utc>) -> Self {
        CqlValue::Timestamp(dt.timestamp_millis())
    }
}

fn mismatch(ctype: &CqlType, value: &CqlValue) -> CodecError {
    CodecError::TypeMismatch {
        ctype: ctype.to_string(),
        value: value.kind(),
    }
}

fn fixed<const N: usize>(ctype: &CqlType, bytes: &[u8]) -> Result<[u8; N], CodecError> {
    bytes
        .try_into()
        .map_err(|_| CodecError::InvalidLength {
            ctype: ctype.to_string(),
            expected: N,
            actual: bytes.len(),
        })
}

fn utf8(ctype: &CqlType, bytes: &[u8]) -> Result<String, CodecError> {
    String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8 {
        ctype: ctype.to_string(),
    })
}

/// Encodes a non-null value into the cell bytes for a column of the
/// given type.
pub fn encode_value(ctype: &CqlType, value: &CqlValue) -> Result<Vec<u8>, CodecError> {
    match (ctype, value) {
        (CqlType::Ascii, CqlValue::Ascii(s) | CqlValue::Text(s)) => {
            if let Some(byte) = s.bytes().find(|b| *b > 0x7F) {
                return Err(CodecError::NonAscii { byte });
            }
            Ok(s.as_bytes().to_vec())
        }
        (CqlType::Bigint, CqlValue::Bigint(v))
        | (CqlType::Counter, CqlValue::Counter(v) | CqlValue::Bigint(v))
        | (CqlType::Timestamp, CqlValue::Timestamp(v)) => Ok(v.to_be_bytes().to_vec()),
        (CqlType::Blob, CqlValue::Blob(bytes)) => Ok(bytes.clone()),
        (CqlType::Boolean, CqlValue::Boolean(v)) => Ok(vec![u8::from(*v)]),
        (CqlType::Decimal, CqlValue::Decimal { scale, unscaled }) => {
            let mut out = scale.to_be_bytes().to_vec();
            out.extend_from_slice(&unscaled.to_signed_bytes_be());
            Ok(out)
        }
        (CqlType::Double, CqlValue::Double(v)) => Ok(v.to_be_bytes().to_vec()),
        (CqlType::Float, CqlValue::Float(v)) => Ok(v.to_be_bytes().to_vec()),
        (CqlType::Int, CqlValue::Int(v)) => Ok(v.to_be_bytes().to_vec()),
        (CqlType::Text | CqlType::Varchar, CqlValue::Text(s) | CqlValue::Ascii(s)) => {
            Ok(s.as_bytes().to_vec())
        }
        (CqlType::Varint, CqlValue::Varint(v)) => Ok(v.to_signed_bytes_be()),
        // Unsupported types echo raw input unchanged
        (_, CqlValue::Raw(bytes)) if !has_codec(ctype) => Ok(bytes.clone()),
        _ => Err(mismatch(ctype, value)),
    }
}

/// Decodes non-null cell bytes into a value for a column of the given
/// type.
pub fn decode_value(ctype: &CqlType, bytes: &[u8]) -> Result<CqlValue, CodecError> {
    match ctype {
        CqlType::Ascii => utf8(ctype, bytes).map(CqlValue::Ascii),
        CqlType::Bigint => Ok(CqlValue::Bigint(i64::from_be_bytes(fixed(ctype, bytes)?))),
        CqlType::Blob => Ok(CqlValue::Blob(bytes.to_vec())),
        CqlType::Boolean => {
            let byte = fixed::<1>(ctype, bytes)?[0];
            Ok(CqlValue::Boolean(byte != 0))
        }
        CqlType::Counter => Ok(CqlValue::Counter(i64::from_be_bytes(fixed(ctype, bytes)?))),
        CqlType::Decimal => {
            if bytes.len() < 4 {
                return Err(CodecError::InvalidLength {
                    ctype: ctype.to_string(),
                    expected: 4,
                    actual: bytes.len(),
                });
            }
            let scale = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            let unscaled = BigInt::from_signed_bytes_be(&bytes[4..]);
            Ok(CqlValue::Decimal { scale, unscaled })
        }
        CqlType::Double => Ok(CqlValue::Double(f64::from_be_bytes(fixed(ctype, bytes)?))),
        CqlType::Float => Ok(CqlValue::Float(f32::from_be_bytes(fixed(ctype, bytes)?))),
        CqlType::Int => Ok(CqlValue::Int(i32::from_be_bytes(fixed(ctype, bytes)?))),
        CqlType::Text | CqlType::Varchar => utf8(ctype, bytes).map(CqlValue::Text),
        CqlType::Timestamp => Ok(CqlValue::Timestamp(i64::from_be_bytes(fixed(
            ctype, bytes,
        )?))),
        CqlType::Varint => Ok(CqlValue::Varint(BigInt::from_signed_bytes_be(bytes))),
        CqlType::Custom(_)
        | CqlType::Uuid
        | CqlType::Timeuuid
        | CqlType::Inet
        | CqlType::List(_)
        | CqlType::Map(_, _)
        | CqlType::Set(_)
        | CqlType::Other(_) => {
            tracing::warn!(ctype = %ctype, "no codec for column type, passing raw bytes through");
            Ok(CqlValue::Raw(bytes.to_vec()))
        }
    }
}

/// Whether a dedicated codec exists for the type; anything else takes
/// the raw passthrough path.
fn has_codec(ctype: &CqlType) -> bool {
    !matches!(
        ctype,
        CqlType::Custom(_)
            | CqlType::Uuid
            | CqlType::Timeuuid
            | CqlType::Inet
            | CqlType::List(_)
            | CqlType::Map(_, _)
            | CqlType::Set(_)
            | CqlType::Other(_)
    )
}

//! RESULT body decoding.

use crate::buffer::CqlBuffer;
use crate::error::{CodecError, ProtocolError};
use crate::metadata::Metadata;
use crate::value::CqlValue;
use bytes::Bytes;

/// Result-kind tags at the start of a RESULT body.
pub mod kind {
    pub const VOID: i32 = 0x0001;
    pub const ROWS: i32 = 0x0002;
    pub const SET_KEYSPACE: i32 = 0x0003;
    pub const PREPARED: i32 = 0x0004;
    pub const SCHEMA_CHANGE: i32 = 0x0005;
}

/// A rows result: column metadata plus the raw cells of every row.
///
/// Cells stay in wire form until asked for; `row` decodes one row
/// through the metadata's column types on demand.
#[derive(Debug, Clone, Default)]
pub struct Rows {
    pub metadata: Metadata,
    cells: Vec<Vec<Option<Bytes>>>,
}

impl Rows {
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// The raw cells of row `i`.
    pub fn raw_row(&self, i: usize) -> Option<&[Option<Bytes>]> {
        self.cells.get(i).map(Vec::as_slice)
    }

    /// Decodes row `i` into typed values.
    pub fn row(&self, i: usize) -> Option<Result<Vec<Option<CqlValue>>, CodecError>> {
        self.cells.get(i).map(|cells| self.metadata.decode_row(cells))
    }

    /// Iterates over all rows, decoding each.
    pub fn iter(&self) -> impl Iterator<Item = Result<Vec<Option<CqlValue>>, CodecError>> + '_ {
        self.cells.iter().map(|cells| self.metadata.decode_row(cells))
    }
}

/// A decoded RESULT body.
#[derive(Debug, Clone)]
pub enum CqlResult {
    Void,
    Rows(Rows),
    SetKeyspace(String),
    Prepared { id: Vec<u8>, metadata: Metadata },
    SchemaChange {
        change: String,
        keyspace: String,
        table: String,
    },
    /// A result kind this implementation does not know. Carried as-is;
    /// callers surface it as an error.
    Unknown { kind: i32, body: Bytes },
}

impl CqlResult {
    /// Decodes a RESULT body: an int kind tag, then kind-specific
    /// content.
    pub fn decode(body: &[u8]) -> Result<Self, ProtocolError> {
        let mut buf = CqlBuffer::from_bytes(body);
        match buf.unpack_int()? {
            kind::VOID => Ok(CqlResult::Void),
            kind::ROWS => {
                let metadata = Metadata::unpack(&mut buf)?;
                let row_count = buf.unpack_int()?;
                if row_count < 0 {
                    return Err(ProtocolError::NegativeCount(row_count));
                }
                let mut cells = Vec::with_capacity(row_count as usize);
                for _ in 0..row_count {
                    cells.push(metadata.unpack_cells(&mut buf)?);
                }
                Ok(CqlResult::Rows(Rows { metadata, cells }))
            }
            kind::SET_KEYSPACE => Ok(CqlResult::SetKeyspace(buf.unpack_string()?)),
            kind::PREPARED => {
                let id = buf.unpack_short_bytes()?.to_vec();
                let metadata = Metadata::unpack(&mut buf)?;
                Ok(CqlResult::Prepared { id, metadata })
            }
            kind::SCHEMA_CHANGE => Ok(CqlResult::SchemaChange {
                change: buf.unpack_string()?,
                keyspace: buf.unpack_string()?,
                table: buf.unpack_string()?,
            }),
            other => Ok(CqlResult::Unknown {
                kind: other,
                body: buf.into_bytes(),
            }),
        }
    }
}

//! Column metadata blocks.
//!
//! A metadata block describes the columns of a rows result or the bind
//! parameters of a prepared statement:
//!
//! ```text
//! <flags int> <column count int>
//! [<global keyspace string> <global table string>]   when flag bit 0
//! then per column:
//! [<keyspace string> <table string>]                 unless global
//! <name string> <type option>
//! ```
//!
//! After parsing, every column gets a derived short name: the bare
//! column name when it is unique in the set, else `table.column` when
//! that pair is unique, else the fully qualified
//! `keyspace.table.column`. Short names are unique within one block.

use crate::buffer::CqlBuffer;
use crate::error::{CodecError, ProtocolError};
use crate::types::CqlType;
use crate::value::{decode_value, encode_value, CqlValue};
use bytes::Bytes;

/// Metadata flag: keyspace and table are sent once for all columns.
pub const FLAG_GLOBAL_TABLES_SPEC: i32 = 0x0001;

/// One column descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub keyspace: String,
    pub table: String,
    pub name: String,
    pub ctype: CqlType,
    short_name: String,
}

impl ColumnSpec {
    /// The shortest unambiguous name for this column within its block.
    pub fn short_name(&self) -> &str {
        &self.short_name
    }
}

/// An ordered set of column descriptors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    columns: Vec<ColumnSpec>,
}

impl Metadata {
    /// Parses a metadata block from the buffer.
    pub fn unpack(buf: &mut CqlBuffer) -> Result<Self, ProtocolError> {
        let flags = buf.unpack_int()?;
        let count = buf.unpack_int()?;
        if count < 0 {
            return Err(ProtocolError::NegativeCount(count));
        }

        let global = flags & FLAG_GLOBAL_TABLES_SPEC != 0;
        let (global_keyspace, global_table) = if global {
            (buf.unpack_string()?, buf.unpack_string()?)
        } else {
            (String::new(), String::new())
        };

        let mut columns = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (keyspace, table) = if global {
                (global_keyspace.clone(), global_table.clone())
            } else {
                (buf.unpack_string()?, buf.unpack_string()?)
            };
            let name = buf.unpack_string()?;
            let ctype = CqlType::unpack(buf)?;
            columns.push(ColumnSpec {
                keyspace,
                table,
                name,
                ctype,
                short_name: String::new(),
            });
        }

        compute_short_names(&mut columns);
        Ok(Self { columns })
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    /// The fully qualified dotted name of column `i`.
    pub fn column_name(&self, i: usize) -> Option<String> {
        self.columns
            .get(i)
            .map(|c| format!("{}.{}.{}", c.keyspace, c.table, c.name))
    }

    pub fn column_shortname(&self, i: usize) -> Option<&str> {
        self.columns.get(i).map(|c| c.short_name.as_str())
    }

    pub fn column_type(&self, i: usize) -> Option<&CqlType> {
        self.columns.get(i).map(|c| &c.ctype)
    }

    /// Finds a column index by short name or bare column name.
    pub fn find_column(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.short_name == name)
            .or_else(|| self.columns.iter().position(|c| c.name == name))
    }

    /// Encodes one row of positional values into cell bytes, delegating
    /// to the per-type codecs. `None` values stay null.
    pub fn encode_row(
        &self,
        values: &[Option<CqlValue>],
    ) -> Result<Vec<Option<Vec<u8>>>, CodecError> {
        if values.len() != self.columns.len() {
            return Err(CodecError::ColumnCountMismatch {
                expected: self.columns.len(),
                actual: values.len(),
            });
        }
        self.columns
            .iter()
            .zip(values)
            .map(|(column, value)| {
                value
                    .as_ref()
                    .map(|v| encode_value(&column.ctype, v))
                    .transpose()
            })
            .collect()
    }

    /// Unpacks one row's raw cells (`bytes` values, null as `None`)
    /// from the buffer.
    pub fn unpack_cells(&self, buf: &mut CqlBuffer) -> Result<Vec<Option<Bytes>>, ProtocolError> {
        let mut cells = Vec::with_capacity(self.columns.len());
        for _ in 0..self.columns.len() {
            cells.push(buf.unpack_bytes()?);
        }
        Ok(cells)
    }

    /// Decodes one row of raw cells into typed values.
    pub fn decode_row(&self, cells: &[Option<Bytes>]) -> Result<Vec<Option<CqlValue>>, CodecError> {
        if cells.len() != self.columns.len() {
            return Err(CodecError::ColumnCountMismatch {
                expected: self.columns.len(),
                actual: cells.len(),
            });
        }
        self.columns
            .iter()
            .zip(cells)
            .map(|(column, cell)| {
                cell.as_ref()
                    .map(|bytes| decode_value(&column.ctype, bytes))
                    .transpose()
            })
            .collect()
    }
}

/// Derives unique short names for a parsed column set.
///
/// Linear pass with quadratic disambiguation; metadata blocks are small
/// enough that this never matters.
fn compute_short_names(columns: &mut [ColumnSpec]) {
    for i in 0..columns.len() {
        let name_clashes = columns
            .iter()
            .enumerate()
            .any(|(j, c)| j != i && c.name == columns[i].name);
        if !name_clashes {
            columns[i].short_name = columns[i].name.clone();
            continue;
        }

        let pair_clashes = columns.iter().enumerate().any(|(j, c)| {
            j != i && c.name == columns[i].name && c.table == columns[i].table
        });
        columns[i].short_name = if pair_clashes {
            format!(
                "{}.{}.{}",
                columns[i].keyspace, columns[i].table, columns[i].name
            )
        } else {
            format!("{}.{}", columns[i].table, columns[i].name)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn global_block(columns: &[(&str, u16)]) -> Metadata {
        let mut buf = CqlBuffer::new();
        buf.pack_int(FLAG_GLOBAL_TABLES_SPEC);
        buf.pack_int(columns.len() as i32);
        buf.pack_string("test").unwrap();
        buf.pack_string("table").unwrap();
        for (name, type_id) in columns {
            buf.pack_string(name).unwrap();
            buf.pack_short(*type_id);
        }
        Metadata::unpack(&mut buf).unwrap()
    }

    #[test]
    fn test_global_table_spec_block() {
        // three columns under a global (test, table) spec
        let metadata = global_block(&[("key", 0x0A), ("i", 0x09), ("b", 0x02)]);

        assert_eq!(metadata.len(), 3);
        assert_eq!(metadata.column_shortname(0), Some("key"));
        assert_eq!(metadata.column_shortname(1), Some("i"));
        assert_eq!(metadata.column_shortname(2), Some("b"));
        assert_eq!(metadata.column_type(1), Some(&CqlType::Int));
        assert_eq!(metadata.column_name(0).unwrap(), "test.table.key");
    }

    #[test]
    fn test_global_table_spec_wire_form() {
        let mut bytes = vec![0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x03];
        bytes.extend_from_slice(&[0x00, 0x04]);
        bytes.extend_from_slice(b"test");
        bytes.extend_from_slice(&[0x00, 0x05]);
        bytes.extend_from_slice(b"table");
        bytes.extend_from_slice(&[0x00, 0x03]);
        bytes.extend_from_slice(b"key");
        bytes.extend_from_slice(&[0x00, 0x0A]);
        bytes.extend_from_slice(&[0x00, 0x01, b'i', 0x00, 0x09]);
        bytes.extend_from_slice(&[0x00, 0x01, b'b', 0x00, 0x02]);

        let mut buf = CqlBuffer::from_bytes(&bytes);
        let metadata = Metadata::unpack(&mut buf).unwrap();

        assert_eq!(metadata.len(), 3);
        assert_eq!(metadata.column_shortname(0), Some("key"));
        assert_eq!(metadata.column_shortname(1), Some("i"));
        assert_eq!(metadata.column_shortname(2), Some("b"));
        assert_eq!(metadata.column_type(0), Some(&CqlType::Text));
        assert_eq!(metadata.column_type(2), Some(&CqlType::Bigint));
    }

    #[test]
    fn test_per_column_table_spec() {
        let mut buf = CqlBuffer::new();
        buf.pack_int(0);
        buf.pack_int(2);
        for (ks, table, name) in [("ks1", "t1", "a"), ("ks2", "t2", "b")] {
            buf.pack_string(ks).unwrap();
            buf.pack_string(table).unwrap();
            buf.pack_string(name).unwrap();
            buf.pack_short(0x0D);
        }
        let metadata = Metadata::unpack(&mut buf).unwrap();

        assert_eq!(metadata.column_name(1).unwrap(), "ks2.t2.b");
        assert_eq!(metadata.column_shortname(0), Some("a"));
    }

    #[test]
    fn test_short_name_disambiguation() {
        let mut buf = CqlBuffer::new();
        buf.pack_int(0);
        buf.pack_int(3);
        for (ks, table) in [("ks1", "t1"), ("ks1", "t2"), ("ks2", "t2")] {
            buf.pack_string(ks).unwrap();
            buf.pack_string(table).unwrap();
            buf.pack_string("id").unwrap();
            buf.pack_short(0x09);
        }
        let metadata = Metadata::unpack(&mut buf).unwrap();

        assert_eq!(metadata.column_shortname(0), Some("t1.id"));
        assert_eq!(metadata.column_shortname(1), Some("ks1.t2.id"));
        assert_eq!(metadata.column_shortname(2), Some("ks2.t2.id"));
    }

    #[test]
    fn test_short_names_are_unique() {
        let mut buf = CqlBuffer::new();
        buf.pack_int(0);
        buf.pack_int(4);
        for (ks, table, name) in [
            ("ks1", "t1", "id"),
            ("ks1", "t2", "id"),
            ("ks1", "t1", "value"),
            ("ks2", "t1", "value"),
        ] {
            buf.pack_string(ks).unwrap();
            buf.pack_string(table).unwrap();
            buf.pack_string(name).unwrap();
            buf.pack_short(0x0D);
        }
        let metadata = Metadata::unpack(&mut buf).unwrap();

        let short_names: HashSet<_> = (0..metadata.len())
            .map(|i| metadata.column_shortname(i).unwrap().to_string())
            .collect();
        assert_eq!(short_names.len(), metadata.len());
    }

    #[test]
    fn test_find_column() {
        let metadata = global_block(&[("key", 0x0A), ("i", 0x09)]);

        assert_eq!(metadata.find_column("key"), Some(0));
        assert_eq!(metadata.find_column("i"), Some(1));
        assert_eq!(metadata.find_column("missing"), None);
    }

    #[test]
    fn test_find_column_by_qualified_short_name() {
        let mut buf = CqlBuffer::new();
        buf.pack_int(0);
        buf.pack_int(2);
        for table in ["t1", "t2"] {
            buf.pack_string("ks").unwrap();
            buf.pack_string(table).unwrap();
            buf.pack_string("id").unwrap();
            buf.pack_short(0x09);
        }
        let metadata = Metadata::unpack(&mut buf).unwrap();

        assert_eq!(metadata.find_column("t1.id"), Some(0));
        assert_eq!(metadata.find_column("t2.id"), Some(1));
        // bare ambiguous name still resolves to the first occurrence
        assert_eq!(metadata.find_column("id"), Some(0));
    }

    #[test]
    fn test_encode_row() {
        let metadata = global_block(&[("name", 0x0D), ("age", 0x09)]);

        let cells = metadata
            .encode_row(&[Some(CqlValue::Text("alice".into())), Some(CqlValue::Int(30))])
            .unwrap();
        assert_eq!(cells[0].as_deref(), Some(&b"alice"[..]));
        assert_eq!(cells[1].as_deref(), Some(&[0x00, 0x00, 0x00, 0x1E][..]));
    }

    #[test]
    fn test_encode_row_null_passthrough() {
        let metadata = global_block(&[("name", 0x0D)]);
        let cells = metadata.encode_row(&[None]).unwrap();
        assert_eq!(cells, vec![None]);
    }

    #[test]
    fn test_encode_row_length_mismatch() {
        let metadata = global_block(&[("name", 0x0D), ("age", 0x09)]);
        let result = metadata.encode_row(&[Some(CqlValue::Int(1))]);
        assert!(matches!(
            result,
            Err(CodecError::ColumnCountMismatch {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_row_cells_roundtrip() {
        let metadata = global_block(&[("a", 0x0D), ("b", 0x09), ("c", 0x03)]);
        let values = vec![
            Some(CqlValue::Text("hello".into())),
            Some(CqlValue::Int(100)),
            None,
        ];

        let encoded = metadata.encode_row(&values).unwrap();
        let mut buf = CqlBuffer::new();
        for cell in &encoded {
            buf.pack_bytes(cell.as_deref()).unwrap();
        }

        let cells = metadata.unpack_cells(&mut buf).unwrap();
        assert_eq!(metadata.decode_row(&cells).unwrap(), values);
    }
}

//! Packet schema definitions and the schema registry.
//!
//! This module provides:
//! - `FieldDescriptor`: one field of a packet payload (name, byte size, optional bit-flags)
//! - `SchemaDefinition`: how to validate and decode one packet type
//! - `SchemaRegistry`: schemas indexed by packet ID, plus the canonical output columns
//!
//! Schema sources are JSON documents holding a list of packet definitions:
//!
//! ```json
//! [
//!   {
//!     "id": 16, "num_bytes": 2, "length": 8,
//!     "fields": [
//!       {"name": "status", "size": 1, "bits": ["armed", "fault"]},
//!       {"name": "voltage", "size": 1}
//!     ],
//!     "all_fields": ["status", "voltage", "armed", "fault"]
//!   }
//! ]
//! ```

use crate::error::{ParseError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Column holding the arrival sequence number of a record.
pub const PACKET_NUM_COLUMN: &str = "PacketNum";
/// Column holding the packet identifier of a record.
pub const ID_COLUMN: &str = "ID";

/// Bytes in a frame that are not payload: start, id, numbytes, 2 checksum bytes, end.
pub const FRAME_OVERHEAD: usize = 6;

/// Largest supported multi-byte field (decoded as an unsigned 64-bit integer).
pub const MAX_FIELD_SIZE: usize = 8;

/// Order in which bit-flag names map onto the bits of a 1-byte field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BitOrder {
    /// First name is bit 0 (`value & 1`).
    #[default]
    LsbFirst,
    /// First name is bit 7 (`(value >> 7) & 1`).
    MsbFirst,
}

impl BitOrder {
    /// Extracts the bit that belongs to the name at `index`.
    pub fn bit(self, value: u8, index: usize) -> u8 {
        match self {
            BitOrder::LsbFirst => (value >> index) & 1,
            BitOrder::MsbFirst => (value >> (7 - index)) & 1,
        }
    }
}

/// A single payload field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    /// Size in bytes; multi-byte fields are big-endian.
    pub size: usize,
    /// Names of the individual bits (only valid when `size == 1`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bits: Vec<String>,
    #[serde(default)]
    pub bit_order: BitOrder,
}

/// Schema for one packet type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub id: u8,
    /// Expected value of the NumBytes byte; unchecked when absent.
    #[serde(default)]
    pub num_bytes: Option<u8>,
    /// Expected total frame length; unchecked when absent.
    #[serde(default)]
    pub length: Option<usize>,
    pub fields: Vec<FieldDescriptor>,
    /// Every column this packet type may ever populate.
    #[serde(default)]
    pub all_fields: Vec<String>,
}

impl SchemaDefinition {
    /// Total number of payload bytes consumed by the declared fields.
    pub fn payload_size(&self) -> usize {
        self.fields.iter().map(|f| f.size).sum()
    }

    /// All column names this schema populates or declares.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .flat_map(|f| std::iter::once(f.name.as_str()).chain(f.bits.iter().map(String::as_str)))
            .chain(self.all_fields.iter().map(String::as_str))
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();

        for field in &self.fields {
            if field.name.is_empty() {
                return Err(schema_err(self.id, "field with empty name"));
            }
            if field.size == 0 || field.size > MAX_FIELD_SIZE {
                return Err(schema_err(
                    self.id,
                    &format!(
                        "field '{}' has size {}, expected 1..={}",
                        field.name, field.size, MAX_FIELD_SIZE
                    ),
                ));
            }
            if !field.bits.is_empty() {
                if field.size != 1 {
                    return Err(schema_err(
                        self.id,
                        &format!("field '{}' declares bits but is not 1 byte", field.name),
                    ));
                }
                if field.bits.len() > 8 {
                    return Err(schema_err(
                        self.id,
                        &format!("field '{}' declares more than 8 bits", field.name),
                    ));
                }
            }

            let names = std::iter::once(&field.name).chain(field.bits.iter());
            for name in names {
                if name == PACKET_NUM_COLUMN || name == ID_COLUMN {
                    return Err(schema_err(
                        self.id,
                        &format!("'{}' is a reserved column name", name),
                    ));
                }
                if !seen.insert(name.as_str()) {
                    return Err(schema_err(
                        self.id,
                        &format!("column '{}' declared twice", name),
                    ));
                }
            }
        }

        if let Some(length) = self.length {
            let expected = self.payload_size() + FRAME_OVERHEAD;
            if length != expected {
                return Err(schema_err(
                    self.id,
                    &format!(
                        "declared length {} does not match fields + overhead ({})",
                        length, expected
                    ),
                ));
            }
        }

        Ok(())
    }
}

fn schema_err(id: u8, msg: &str) -> ParseError {
    ParseError::Schema(format!("packet id {:#04x}: {}", id, msg))
}

/// Registry of packet schemas indexed by packet ID.
///
/// Read-only after load; share it across concurrent runs behind an `Arc`.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    schemas: HashMap<u8, SchemaDefinition>,
    columns: Vec<String>,
}

impl SchemaRegistry {
    /// Builds a registry from already-parsed definitions.
    pub fn from_definitions(definitions: Vec<SchemaDefinition>) -> Result<Self> {
        let mut schemas = HashMap::with_capacity(definitions.len());

        for def in definitions {
            def.validate()?;
            let id = def.id;
            if schemas.insert(id, def).is_some() {
                return Err(ParseError::Schema(format!(
                    "duplicate packet id {:#04x}",
                    id
                )));
            }
        }

        let columns = compute_canonical_columns(schemas.values());
        Ok(Self { schemas, columns })
    }

    /// Loads a registry from a JSON schema source.
    pub fn load<R: Read>(reader: R) -> Result<Self> {
        let definitions: Vec<SchemaDefinition> = serde_json::from_reader(reader)
            .map_err(|e| ParseError::Schema(format!("malformed schema source: {}", e)))?;
        Self::from_definitions(definitions)
    }

    /// Loads a registry from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Self::load(json.as_bytes())
    }

    /// Loads a registry from a JSON file on disk.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            ParseError::Schema(format!("cannot read schema file {}: {}", path.display(), e))
        })?;
        Self::load(BufReader::new(file))
    }

    /// Gets the schema for a packet ID.
    pub fn get(&self, id: u8) -> Option<&SchemaDefinition> {
        self.schemas.get(&id)
    }

    /// Number of registered packet types.
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    /// Returns true if no packet types are registered.
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Registered schemas ordered by packet ID.
    pub fn schemas(&self) -> Vec<&SchemaDefinition> {
        let mut defs: Vec<_> = self.schemas.values().collect();
        defs.sort_by_key(|d| d.id);
        defs
    }

    /// The canonical output columns: `PacketNum`, `ID`, then every other column sorted.
    pub fn canonical_columns(&self) -> &[String] {
        &self.columns
    }
}

fn compute_canonical_columns<'a>(
    schemas: impl Iterator<Item = &'a SchemaDefinition>,
) -> Vec<String> {
    let rest: BTreeSet<&str> = schemas
        .flat_map(|s| s.column_names())
        .filter(|c| *c != PACKET_NUM_COLUMN && *c != ID_COLUMN)
        .collect();

    let mut columns = Vec::with_capacity(rest.len() + 2);
    columns.push(PACKET_NUM_COLUMN.to_string());
    columns.push(ID_COLUMN.to_string());
    columns.extend(rest.into_iter().map(str::to_string));
    columns
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"[
        {"id": 16, "num_bytes": 2, "length": 8,
         "fields": [
            {"name": "status", "size": 1, "bits": ["flag0", "flag1"]},
            {"name": "volts", "size": 1}
         ],
         "all_fields": ["status", "volts", "flag0", "flag1", "spare"]},
        {"id": 1, "num_bytes": 3, "length": 9,
         "fields": [{"name": "altitude", "size": 3}]}
    ]"#;

    #[test]
    fn test_load_and_lookup() {
        let registry = SchemaRegistry::from_json_str(SCHEMA).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(16).unwrap().fields.len(), 2);
        assert_eq!(registry.get(1).unwrap().payload_size(), 3);
        assert!(registry.get(2).is_none());
    }

    #[test]
    fn test_canonical_columns_order() {
        let registry = SchemaRegistry::from_json_str(SCHEMA).unwrap();
        assert_eq!(
            registry.canonical_columns(),
            &["PacketNum", "ID", "altitude", "flag0", "flag1", "spare", "status", "volts"]
        );
    }

    #[test]
    fn test_canonical_columns_deterministic() {
        let a = SchemaRegistry::from_json_str(SCHEMA).unwrap();
        for _ in 0..10 {
            let b = SchemaRegistry::from_json_str(SCHEMA).unwrap();
            assert_eq!(a.canonical_columns(), b.canonical_columns());
        }
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let json = r#"[
            {"id": 1, "fields": [{"name": "a", "size": 1}]},
            {"id": 1, "fields": [{"name": "b", "size": 1}]}
        ]"#;
        match SchemaRegistry::from_json_str(json) {
            Err(ParseError::Schema(msg)) => assert!(msg.contains("duplicate")),
            other => panic!("Expected SchemaError, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_required_field_rejected() {
        let json = r#"[{"id": 1, "length": 7}]"#;
        assert!(matches!(
            SchemaRegistry::from_json_str(json),
            Err(ParseError::Schema(_))
        ));
    }

    #[test]
    fn test_bits_on_multibyte_field_rejected() {
        let json = r#"[{"id": 1, "fields": [{"name": "a", "size": 2, "bits": ["x"]}]}]"#;
        assert!(SchemaRegistry::from_json_str(json).is_err());
    }

    #[test]
    fn test_length_invariant_enforced() {
        let json = r#"[{"id": 1, "length": 9, "fields": [{"name": "a", "size": 1}]}]"#;
        match SchemaRegistry::from_json_str(json) {
            Err(ParseError::Schema(msg)) => assert!(msg.contains("declared length")),
            other => panic!("Expected SchemaError, got {:?}", other),
        }
    }

    #[test]
    fn test_reserved_column_rejected() {
        let json = r#"[{"id": 1, "fields": [{"name": "ID", "size": 1}]}]"#;
        assert!(SchemaRegistry::from_json_str(json).is_err());
    }

    #[test]
    fn test_unreadable_file() {
        let result = SchemaRegistry::from_file("/nonexistent/packet_schema.json");
        assert!(matches!(result, Err(ParseError::Schema(_))));
    }

    #[test]
    fn test_bit_order() {
        assert_eq!(BitOrder::LsbFirst.bit(0b0000_0001, 0), 1);
        assert_eq!(BitOrder::LsbFirst.bit(0b1000_0000, 7), 1);
        assert_eq!(BitOrder::MsbFirst.bit(0b1000_0000, 0), 1);
        assert_eq!(BitOrder::MsbFirst.bit(0b0000_0001, 0), 0);
    }
}

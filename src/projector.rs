//! Projection of decoded records onto the canonical row shape.

use crate::decoder::DecodedRecord;
use crate::schema::{SchemaRegistry, ID_COLUMN, PACKET_NUM_COLUMN};
use std::collections::HashMap;

/// A fixed-shape row: one slot per canonical column, `None` where unpopulated.
pub type Row = Vec<Option<u64>>;

/// Maps decoded records onto the canonical column set.
#[derive(Debug, Clone)]
pub struct ColumnProjector {
    columns: Vec<String>,
    index: HashMap<String, usize>,
}

impl ColumnProjector {
    /// Creates a projector over an ordered column list.
    pub fn new(columns: Vec<String>) -> Self {
        let index = columns
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self { columns, index }
    }

    /// Creates a projector over the registry's canonical columns.
    pub fn from_registry(registry: &SchemaRegistry) -> Self {
        Self::new(registry.canonical_columns().to_vec())
    }

    /// The ordered column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of columns in each row.
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Position of a column, if it is part of the canonical set.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Builds the row for a record with the given sequence number.
    ///
    /// Values whose column is not in the canonical set are dropped.
    pub fn project(&self, sequence: u64, record: &DecodedRecord<'_>) -> Row {
        let mut row = vec![None; self.columns.len()];

        if let Some(i) = self.position(PACKET_NUM_COLUMN) {
            row[i] = Some(sequence);
        }
        if let Some(i) = self.position(ID_COLUMN) {
            row[i] = Some(record.packet_id as u64);
        }
        for &(name, value) in &record.values {
            if let Some(i) = self.position(name) {
                row[i] = Some(value);
            }
        }

        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_fills_missing_with_none() {
        let projector = ColumnProjector::new(
            ["PacketNum", "ID", "a", "b", "c"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );
        let record = DecodedRecord {
            packet_id: 7,
            values: vec![("ID", 7), ("c", 3), ("a", 1), ("unknown", 9)],
        };

        let row = projector.project(42, &record);
        assert_eq!(row, vec![Some(42), Some(7), Some(1), None, Some(3)]);
    }

    #[test]
    fn test_from_registry_width() {
        let registry = SchemaRegistry::from_json_str(
            r#"[{"id": 1, "fields": [{"name": "x", "size": 1, "bits": ["b0"]}], "all_fields": ["y"]}]"#,
        )
        .unwrap();
        let projector = ColumnProjector::from_registry(&registry);
        assert_eq!(projector.width(), 5);
        assert_eq!(projector.position("PacketNum"), Some(0));
        assert_eq!(projector.position("y"), Some(4));
    }
}

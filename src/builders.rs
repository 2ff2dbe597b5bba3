//! Column builders for turning batches of rows into Polars DataFrames.
//!
//! This module provides builders that handle:
//! - Sparse rows (columns a packet type never populates)
//! - Null-filling for missing values
//! - Pre-allocation for performance
//! - Reuse across batches (building drains the builder but keeps its columns)

use crate::error::{ParseError, Result};
use crate::projector::Row;
use polars::prelude::*;

/// Polars type of every output column.
pub const COLUMN_DTYPE: DataType = DataType::UInt64;

/// Builds the Polars schema for an ordered column list.
pub fn polars_schema(columns: &[String]) -> Schema {
    Schema::from_iter(
        columns
            .iter()
            .map(|name| Field::new(name.as_str().into(), COLUMN_DTYPE)),
    )
}

/// A builder for a single nullable UInt64 column.
pub struct ColumnBuilder {
    name: String,
    values: Vec<Option<u64>>,
}

impl ColumnBuilder {
    /// Creates a new ColumnBuilder with pre-allocated capacity.
    pub fn new(name: String, capacity: usize) -> Self {
        Self {
            name,
            values: Vec::with_capacity(capacity),
        }
    }

    /// Adds a value to the builder.
    pub fn push(&mut self, value: Option<u64>) {
        self.values.push(value);
    }

    /// Adds a null value to the builder.
    pub fn push_null(&mut self) {
        self.values.push(None);
    }

    /// Returns the number of values in the builder.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the builder is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Builds a Series from the accumulated values and clears the builder.
    pub fn take_series(&mut self) -> Series {
        let capacity = self.values.capacity();
        let values = std::mem::replace(&mut self.values, Vec::with_capacity(capacity));
        Series::new(self.name.as_str().into(), values)
    }
}

/// A collection of column builders for constructing one DataFrame per batch.
pub struct DataFrameBuilder {
    columns: Vec<ColumnBuilder>,
    rows: usize,
}

impl DataFrameBuilder {
    /// Creates a new DataFrameBuilder with pre-allocated capacity per column.
    pub fn new(column_names: &[String], capacity: usize) -> Self {
        let columns = column_names
            .iter()
            .map(|name| ColumnBuilder::new(name.clone(), capacity))
            .collect();

        Self { columns, rows: 0 }
    }

    /// Adds a row to the builder.
    /// Slots beyond the end of `row` are filled with nulls.
    pub fn push_row(&mut self, row: &Row) {
        for (i, builder) in self.columns.iter_mut().enumerate() {
            match row.get(i) {
                Some(value) => builder.push(*value),
                None => builder.push_null(),
            }
        }
        self.rows += 1;
    }

    /// Builds a DataFrame from the accumulated rows and resets the builder.
    pub fn take_frame(&mut self) -> Result<DataFrame> {
        let columns: Vec<Column> = self
            .columns
            .iter_mut()
            .map(|builder| builder.take_series().into())
            .collect();
        self.rows = 0;

        DataFrame::new(columns).map_err(ParseError::Writer)
    }

    /// Returns the number of rows currently in the builder.
    pub fn len(&self) -> usize {
        self.rows
    }

    /// Returns true if the builder is empty.
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(cols: &[&str]) -> Vec<String> {
        cols.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_column_builder_nulls() {
        let mut builder = ColumnBuilder::new("test".to_string(), 10);

        builder.push(Some(1));
        builder.push_null();
        builder.push(Some(3));
        assert_eq!(builder.len(), 3);

        let series = builder.take_series();
        assert_eq!(series.len(), 3);
        assert_eq!(series.name(), "test");
        assert_eq!(series.dtype(), &DataType::UInt64);
        assert_eq!(series.null_count(), 1);
        assert!(builder.is_empty());
    }

    #[test]
    fn test_dataframe_builder_batches() {
        let mut builder = DataFrameBuilder::new(&names(&["PacketNum", "ID", "x"]), 4);

        builder.push_row(&vec![Some(1), Some(16), Some(200)]);
        builder.push_row(&vec![Some(2), Some(17), None]);

        let df = builder.take_frame().unwrap();
        assert_eq!(df.height(), 2);
        assert_eq!(df.width(), 3);
        assert!(builder.is_empty());

        builder.push_row(&vec![Some(3), Some(16)]);
        let df = builder.take_frame().unwrap();
        assert_eq!(df.height(), 1);
        assert_eq!(df.column("x").unwrap().null_count(), 1);
    }

    #[test]
    fn test_all_null_column_keeps_dtype() {
        let mut builder = DataFrameBuilder::new(&names(&["PacketNum", "unused"]), 1);
        builder.push_row(&vec![Some(1), None]);

        let df = builder.take_frame().unwrap();
        assert_eq!(df.column("unused").unwrap().dtype(), &DataType::UInt64);
    }

    #[test]
    fn test_polars_schema() {
        let schema = polars_schema(&names(&["PacketNum", "ID", "x"]));
        assert_eq!(schema.len(), 3);
        assert_eq!(schema.get("x"), Some(&DataType::UInt64));
    }
}

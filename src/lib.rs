//! Schema-driven decoding of framed binary telemetry into Parquet.
//!
//! A telemetry capture is a byte stream of frames:
//!
//! ```text
//! 0x01 | id | numbytes | payload... | checksum (BE u16) | 0x05
//! ```
//!
//! A JSON schema registry describes the payload of each packet type. One parse
//! run scans the stream in a single sequential pass, validates and decodes every
//! frame, projects valid records onto a fixed column set and streams them into a
//! Parquet file in batches. Invalid frames are logged, counted and skipped.
//!
//! # Example
//!
//! ```no_run
//! use framelog_polars::{FramelogParser, ParseOptions};
//!
//! let summary = FramelogParser::parse_file(
//!     "run-42",
//!     "capture.bin",
//!     "packet_schema.json",
//!     "out/run-42",
//!     ParseOptions::default(),
//! )?;
//! println!("{} rows written to {:?}", summary.rows, summary.output);
//!
//! let df = FramelogParser::read_output("out/run-42/data.parquet")?;
//! println!("{}", df);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Output
//!
//! Every column is a nullable `UInt64`. The column set is fixed for a given
//! registry: `PacketNum`, `ID`, then every field and bit-flag name across all
//! schemas in sorted order. `PacketNum` counts valid records from 1 in stream
//! order. Columns a packet type does not populate are null in its rows.
//!
//! # Input modes
//!
//! Sources whose leading bytes are all hex digits and whitespace are read as
//! hex text, one line at a time. Everything else is read as raw binary.

pub mod builders;
pub mod config;
pub mod decoder;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod projector;
pub mod scanner;
pub mod schema;
pub mod source;
pub mod writer;

pub use config::{OutputCompression, ParseOptions};
pub use error::{FrameRejection, ParseError, Result};
pub use pipeline::{ParsePipeline, ParseSummary};
pub use polars::prelude::DataFrame;
pub use progress::{ChannelReporter, LogReporter, NoopReporter, ProgressReporter, RunEvent};
pub use scanner::{Framing, ResyncPolicy};
pub use schema::SchemaRegistry;

use polars::prelude::{ParquetReader, SerReader};
use std::fs::File;
use std::path::Path;

/// Main entry point for one-off parse runs.
pub struct FramelogParser;

impl FramelogParser {
    /// Parses a capture file against a schema file, logging progress through `tracing`.
    ///
    /// The artifact is committed to `<output_dir>/<options.output_file_name>`.
    /// Schema errors fail the run before the input is opened.
    pub fn parse_file<I, S, O>(
        run_id: &str,
        input: I,
        schema_path: S,
        output_dir: O,
        options: ParseOptions,
    ) -> Result<ParseSummary>
    where
        I: AsRef<Path>,
        S: AsRef<Path>,
        O: AsRef<Path>,
    {
        pipeline::run_with_schema_file(
            run_id,
            schema_path.as_ref(),
            input.as_ref(),
            output_dir.as_ref(),
            options,
            &LogReporter,
        )
    }

    /// Loads a committed artifact back into a DataFrame.
    pub fn read_output<P: AsRef<Path>>(path: P) -> Result<DataFrame> {
        let file = File::open(path)?;
        Ok(ParquetReader::new(file).finish()?)
    }
}

/// Returns the output column list a schema file produces.
pub fn canonical_columns<P: AsRef<Path>>(schema_path: P) -> Result<Vec<String>> {
    let registry = SchemaRegistry::from_file(schema_path)?;
    Ok(registry.canonical_columns().to_vec())
}

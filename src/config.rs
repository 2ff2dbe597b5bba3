//! Options for a parse run.

use crate::error::{ParseError, Result};
use crate::scanner::{Framing, ResyncPolicy, DEFAULT_MAX_FRAME_LEN};
use polars::prelude::ParquetCompression;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Default number of rows buffered before a batch is written.
pub const DEFAULT_BATCH_SIZE: usize = 5000;
/// Default read size for binary sources.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 4 * 1024 * 1024;
/// Progress percentage never exceeded before finalization.
pub const DEFAULT_PROGRESS_CAP: f64 = 90.0;
/// File name of the columnar artifact inside the output directory.
pub const DEFAULT_OUTPUT_FILE_NAME: &str = "data.parquet";

/// Parquet compression codec for the output artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputCompression {
    Uncompressed,
    Snappy,
    Gzip,
    Lz4,
    #[default]
    Zstd,
}

impl OutputCompression {
    pub fn to_parquet(self) -> ParquetCompression {
        match self {
            OutputCompression::Uncompressed => ParquetCompression::Uncompressed,
            OutputCompression::Snappy => ParquetCompression::Snappy,
            OutputCompression::Gzip => ParquetCompression::Gzip(None),
            OutputCompression::Lz4 => ParquetCompression::Lz4Raw,
            OutputCompression::Zstd => ParquetCompression::Zstd(None),
        }
    }
}

/// Tunables for one parse run.
///
/// Deserializable from JSON with every field optional:
///
/// ```
/// use framelog_polars::config::ParseOptions;
///
/// let opts = ParseOptions::from_json_str(r#"{"batch_size": 1000, "resync": "restart"}"#)?;
/// assert_eq!(opts.batch_size, 1000);
/// assert_eq!(opts.output_file_name, "data.parquet");
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseOptions {
    pub batch_size: usize,
    pub read_chunk_size: usize,
    pub resync: ResyncPolicy,
    pub framing: Framing,
    pub max_frame_len: usize,
    pub compression: OutputCompression,
    pub progress_cap: f64,
    pub output_file_name: String,
    /// Interrupt flag checked between batches.
    #[serde(skip)]
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            resync: ResyncPolicy::default(),
            framing: Framing::default(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            compression: OutputCompression::default(),
            progress_cap: DEFAULT_PROGRESS_CAP,
            output_file_name: DEFAULT_OUTPUT_FILE_NAME.to_string(),
            cancel: None,
        }
    }
}

impl ParseOptions {
    /// Parses options from a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let opts: Self = serde_json::from_str(json)?;
        opts.validate()?;
        Ok(opts)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_read_chunk_size(mut self, read_chunk_size: usize) -> Self {
        self.read_chunk_size = read_chunk_size;
        self
    }

    pub fn with_resync(mut self, resync: ResyncPolicy) -> Self {
        self.resync = resync;
        self
    }

    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    pub fn with_compression(mut self, compression: OutputCompression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_output_file_name(mut self, name: impl Into<String>) -> Self {
        self.output_file_name = name.into();
        self
    }

    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Returns true once the cancellation flag has been raised.
    pub fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Checks that the options describe a runnable configuration.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(ParseError::Other("batch_size must be at least 1".to_string()));
        }
        if self.read_chunk_size == 0 {
            return Err(ParseError::Other(
                "read_chunk_size must be at least 1".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.progress_cap) {
            return Err(ParseError::Other(format!(
                "progress_cap must be within 0..=100, got {}",
                self.progress_cap
            )));
        }
        if self.output_file_name.is_empty()
            || self.output_file_name.contains(['/', '\\'])
        {
            return Err(ParseError::Other(format!(
                "invalid output file name '{}'",
                self.output_file_name
            )));
        }
        Ok(())
    }
}

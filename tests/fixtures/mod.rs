//! Test fixtures for integration tests
//!
//! Frame builders, schema documents and helpers for staging inputs on disk.

use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// One packet type: ID=1, single byte field `X`.
pub const SINGLE_FIELD_SCHEMA: &str = r#"[
    {"id": 1, "num_bytes": 1, "length": 7,
     "fields": [{"name": "X", "size": 1}]}
]"#;

/// Two packet types: 0x10 with a fully flagged status byte, 0x20 with a 16-bit reading.
pub const MIXED_SCHEMA: &str = r#"[
    {"id": 16, "num_bytes": 2, "length": 8,
     "fields": [
        {"name": "A", "size": 1,
         "bits": ["flag0", "flag1", "flag2", "flag3", "flag4", "flag5", "flag6", "flag7"]},
        {"name": "B", "size": 1}
     ],
     "all_fields": ["A", "B", "flag0", "flag1", "flag2", "flag3", "flag4", "flag5", "flag6", "flag7"]},
    {"id": 32, "num_bytes": 2, "length": 8,
     "fields": [{"name": "pressure", "size": 2}]}
]"#;

/// Builds a valid frame around `payload`.
pub fn frame(id: u8, payload: &[u8]) -> Vec<u8> {
    let num_bytes = payload.len() as u8;
    let sum = payload
        .iter()
        .fold(num_bytes as u32, |acc, &b| acc + b as u32);
    let checksum = (sum % 65536) as u16;

    let mut out = Vec::with_capacity(payload.len() + 6);
    out.push(0x01);
    out.push(id);
    out.push(num_bytes);
    out.extend_from_slice(payload);
    out.extend_from_slice(&checksum.to_be_bytes());
    out.push(0x05);
    out
}

/// `count` single-field frames with `X = i % 256`.
pub fn single_field_stream(count: usize) -> Vec<u8> {
    (0..count)
        .flat_map(|i| frame(1, &[(i % 256) as u8]))
        .collect()
}

/// Renders bytes as space-separated uppercase hex.
pub fn to_hex_line(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// A scratch directory holding a schema file and captured inputs.
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("create temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Writes a schema document and returns its path.
    pub fn schema(&self, json: &str) -> PathBuf {
        self.write("schema.json", json.as_bytes())
    }

    /// Writes a file into the workspace and returns its path.
    pub fn write(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).expect("write fixture");
        path
    }

    /// Output directory for a run.
    pub fn out_dir(&self, run_id: &str) -> PathBuf {
        self.dir.path().join("out").join(run_id)
    }
}

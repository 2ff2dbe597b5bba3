//! The single-pass parse pipeline.
//!
//! One run reads a byte source once, drives the scanner, decoder, projector and
//! writer in lockstep, and either commits one Parquet file or leaves no output.
//! Per-frame failures are logged and counted; schema, I/O and writer failures
//! abort the run.

use crate::config::ParseOptions;
use crate::decoder::decode;
use crate::error::{ParseError, Result};
use crate::progress::{percent_of, NoopReporter, Progress, ProgressReporter, RunOutcome};
use crate::projector::ColumnProjector;
use crate::scanner::{FrameScanner, Framing};
use crate::schema::SchemaRegistry;
use crate::source::{
    decode_hex_line, detect_input_mode, read_hex_line, HexLine, InputMode, SAMPLE_SIZE,
};
use crate::writer::{remove_stale_temp, ColumnarWriter};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, ErrorKind, Read};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

static NOOP_REPORTER: NoopReporter = NoopReporter;

/// Outcome of a successful run; what a metadata store would persist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseSummary {
    pub run_id: String,
    /// Final artifact path, absent when no valid frames were found.
    pub output: Option<PathBuf>,
    pub columns: Vec<String>,
    pub rows: u64,
    pub frames_seen: u64,
    pub bytes_read: u64,
    pub input_mode: InputMode,
    /// Rejected frame counts keyed by rejection kind.
    pub rejections: BTreeMap<String, u64>,
    pub malformed_lines: u64,
    pub abandoned_frames: u64,
}

impl ParseSummary {
    /// Total number of rejected frames.
    pub fn rejected(&self) -> u64 {
        self.rejections.values().sum()
    }
}

/// Where in the source a frame ended.
#[derive(Debug, Clone, Copy)]
enum Location {
    Offset(u64),
    Line(u64),
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Offset(o) => write!(f, "offset {}", o),
            Location::Line(l) => write!(f, "line {}", l),
        }
    }
}

/// Drives parse runs against a shared, read-only schema registry.
pub struct ParsePipeline<'a> {
    registry: &'a SchemaRegistry,
    options: ParseOptions,
    reporter: &'a dyn ProgressReporter,
}

impl<'a> ParsePipeline<'a> {
    pub fn new(registry: &'a SchemaRegistry, options: ParseOptions) -> Self {
        Self {
            registry,
            options,
            reporter: &NOOP_REPORTER,
        }
    }

    /// Sets the receiver of progress and status notifications.
    pub fn with_reporter(mut self, reporter: &'a dyn ProgressReporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn options(&self) -> &ParseOptions {
        &self.options
    }

    /// Parses the file at `input` into `<output_dir>/<output_file_name>`.
    pub fn run_file(&self, run_id: &str, input: &Path, output_dir: &Path) -> Result<ParseSummary> {
        reported(self.reporter, run_id, || self.execute_file(run_id, input, output_dir))
    }

    /// Parses an arbitrary byte source. `total_len` enables percentage progress.
    pub fn run<R: Read>(
        &self,
        run_id: &str,
        reader: R,
        total_len: Option<u64>,
        output_dir: &Path,
    ) -> Result<ParseSummary> {
        reported(self.reporter, run_id, || {
            self.execute(run_id, reader, total_len, output_dir)
        })
    }

    fn execute_file(&self, run_id: &str, input: &Path, output_dir: &Path) -> Result<ParseSummary> {
        let file = File::open(input)?;
        let total = file.metadata().ok().map(|m| m.len());
        self.execute(run_id, file, total, output_dir)
    }

    fn execute<R: Read>(
        &self,
        run_id: &str,
        mut reader: R,
        total_len: Option<u64>,
        output_dir: &Path,
    ) -> Result<ParseSummary> {
        self.options.validate()?;

        std::fs::create_dir_all(output_dir)?;
        let final_path = output_dir.join(&self.options.output_file_name);
        if remove_stale_temp(&final_path)? {
            info!(run_id, path = %final_path.display(), "Removed stale temporary output");
        }

        let mut sample = Vec::with_capacity(SAMPLE_SIZE);
        reader
            .by_ref()
            .take(SAMPLE_SIZE as u64)
            .read_to_end(&mut sample)?;
        let mode = detect_input_mode(&sample);
        info!(run_id, mode = %mode, "Parsing started");

        let mut run = Run::new(run_id, self, mode, total_len, final_path);
        run.report("starting");

        let source = Cursor::new(sample).chain(reader);
        match mode {
            InputMode::Binary => run.scan_binary(source)?,
            InputMode::HexText => run.scan_hex(BufReader::new(source))?,
        }

        run.finish()
    }
}

/// Loads the schema at `schema_path` and parses `input` against it as one run.
///
/// A schema that fails to load is reported to `reporter` as a failed run, the
/// same way an I/O or writer failure is.
pub fn run_with_schema_file(
    run_id: &str,
    schema_path: &Path,
    input: &Path,
    output_dir: &Path,
    options: ParseOptions,
    reporter: &dyn ProgressReporter,
) -> Result<ParseSummary> {
    reported(reporter, run_id, || {
        let registry = SchemaRegistry::from_file(schema_path)?;
        info!(
            run_id,
            packet_types = registry.len(),
            columns = registry.canonical_columns().len(),
            "Schema loaded"
        );
        ParsePipeline::new(&registry, options)
            .with_reporter(reporter)
            .execute_file(run_id, input, output_dir)
    })
}

/// Brackets `body` with start and finish notifications.
fn reported(
    reporter: &dyn ProgressReporter,
    run_id: &str,
    body: impl FnOnce() -> Result<ParseSummary>,
) -> Result<ParseSummary> {
    notify(reporter, |r| r.on_start(run_id));

    match body() {
        Ok(summary) => {
            info!(
                run_id,
                rows = summary.rows,
                rejected = summary.rejected(),
                malformed_lines = summary.malformed_lines,
                "Parse completed"
            );
            let progress = Progress {
                percent: Some(100.0),
                rows_written: summary.rows,
                bytes_read: summary.bytes_read,
                message: "completed".to_string(),
            };
            notify(reporter, |r| r.on_progress(run_id, &progress));
            let outcome = RunOutcome::Success {
                rows: summary.rows,
                output: summary.output.clone(),
            };
            notify(reporter, |r| r.on_finish(run_id, &outcome));
            Ok(summary)
        }
        Err(e) => {
            error!(run_id, error = %e, "Parse failed");
            let outcome = RunOutcome::Failure {
                error: e.to_string(),
            };
            notify(reporter, |r| r.on_finish(run_id, &outcome));
            Err(e)
        }
    }
}

/// Delivers one notification; a panicking reporter never aborts the run.
fn notify(reporter: &dyn ProgressReporter, f: impl FnOnce(&dyn ProgressReporter)) {
    if catch_unwind(AssertUnwindSafe(|| f(reporter))).is_err() {
        warn!("Progress reporter panicked; notification dropped");
    }
}

/// One run in flight: the scanner plus everything downstream of it.
struct Run<'p, 'a> {
    scanner: FrameScanner,
    sink: RowSink<'p, 'a>,
}

impl<'p, 'a> Run<'p, 'a> {
    fn new(
        run_id: &'p str,
        pipeline: &'p ParsePipeline<'a>,
        mode: InputMode,
        total_len: Option<u64>,
        final_path: PathBuf,
    ) -> Self {
        let options = &pipeline.options;
        let registry = pipeline.registry;

        let scanner = match options.framing {
            Framing::DeclaredLength => FrameScanner::with_declared_lengths(registry),
            Framing::EndMarker => FrameScanner::new(),
        }
        .with_resync(options.resync)
        .with_max_frame_len(options.max_frame_len);

        let projector = ColumnProjector::from_registry(registry);
        let writer = ColumnarWriter::new(
            final_path,
            projector.columns(),
            options.batch_size,
            options.compression.to_parquet(),
        );

        Self {
            scanner,
            sink: RowSink {
                run_id,
                pipeline,
                projector,
                writer,
                mode,
                total_len,
                sequence: 0,
                frames_seen: 0,
                bytes_read: 0,
                rejections: BTreeMap::new(),
                malformed_lines: 0,
            },
        }
    }

    fn report(&self, message: &str) {
        self.sink.report(message);
    }

    fn scan_binary<R: Read>(&mut self, mut source: R) -> Result<()> {
        let mut chunk = vec![0u8; self.sink.pipeline.options.read_chunk_size];

        loop {
            let n = match source.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            let chunk_start = self.sink.bytes_read;
            self.sink.bytes_read += n as u64;

            let mut frames = self.scanner.feed(&chunk[..n]);
            while let Some(frame) = frames.next() {
                let offset = chunk_start + (n - frames.remaining()) as u64;
                if self.sink.accept(&frame, Location::Offset(offset))? {
                    self.sink.checkpoint()?;
                }
            }

            self.sink.check_cancelled()?;
            self.sink.report("parsing");
        }

        Ok(())
    }

    fn scan_hex<R: BufRead>(&mut self, mut source: R) -> Result<()> {
        // Three text bytes per encoded byte ("XX ").
        let limit = self.sink.pipeline.options.max_frame_len.saturating_mul(3);
        let mut line = Vec::new();
        let mut line_no = 0u64;

        loop {
            let consumed = match read_hex_line(&mut source, &mut line, limit)? {
                HexLine::Eof => break,
                HexLine::Line { consumed } => consumed,
                HexLine::Oversize { consumed } => {
                    self.sink.bytes_read += consumed as u64;
                    line_no += 1;
                    self.sink.malformed_lines += 1;
                    warn!(
                        run_id = self.sink.run_id,
                        line = line_no,
                        length = consumed,
                        limit,
                        "Oversize hex line (ignored)"
                    );
                    continue;
                }
            };
            self.sink.bytes_read += consumed as u64;
            line_no += 1;

            let bytes = match decode_hex_line(&line) {
                Ok(bytes) => bytes,
                Err(e) => {
                    self.sink.malformed_lines += 1;
                    warn!(
                        run_id = self.sink.run_id,
                        line = line_no,
                        error = %e,
                        "Malformed hex line (ignored)"
                    );
                    continue;
                }
            };

            for frame in self.scanner.feed(&bytes) {
                if self.sink.accept(&frame, Location::Line(line_no))? {
                    self.sink.checkpoint()?;
                }
            }
        }

        Ok(())
    }

    fn finish(mut self) -> Result<ParseSummary> {
        self.scanner.flush();
        let abandoned_frames = self.scanner.abandoned_frames();
        if abandoned_frames > 0 {
            debug!(
                run_id = self.sink.run_id,
                abandoned_frames, "Abandoned unterminated frames"
            );
        }
        self.sink.report("parsed");

        let sink = self.sink;
        let output = sink.writer.finish()?;
        Ok(ParseSummary {
            run_id: sink.run_id.to_string(),
            output,
            columns: sink.projector.columns().to_vec(),
            rows: sink.sequence,
            frames_seen: sink.frames_seen,
            bytes_read: sink.bytes_read,
            input_mode: sink.mode,
            rejections: sink.rejections,
            malformed_lines: sink.malformed_lines,
            abandoned_frames,
        })
    }
}

/// Receives candidate frames and turns the valid ones into rows.
struct RowSink<'p, 'a> {
    run_id: &'p str,
    pipeline: &'p ParsePipeline<'a>,
    projector: ColumnProjector,
    writer: ColumnarWriter,
    mode: InputMode,
    total_len: Option<u64>,
    /// Valid records so far; also the PacketNum of the latest row.
    sequence: u64,
    frames_seen: u64,
    bytes_read: u64,
    rejections: BTreeMap<String, u64>,
    malformed_lines: u64,
}

impl RowSink<'_, '_> {
    /// Decodes one frame. Returns true if the resulting row completed a batch.
    fn accept(&mut self, frame: &[u8], location: Location) -> Result<bool> {
        self.frames_seen += 1;

        match decode(frame, self.pipeline.registry) {
            Ok(record) => {
                self.sequence += 1;
                let row = self.projector.project(self.sequence, &record);
                self.writer.push(&row)
            }
            Err(rejection) => {
                warn!(
                    run_id = self.run_id,
                    at = %location,
                    id = ?rejection.packet_id(),
                    reason = %rejection,
                    "Frame rejected"
                );
                *self
                    .rejections
                    .entry(rejection.kind().to_string())
                    .or_default() += 1;
                Ok(false)
            }
        }
    }

    /// Cancellation point and progress checkpoint after a flushed batch.
    fn checkpoint(&self) -> Result<()> {
        self.check_cancelled()?;
        self.report("parsing");
        Ok(())
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.pipeline.options.is_cancelled() {
            warn!(run_id = self.run_id, "Cancellation requested");
            return Err(ParseError::Cancelled);
        }
        Ok(())
    }

    fn report(&self, message: &str) {
        let progress = Progress {
            percent: percent_of(
                self.bytes_read,
                self.total_len,
                self.pipeline.options.progress_cap,
            ),
            rows_written: self.writer.rows_written(),
            bytes_read: self.bytes_read,
            message: message.to_string(),
        };
        notify(self.pipeline.reporter, |r| {
            r.on_progress(self.run_id, &progress)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::checksum;
    use crate::progress::{ChannelReporter, RunEvent};
    use crate::scanner::ResyncPolicy;
    use std::sync::atomic::AtomicBool;
    use std::sync::{mpsc, Arc};
    use tempfile::TempDir;

    const SCHEMA: &str = r#"[
        {"id": 2, "num_bytes": 2, "length": 8,
         "fields": [{"name": "speed", "size": 2}]}
    ]"#;

    fn frame(id: u8, payload: &[u8]) -> Vec<u8> {
        let num_bytes = payload.len() as u8;
        let mut out = vec![0x01, id, num_bytes];
        out.extend_from_slice(payload);
        out.extend_from_slice(&checksum(num_bytes, payload).to_be_bytes());
        out.push(0x05);
        out
    }

    fn spaced_hex(bytes: &[u8]) -> String {
        bytes
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn stream(count: u16) -> Vec<u8> {
        (0..count).flat_map(|i| frame(2, &i.to_be_bytes())).collect()
    }

    #[test]
    fn test_binary_run_summary() {
        let registry = SchemaRegistry::from_json_str(SCHEMA).unwrap();
        let dir = TempDir::new().unwrap();
        let mut data = stream(10);
        data.extend_from_slice(&frame(9, &[0]));

        let pipeline = ParsePipeline::new(&registry, ParseOptions::default().with_batch_size(4));
        let summary = pipeline
            .run("run-a", Cursor::new(&data), Some(data.len() as u64), dir.path())
            .unwrap();

        assert_eq!(summary.rows, 10);
        assert_eq!(summary.frames_seen, 11);
        assert_eq!(summary.rejected(), 1);
        assert_eq!(summary.rejections.get("unknown_id"), Some(&1));
        assert_eq!(summary.bytes_read, data.len() as u64);
        assert_eq!(summary.input_mode, InputMode::Binary);
        assert_eq!(summary.columns, vec!["PacketNum", "ID", "speed"]);
        assert_eq!(summary.output, Some(dir.path().join("data.parquet")));
    }

    #[test]
    fn test_hex_run_counts_malformed_lines() {
        let registry = SchemaRegistry::from_json_str(SCHEMA).unwrap();
        let dir = TempDir::new().unwrap();
        let text = format!(
            "{}\n0102 05\n{}\n",
            spaced_hex(&frame(2, &[0, 1])),
            spaced_hex(&frame(2, &[0, 2]))
        );

        let summary = ParsePipeline::new(&registry, ParseOptions::default())
            .run("run-h", text.as_bytes(), None, dir.path())
            .unwrap();

        assert_eq!(summary.input_mode, InputMode::HexText);
        assert_eq!(summary.rows, 2);
        assert_eq!(summary.malformed_lines, 1);
    }

    #[test]
    fn test_empty_source_commits_nothing() {
        let registry = SchemaRegistry::from_json_str(SCHEMA).unwrap();
        let dir = TempDir::new().unwrap();

        let summary = ParsePipeline::new(&registry, ParseOptions::default())
            .run("run-e", std::io::empty(), Some(0), dir.path())
            .unwrap();

        assert_eq!(summary.rows, 0);
        assert_eq!(summary.output, None);
        assert!(!dir.path().join("data.parquet").exists());
    }

    #[test]
    fn test_cancelled_run_leaves_no_output() {
        let registry = SchemaRegistry::from_json_str(SCHEMA).unwrap();
        let dir = TempDir::new().unwrap();
        let flag = Arc::new(AtomicBool::new(true));
        let options = ParseOptions::default()
            .with_batch_size(2)
            .with_cancel_flag(flag);

        let data = stream(8);
        let result =
            ParsePipeline::new(&registry, options).run("run-c", Cursor::new(&data), None, dir.path());

        assert!(matches!(result, Err(ParseError::Cancelled)));
        assert!(!dir.path().join("data.parquet").exists());
        assert!(!dir.path().join("data.parquet.tmp").exists());
    }

    #[test]
    fn test_invalid_options_fail_before_reading() {
        let registry = SchemaRegistry::from_json_str(SCHEMA).unwrap();
        let dir = TempDir::new().unwrap();
        let (tx, rx) = mpsc::channel();
        let reporter = ChannelReporter::new(tx);

        let result = ParsePipeline::new(&registry, ParseOptions::default().with_batch_size(0))
            .with_reporter(&reporter)
            .run("run-x", &[0x01u8][..], None, dir.path());
        assert!(result.is_err());

        let events: Vec<RunEvent> = rx.try_iter().collect();
        assert!(matches!(events.first(), Some(RunEvent::Started { .. })));
        assert!(matches!(
            events.last(),
            Some(RunEvent::Finished {
                outcome: RunOutcome::Failure { .. },
                ..
            })
        ));
    }

    #[test]
    fn test_schema_error_is_reported_as_failed_run() {
        let dir = TempDir::new().unwrap();
        let schema_path = dir.path().join("schema.json");
        std::fs::write(
            &schema_path,
            r#"[{"id": 2, "fields": [{"name": "a", "size": 1}]},
                {"id": 2, "fields": [{"name": "b", "size": 1}]}]"#,
        )
        .unwrap();
        let input = dir.path().join("capture.bin");
        std::fs::write(&input, stream(2)).unwrap();
        let out_dir = dir.path().join("out");
        let (tx, rx) = mpsc::channel();
        let reporter = ChannelReporter::new(tx);

        let result = run_with_schema_file(
            "run-d",
            &schema_path,
            &input,
            &out_dir,
            ParseOptions::default(),
            &reporter,
        );
        assert!(matches!(result, Err(ParseError::Schema(_))));
        assert!(!out_dir.exists());

        let events: Vec<RunEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], RunEvent::Started { run_id } if run_id == "run-d"));
        assert!(matches!(
            &events[1],
            RunEvent::Finished {
                outcome: RunOutcome::Failure { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_run_with_schema_file_reports_success() {
        let dir = TempDir::new().unwrap();
        let schema_path = dir.path().join("schema.json");
        std::fs::write(&schema_path, SCHEMA).unwrap();
        let input = dir.path().join("capture.bin");
        std::fs::write(&input, stream(5)).unwrap();
        let (tx, rx) = mpsc::channel();
        let reporter = ChannelReporter::new(tx);

        let summary = run_with_schema_file(
            "run-f",
            &schema_path,
            &input,
            dir.path(),
            ParseOptions::default(),
            &reporter,
        )
        .unwrap();
        assert_eq!(summary.rows, 5);

        let events: Vec<RunEvent> = rx.try_iter().collect();
        let starts = events
            .iter()
            .filter(|e| matches!(e, RunEvent::Started { .. }))
            .count();
        assert_eq!(starts, 1);
        assert!(matches!(
            events.last(),
            Some(RunEvent::Finished {
                outcome: RunOutcome::Success { rows: 5, .. },
                ..
            })
        ));
    }

    #[test]
    fn test_stale_temp_is_removed() {
        let registry = SchemaRegistry::from_json_str(SCHEMA).unwrap();
        let dir = TempDir::new().unwrap();
        let stale = dir.path().join("data.parquet.tmp");
        std::fs::write(&stale, b"leftover").unwrap();

        ParsePipeline::new(&registry, ParseOptions::default())
            .run("run-s", std::io::empty(), None, dir.path())
            .unwrap();
        assert!(!stale.exists());
    }

    struct PanickingReporter;

    impl ProgressReporter for PanickingReporter {
        fn on_start(&self, _run_id: &str) {
            panic!("reporter down");
        }
        fn on_progress(&self, _run_id: &str, _progress: &Progress) {
            panic!("reporter down");
        }
        fn on_finish(&self, _run_id: &str, _outcome: &RunOutcome) {}
    }

    #[test]
    fn test_reporter_panic_does_not_abort_run() {
        let registry = SchemaRegistry::from_json_str(SCHEMA).unwrap();
        let dir = TempDir::new().unwrap();
        let data = stream(3);

        let summary = ParsePipeline::new(&registry, ParseOptions::default())
            .with_reporter(&PanickingReporter)
            .run("run-p", Cursor::new(&data), None, dir.path())
            .unwrap();
        assert_eq!(summary.rows, 3);
    }

    #[test]
    fn test_end_marker_framing_with_restart() {
        let registry = SchemaRegistry::from_json_str(SCHEMA).unwrap();
        let dir = TempDir::new().unwrap();
        let mut data = vec![0x01, 0x02, 0x02];
        data.extend(frame(2, &[0, 7]));

        let options = ParseOptions::default()
            .with_framing(Framing::EndMarker)
            .with_resync(ResyncPolicy::Restart);
        let summary = ParsePipeline::new(&registry, options)
            .run("run-r", Cursor::new(&data), None, dir.path())
            .unwrap();

        assert_eq!(summary.rows, 1);
        assert_eq!(summary.rejected(), 0);
    }

    #[test]
    fn test_summary_serializes() {
        let registry = SchemaRegistry::from_json_str(SCHEMA).unwrap();
        let dir = TempDir::new().unwrap();
        let summary = ParsePipeline::new(&registry, ParseOptions::default())
            .run("run-j", std::io::empty(), None, dir.path())
            .unwrap();

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["run_id"], "run-j");
        assert_eq!(json["input_mode"], "binary");
        assert!(json["output"].is_null());
    }
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use framelog_polars::pipeline::run_with_schema_file;
use framelog_polars::{
    FramelogParser, Framing, LogReporter, OutputCompression, ParseOptions, ResyncPolicy,
    SchemaRegistry,
};
use polars::prelude::*;
use std::path::PathBuf;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing_subscriber::EnvFilter;

/// Schema-driven telemetry frame decoder with Parquet output
#[derive(Parser)]
#[command(name = "framelog")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a capture (binary or hex text) into a Parquet file
    Parse {
        /// Input capture file
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// JSON packet schema registry
        #[arg(short, long, env = "FRAMELOG_SCHEMA_FILE", value_name = "FILE")]
        schema: PathBuf,

        /// Directory receiving the Parquet artifact
        #[arg(short, long, value_name = "DIR", default_value = ".")]
        output_dir: PathBuf,

        /// Rows per written batch
        #[arg(short, long, env = "FRAMELOG_BATCH_SIZE")]
        batch_size: Option<usize>,

        /// Behavior on a start marker inside an unterminated frame
        #[arg(long, value_enum, default_value = "ignore")]
        resync: ResyncArg,

        /// How frame ends are located
        #[arg(long, value_enum, default_value = "declared-length")]
        framing: FramingArg,

        /// Compression for the Parquet file
        #[arg(long, value_enum, default_value = "zstd")]
        compression: Compression,

        /// Run identifier used in logs (default: derived from the clock)
        #[arg(long)]
        run_id: Option<String>,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the output columns a schema produces
    Columns {
        /// JSON packet schema registry
        #[arg(short, long, env = "FRAMELOG_SCHEMA_FILE", value_name = "FILE")]
        schema: PathBuf,

        /// Print as a JSON array
        #[arg(long)]
        json: bool,
    },

    /// Show information about a Parquet artifact
    Info {
        /// Parquet file path
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Filter rows where column matches value (format: column=value)
        #[arg(long, value_name = "FILTER")]
        filter: Option<Vec<String>>,

        /// Display the first N rows
        #[arg(short = 'n', long)]
        head: Option<usize>,
    },

    /// Export a Parquet artifact to CSV
    Export {
        /// Parquet file path
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// CSV output path
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,
    },
}

#[derive(Debug, Clone, ValueEnum)]
enum ResyncArg {
    Ignore,
    Restart,
}

#[derive(Debug, Clone, ValueEnum)]
enum FramingArg {
    DeclaredLength,
    EndMarker,
}

#[derive(Debug, Clone, ValueEnum)]
enum Compression {
    Uncompressed,
    Snappy,
    Gzip,
    Lz4,
    Zstd,
}

impl From<ResyncArg> for ResyncPolicy {
    fn from(arg: ResyncArg) -> Self {
        match arg {
            ResyncArg::Ignore => ResyncPolicy::Ignore,
            ResyncArg::Restart => ResyncPolicy::Restart,
        }
    }
}

impl From<FramingArg> for Framing {
    fn from(arg: FramingArg) -> Self {
        match arg {
            FramingArg::DeclaredLength => Framing::DeclaredLength,
            FramingArg::EndMarker => Framing::EndMarker,
        }
    }
}

impl From<Compression> for OutputCompression {
    fn from(c: Compression) -> Self {
        match c {
            Compression::Uncompressed => OutputCompression::Uncompressed,
            Compression::Snappy => OutputCompression::Snappy,
            Compression::Gzip => OutputCompression::Gzip,
            Compression::Lz4 => OutputCompression::Lz4,
            Compression::Zstd => OutputCompression::Zstd,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Parse {
            input,
            schema,
            output_dir,
            batch_size,
            resync,
            framing,
            compression,
            run_id,
            json,
        } => {
            let mut options = ParseOptions::default()
                .with_resync(resync.into())
                .with_framing(framing.into())
                .with_compression(compression.into());
            if let Some(batch_size) = batch_size {
                options = options.with_batch_size(batch_size);
            }
            parse_command(input, schema, output_dir, options, run_id, json)?
        }

        Commands::Columns { schema, json } => columns_command(schema, json)?,

        Commands::Info {
            input,
            filter,
            head,
        } => info_command(input, filter, head)?,

        Commands::Export { input, output } => export_command(input, output)?,
    }

    Ok(())
}

fn default_run_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("run-{}", millis)
}

fn parse_command(
    input: PathBuf,
    schema: PathBuf,
    output_dir: PathBuf,
    options: ParseOptions,
    run_id: Option<String>,
    json: bool,
) -> Result<()> {
    let run_id = run_id.unwrap_or_else(default_run_id);
    let start = Instant::now();
    let summary = run_with_schema_file(&run_id, &schema, &input, &output_dir, options, &LogReporter)
        .with_context(|| {
            format!(
                "Failed to parse {} with schema {}",
                input.display(),
                schema.display()
            )
        })?;
    let duration = start.elapsed();

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Run {} ({} input, {:.3}s)", summary.run_id, summary.input_mode, duration.as_secs_f64());
    println!("  Frames seen:    {}", summary.frames_seen);
    println!("  Rows written:   {}", summary.rows);
    println!("  Rejected:       {}", summary.rejected());
    for (kind, count) in &summary.rejections {
        println!("    {:28} {}", kind, count);
    }
    if summary.malformed_lines > 0 {
        println!("  Malformed lines: {}", summary.malformed_lines);
    }
    match &summary.output {
        Some(path) => println!("  Output:         {}", path.display()),
        None => println!("  Output:         none (no valid frames)"),
    }

    Ok(())
}

fn columns_command(schema: PathBuf, json: bool) -> Result<()> {
    let registry = SchemaRegistry::from_file(&schema)
        .with_context(|| format!("Failed to load schema: {}", schema.display()))?;
    let columns = registry.canonical_columns();

    if json {
        println!("{}", serde_json::to_string(columns)?);
        return Ok(());
    }

    println!("{} columns from {} packet types:", columns.len(), registry.len());
    for name in columns {
        println!("  {}", name);
    }
    Ok(())
}

fn info_command(input: PathBuf, filter: Option<Vec<String>>, head: Option<usize>) -> Result<()> {
    let file_size = std::fs::metadata(&input)?.len();
    let mut df = FramelogParser::read_output(&input)
        .with_context(|| format!("Failed to read Parquet file: {}", input.display()))?;

    println!("File Information:");
    println!("  Path:           {}", input.display());
    println!(
        "  Size:           {} bytes ({:.2} MB)",
        file_size,
        file_size as f64 / 1_048_576.0
    );

    if let Some(filters) = filter {
        for filter_expr in filters {
            let (col_name, value) = filter_expr
                .split_once('=')
                .with_context(|| format!("Invalid filter '{}'. Expected 'column=value'", filter_expr))?;
            df = apply_filter(df, col_name.trim(), value.trim())?;
        }
    }

    println!("\nData Information:");
    println!("  Rows:           {}", df.height());
    println!("  Columns:        {}", df.width());

    if let Ok(ids) = df.column("ID").and_then(|c| c.u64()) {
        let mut counts: std::collections::BTreeMap<u64, usize> = Default::default();
        for id in ids.into_iter().flatten() {
            *counts.entry(id).or_default() += 1;
        }
        println!("\nPacket types:");
        for (id, count) in counts {
            println!("  {:#04x}  {} rows", id, count);
        }
    }

    println!("\nColumns:");
    for name in df.get_column_names() {
        if let Ok(col) = df.column(name.as_str()) {
            let null_pct = if df.height() == 0 {
                0.0
            } else {
                col.null_count() as f64 / df.height() as f64 * 100.0
            };
            println!("  {:30} {:15?} (nulls: {:.1}%)", name, col.dtype(), null_pct);
        }
    }

    if let Some(n) = head {
        println!("\n{}", df.head(Some(n)));
    }

    Ok(())
}

fn apply_filter(df: DataFrame, col_name: &str, value: &str) -> Result<DataFrame> {
    let value: u64 = value
        .parse()
        .with_context(|| format!("Filter value '{}' is not an unsigned integer", value))?;
    Ok(df.lazy().filter(col(col_name).eq(lit(value))).collect()?)
}

fn export_command(input: PathBuf, output: PathBuf) -> Result<()> {
    let mut df = FramelogParser::read_output(&input)
        .with_context(|| format!("Failed to read Parquet file: {}", input.display()))?;

    let mut file = std::fs::File::create(&output)?;
    CsvWriter::new(&mut file).finish(&mut df)?;
    println!("Exported {} rows to CSV: {}", df.height(), output.display());
    Ok(())
}

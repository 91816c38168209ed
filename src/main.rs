//! meldstripe
//!
//! Command line front end for striping a file across data and checksum
//! column files, and for restoring it from surviving columns.
//!
//! ```text
//! meldstripe stripe   data.bin c0 c1 c2 c3 c4 c5 c6 --data 5 --checksum 2
//! meldstripe unstripe --layout data.bin.layout.json --output data.bin c0 c1 c2 c3 c4 c5 c6
//! ```

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use meldstripe::ec::BackendType;
use meldstripe::stripe::{DEFAULT_BLOCK_SIZE, DEFAULT_RING_BUFFER_SIZE};
use meldstripe::{ChannelStriper, StripeLayout, StriperConfig};

// =============================================================================
// CLI Arguments
// =============================================================================

/// meldstripe - Reed-Solomon striping of files across columns
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "MELDSTRIPE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, global = true, env = "MELDSTRIPE_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Split a file into data and checksum column files
    Stripe {
        /// File to stripe
        input: PathBuf,

        /// Column files: data columns first, then the checksum columns
        #[arg(required = true, num_args = 2..)]
        columns: Vec<PathBuf>,

        /// Number of data columns; must match COLUMNS minus the checksum columns
        #[arg(short = 'd', long)]
        data: Option<usize>,

        /// Number of checksum columns (taken from the end of COLUMNS)
        #[arg(short = 'm', long, env = "MELDSTRIPE_CHECKSUM", default_value_t = 2)]
        checksum: usize,

        /// Block size in bytes
        #[arg(long, env = "MELDSTRIPE_BLOCK_SIZE", default_value_t = DEFAULT_BLOCK_SIZE)]
        block_size: usize,

        /// Frames in flight between reader and writers
        #[arg(long, env = "MELDSTRIPE_RING_BUFFER", default_value_t = DEFAULT_RING_BUFFER_SIZE)]
        ring_buffer: usize,

        /// Coding backend (auto, portable, accelerated)
        #[arg(long, env = "MELDSTRIPE_BACKEND", default_value = "auto")]
        backend: BackendType,

        /// Where to write the layout file (default: INPUT.layout.json)
        #[arg(long)]
        layout: Option<PathBuf>,
    },

    /// Rebuild a file from its column files
    Unstripe {
        /// Layout file written by `stripe`
        #[arg(long)]
        layout: PathBuf,

        /// File to write the restored stream to
        #[arg(short, long)]
        output: PathBuf,

        /// Column files in striping order; missing files count as erased
        #[arg(required = true)]
        columns: Vec<PathBuf>,

        /// Frames in flight between readers and the assembler
        #[arg(long, env = "MELDSTRIPE_RING_BUFFER", default_value_t = DEFAULT_RING_BUFFER_SIZE)]
        ring_buffer: usize,

        /// Coding backend (auto, portable, accelerated)
        #[arg(long, env = "MELDSTRIPE_BACKEND", default_value = "auto")]
        backend: BackendType,
    },
}

// =============================================================================
// Main
// =============================================================================

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    match args.command {
        Command::Stripe {
            input,
            columns,
            data,
            checksum,
            block_size,
            ring_buffer,
            backend,
            layout,
        } => {
            let data = data_column_count(columns.len(), checksum, data)?;
            let config = StriperConfig::new(data, checksum)
                .with_block_size(block_size)
                .with_ring_buffer_size(ring_buffer)
                .with_backend(backend);
            let layout_path = layout.unwrap_or_else(|| default_layout_path(&input));
            run_stripe(config, &input, &columns, &layout_path)
        }
        Command::Unstripe {
            layout,
            output,
            columns,
            ring_buffer,
            backend,
        } => run_unstripe(&layout, &output, &columns, ring_buffer, backend),
    }
}

/// Data columns implied by the column list, checked against `--data`
fn data_column_count(columns: usize, checksum: usize, data: Option<usize>) -> Result<usize> {
    if columns <= checksum {
        bail!(
            "{} column files given, need more than the {} checksum columns",
            columns,
            checksum
        );
    }
    let implied = columns - checksum;
    match data {
        Some(data) if data != implied => bail!(
            "{} data + {} checksum columns requested but {} column files given",
            data,
            checksum,
            columns
        ),
        _ => Ok(implied),
    }
}

fn default_layout_path(input: &Path) -> PathBuf {
    let mut name = input.as_os_str().to_owned();
    name.push(".layout.json");
    PathBuf::from(name)
}

// =============================================================================
// Commands
// =============================================================================

fn run_stripe(config: StriperConfig, input: &Path, columns: &[PathBuf], layout_path: &Path) -> Result<()> {
    info!("Striping {}", input.display());
    info!(
        "  Columns: {} data + {} checksum",
        config.data_columns, config.checksum_columns
    );
    info!("  Block size: {} bytes", config.block_size);

    let source = File::open(input).with_context(|| format!("opening {}", input.display()))?;
    let outputs = columns
        .iter()
        .map(|path| File::create(path).with_context(|| format!("creating column {}", path.display())))
        .collect::<Result<Vec<_>>>()?;

    let layout_template = config.clone();
    let mut striper = ChannelStriper::new(config).context("configuring striper")?;
    let size = striper.stripe(source, outputs).context("striping failed")?;

    let layout = layout_template.layout(size);
    let json = serde_json::to_string_pretty(&layout)?;
    std::fs::write(layout_path, json)
        .with_context(|| format!("writing layout {}", layout_path.display()))?;

    let stats = striper.last_stats();
    info!(
        "Striped {} bytes in {} frames ({} checksum bytes), layout in {}",
        size,
        stats.frames,
        stats.checksum_bytes,
        layout_path.display()
    );
    Ok(())
}

fn run_unstripe(
    layout_path: &Path,
    output: &Path,
    columns: &[PathBuf],
    ring_buffer: usize,
    backend: BackendType,
) -> Result<()> {
    let json = std::fs::read_to_string(layout_path)
        .with_context(|| format!("reading layout {}", layout_path.display()))?;
    let layout: StripeLayout = serde_json::from_str(&json)
        .with_context(|| format!("parsing layout {}", layout_path.display()))?;
    layout.validate()?;

    if columns.len() != layout.total_columns() {
        bail!(
            "layout has {} columns but {} column files were given",
            layout.total_columns(),
            columns.len()
        );
    }

    let mut inputs = Vec::with_capacity(columns.len());
    for (column, path) in columns.iter().enumerate() {
        match File::open(path) {
            Ok(file) => inputs.push(Some(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Column {} ({}) is missing, treating it as erased", column, path.display());
                inputs.push(None);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("opening column {}", path.display()));
            }
        }
    }

    let config = StriperConfig::new(layout.data_columns, layout.checksum_columns)
        .with_block_size(layout.block_size)
        .with_ring_buffer_size(ring_buffer)
        .with_backend(backend);
    let sink = File::create(output).with_context(|| format!("creating {}", output.display()))?;

    let mut striper = ChannelStriper::new(config).context("configuring striper")?;
    let size = striper
        .unstripe(inputs, sink, layout.size)
        .context("unstriping failed")?;

    let stats = striper.last_stats();
    info!(
        "Restored {} bytes to {} ({} bytes recovered)",
        size,
        output.display(),
        stats.checksum_bytes
    );
    Ok(())
}

// =============================================================================
// Logging
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

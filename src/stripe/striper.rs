//! Channel Striper
//!
//! Concurrent pipeline that splits one stream into `k+m` columns and joins
//! them back together.
//!
//! # Striping
//!
//! ```text
//!                 ┌──────────┐
//!   input ──────► │  reader  │ ── frame ──┬──► queue 0 ──► writer 0   ──► column 0
//!                 └──────────┘            ├──► queue 1 ──► writer 1   ──► column 1
//!                      ▲                  │        ...
//!                      │                  └──► queue k+m-1 ──► writer k+m-1 (computes
//!                      │                                          its checksum first)
//!                 free frames ◄──────── last writer to release a frame
//! ```
//!
//! # Unstriping
//!
//! ```text
//!   dispatcher ──► source reader per valid column ──► assembler ──► output
//!        ▲          (first k valid columns)          (recover missing data,    │
//!        └──────────────────────── free frames ◄──── gather-write stripes) ◄───┘
//! ```
//!
//! Every stage runs on the striper's [`WorkerPool`]. A failing stage cancels
//! the run; the others stop at their next frame and the errors are merged by
//! [`Error::aggregate`].

use std::convert::identity;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::ec::coder::Coder;
use crate::ec::domain::CodingDomain;
use crate::error::{Error, Result};
use crate::stripe::config::StriperConfig;
use crate::stripe::frame::{Cancellation, FrameQueue, StripeFrame};
use crate::stripe::matrix::StripeMatrix;
use crate::stripe::pool::{TaskHandle, WorkerPool};

// =============================================================================
// Statistics
// =============================================================================

/// Counters for one `stripe` or `unstripe` call.
///
/// Times are summed over all threads of the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StripeStats {
    /// Frames moved through the pipeline
    pub frames: u64,
    /// Unstriped data bytes read or written
    pub data_bytes: u64,
    /// Bytes computed by the coder (checksums, or recovered data)
    pub checksum_bytes: u64,
    pub read_time: Duration,
    pub calc_time: Duration,
    pub write_time: Duration,
}

#[derive(Debug, Default)]
struct Counters {
    frames: AtomicU64,
    data_bytes: AtomicU64,
    checksum_bytes: AtomicU64,
    read_nanos: AtomicU64,
    calc_nanos: AtomicU64,
    write_nanos: AtomicU64,
}

impl Counters {
    fn add(counter: &AtomicU64, value: u64) {
        counter.fetch_add(value, Ordering::Relaxed);
    }

    fn add_elapsed(counter: &AtomicU64, started: Instant) {
        Self::add(counter, started.elapsed().as_nanos() as u64);
    }

    fn snapshot(&self) -> StripeStats {
        StripeStats {
            frames: self.frames.load(Ordering::Relaxed),
            data_bytes: self.data_bytes.load(Ordering::Relaxed),
            checksum_bytes: self.checksum_bytes.load(Ordering::Relaxed),
            read_time: Duration::from_nanos(self.read_nanos.load(Ordering::Relaxed)),
            calc_time: Duration::from_nanos(self.calc_nanos.load(Ordering::Relaxed)),
            write_time: Duration::from_nanos(self.write_nanos.load(Ordering::Relaxed)),
        }
    }
}

// =============================================================================
// Pipeline State
// =============================================================================

/// State shared by the threads of one run
#[derive(Debug)]
struct Pipeline {
    free: FrameQueue,
    queues: Vec<FrameQueue>,
    cancel: Cancellation,
    counters: Counters,
}

impl Pipeline {
    fn new(config: &StriperConfig, queues: usize) -> Result<Self> {
        let ring = config.ring_buffer_size;
        let free = FrameQueue::new("free", ring);
        for index in 0..ring {
            let matrix = StripeMatrix::new(
                config.data_columns,
                config.checksum_columns,
                config.block_size,
            )?;
            free.put(Arc::new(StripeFrame::new(index, matrix)))?;
        }
        Ok(Self {
            free,
            queues: (0..queues).map(|_| FrameQueue::new("column", ring)).collect(),
            cancel: Cancellation::new(),
            counters: Counters::default(),
        })
    }

    /// Drop one hold on `frame`, returning it to the free ring if it was
    /// the last
    fn recycle(&self, frame: Arc<StripeFrame>) -> Result<()> {
        if frame.release() {
            self.free.put(frame)?;
        }
        Ok(())
    }
}

/// Cancels the run when a stage unwinds
struct CancelOnPanic<'a>(&'a Cancellation);

impl Drop for CancelOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.cancel();
        }
    }
}

/// Run one pipeline stage, cancelling the run if it fails
fn run_stage<T>(pipeline: &Pipeline, stage: &str, body: impl FnOnce() -> Result<T>) -> Result<T> {
    let _guard = CancelOnPanic(&pipeline.cancel);
    let result = body();
    if let Err(e) = &result {
        warn!(stage, error = %e, "Pipeline stage failed, cancelling run");
        pipeline.cancel.cancel();
    }
    result
}

// =============================================================================
// Channel Striper
// =============================================================================

/// Stripes streams into columns and back on a dedicated worker pool
#[derive(Debug)]
pub struct ChannelStriper {
    config: StriperConfig,
    domain: Arc<CodingDomain>,
    pool: WorkerPool,
    last_stats: StripeStats,
}

impl ChannelStriper {
    /// Create a striper with the coding domain described by `config`
    pub fn new(config: StriperConfig) -> Result<Self> {
        let domain = Arc::new(config.build_domain()?);
        Self::with_domain(config, domain)
    }

    /// Create a striper sharing an existing coding domain
    pub fn with_domain(config: StriperConfig, domain: Arc<CodingDomain>) -> Result<Self> {
        config.validate()?;
        if domain.field().bits() != config.field_bits {
            return Err(Error::InvalidConfig(format!(
                "domain codes over {} but configuration asks for GF(2^{})",
                domain.field(),
                config.field_bits
            )));
        }
        if domain.data_columns() != config.data_columns
            || domain.checksum_columns() != config.checksum_columns
        {
            return Err(Error::InvalidConfig(format!(
                "domain is {}+{} but configuration asks for {}+{}",
                domain.data_columns(),
                domain.checksum_columns(),
                config.data_columns,
                config.checksum_columns
            )));
        }

        // Every stage of a run blocks on its neighbours, so all of them
        // need a thread at once: k+m writers and the reader
        let pool = WorkerPool::new("striper", config.total_columns() + 1)?;
        info!(
            data_columns = config.data_columns,
            checksum_columns = config.checksum_columns,
            block_size = config.block_size,
            ring_buffer_size = config.ring_buffer_size,
            backend = domain.backend().name(),
            "Channel striper ready"
        );

        Ok(Self {
            config,
            domain,
            pool,
            last_stats: StripeStats::default(),
        })
    }

    pub fn config(&self) -> &StriperConfig {
        &self.config
    }

    pub fn domain(&self) -> &Arc<CodingDomain> {
        &self.domain
    }

    /// Statistics of the most recent `stripe` or `unstripe` call
    pub fn last_stats(&self) -> StripeStats {
        self.last_stats
    }

    fn spawn<T, F>(&self, pipeline: &Pipeline, task: F) -> Result<TaskHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.pool.submit(task).inspect_err(|_| pipeline.cancel.cancel())
    }

    // =========================================================================
    // Striping
    // =========================================================================

    /// Split `input` into `k` data columns and compute `m` checksum columns,
    /// writing column `c` to `outputs[c]`.
    ///
    /// # Returns
    /// Data bytes striped (checksum bytes excluded)
    #[instrument(skip_all, fields(k = self.config.data_columns, m = self.config.checksum_columns))]
    pub fn stripe<R, W>(&mut self, input: R, outputs: Vec<W>) -> Result<u64>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let total = self.config.total_columns();
        if outputs.len() != total {
            return Err(Error::DimensionMismatch(format!(
                "{} column outputs supplied, expected {}",
                outputs.len(),
                total
            )));
        }

        let started = Instant::now();
        let pipeline = Arc::new(Pipeline::new(&self.config, total)?);
        let coder = self.domain.checksum_coder();

        let mut writers = Vec::with_capacity(total);
        for (column, output) in outputs.into_iter().enumerate() {
            let shared = Arc::clone(&pipeline);
            let coder = Arc::clone(&coder);
            writers.push(self.spawn(&pipeline, move || {
                run_stage(&shared, "writer", || write_frames(&shared, &coder, column, output))
            })?);
        }
        let reader = {
            let shared = Arc::clone(&pipeline);
            self.spawn(&pipeline, move || {
                run_stage(&shared, "reader", || read_frames(&shared, input))
            })?
        };

        let mut failures = Vec::new();
        let bytes = reader
            .join()
            .and_then(identity)
            .unwrap_or_else(|e| {
                failures.push(e);
                0
            });
        for writer in writers {
            if let Err(e) = writer.join().and_then(identity) {
                failures.push(e);
            }
        }

        self.last_stats = pipeline.counters.snapshot();
        if let Some(error) = Error::aggregate(failures) {
            return Err(error);
        }

        let stats = &self.last_stats;
        info!(
            bytes,
            frames = stats.frames,
            checksum_bytes = stats.checksum_bytes,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Stripe complete"
        );
        Ok(bytes)
    }

    // =========================================================================
    // Unstriping
    // =========================================================================

    /// Join columns back into the original stream of `size` bytes.
    ///
    /// `inputs[c]` is `None` for an erased column. Missing data columns are
    /// recovered as long as no more than `m` columns are erased; only the
    /// first `k` valid columns are read.
    ///
    /// # Returns
    /// Data bytes written
    #[instrument(skip_all, fields(k = self.config.data_columns, m = self.config.checksum_columns, size = size))]
    pub fn unstripe<R, W>(&mut self, inputs: Vec<Option<R>>, output: W, size: u64) -> Result<u64>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let total = self.config.total_columns();
        if inputs.len() != total {
            return Err(Error::DimensionMismatch(format!(
                "{} column inputs supplied, expected {}",
                inputs.len(),
                total
            )));
        }

        let valid_mask = inputs
            .iter()
            .enumerate()
            .filter(|(_, input)| input.is_some())
            .fold(0u64, |mask, (c, _)| mask | 1 << c);
        let coder = self.domain.create_coder(valid_mask)?;
        let recover_mask = coder.invalid_mask() & self.domain.data_mask();
        debug!(
            valid_mask = format_args!("{:#b}", valid_mask),
            sources = ?coder.source_columns(),
            recover_mask = format_args!("{:#b}", recover_mask),
            "Unstripe plan"
        );

        let mut inputs = inputs;
        let sources = coder
            .source_columns()
            .iter()
            .map(|&c| inputs[c].take().map(|input| (c, input)).ok_or(Error::MissingSource(c)))
            .collect::<Result<Vec<_>>>()?;
        drop(inputs);

        let started = Instant::now();
        let readers = sources.len();
        // One queue per source reader, the assembler's last
        let pipeline = Arc::new(Pipeline::new(&self.config, readers + 1)?);

        let mut column_readers = Vec::with_capacity(readers);
        for (slot, (column, input)) in sources.into_iter().enumerate() {
            let shared = Arc::clone(&pipeline);
            column_readers.push(self.spawn(&pipeline, move || {
                run_stage(&shared, "column reader", || {
                    read_column_frames(&shared, slot, column, input)
                })
            })?);
        }
        let dispatcher = {
            let shared = Arc::clone(&pipeline);
            self.spawn(&pipeline, move || {
                run_stage(&shared, "dispatcher", || dispatch_frames(&shared, readers, size))
            })?
        };
        let assembler = {
            let shared = Arc::clone(&pipeline);
            let coder = Arc::clone(&coder);
            self.spawn(&pipeline, move || {
                run_stage(&shared, "assembler", || {
                    assemble_frames(&shared, &coder, recover_mask, output)
                })
            })?
        };

        let mut failures = Vec::new();
        for reader in column_readers {
            if let Err(e) = reader.join().and_then(identity) {
                failures.push(e);
            }
        }
        if let Err(e) = dispatcher.join().and_then(identity) {
            failures.push(e);
        }
        let bytes = assembler
            .join()
            .and_then(identity)
            .unwrap_or_else(|e| {
                failures.push(e);
                0
            });

        self.last_stats = pipeline.counters.snapshot();
        if let Some(error) = Error::aggregate(failures) {
            return Err(error);
        }

        info!(
            bytes,
            frames = self.last_stats.frames,
            recovered_bytes = self.last_stats.checksum_bytes,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Unstripe complete"
        );
        Ok(bytes)
    }
}

// =============================================================================
// Striping Stages
// =============================================================================

fn read_frames<R: Read>(pipeline: &Pipeline, mut input: R) -> Result<u64> {
    let counters = &pipeline.counters;
    let mut total = 0u64;
    while let Some(frame) = pipeline.free.take(&pipeline.cancel) {
        let started = Instant::now();
        let bytes = frame.matrix.read_stripes(&mut input).map_err(Error::InputIo)?;
        Counters::add_elapsed(&counters.read_nanos, started);

        let eof = bytes < frame.matrix.data_capacity();
        frame.dispatch(pipeline.queues.len(), bytes, eof);
        Counters::add(&counters.frames, 1);
        Counters::add(&counters.data_bytes, bytes as u64);
        total += bytes as u64;
        debug!(frame = frame.index(), bytes, eof, "Frame read");

        for queue in &pipeline.queues {
            queue.put(Arc::clone(&frame))?;
        }
        if eof {
            break;
        }
    }
    Ok(total)
}

fn write_frames<W: Write>(pipeline: &Pipeline, coder: &Coder, column: usize, mut output: W) -> Result<()> {
    let counters = &pipeline.counters;
    let queue = &pipeline.queues[column];
    let is_checksum = column >= coder.data_columns();
    let column_error = |source| Error::ColumnIo { column, source };

    while let Some(frame) = queue.take(&pipeline.cancel) {
        if is_checksum {
            let started = Instant::now();
            let produced = frame.matrix.calculate(coder, 1 << column)?;
            Counters::add_elapsed(&counters.calc_nanos, started);
            Counters::add(&counters.checksum_bytes, produced as u64);
        }

        let started = Instant::now();
        frame
            .matrix
            .write_column(column, &mut output)
            .map_err(column_error)?;
        Counters::add_elapsed(&counters.write_nanos, started);

        let eof = frame.is_eof();
        pipeline.recycle(frame)?;
        if eof {
            output.flush().map_err(column_error)?;
            break;
        }
    }
    Ok(())
}

// =============================================================================
// Unstriping Stages
// =============================================================================

fn dispatch_frames(pipeline: &Pipeline, readers: usize, size: u64) -> Result<()> {
    let mut offset = 0u64;
    while let Some(frame) = pipeline.free.take(&pipeline.cancel) {
        let capacity = frame.matrix.data_capacity() as u64;
        let bytes = (size - offset).min(capacity) as usize;
        frame.matrix.apply_layout(bytes);
        offset += bytes as u64;

        let eof = offset >= size;
        frame.dispatch(readers, bytes, eof);
        Counters::add(&pipeline.counters.frames, 1);
        debug!(frame = frame.index(), bytes, eof, "Frame planned");

        for queue in &pipeline.queues[..readers] {
            queue.put(Arc::clone(&frame))?;
        }
        if eof {
            break;
        }
    }
    Ok(())
}

fn read_column_frames<R: Read>(pipeline: &Pipeline, slot: usize, column: usize, mut input: R) -> Result<()> {
    let queue = &pipeline.queues[slot];
    let assembler = &pipeline.queues[pipeline.queues.len() - 1];

    while let Some(frame) = queue.take(&pipeline.cancel) {
        let started = Instant::now();
        frame
            .matrix
            .read_column(column, &mut input)
            .map_err(|source| Error::ColumnIo { column, source })?;
        Counters::add_elapsed(&pipeline.counters.read_nanos, started);

        let eof = frame.is_eof();
        if frame.release() {
            assembler.put(frame)?;
        }
        if eof {
            break;
        }
    }
    Ok(())
}

fn assemble_frames<W: Write>(
    pipeline: &Pipeline,
    coder: &Coder,
    recover_mask: u64,
    mut output: W,
) -> Result<u64> {
    let counters = &pipeline.counters;
    let queue = &pipeline.queues[pipeline.queues.len() - 1];
    let mut total = 0u64;

    while let Some(frame) = queue.take(&pipeline.cancel) {
        if recover_mask != 0 {
            let started = Instant::now();
            let recovered = frame.matrix.calculate(coder, recover_mask)?;
            // Recovered blocks come back at full stripe height
            frame.matrix.apply_layout(frame.bytes());
            Counters::add_elapsed(&counters.calc_nanos, started);
            Counters::add(&counters.checksum_bytes, recovered as u64);
        }

        let started = Instant::now();
        let written = frame
            .matrix
            .write_stripes(&mut output)
            .map_err(Error::OutputIo)?;
        Counters::add_elapsed(&counters.write_nanos, started);
        Counters::add(&counters.data_bytes, written as u64);
        total += written as u64;

        let eof = frame.is_eof();
        pipeline.free.put(frame)?;
        if eof {
            output.flush().map_err(Error::OutputIo)?;
            break;
        }
    }
    Ok(total)
}

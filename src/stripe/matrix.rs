//! Stripe Matrix
//!
//! Memory for `STRIPE_COUNT` consecutive stripes, laid out so the same
//! bytes can be moved two ways:
//!
//! ```text
//!              column 0     column 1    ...  column k-1 | checksum k .. k+m-1
//!            ┌───────────┬───────────┬─────┬───────────┬─────────────────────┐
//! stripe 0   │ block 0,0 │ block 0,1 │ ... │           │                     │
//! stripe 1   │ block 1,0 │ block 1,1 │ ... │           │                     │
//!   ...      │           │           │     │           │                     │
//! stripe 15  │           │           │     │           │                     │
//!            └───────────┴───────────┴─────┴───────────┴─────────────────────┘
//!
//! unstriped view: blocks row by row across the data columns
//! columnar view:  blocks top to bottom within one column
//! ```
//!
//! Each column owns one contiguous arena behind its own lock, so a column's
//! blocks can be filled, computed or written by one thread while other
//! threads work on other columns of the same matrix.

use std::io::{self, IoSlice, IoSliceMut, Read, Write};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::ec::coder::{Coder, Column};
use crate::error::{Error, Result};
use crate::stripe::layout::block_len;

/// Stripes per matrix, bounding the buffers in one vectored call
pub const STRIPE_COUNT: usize = 16;

// =============================================================================
// Column Blocks
// =============================================================================

/// The `STRIPE_COUNT` blocks of one column and their filled lengths
#[derive(Debug)]
pub struct ColumnBlocks {
    block_size: usize,
    bytes: Vec<u8>,
    lens: [usize; STRIPE_COUNT],
}

impl ColumnBlocks {
    fn new(block_size: usize) -> Self {
        Self {
            block_size,
            bytes: vec![0u8; STRIPE_COUNT * block_size],
            lens: [0; STRIPE_COUNT],
        }
    }

    /// Filled part of the block in `stripe`
    pub fn block(&self, stripe: usize) -> &[u8] {
        let start = stripe * self.block_size;
        &self.bytes[start..start + self.lens[stripe]]
    }

    pub fn block_len(&self, stripe: usize) -> usize {
        self.lens[stripe]
    }

    /// Filled bytes across all blocks
    pub fn len(&self) -> usize {
        self.lens.iter().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whole block in `stripe`, regardless of its filled length
    fn block_buffer(&mut self, stripe: usize) -> &mut [u8] {
        let start = stripe * self.block_size;
        &mut self.bytes[start..start + self.block_size]
    }

    fn set_block_len(&mut self, stripe: usize, len: usize) {
        debug_assert!(len <= self.block_size);
        self.lens[stripe] = len;
    }

    fn io_slices(&self) -> Vec<IoSlice<'_>> {
        (0..STRIPE_COUNT)
            .map(|s| self.block(s))
            .filter(|b| !b.is_empty())
            .map(IoSlice::new)
            .collect()
    }

    fn io_slices_mut(&mut self) -> Vec<IoSliceMut<'_>> {
        let lens = self.lens;
        self.bytes
            .chunks_mut(self.block_size)
            .zip(lens)
            .filter(|(_, len)| *len > 0)
            .map(|(chunk, len)| IoSliceMut::new(&mut chunk[..len]))
            .collect()
    }
}

// =============================================================================
// Stripe Matrix
// =============================================================================

enum ColumnGuard<'a> {
    Read(RwLockReadGuard<'a, ColumnBlocks>),
    Write(RwLockWriteGuard<'a, ColumnBlocks>),
    Unlocked,
}

/// Block storage for `STRIPE_COUNT` stripes of `k+m` columns
#[derive(Debug)]
pub struct StripeMatrix {
    data_columns: usize,
    checksum_columns: usize,
    block_size: usize,
    columns: Vec<RwLock<ColumnBlocks>>,
}

impl StripeMatrix {
    pub fn new(data_columns: usize, checksum_columns: usize, block_size: usize) -> Result<Self> {
        if data_columns == 0 || block_size == 0 {
            return Err(Error::InvalidConfig(format!(
                "stripe matrix needs data columns and a block size, got k={} block_size={}",
                data_columns, block_size
            )));
        }
        let columns = (0..data_columns + checksum_columns)
            .map(|_| RwLock::new(ColumnBlocks::new(block_size)))
            .collect();
        Ok(Self {
            data_columns,
            checksum_columns,
            block_size,
            columns,
        })
    }

    pub fn data_columns(&self) -> usize {
        self.data_columns
    }

    pub fn checksum_columns(&self) -> usize {
        self.checksum_columns
    }

    pub fn total_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Data bytes a full matrix holds
    pub fn data_capacity(&self) -> usize {
        STRIPE_COUNT * self.data_columns * self.block_size
    }

    /// Read access to one column's blocks
    pub fn column(&self, column: usize) -> RwLockReadGuard<'_, ColumnBlocks> {
        self.columns[column].read()
    }

    /// Filled data bytes
    pub fn data_len(&self) -> usize {
        self.columns[..self.data_columns]
            .iter()
            .map(|c| c.read().len())
            .sum()
    }

    fn lock_all(&self) -> Vec<RwLockWriteGuard<'_, ColumnBlocks>> {
        self.columns.iter().map(|c| c.write()).collect()
    }

    /// Set every block length to what a matrix holding `bytes` data bytes
    /// gets from the stripe layout. Checksum blocks are zeroed in length
    /// unless `with_checksums` is set.
    fn lay_out(&self, guards: &mut [RwLockWriteGuard<'_, ColumnBlocks>], bytes: usize, with_checksums: bool) {
        let stripe_size = self.data_columns * self.block_size;
        for stripe in 0..STRIPE_COUNT {
            let stripe_bytes = bytes.saturating_sub(stripe * stripe_size).min(stripe_size);
            for (column, guard) in guards.iter_mut().enumerate() {
                let len = if column < self.data_columns || with_checksums {
                    block_len(column, self.data_columns, self.block_size, stripe_bytes)
                } else {
                    0
                };
                guard.set_block_len(stripe, len);
            }
        }
    }

    /// Apply the stripe layout for `bytes` data bytes to every column
    pub fn apply_layout(&self, bytes: usize) {
        let mut guards = self.lock_all();
        self.lay_out(&mut guards, bytes, true);
    }

    // =========================================================================
    // Unstriped I/O
    // =========================================================================

    /// Fill the data blocks from an unstriped stream.
    ///
    /// Reads until the matrix is full or the stream ends; block lengths are
    /// limited to the bytes read and checksum blocks are emptied.
    pub fn read_stripes<R: Read + ?Sized>(&self, input: &mut R) -> io::Result<usize> {
        let mut guards = self.lock_all();
        let bytes = {
            let mut chunks: Vec<_> = guards[..self.data_columns]
                .iter_mut()
                .map(|g| g.bytes.chunks_mut(self.block_size))
                .collect();
            let mut slices = Vec::with_capacity(STRIPE_COUNT * self.data_columns);
            for _ in 0..STRIPE_COUNT {
                for column in chunks.iter_mut() {
                    if let Some(chunk) = column.next() {
                        slices.push(IoSliceMut::new(chunk));
                    }
                }
            }
            read_vectored_fully(input, &mut slices)?
        };
        self.lay_out(&mut guards, bytes, false);
        Ok(bytes)
    }

    /// Write the filled data blocks as one unstriped stream
    pub fn write_stripes<W: Write + ?Sized>(&self, output: &mut W) -> io::Result<usize> {
        let guards: Vec<_> = self.columns[..self.data_columns]
            .iter()
            .map(|c| c.read())
            .collect();
        let mut slices = Vec::with_capacity(STRIPE_COUNT * self.data_columns);
        for stripe in 0..STRIPE_COUNT {
            for guard in &guards {
                let block = guard.block(stripe);
                if !block.is_empty() {
                    slices.push(IoSlice::new(block));
                }
            }
        }
        write_vectored_fully(output, &mut slices)
    }

    // =========================================================================
    // Columnar I/O
    // =========================================================================

    /// Fill one column's blocks to their current lengths.
    ///
    /// A stream that ends early is an `UnexpectedEof` error.
    pub fn read_column<R: Read + ?Sized>(&self, column: usize, input: &mut R) -> io::Result<usize> {
        let mut guard = self.columns[column].write();
        let expected = guard.len();
        let mut slices = guard.io_slices_mut();
        let read = read_vectored_fully(input, &mut slices)?;
        if read < expected {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "unexpected end of column {}: expected {} bytes, got {}",
                    column, expected, read
                ),
            ));
        }
        Ok(read)
    }

    /// Write one column's filled blocks
    pub fn write_column<W: Write + ?Sized>(&self, column: usize, output: &mut W) -> io::Result<usize> {
        let guard = self.columns[column].read();
        let mut slices = guard.io_slices();
        write_vectored_fully(output, &mut slices)
    }

    // =========================================================================
    // Calculation
    // =========================================================================

    /// Run `coder` over every stripe, computing the columns of `calc_mask`.
    ///
    /// Computed blocks take the height of their stripe's tallest source.
    /// Only the columns the coder reads or writes are locked.
    ///
    /// # Returns
    /// Total bytes computed
    pub fn calculate(&self, coder: &Coder, calc_mask: u64) -> Result<usize> {
        let targets = coder.requested_mask(calc_mask);
        if targets == 0 {
            return Ok(0);
        }
        let data_mask = (1u64 << self.data_columns) - 1;
        let mut reads = coder
            .source_columns()
            .iter()
            .fold(0u64, |mask, &c| mask | 1 << c);
        if targets & !data_mask != 0 {
            reads |= data_mask & !targets;
        }

        let mut guards: Vec<ColumnGuard<'_>> = self
            .columns
            .iter()
            .enumerate()
            .map(|(c, lock)| {
                if targets & (1 << c) != 0 {
                    ColumnGuard::Write(lock.write())
                } else if reads & (1 << c) != 0 {
                    ColumnGuard::Read(lock.read())
                } else {
                    ColumnGuard::Unlocked
                }
            })
            .collect();

        let mut total = 0;
        for stripe in 0..STRIPE_COUNT {
            let coded = {
                let mut columns: Vec<Column<'_>> = guards
                    .iter_mut()
                    .map(|guard| match guard {
                        ColumnGuard::Write(g) => Column::Target(g.block_buffer(stripe)),
                        ColumnGuard::Read(g) => Column::Source(g.block(stripe)),
                        ColumnGuard::Unlocked => Column::Absent,
                    })
                    .collect();
                coder.calculate_columns(&mut columns, targets)?
            };
            for guard in guards.iter_mut() {
                if let ColumnGuard::Write(g) = guard {
                    g.set_block_len(stripe, coded.height);
                }
            }
            total += coded.bytes();
        }
        Ok(total)
    }
}

// =============================================================================
// Vectored I/O
// =============================================================================

/// Read into `bufs` until they are full or the stream ends
fn read_vectored_fully<R: Read + ?Sized>(input: &mut R, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
    let mut bufs = bufs;
    let mut total = 0;
    while !bufs.is_empty() {
        match input.read_vectored(bufs) {
            Ok(0) => break,
            Ok(n) => {
                total += n;
                IoSliceMut::advance_slices(&mut bufs, n);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

/// Write every byte of `bufs`; none of them may be empty
fn write_vectored_fully<W: Write + ?Sized>(output: &mut W, bufs: &mut [IoSlice<'_>]) -> io::Result<usize> {
    let mut bufs = bufs;
    let mut total = 0;
    while !bufs.is_empty() {
        match output.write_vectored(bufs) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "failed to write whole buffer",
                ))
            }
            Ok(n) => {
                total += n;
                IoSlice::advance_slices(&mut bufs, n);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

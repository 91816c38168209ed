//! Stripe Layout
//!
//! Block arithmetic shared by the striper and by anything that has to find
//! its way back through striped columns. The stream is cut into stripes of
//! `k × block_size` bytes; within a stripe, data column `c` holds bytes
//! `c·block_size..(c+1)·block_size`. The final stripe may be short, so its
//! trailing data blocks shrink or vanish, while every checksum block is as
//! tall as the first (tallest) data block.
//!
//! Columns carry no header, so the layout is persisted next to them as JSON.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Length of column `column`'s block in a stripe carrying `stripe_bytes`
/// data bytes
#[inline]
pub fn block_len(column: usize, data_columns: usize, block_size: usize, stripe_bytes: usize) -> usize {
    if column < data_columns {
        stripe_bytes.saturating_sub(column * block_size).min(block_size)
    } else {
        stripe_bytes.min(block_size)
    }
}

/// Shape and size of one striped stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StripeLayout {
    pub data_columns: usize,
    pub checksum_columns: usize,
    pub block_size: usize,
    /// Length of the original (unstriped) stream
    pub size: u64,
}

impl StripeLayout {
    pub fn new(data_columns: usize, checksum_columns: usize, block_size: usize, size: u64) -> Self {
        Self {
            data_columns,
            checksum_columns,
            block_size,
            size,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.data_columns == 0 || self.checksum_columns == 0 {
            return Err(Error::InvalidConfig(format!(
                "layout needs data and checksum columns, got {}+{}",
                self.data_columns, self.checksum_columns
            )));
        }
        if self.block_size == 0 {
            return Err(Error::InvalidConfig(
                "layout block_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn total_columns(&self) -> usize {
        self.data_columns + self.checksum_columns
    }

    /// Data bytes in one full stripe
    pub fn stripe_size(&self) -> u64 {
        (self.data_columns * self.block_size) as u64
    }

    /// Number of stripes, counting a trailing partial stripe
    pub fn stripes(&self) -> u64 {
        self.size.div_ceil(self.stripe_size())
    }

    /// Bytes stored in one column
    pub fn column_size(&self, column: usize) -> u64 {
        let stripe = self.stripe_size();
        let full = self.size / stripe;
        let rem = (self.size % stripe) as usize;
        full * self.block_size as u64
            + block_len(column, self.data_columns, self.block_size, rem) as u64
    }

    /// Bytes stored in every column, in column order
    pub fn column_sizes(&self) -> Vec<u64> {
        (0..self.total_columns()).map(|c| self.column_size(c)).collect()
    }

    /// Bytes across all checksum columns
    pub fn checksum_size(&self) -> u64 {
        (self.data_columns..self.total_columns())
            .map(|c| self.column_size(c))
            .sum()
    }
}

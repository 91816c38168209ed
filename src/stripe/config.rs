//! Striper Configuration

use serde::{Deserialize, Serialize};

use crate::ec::backend::{BackendFactory, BackendType};
use crate::ec::domain::{CodingDomain, MAX_COLUMNS};
use crate::error::{Error, Result};
use crate::field::GaloisField;
use crate::stripe::layout::StripeLayout;
use crate::stripe::matrix::STRIPE_COUNT;

/// Default block size in bytes
pub const DEFAULT_BLOCK_SIZE: usize = 512;

/// Default number of frames in flight
pub const DEFAULT_RING_BUFFER_SIZE: usize = 3;

/// Configuration for a [`ChannelStriper`](crate::stripe::ChannelStriper)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StriperConfig {
    /// Number of data columns (k)
    pub data_columns: usize,
    /// Number of checksum columns (m)
    pub checksum_columns: usize,
    /// Bytes per column block
    pub block_size: usize,
    /// Frames in flight between the reader and the writers
    pub ring_buffer_size: usize,
    /// Galois field width in bits (standard polynomial). Columns carry raw
    /// bytes, so only 8 is accepted; narrower fields stay available through
    /// [`CodingDomain`] for word-level coding.
    pub field_bits: u32,
    /// Coding backend preference
    pub backend: BackendType,
}

impl StriperConfig {
    /// Create a configuration with default block size, ring size and field
    pub fn new(data_columns: usize, checksum_columns: usize) -> Self {
        Self {
            data_columns,
            checksum_columns,
            ..Default::default()
        }
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_ring_buffer_size(mut self, ring_buffer_size: usize) -> Self {
        self.ring_buffer_size = ring_buffer_size;
        self
    }

    pub fn with_field_bits(mut self, field_bits: u32) -> Self {
        self.field_bits = field_bits;
        self
    }

    pub fn with_backend(mut self, backend: BackendType) -> Self {
        self.backend = backend;
        self
    }

    /// Total columns (k+m)
    pub fn total_columns(&self) -> usize {
        self.data_columns + self.checksum_columns
    }

    /// Data bytes moved per frame
    pub fn frame_data_size(&self) -> usize {
        STRIPE_COUNT * self.data_columns * self.block_size
    }

    /// Layout of a stream of `size` bytes striped with this configuration
    pub fn layout(&self, size: u64) -> StripeLayout {
        StripeLayout::new(self.data_columns, self.checksum_columns, self.block_size, size)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.data_columns == 0 {
            return Err(Error::InvalidConfig("data_columns must be >= 1".into()));
        }
        if self.checksum_columns == 0 {
            return Err(Error::InvalidConfig("checksum_columns must be >= 1".into()));
        }
        if self.total_columns() > MAX_COLUMNS {
            return Err(Error::InvalidConfig(format!(
                "total columns must be <= {}",
                MAX_COLUMNS
            )));
        }
        if self.block_size == 0 {
            return Err(Error::InvalidConfig("block_size must be > 0".into()));
        }
        if self.ring_buffer_size == 0 {
            return Err(Error::InvalidConfig("ring_buffer_size must be > 0".into()));
        }
        let field = GaloisField::standard(self.field_bits)?;
        // A narrower field would mask every byte down to its low bits
        if self.field_bits != 8 {
            return Err(Error::InvalidConfig(format!(
                "striping codes whole bytes and needs GF(256), got GF({})",
                field.size()
            )));
        }
        Ok(())
    }

    /// Build the coding domain described by this configuration
    pub fn build_domain(&self) -> Result<CodingDomain> {
        self.validate()?;
        let field = GaloisField::standard(self.field_bits)?;
        let backend = BackendFactory::create(self.backend, &field)?;
        CodingDomain::with_backend(self.data_columns, self.checksum_columns, field, backend)
    }
}

impl Default for StriperConfig {
    fn default() -> Self {
        Self {
            data_columns: 5,
            checksum_columns: 2,
            block_size: DEFAULT_BLOCK_SIZE,
            ring_buffer_size: DEFAULT_RING_BUFFER_SIZE,
            field_bits: 8,
            backend: BackendType::Auto,
        }
    }
}

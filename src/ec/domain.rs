//! Coding Domain
//!
//! A coding domain fixes `(k, m, field)`, owns the systematic coding matrix
//! and hands out [`Coder`]s for erasure patterns. The all-data-valid coder is
//! built up front; recovery coders are built on first use and cached.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, instrument};

use crate::ec::backend::{BackendFactory, BackendType, CodingBackend};
use crate::ec::coder::Coder;
use crate::error::{Error, Result};
use crate::field::{GaloisField, Matrix};

/// Validity masks are `u64`, one bit per column
pub const MAX_COLUMNS: usize = 64;

// =============================================================================
// Code Parameters
// =============================================================================

/// Immutable state shared by a domain and every coder it creates
#[derive(Debug)]
pub(crate) struct CodeParameters {
    pub(crate) data_columns: usize,
    pub(crate) checksum_columns: usize,
    pub(crate) field: Arc<GaloisField>,
    pub(crate) coding: Matrix,
    pub(crate) backend: Arc<dyn CodingBackend>,
}

impl CodeParameters {
    pub(crate) fn total_columns(&self) -> usize {
        self.data_columns + self.checksum_columns
    }

    pub(crate) fn word_mask(&self) -> u64 {
        low_bits(self.total_columns())
    }

    pub(crate) fn data_mask(&self) -> u64 {
        low_bits(self.data_columns)
    }

    pub(crate) fn checksum_mask(&self) -> u64 {
        self.word_mask() & !self.data_mask()
    }
}

fn low_bits(n: usize) -> u64 {
    if n >= 64 {
        u64::MAX
    } else {
        (1u64 << n) - 1
    }
}

// =============================================================================
// Coding Domain
// =============================================================================

/// Reed-Solomon code over `k` data and `m` checksum columns
#[derive(Debug)]
pub struct CodingDomain {
    code: Arc<CodeParameters>,
    checksum_coder: Arc<Coder>,
    coders: DashMap<u64, Arc<Coder>>,
}

impl CodingDomain {
    /// Create a domain using the best backend for `field`
    ///
    /// # Arguments
    /// * `data_columns` - Number of data columns (k)
    /// * `checksum_columns` - Number of checksum columns (m)
    /// * `field` - Field to compute over; must have more than `k+m` elements
    pub fn new(data_columns: usize, checksum_columns: usize, field: Arc<GaloisField>) -> Result<Self> {
        let backend = BackendFactory::create(BackendType::Auto, &field)?;
        Self::with_backend(data_columns, checksum_columns, field, backend)
    }

    /// Create a domain over the standard GF(2^8)
    pub fn gf256(data_columns: usize, checksum_columns: usize) -> Result<Self> {
        Self::new(data_columns, checksum_columns, GaloisField::gf256())
    }

    /// Create a domain with an explicit coding backend
    #[instrument(skip(field, backend), fields(field = %field, backend = backend.name()))]
    pub fn with_backend(
        data_columns: usize,
        checksum_columns: usize,
        field: Arc<GaloisField>,
        backend: Arc<dyn CodingBackend>,
    ) -> Result<Self> {
        if data_columns == 0 {
            return Err(Error::InvalidConfig(
                "data_columns must be greater than 0".to_string(),
            ));
        }
        if checksum_columns == 0 {
            return Err(Error::InvalidConfig(
                "checksum_columns must be greater than 0".to_string(),
            ));
        }
        let word_size = data_columns + checksum_columns;
        if word_size > MAX_COLUMNS {
            return Err(Error::InvalidConfig(format!(
                "data_columns + checksum_columns must not exceed {}, got {}",
                MAX_COLUMNS, word_size
            )));
        }
        if field.size() <= word_size {
            return Err(Error::FieldTooSmall {
                field_size: field.size(),
                word_size,
            });
        }
        if !backend.supports(&field) {
            return Err(Error::UnsupportedBackend {
                backend: backend.name(),
                field_size: field.size(),
            });
        }

        let coding = build_coding_matrix(data_columns, checksum_columns, &field)?;
        let code = Arc::new(CodeParameters {
            data_columns,
            checksum_columns,
            field,
            coding,
            backend,
        });
        let checksum_coder = Arc::new(Coder::new(Arc::clone(&code), code.data_mask())?);

        debug!(
            "Created {}+{} coding domain over {}",
            data_columns, checksum_columns, code.field
        );

        Ok(Self {
            code,
            checksum_coder,
            coders: DashMap::new(),
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Number of data columns (k)
    pub fn data_columns(&self) -> usize {
        self.code.data_columns
    }

    /// Number of checksum columns (m)
    pub fn checksum_columns(&self) -> usize {
        self.code.checksum_columns
    }

    /// Total columns (k+m)
    pub fn total_columns(&self) -> usize {
        self.code.total_columns()
    }

    /// Bits `0..k`
    pub fn data_mask(&self) -> u64 {
        self.code.data_mask()
    }

    /// Bits `k..k+m`
    pub fn checksum_mask(&self) -> u64 {
        self.code.checksum_mask()
    }

    /// Bits `0..k+m`
    pub fn word_mask(&self) -> u64 {
        self.code.word_mask()
    }

    pub fn field(&self) -> &Arc<GaloisField> {
        &self.code.field
    }

    /// The `(k+m) × k` systematic coding matrix
    pub fn coding_matrix(&self) -> &Matrix {
        &self.code.coding
    }

    pub fn backend(&self) -> &Arc<dyn CodingBackend> {
        &self.code.backend
    }

    // =========================================================================
    // Coders
    // =========================================================================

    /// Coder for "every data column valid": computes checksums only
    pub fn checksum_coder(&self) -> Arc<Coder> {
        Arc::clone(&self.checksum_coder)
    }

    /// Coder for the given validity mask (bit `i` set = column `i` valid).
    ///
    /// Fails with [`Error::Uncorrectable`] when more than `m` columns are
    /// invalid.
    pub fn create_coder(&self, valid_mask: u64) -> Result<Arc<Coder>> {
        let valid_mask = valid_mask & self.code.word_mask();
        if valid_mask == self.code.data_mask() {
            return Ok(self.checksum_coder());
        }
        if let Some(coder) = self.coders.get(&valid_mask) {
            return Ok(Arc::clone(coder.value()));
        }

        let coder = Arc::new(Coder::new(Arc::clone(&self.code), valid_mask)?);
        debug!(
            "Cached coder for valid mask {:#x} ({} cached)",
            valid_mask,
            self.coders.len() + 1
        );
        Ok(Arc::clone(
            self.coders.entry(valid_mask).or_insert(coder).value(),
        ))
    }

    /// Update checksums in place after one data symbol changed.
    ///
    /// `symbols[offset..offset + m]` hold the checksums of a code word whose
    /// data symbol `data_index` went from `old_value` to `new_value`.
    pub fn recalc_checksum(
        &self,
        symbols: &mut [u8],
        offset: usize,
        data_index: usize,
        old_value: u8,
        new_value: u8,
    ) -> Result<()> {
        let (k, m) = (self.code.data_columns, self.code.checksum_columns);
        if data_index >= k {
            return Err(Error::DimensionMismatch(format!(
                "data index {} out of range for {} data columns",
                data_index, k
            )));
        }
        if offset + m > symbols.len() {
            return Err(Error::DimensionMismatch(format!(
                "{} checksums at offset {} exceed {} symbols",
                m,
                offset,
                symbols.len()
            )));
        }

        let field = &self.code.field;
        let delta = field.add(new_value, old_value);
        for (i, checksum) in symbols[offset..offset + m].iter_mut().enumerate() {
            *checksum = field.add(*checksum, field.mult(self.code.coding.get(k + i, data_index), delta));
        }
        Ok(())
    }
}

/// Vandermonde rows `[1, i, i², …]`, with the top `k × k` block reduced to
/// the identity by column operations
fn build_coding_matrix(k: usize, m: usize, field: &GaloisField) -> Result<Matrix> {
    let n = k + m;
    let mut matrix = Matrix::new(n, k);
    for i in 0..n {
        let mut v = 1u8;
        for j in 0..k {
            matrix.put(i, j, v);
            v = field.mult(v, i as u8);
        }
    }

    for i in 0..k {
        if matrix.get(i, i) == 0 {
            let swap = (i + 1..n)
                .find(|&r| matrix.get(r, i) != 0)
                .ok_or(Error::SingularMatrix { column: i })?;
            matrix.swap_rows(i, swap);
        }

        let pivot = matrix.get(i, i);
        if pivot != 1 {
            matrix.mult_column(field, i, field.inv(pivot)?);
        }

        for j in 0..k {
            if j != i {
                let v = matrix.get(i, j);
                matrix.sub_column(field, j, i, v);
            }
        }
    }

    Ok(matrix)
}

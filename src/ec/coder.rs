//! Erasure Coder
//!
//! A [`Coder`] is fixed to one validity mask over the `k+m` columns. With
//! every data column valid it only computes checksums; otherwise it carries
//! a `k × k` recovery matrix built from the first `k` valid columns.
//!
//! Two forms of calculation are offered:
//!
//! - **Word form** (`calculate_word`): one code word, one symbol per column.
//! - **Columnar form** (`calculate_columns`): one byte buffer per column.
//!   Buffers may be jagged; short sources read as zero past their end and
//!   every computed column is written at the height of the tallest source.

use std::mem;
use std::sync::Arc;

use tracing::debug;

use crate::ec::domain::CodeParameters;
use crate::error::{Error, Result};
use crate::field::Matrix;

// =============================================================================
// Columns
// =============================================================================

/// One column handed to the columnar coder
#[derive(Debug)]
pub enum Column<'a> {
    /// Valid bytes the coder may read
    Source(&'a [u8]),
    /// Buffer that receives a computed column
    Target(&'a mut [u8]),
    /// Column not taking part in this calculation
    Absent,
}

/// Outcome of a columnar calculation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ColumnsCoded {
    /// Bytes written into each computed column
    pub height: usize,
    /// Number of columns computed
    pub columns: usize,
}

impl ColumnsCoded {
    /// Total bytes produced
    pub fn bytes(&self) -> usize {
        self.height * self.columns
    }
}

// =============================================================================
// Coder
// =============================================================================

/// Computes missing and checksum columns for one validity mask
#[derive(Debug)]
pub struct Coder {
    code: Arc<CodeParameters>,
    valid_mask: u64,
    /// Inverse of the coding rows of `sources`; `None` when all data is valid
    recovery: Option<Matrix>,
    /// Columns the coder reads, in recovery-matrix column order
    sources: Vec<usize>,
}

impl Coder {
    pub(crate) fn new(code: Arc<CodeParameters>, valid_mask: u64) -> Result<Self> {
        let valid_mask = valid_mask & code.word_mask();
        let (k, m) = (code.data_columns, code.checksum_columns);
        let data_mask = code.data_mask();

        if valid_mask & data_mask == data_mask {
            return Ok(Self {
                code,
                valid_mask,
                recovery: None,
                sources: (0..k).collect(),
            });
        }

        let invalid = code.total_columns() - valid_mask.count_ones() as usize;
        if invalid > m {
            return Err(Error::Uncorrectable {
                invalid,
                correctable: m,
            });
        }

        let sources: Vec<usize> = (0..code.total_columns())
            .filter(|&i| valid_mask & (1 << i) != 0)
            .take(k)
            .collect();
        let mut recovery = Matrix::new(k, k);
        for (row, &source) in sources.iter().enumerate() {
            recovery.copy_row(row, &code.coding, source)?;
        }
        recovery.invert(&code.field)?;

        debug!(
            "Built recovery coder for valid mask {:#x} from columns {:?}",
            valid_mask, sources
        );

        Ok(Self {
            code,
            valid_mask,
            recovery: Some(recovery),
            sources,
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn valid_mask(&self) -> u64 {
        self.valid_mask
    }

    /// Columns this coder can compute
    pub fn invalid_mask(&self) -> u64 {
        !self.valid_mask & self.code.word_mask()
    }

    /// True when no data column is missing
    pub fn is_checksum_only(&self) -> bool {
        self.recovery.is_none()
    }

    /// Columns read to compute anything: the data columns in checksum-only
    /// mode, otherwise the first `k` valid columns
    pub fn source_columns(&self) -> &[usize] {
        &self.sources
    }

    pub fn recovery_matrix(&self) -> Option<&Matrix> {
        self.recovery.as_ref()
    }

    pub fn data_columns(&self) -> usize {
        self.code.data_columns
    }

    pub fn checksum_columns(&self) -> usize {
        self.code.checksum_columns
    }

    pub fn total_columns(&self) -> usize {
        self.code.total_columns()
    }

    /// Columns a request for `calc_mask` actually computes: valid columns are
    /// dropped, and a checksum request pulls in every missing data column
    pub fn requested_mask(&self, calc_mask: u64) -> u64 {
        let invalid = self.invalid_mask();
        let mut mask = calc_mask & invalid;
        if mask & self.code.checksum_mask() != 0 {
            mask |= invalid & self.code.data_mask();
        }
        mask
    }

    // =========================================================================
    // Word Form
    // =========================================================================

    /// Compute the symbols of `calc_mask` that are not valid
    pub fn calculate_word(&self, word: &mut [u8], calc_mask: u64) -> Result<()> {
        let code = &self.code;
        let (k, n) = (code.data_columns, code.total_columns());
        if word.len() != n {
            return Err(Error::DimensionMismatch(format!(
                "code word has {} symbols, expected {}",
                word.len(),
                n
            )));
        }
        let field = &code.field;
        let mask = self.requested_mask(calc_mask);

        if let Some(recovery) = &self.recovery {
            for index in (0..k).filter(|&i| mask & (1 << i) != 0) {
                word[index] = self
                    .sources
                    .iter()
                    .enumerate()
                    .fold(0u8, |acc, (j, &source)| {
                        field.add(acc, field.mult(recovery.get(index, j), word[source]))
                    });
            }
        }

        for index in (k..n).filter(|&i| mask & (1 << i) != 0) {
            word[index] = (0..k).fold(0u8, |acc, d| {
                field.add(acc, field.mult(word[d], code.coding.get(index, d)))
            });
        }
        Ok(())
    }

    /// Compute every symbol that is not valid
    pub fn calculate_word_all(&self, word: &mut [u8]) -> Result<()> {
        self.calculate_word(word, self.code.word_mask())
    }

    // =========================================================================
    // Columnar Form
    // =========================================================================

    /// Compute the columns of `calc_mask` that are not valid.
    ///
    /// `columns` holds one entry per column. The coder reads the
    /// [`source_columns`](Self::source_columns) as `Source`; every computed
    /// column must be supplied as a `Target` at least as long as the tallest
    /// source. Targets are handed back in place once filled.
    pub fn calculate_columns(&self, columns: &mut [Column<'_>], calc_mask: u64) -> Result<ColumnsCoded> {
        let code = &self.code;
        let (k, n) = (code.data_columns, code.total_columns());
        if columns.len() != n {
            return Err(Error::DimensionMismatch(format!(
                "{} columns supplied, expected {}",
                columns.len(),
                n
            )));
        }

        let mask = self.requested_mask(calc_mask);
        if mask == 0 {
            return Ok(ColumnsCoded::default());
        }

        let mut height = 0;
        for &source in &self.sources {
            match &columns[source] {
                Column::Source(bytes) => height = height.max(bytes.len()),
                _ => return Err(Error::MissingSource(source)),
            }
        }
        for index in 0..n {
            if mask & (1 << index) != 0 {
                match &columns[index] {
                    Column::Target(buf) if buf.len() < height => {
                        return Err(Error::ColumnTooShort {
                            column: index,
                            capacity: buf.len(),
                            height,
                        })
                    }
                    Column::Target(_) => {}
                    _ => return Err(Error::MissingTarget(index)),
                }
            } else if index < k && mask & code.checksum_mask() != 0 {
                if !matches!(columns[index], Column::Source(_)) {
                    return Err(Error::MissingSource(index));
                }
            }
        }

        let mut data_targets = Vec::new();
        let mut checksum_targets = Vec::new();
        for index in (0..n).filter(|&i| mask & (1 << i) != 0) {
            if let Column::Target(buf) = mem::replace(&mut columns[index], Column::Absent) {
                if index < k {
                    data_targets.push((index, buf));
                } else {
                    checksum_targets.push((index, buf));
                }
            }
        }

        if let Some(recovery) = &self.recovery {
            let sources = self.source_slices(columns)?;
            for (index, buf) in data_targets.iter_mut() {
                code.backend
                    .combine(&code.field, recovery.row(*index), &sources, &mut buf[..height]);
            }
        }

        if !checksum_targets.is_empty() {
            let mut data: Vec<&[u8]> = Vec::with_capacity(k);
            for index in 0..k {
                match data_targets.iter().find(|(i, _)| *i == index) {
                    Some((_, buf)) => data.push(&buf[..height]),
                    None => match &columns[index] {
                        Column::Source(bytes) => data.push(*bytes),
                        _ => return Err(Error::MissingSource(index)),
                    },
                }
            }
            for (index, buf) in checksum_targets.iter_mut() {
                code.backend
                    .combine(&code.field, code.coding.row(*index), &data, &mut buf[..height]);
            }
        }

        let coded = ColumnsCoded {
            height,
            columns: data_targets.len() + checksum_targets.len(),
        };
        for (index, buf) in data_targets.into_iter().chain(checksum_targets) {
            columns[index] = Column::Target(buf);
        }
        Ok(coded)
    }

    /// Compute every column that is not valid
    pub fn calculate_all_columns(&self, columns: &mut [Column<'_>]) -> Result<ColumnsCoded> {
        self.calculate_columns(columns, self.code.word_mask())
    }

    fn source_slices<'c>(&self, columns: &'c [Column<'_>]) -> Result<Vec<&'c [u8]>> {
        self.sources
            .iter()
            .map(|&source| match &columns[source] {
                Column::Source(bytes) => Ok(*bytes),
                _ => Err(Error::MissingSource(source)),
            })
            .collect()
    }
}

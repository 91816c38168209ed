//! Matrices over a Galois field
//!
//! Row-major storage with the elementary row and column operations needed
//! to build a systematic coding matrix and to invert recovery matrices.

use std::fmt;

use crate::error::{Error, Result};
use crate::field::galois::GaloisField;

/// Dense `rows × cols` matrix of field elements
#[derive(Clone, PartialEq, Eq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    values: Vec<u8>,
}

impl Matrix {
    /// Zero matrix
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            values: vec![0u8; rows * cols],
        }
    }

    /// `n × n` identity
    pub fn identity(n: usize) -> Self {
        let mut matrix = Self::new(n, n);
        for i in 0..n {
            matrix.put(i, i, 1);
        }
        matrix
    }

    /// Build from row slices, which must all have the same width
    pub fn from_rows<R: AsRef<[u8]>>(rows: &[R]) -> Result<Self> {
        let cols = rows.first().map_or(0, |r| r.as_ref().len());
        let mut values = Vec::with_capacity(rows.len() * cols);
        for (i, row) in rows.iter().enumerate() {
            let row = row.as_ref();
            if row.len() != cols {
                return Err(Error::DimensionMismatch(format!(
                    "row {} has {} columns, expected {}",
                    i,
                    row.len(),
                    cols
                )));
            }
            values.extend_from_slice(row);
        }
        Ok(Self {
            rows: rows.len(),
            cols,
            values,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> u8 {
        self.values[row * self.cols + col]
    }

    #[inline]
    pub fn put(&mut self, row: usize, col: usize, value: u8) {
        self.values[row * self.cols + col] = value;
    }

    /// Borrow one row
    #[inline]
    pub fn row(&self, row: usize) -> &[u8] {
        &self.values[row * self.cols..(row + 1) * self.cols]
    }

    pub fn is_identity(&self) -> bool {
        self.rows == self.cols
            && (0..self.rows)
                .all(|r| (0..self.cols).all(|c| self.get(r, c) == u8::from(r == c)))
    }

    // =========================================================================
    // Row Operations
    // =========================================================================

    pub fn swap_rows(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        for c in 0..self.cols {
            self.values.swap(a * self.cols + c, b * self.cols + c);
        }
    }

    /// `row *= factor`
    pub fn mult_row(&mut self, field: &GaloisField, row: usize, factor: u8) {
        for c in 0..self.cols {
            let v = self.get(row, c);
            self.put(row, c, field.mult(v, factor));
        }
    }

    /// `dest -= factor * src` (subtraction is XOR)
    pub fn sub_row(&mut self, field: &GaloisField, dest: usize, src: usize, factor: u8) {
        if factor == 0 {
            return;
        }
        for c in 0..self.cols {
            let v = field.add(self.get(dest, c), field.mult(self.get(src, c), factor));
            self.put(dest, c, v);
        }
    }

    /// Copy row `src_row` of `other` into row `dest_row`
    pub fn copy_row(&mut self, dest_row: usize, other: &Matrix, src_row: usize) -> Result<()> {
        if other.cols != self.cols {
            return Err(Error::DimensionMismatch(format!(
                "cannot copy a {}-wide row into a {}-wide matrix",
                other.cols, self.cols
            )));
        }
        let start = dest_row * self.cols;
        self.values[start..start + self.cols].copy_from_slice(other.row(src_row));
        Ok(())
    }

    // =========================================================================
    // Column Operations
    // =========================================================================

    pub fn swap_columns(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        for r in 0..self.rows {
            self.values.swap(r * self.cols + a, r * self.cols + b);
        }
    }

    /// `col *= factor`
    pub fn mult_column(&mut self, field: &GaloisField, col: usize, factor: u8) {
        for r in 0..self.rows {
            let v = self.get(r, col);
            self.put(r, col, field.mult(v, factor));
        }
    }

    /// `dest -= factor * src`
    pub fn sub_column(&mut self, field: &GaloisField, dest: usize, src: usize, factor: u8) {
        if factor == 0 {
            return;
        }
        for r in 0..self.rows {
            let v = field.add(self.get(r, dest), field.mult(self.get(r, src), factor));
            self.put(r, dest, v);
        }
    }

    // =========================================================================
    // Products and Inversion
    // =========================================================================

    /// `self × other`
    pub fn multiply(&self, other: &Matrix, field: &GaloisField) -> Result<Matrix> {
        if self.cols != other.rows {
            return Err(Error::DimensionMismatch(format!(
                "cannot multiply {}x{} by {}x{}",
                self.rows, self.cols, other.rows, other.cols
            )));
        }
        let mut product = Matrix::new(self.rows, other.cols);
        for r in 0..self.rows {
            for c in 0..other.cols {
                let v = (0..self.cols).fold(0u8, |acc, i| {
                    field.add(acc, field.mult(self.get(r, i), other.get(i, c)))
                });
                product.put(r, c, v);
            }
        }
        Ok(product)
    }

    /// Invert in place by Gauss-Jordan elimination.
    ///
    /// A singular matrix is reported as [`Error::SingularMatrix`] and left
    /// unchanged.
    pub fn invert(&mut self, field: &GaloisField) -> Result<()> {
        if self.rows != self.cols {
            return Err(Error::DimensionMismatch(format!(
                "cannot invert a non-square {}x{} matrix",
                self.rows, self.cols
            )));
        }
        let n = self.rows;

        // [self | I]
        let mut work = Matrix::new(n, 2 * n);
        for r in 0..n {
            for c in 0..n {
                work.put(r, c, self.get(r, c));
            }
            work.put(r, n + r, 1);
        }

        for col in 0..n {
            let pivot = (col..n)
                .find(|&r| work.get(r, col) != 0)
                .ok_or(Error::SingularMatrix { column: col })?;
            work.swap_rows(col, pivot);

            let p = work.get(col, col);
            if p != 1 {
                work.mult_row(field, col, field.inv(p)?);
            }
            for r in col + 1..n {
                let factor = work.get(r, col);
                work.sub_row(field, r, col, factor);
            }
        }

        for col in (0..n).rev() {
            for r in 0..col {
                let factor = work.get(r, col);
                work.sub_row(field, r, col, factor);
            }
        }

        for r in 0..n {
            for c in 0..n {
                self.put(r, c, work.get(r, n + c));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Matrix {}x{}\n{}", self.rows, self.cols, self)
    }
}

impl fmt::Display for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for r in 0..self.rows {
            let cells: Vec<String> = self.row(r).iter().map(|v| format!("{:02x}", v)).collect();
            writeln!(f, "[{}]", cells.join(" "))?;
        }
        Ok(())
    }
}

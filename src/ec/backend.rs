//! Coding Backends
//!
//! The columnar coder reduces every computed column to one primitive: a
//! linear combination of source columns over the field. Backends implement
//! that primitive.
//!
//! - `portable`: log/antilog tables from [`GaloisField`], any width
//! - `accelerated`: `reed-solomon-erasure` GF(2^8) slice kernels, only for
//!   the standard 0x11D polynomial

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use reed_solomon_erasure::galois_8;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::field::GaloisField;

/// Polynomial the `reed-solomon-erasure` tables are generated from
const ACCELERATED_POLYNOMIAL: u32 = 0x11D;

// =============================================================================
// Backend Trait
// =============================================================================

/// Linear-combination kernel used by the columnar coder
pub trait CodingBackend: Send + Sync + fmt::Debug {
    /// Backend name for identification
    fn name(&self) -> &'static str;

    /// Whether this backend produces correct products over `field`
    fn supports(&self, field: &GaloisField) -> bool;

    /// Compute `out[i] = XOR_j coefficients[j] * sources[j][i]`.
    ///
    /// Sources shorter than `out` contribute zeros past their end; bytes of
    /// a source beyond `out.len()` are ignored.
    fn combine(&self, field: &GaloisField, coefficients: &[u8], sources: &[&[u8]], out: &mut [u8]);
}

/// Capabilities of a coding backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendCapabilities {
    pub name: &'static str,
    /// Smallest and largest field width in bits
    pub field_bits: (u32, u32),
    pub vectorized: bool,
}

// =============================================================================
// Portable Backend
// =============================================================================

/// Table-driven backend that works for every supported field
#[derive(Debug, Default, Clone, Copy)]
pub struct TableBackend;

impl CodingBackend for TableBackend {
    fn name(&self) -> &'static str {
        "portable"
    }

    fn supports(&self, _field: &GaloisField) -> bool {
        true
    }

    fn combine(&self, field: &GaloisField, coefficients: &[u8], sources: &[&[u8]], out: &mut [u8]) {
        out.fill(0);
        for (&coefficient, source) in coefficients.iter().zip(sources) {
            let Some(log_c) = field.log(coefficient) else {
                continue;
            };
            let n = source.len().min(out.len());
            for (dst, &src) in out[..n].iter_mut().zip(&source[..n]) {
                *dst ^= field.mult_log(log_c, src);
            }
        }
    }
}

// =============================================================================
// Accelerated Backend
// =============================================================================

/// Backend built on the `reed-solomon-erasure` GF(2^8) slice kernels
#[derive(Debug, Default, Clone, Copy)]
pub struct SliceBackend;

impl CodingBackend for SliceBackend {
    fn name(&self) -> &'static str {
        "accelerated"
    }

    fn supports(&self, field: &GaloisField) -> bool {
        field.bits() == 8 && field.primitive() == ACCELERATED_POLYNOMIAL
    }

    fn combine(&self, _field: &GaloisField, coefficients: &[u8], sources: &[&[u8]], out: &mut [u8]) {
        out.fill(0);
        for (&coefficient, source) in coefficients.iter().zip(sources) {
            if coefficient == 0 {
                continue;
            }
            let n = source.len().min(out.len());
            galois_8::mul_slice_xor(coefficient, &source[..n], &mut out[..n]);
        }
    }
}

// =============================================================================
// Backend Selection
// =============================================================================

/// Backend type selection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// Log/antilog tables (any field)
    Portable,
    /// Slice kernels (GF(2^8) with polynomial 0x11D)
    Accelerated,
    /// Accelerated when the field allows it, portable otherwise
    #[default]
    Auto,
}

impl BackendType {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Portable => "portable",
            Self::Accelerated => "accelerated",
            Self::Auto => "auto",
        }
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for BackendType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "portable" | "table" | "tables" => Ok(Self::Portable),
            "accelerated" | "slice" | "simd" => Ok(Self::Accelerated),
            "auto" | "" => Ok(Self::Auto),
            _ => Err(format!("unknown backend type: {}", s)),
        }
    }
}

/// Factory for coding backends
pub struct BackendFactory;

impl BackendFactory {
    /// Create a backend for `field`
    ///
    /// # Arguments
    /// * `kind` - Requested backend; `Auto` picks the best one for the field
    /// * `field` - Field the backend will compute over
    ///
    /// # Returns
    /// Arc-wrapped backend, or `UnsupportedBackend` if an explicitly
    /// requested backend cannot handle the field
    pub fn create(kind: BackendType, field: &GaloisField) -> Result<Arc<dyn CodingBackend>> {
        let kind = match kind {
            BackendType::Auto => Self::detect_best(field),
            other => other,
        };

        let backend: Arc<dyn CodingBackend> = match kind {
            BackendType::Accelerated => Arc::new(SliceBackend),
            BackendType::Portable | BackendType::Auto => Arc::new(TableBackend),
        };
        if !backend.supports(field) {
            return Err(Error::UnsupportedBackend {
                backend: backend.name(),
                field_size: field.size(),
            });
        }

        debug!("Selected {} coding backend for {}", backend.name(), field);
        Ok(backend)
    }

    /// Best backend able to compute over `field`
    pub fn detect_best(field: &GaloisField) -> BackendType {
        if SliceBackend.supports(field) {
            BackendType::Accelerated
        } else {
            BackendType::Portable
        }
    }

    /// Capabilities of the backends usable with `field`
    pub fn available(field: &GaloisField) -> Vec<BackendCapabilities> {
        let mut backends = vec![BackendCapabilities {
            name: TableBackend.name(),
            field_bits: (crate::field::galois::MIN_FIELD_BITS, crate::field::galois::MAX_FIELD_BITS),
            vectorized: false,
        }];
        if SliceBackend.supports(field) {
            backends.push(BackendCapabilities {
                name: SliceBackend.name(),
                field_bits: (8, 8),
                vectorized: true,
            });
        }
        backends
    }
}

//! Finite Field Module
//!
//! GF(2^b) arithmetic and the matrix algebra built on top of it.
//!
//! - **GaloisField** (`galois.rs`): log/antilog table arithmetic for widths
//!   of 2 to 8 bits, with a primitivity check at construction and shared
//!   instances for the standard polynomials.
//! - **Matrix** (`matrix.rs`): row-major matrices with elementary row and
//!   column operations and Gauss-Jordan inversion that reports singular
//!   input.

pub mod galois;
pub mod matrix;

pub use galois::GaloisField;
pub use matrix::Matrix;

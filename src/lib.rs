//! meldstripe - Reed-Solomon Erasure Coding and Stream Striping
//!
//! Splits a byte stream into `k` data columns plus `m` checksum columns so
//! that the stream survives the loss of any `m` columns, and joins the
//! columns back together.
//!
//! # Architecture
//!
//! ```text
//! field (GF(2^b), matrices) → ec (coding domain, coders) → stripe (pipeline)
//! ```
//!
//! # Modules
//!
//! - [`field`] - Galois field arithmetic and matrices over it
//! - [`ec`] - Erasure coding: coding domain, coders and backends
//! - [`stripe`] - Stripe layout, stripe matrices and the striping pipeline
//! - [`error`] - Error types

pub mod ec;
pub mod error;
pub mod field;
pub mod stripe;

// Re-export commonly used types
pub use ec::{Coder, CodingDomain, Column};
pub use error::{Error, Result};
pub use field::{GaloisField, Matrix};
pub use stripe::{ChannelStriper, StripeLayout, StripeStats, StriperConfig};

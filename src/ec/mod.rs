//! Erasure Coding Module
//!
//! Reed-Solomon coding over `k` data and `m` checksum columns.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Erasure Coding Module                           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                          │
//! │  ┌──────────────────┐   create_coder(mask)   ┌───────────────────────┐  │
//! │  │   CodingDomain   │ ─────────────────────▶ │        Coder          │  │
//! │  │ (k, m, field,    │                        │ (recovery matrix,     │  │
//! │  │  coding matrix)  │ ◀───── cached ──────── │  source columns)      │  │
//! │  └──────────────────┘                        └───────────┬───────────┘  │
//! │                                                          │ combine      │
//! │                                              ┌───────────▼───────────┐  │
//! │                                              │    CodingBackend      │  │
//! │                                              │ (portable/accelerated)│  │
//! │                                              └───────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - **CodingDomain** (`domain.rs`): builds the systematic Vandermonde coding
//!   matrix, owns the pre-built checksum coder and caches recovery coders
//!   per validity mask. Also updates checksums incrementally after a single
//!   data symbol changes.
//!
//! - **Coder** (`coder.rs`): computes missing data and checksum symbols,
//!   either one code word at a time or over whole (possibly jagged) columns.
//!
//! - **Backends** (`backend.rs`): the linear-combination kernel behind the
//!   columnar form, selectable at startup.
//!
//! # Usage
//!
//! ```rust
//! use meldstripe::ec::CodingDomain;
//!
//! let domain = CodingDomain::gf256(5, 3)?;
//! let mut word = vec![0x03, 0x14, 0x15, 0x00, 0x65, 0, 0, 0];
//! domain.checksum_coder().calculate_word_all(&mut word)?;
//!
//! // Lose two data symbols and a checksum
//! let valid = domain.word_mask() & !(1 << 2 | 1 << 4 | 1 << 7);
//! let (lost_2, lost_4) = (word[2], word[4]);
//! word[2] = 0;
//! word[4] = 0;
//! word[7] = 0;
//!
//! domain.create_coder(valid)?.calculate_word_all(&mut word)?;
//! assert_eq!((word[2], word[4]), (lost_2, lost_4));
//! # Ok::<(), meldstripe::Error>(())
//! ```

pub mod backend;
pub mod coder;
pub mod domain;

#[cfg(test)]
mod proptest;

pub use backend::{BackendFactory, BackendType, CodingBackend, SliceBackend, TableBackend};
pub use coder::{Coder, Column, ColumnsCoded};
pub use domain::CodingDomain;

//! Striping Module
//!
//! Moves a byte stream to and from `k` data columns plus `m` checksum
//! columns.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                             Striping Module                              │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                          │
//! │  ┌────────────────┐  builds   ┌────────────────┐  runs on  ┌──────────┐  │
//! │  │ StriperConfig  │ ────────▶ │ ChannelStriper │ ────────▶ │WorkerPool│  │
//! │  └────────────────┘           └───────┬────────┘           └──────────┘  │
//! │                                       │ ring of frames                   │
//! │                               ┌───────▼────────┐  calculate ┌────────┐   │
//! │                               │  StripeMatrix  │ ─────────▶ │ Coder  │   │
//! │                               │ (16 stripes)   │            └────────┘   │
//! │                               └────────────────┘                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - **StripeLayout** (`layout.rs`): block arithmetic and the per-column
//!   sizes of a striped stream.
//! - **StripeMatrix** (`matrix.rs`): 16 stripes of block storage with
//!   vectored striped and columnar I/O.
//! - **ChannelStriper** (`striper.rs`): the concurrent stripe and unstripe
//!   pipelines.
//! - **WorkerPool** (`pool.rs`): the threads the pipelines run on.

pub mod config;
pub(crate) mod frame;
pub mod layout;
pub mod matrix;
pub mod pool;
pub mod striper;

pub use config::{StriperConfig, DEFAULT_BLOCK_SIZE, DEFAULT_RING_BUFFER_SIZE};
pub use layout::{block_len, StripeLayout};
pub use matrix::{ColumnBlocks, StripeMatrix, STRIPE_COUNT};
pub use pool::{TaskHandle, WorkerPool};
pub use striper::{ChannelStriper, StripeStats};

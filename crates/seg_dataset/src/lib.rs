//! Pre-split image/mask dataset loading and Burn-compatible batching.
//!
//! This crate provides:
//! - Directory indexing of image/mask pairs by shared file stem
//! - Ordered distinct mask-value discovery for label decoding
//! - Shuffled, Burn-compatible batch iteration

pub mod batch;
pub mod index;
pub mod types;

pub use batch::{BatchIter, DatasetConfig, SegBatch, SegDataset};
pub use index::{index_pairs, scan_mask_values};
pub use types::{DatasetResult, SamplePair, SegDatasetError};

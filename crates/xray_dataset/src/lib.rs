//! Dataset indexing, patch extraction, and split orchestration for
//! segmenting gridded X-ray scan measurements.
//!
//! This crate provides:
//! - A hierarchical array store (JSON manifest + memory-mapped blob)
//! - `Selection`: which samples, days, and heights a dataset draws from
//! - `PatchDataset`: flat-index access to (input, label, border-mask) points
//! - Train/val/strict-test/overlap-test split construction
//! - Burn-compatible batch loading

pub mod dataset;
pub mod loader;
pub mod selection;
pub mod splits;
pub mod store;
pub mod types;

pub use dataset::{border_mask, Concat, PatchDataset, PointSource, Subset};
pub use loader::{BatchLoader, SegBatch};
pub use selection::{Dimension, Selection};
pub use splits::{build_split_loaders, SplitConfig, SplitLoaders};
pub use store::{ArrayStore, StoreWriter, DATA_ARRAY, LABELS_ARRAY};
pub use types::{DatasetError, DatasetResult, PointCoords, SamplePoint};

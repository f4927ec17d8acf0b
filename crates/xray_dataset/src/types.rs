//! Core types and error definitions for xray_dataset.

use ndarray::ArrayD;
use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, DatasetError>;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json parse error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("store manifest invalid at {path}: {msg}")]
    Manifest { path: PathBuf, msg: String },
    #[error("array `{name}` missing in group `{group}`")]
    MissingArray { group: String, name: String },
    #[error("array `{group}/{name}` has dtype {found}, expected {expected}")]
    DtypeMismatch {
        group: String,
        name: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("day {day} out of range for `{group}` ({days} days)")]
    DayOutOfRange {
        group: String,
        day: usize,
        days: usize,
    },
    #[error("height {height} out of range for `{group}` ({heights} heights)")]
    HeightOutOfRange {
        group: String,
        height: usize,
        heights: usize,
    },
    #[error("index {index} out of range for dataset of {len} points")]
    IndexOutOfBounds { index: usize, len: usize },
    #[error("patch extent {patch} exceeds axis {axis} extent {extent}")]
    PatchTooLarge {
        axis: usize,
        patch: usize,
        extent: usize,
    },
    #[error("{0}")]
    Other(String),
}

/// One training point: single-channel input, per-pixel class labels, and the
/// border mask marking which pixels carry full receptive-field context.
///
/// `data` carries a leading channel axis; `labels` and `mask` share the
/// spatial shape of the (possibly patched) slab.
#[derive(Debug, Clone)]
pub struct SamplePoint {
    pub data: ArrayD<f32>,
    pub labels: ArrayD<i64>,
    pub mask: ArrayD<bool>,
}

/// Resolved coordinates of a flat point index.
///
/// `height_idx` is always derived from the index arithmetic but is only used
/// as an array index for planar selections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointCoords {
    pub sample_idx: usize,
    pub day_idx: usize,
    pub height_idx: usize,
}

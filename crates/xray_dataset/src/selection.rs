//! Logical subsets of the scan store and their index arithmetic.

use crate::types::{DatasetError, DatasetResult, PointCoords};

/// Spatial dimensionality of a selection.
///
/// Planar selections iterate heights as separate points and yield 2-D slabs;
/// volumetric selections fold the height axis into one 3-D volume per day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Planar,
    Volumetric,
}

impl Dimension {
    pub fn from_rank(rank: usize) -> DatasetResult<Self> {
        match rank {
            2 => Ok(Dimension::Planar),
            3 => Ok(Dimension::Volumetric),
            other => Err(DatasetError::Other(format!(
                "unsupported spatial dimension {other}; expected 2 or 3"
            ))),
        }
    }

    /// Number of spatial axes of a single point (2 for planar, 3 for volumetric).
    pub fn spatial_rank(self) -> usize {
        match self {
            Dimension::Planar => 2,
            Dimension::Volumetric => 3,
        }
    }
}

/// Which subset of the store a dataset draws from: sample names plus
/// half-open day and height ranges.
///
/// Pure value type; all derived sizes follow from the fields and the flat
/// index range `[0, num_points)` is the only valid one for the associated
/// dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub sample_list: Vec<String>,
    pub height_range: (usize, usize),
    pub day_range: (usize, usize),
    pub dimension: Dimension,
}

impl Selection {
    pub fn num_samples(&self) -> usize {
        self.sample_list.len()
    }

    pub fn num_heights(&self) -> usize {
        self.height_range.1.saturating_sub(self.height_range.0)
    }

    pub fn num_days(&self) -> usize {
        self.day_range.1.saturating_sub(self.day_range.0)
    }

    /// Points contributed by one sample: every (day, height) pair for planar
    /// selections, one volume per day for volumetric ones.
    pub fn points_per_sample(&self) -> usize {
        match self.dimension {
            Dimension::Planar => self.num_heights() * self.num_days(),
            Dimension::Volumetric => self.num_days(),
        }
    }

    pub fn num_points(&self) -> usize {
        self.num_samples() * self.points_per_sample()
    }

    /// Resolve a flat index into (sample, day, height) coordinates.
    ///
    /// The caller is responsible for `idx < num_points()`. The height offset
    /// comes out of the same modular arithmetic for both dimensionalities;
    /// volumetric selections conventionally use a unit height span so the
    /// day offset is the per-sample remainder itself.
    pub fn coords_of(&self, idx: usize) -> PointCoords {
        let sample_idx = idx / self.points_per_sample();
        let rem = idx % self.points_per_sample();
        let heights = self.num_heights().max(1);
        let day_off = rem / heights;
        let height_off = rem % heights;
        PointCoords {
            sample_idx,
            day_idx: day_off + self.day_range.0,
            height_idx: height_off + self.height_range.0,
        }
    }

    /// Inverse of [`coords_of`](Self::coords_of): flat index of absolute
    /// (sample, day, height) coordinates.
    pub fn index_of(&self, sample_idx: usize, day_idx: usize, height_idx: usize) -> usize {
        let day_off = day_idx - self.day_range.0;
        let rem = match self.dimension {
            Dimension::Planar => day_off * self.num_heights() + (height_idx - self.height_range.0),
            Dimension::Volumetric => day_off,
        };
        sample_idx * self.points_per_sample() + rem
    }
}

//! Index-addressed patch extraction over the scan store.

use crate::selection::{Dimension, Selection};
use crate::store::ArrayStore;
use crate::types::{DatasetError, DatasetResult, SamplePoint};
use ndarray::{ArrayD, Axis, IxDyn, SliceInfoElem};
use rand::Rng;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// An indexed view over one [`Selection`] of the store.
///
/// Construction is cheap and touches no files; the store handle opens on the
/// first `get`. Cloning resets the handle so every parallel worker acquires
/// its own mapping instead of inheriting one across the clone boundary.
#[derive(Debug)]
pub struct PatchDataset {
    name: String,
    store_dir: PathBuf,
    store: OnceLock<ArrayStore>,
    selection: Selection,
    patch_size: Option<Vec<usize>>,
    patch_border: Option<Vec<usize>>,
    shuffle: bool,
}

impl Clone for PatchDataset {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            store_dir: self.store_dir.clone(),
            store: OnceLock::new(),
            selection: self.selection.clone(),
            patch_size: self.patch_size.clone(),
            patch_border: self.patch_border.clone(),
            shuffle: self.shuffle,
        }
    }
}

impl PatchDataset {
    pub fn new(
        store_dir: &Path,
        selection: Selection,
        name: &str,
        patch_size: Option<Vec<usize>>,
        patch_border: Option<Vec<usize>>,
        shuffle: bool,
    ) -> DatasetResult<Self> {
        let rank = selection.dimension.spatial_rank();
        for (label, extents) in [("patch_size", &patch_size), ("patch_border", &patch_border)] {
            if let Some(e) = extents {
                if e.len() != rank {
                    return Err(DatasetError::Other(format!(
                        "{label} has {} axes, selection is {rank}-dimensional",
                        e.len()
                    )));
                }
            }
        }
        // Random patch placement is currently forced on regardless of the
        // flag passed in.
        // TODO: honor shuffle=false (centered patches) once the evaluation
        // path needs deterministic crops.
        let _ = shuffle;
        Ok(Self {
            name: name.to_string(),
            store_dir: store_dir.to_path_buf(),
            store: OnceLock::new(),
            selection,
            patch_size,
            patch_border,
            shuffle: true,
        })
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    fn store(&self) -> DatasetResult<&ArrayStore> {
        match self.store.get() {
            Some(store) => Ok(store),
            None => {
                let opened = ArrayStore::open(&self.store_dir)?;
                // A racing open may have won; either handle is equivalent.
                Ok(self.store.get_or_init(|| opened))
            }
        }
    }

    /// Load the point at `idx`: resolve coordinates, read the day slab,
    /// crop the patch, and compute its border mask.
    pub fn get(&self, idx: usize) -> DatasetResult<SamplePoint> {
        let len = self.selection.num_points();
        if idx >= len {
            return Err(DatasetError::IndexOutOfBounds { index: idx, len });
        }
        let store = self.store()?;
        let coords = self.selection.coords_of(idx);
        let sample = &self.selection.sample_list[coords.sample_idx];

        let mut data = store.read_data_day(sample, coords.day_idx)?;
        let mut labels = store.read_labels_day(sample, coords.day_idx)?;
        if self.selection.dimension == Dimension::Planar {
            let heights = data.shape().first().copied().unwrap_or(0);
            if coords.height_idx >= heights {
                return Err(DatasetError::HeightOutOfRange {
                    group: sample.clone(),
                    height: coords.height_idx,
                    heights,
                });
            }
            data = data.index_axis_move(Axis(0), coords.height_idx);
            labels = labels.index_axis_move(Axis(0), coords.height_idx);
        }

        let init_shape = data.shape().to_vec();
        let mut patch_starts = Vec::new();
        if let Some(patch) = &self.patch_size {
            patch_starts = self.draw_patch_starts(&init_shape, patch)?;
            let slices = patch_slices(&patch_starts, patch);
            data = data.slice(slices.as_slice()).to_owned();
            labels = labels.slice(slices.as_slice()).to_owned();
        }

        let mask = border_mask(
            self.patch_size.as_deref(),
            self.patch_border.as_deref(),
            &init_shape,
            &patch_starts,
        );

        // Single-channel input; the loader adds the batch axis.
        let data = data.insert_axis(Axis(0));
        Ok(SamplePoint { data, labels, mask })
    }

    fn draw_patch_starts(
        &self,
        init_shape: &[usize],
        patch: &[usize],
    ) -> DatasetResult<Vec<usize>> {
        let mut rng = rand::rng();
        patch
            .iter()
            .zip(init_shape)
            .enumerate()
            .map(|(axis, (&size, &extent))| {
                if size > extent {
                    return Err(DatasetError::PatchTooLarge {
                        axis,
                        patch: size,
                        extent,
                    });
                }
                let max_start = extent - size;
                Ok(if self.shuffle {
                    rng.random_range(0..=max_start)
                } else {
                    max_start / 2
                })
            })
            .collect()
    }
}

fn patch_slices(starts: &[usize], sizes: &[usize]) -> Vec<SliceInfoElem> {
    starts
        .iter()
        .zip(sizes)
        .map(|(&start, &size)| SliceInfoElem::Slice {
            start: start as isize,
            end: Some((start + size) as isize),
            step: 1,
        })
        .collect()
}

/// Border mask for a patch cut from a slab of shape `init_shape` at
/// `patch_starts`.
///
/// Pixels within `patch_border` of a patch edge lack full receptive-field
/// context and are excluded, except where no neighboring patch could supply
/// that context either: each margin is capped by the extent a neighbor can
/// actually reach, so a patch flush against the slab edge keeps its
/// otherwise-excluded rim.
pub fn border_mask(
    patch_size: Option<&[usize]>,
    patch_border: Option<&[usize]>,
    init_shape: &[usize],
    patch_starts: &[usize],
) -> ArrayD<bool> {
    let Some(patch) = patch_size else {
        return ArrayD::from_elem(IxDyn(init_shape), true);
    };
    let Some(border) = patch_border else {
        return ArrayD::from_elem(IxDyn(patch), true);
    };

    let mut mask = ArrayD::from_elem(IxDyn(patch), false);
    let mut slices = Vec::with_capacity(patch.len());
    for i in 0..patch.len() {
        let reachable_low = patch_starts[i];
        let reachable_high = init_shape[i].saturating_sub(patch_starts[i] + patch[i]);
        let lo = border[i].min(reachable_low).min(patch[i]);
        let hi = patch[i]
            .saturating_sub(border[i].min(reachable_high))
            .max(lo);
        slices.push(SliceInfoElem::Slice {
            start: lo as isize,
            end: Some(hi as isize),
            step: 1,
        });
    }
    mask.slice_mut(slices.as_slice()).fill(true);
    mask
}

/// Uniform interface over the dataset views handed to the batch loader.
pub trait PointSource: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, idx: usize) -> DatasetResult<SamplePoint>;

    fn name(&self) -> &str;
}

impl PointSource for PatchDataset {
    fn len(&self) -> usize {
        self.selection.num_points()
    }

    fn get(&self, idx: usize) -> DatasetResult<SamplePoint> {
        PatchDataset::get(self, idx)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A remapped view over a [`PatchDataset`]: position `i` resolves to the
/// underlying point `indices[i]`.
#[derive(Debug, Clone)]
pub struct Subset {
    name: String,
    inner: PatchDataset,
    indices: Vec<usize>,
}

impl Subset {
    pub fn new(name: &str, inner: PatchDataset, indices: Vec<usize>) -> Self {
        Self {
            name: name.to_string(),
            inner,
            indices,
        }
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn inner(&self) -> &PatchDataset {
        &self.inner
    }
}

impl PointSource for Subset {
    fn len(&self) -> usize {
        self.indices.len()
    }

    fn get(&self, idx: usize) -> DatasetResult<SamplePoint> {
        let len = self.indices.len();
        let inner_idx = *self
            .indices
            .get(idx)
            .ok_or(DatasetError::IndexOutOfBounds { index: idx, len })?;
        self.inner.get(inner_idx)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Concatenation of dataset views: indices `[0, len_0)` address the first
/// part, `[len_0, len_0 + len_1)` the second, and so on.
#[derive(Debug, Clone)]
pub struct Concat {
    name: String,
    parts: Vec<PatchDataset>,
}

impl Concat {
    pub fn new(name: &str, parts: Vec<PatchDataset>) -> Self {
        Self {
            name: name.to_string(),
            parts,
        }
    }

    pub fn parts(&self) -> &[PatchDataset] {
        &self.parts
    }

    /// Map a concatenated index to (part index, index within part).
    pub fn locate(&self, idx: usize) -> DatasetResult<(usize, usize)> {
        let mut offset = 0;
        for (part_idx, part) in self.parts.iter().enumerate() {
            let part_len = part.len();
            if idx < offset + part_len {
                return Ok((part_idx, idx - offset));
            }
            offset += part_len;
        }
        Err(DatasetError::IndexOutOfBounds {
            index: idx,
            len: offset,
        })
    }
}

impl PointSource for Concat {
    fn len(&self) -> usize {
        self.parts.iter().map(|p| p.len()).sum()
    }

    fn get(&self, idx: usize) -> DatasetResult<SamplePoint> {
        let (part_idx, inner_idx) = self.locate(idx)?;
        self.parts[part_idx].get(inner_idx)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

//! Batch assembly from point sources into Burn tensors.

use crate::dataset::PointSource;
use crate::types::{DatasetError, DatasetResult};
use burn::tensor::backend::Backend;
use burn::tensor::{Bool, Int, Tensor, TensorData};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;

/// One stacked batch. Spatial axes are flattened into a single position
/// axis so planar slabs and volumetric slabs batch the same way;
/// `spatial_shape` records the per-sample extents for consumers that need
/// them back.
#[derive(Debug, Clone)]
pub struct SegBatch<B: Backend> {
    /// `[batch, 1, positions]` single-channel inputs.
    pub inputs: Tensor<B, 3>,
    /// `[batch, positions]` class indices.
    pub targets: Tensor<B, 2, Int>,
    /// `[batch, positions]` border mask; true where a pixel counts.
    pub mask: Tensor<B, 2, Bool>,
    pub spatial_shape: Vec<usize>,
}

/// Pull-style batch iterator over a [`PointSource`].
///
/// Samples within a batch load in parallel; batch order is shuffled only
/// when constructed with `shuffle`, and reshuffled on every [`reset`](Self::reset).
pub struct BatchLoader<D: PointSource> {
    source: D,
    order: Vec<usize>,
    cursor: usize,
    batch_size: usize,
    shuffle: bool,
    rng: StdRng,
}

impl<D: PointSource> BatchLoader<D> {
    pub fn new(source: D, batch_size: usize, shuffle: bool, seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        let mut order: Vec<usize> = (0..source.len()).collect();
        if shuffle {
            order.shuffle(&mut rng);
        }
        Self {
            source,
            order,
            cursor: 0,
            batch_size: batch_size.max(1),
            shuffle,
            rng,
        }
    }

    /// Number of points in the underlying view.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn source(&self) -> &D {
        &self.source
    }

    /// Rewind to the first batch; shuffling loaders draw a fresh order.
    pub fn reset(&mut self) {
        self.cursor = 0;
        if self.shuffle {
            self.order.shuffle(&mut self.rng);
        }
    }

    /// Next stacked batch, or `None` once the epoch is exhausted.
    pub fn next_batch<B: Backend>(
        &mut self,
        device: &B::Device,
    ) -> DatasetResult<Option<SegBatch<B>>> {
        if self.cursor >= self.order.len() {
            return Ok(None);
        }
        let start = self.cursor;
        let end = (start + self.batch_size).min(self.order.len());
        self.cursor = end;
        let batch_indices: Vec<usize> = self.order[start..end].to_vec();

        let source = &self.source;
        let mut loaded: Vec<_> = batch_indices
            .par_iter()
            .enumerate()
            .map(|(i, &idx)| (i, source.get(idx)))
            .collect();
        loaded.sort_by_key(|(i, _)| *i);

        let mut spatial_shape: Option<Vec<usize>> = None;
        let mut inputs_buf: Vec<f32> = Vec::new();
        let mut targets_buf: Vec<i64> = Vec::new();
        let mut mask_buf: Vec<bool> = Vec::new();

        for (_i, res) in loaded {
            let point = res?;
            let shape = point.labels.shape().to_vec();
            match &spatial_shape {
                None => spatial_shape = Some(shape),
                Some(expected) if *expected != shape => {
                    return Err(DatasetError::Other(format!(
                        "batch mixes spatial shapes {expected:?} and {shape:?}; \
                         configure a patch size to force consistency"
                    )));
                }
                _ => {}
            }
            inputs_buf.extend(point.data.iter().copied());
            targets_buf.extend(point.labels.iter().copied());
            mask_buf.extend(point.mask.iter().copied());
        }

        let spatial_shape = spatial_shape.unwrap_or_default();
        let positions: usize = spatial_shape.iter().product();
        let batch_len = end - start;

        let inputs = Tensor::<B, 1>::from_floats(inputs_buf.as_slice(), device).reshape([
            batch_len,
            1,
            positions,
        ]);
        let targets = Tensor::<B, 2, Int>::from_data(
            TensorData::new(targets_buf, [batch_len, positions]),
            device,
        );
        let mask = Tensor::<B, 2, Bool>::from_data(
            TensorData::new(mask_buf, [batch_len, positions]),
            device,
        );

        Ok(Some(SegBatch {
            inputs,
            targets,
            mask,
            spatial_shape,
        }))
    }
}

//! Train/val/test split orchestration over one scan store.
//!
//! One configuration yields four loaders: a seeded random train/val split of
//! the configured samples and days, a strict test set sharing neither
//! samples nor days with them, and an overlap test set whose two halves each
//! share exactly one axis (days or samples) with the training data.

use crate::dataset::{Concat, PatchDataset, PointSource, Subset};
use crate::loader::BatchLoader;
use crate::selection::{Dimension, Selection};
use crate::store::ArrayStore;
use crate::types::{DatasetError, DatasetResult};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeSet;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct SplitConfig {
    pub store_dir: PathBuf,
    pub train_samples: Vec<String>,
    pub height_range: (usize, usize),
    pub train_day_range: (usize, usize),
    /// Fraction of train+val points held out for validation, in `[0, 1]`.
    pub validation_split: f32,
    pub batch_size: usize,
    /// Seed for the train/val partition; the same seed reproduces the same
    /// assignment.
    pub seed: u64,
    pub dimension: Dimension,
    /// Per-axis patch extents; a single value broadcasts to every axis.
    pub patch_size: Option<Vec<usize>>,
    pub patch_border: Option<Vec<usize>>,
}

pub struct SplitLoaders {
    pub train: BatchLoader<Subset>,
    pub val: BatchLoader<Subset>,
    pub test_strict: BatchLoader<PatchDataset>,
    pub test_overlap: BatchLoader<Concat>,
}

/// Expand a one-element extent list to the selection's spatial rank.
fn broadcast_extents(extents: Option<&[usize]>, rank: usize) -> Option<Vec<usize>> {
    extents.map(|e| {
        if e.len() == 1 {
            vec![e[0]; rank]
        } else {
            e.to_vec()
        }
    })
}

pub fn build_split_loaders(cfg: &SplitConfig) -> DatasetResult<SplitLoaders> {
    if !(0.0..=1.0).contains(&cfg.validation_split) {
        return Err(DatasetError::Other(format!(
            "validation_split {} outside [0, 1]",
            cfg.validation_split
        )));
    }
    let rank = cfg.dimension.spatial_rank();
    let patch_size = broadcast_extents(cfg.patch_size.as_deref(), rank);
    let patch_border = broadcast_extents(cfg.patch_border.as_deref(), rank);

    let make_dataset = |name: &str, sample_list: Vec<String>, day_range: (usize, usize)| {
        let selection = Selection {
            sample_list,
            height_range: cfg.height_range,
            day_range,
            dimension: cfg.dimension,
        };
        PatchDataset::new(
            &cfg.store_dir,
            selection,
            name,
            patch_size.clone(),
            patch_border.clone(),
            true,
        )
    };

    let train_val = make_dataset("train_val", cfg.train_samples.clone(), cfg.train_day_range)?;

    // Seeded permutation of the train+val index space; validation takes the
    // floored fraction, the remainder trains.
    let num_points = train_val.len();
    let num_val = (cfg.validation_split as f64 * num_points as f64).floor() as usize;
    let num_train = num_points - num_val;
    let mut perm: Vec<usize> = (0..num_points).collect();
    let mut rng = StdRng::seed_from_u64(cfg.seed);
    perm.shuffle(&mut rng);
    let train = Subset::new("train", train_val.clone(), perm[..num_train].to_vec());
    let val = Subset::new("val", train_val, perm[num_train..].to_vec());

    // Discover the sample universe and total day span from the store itself.
    let store = ArrayStore::open(&cfg.store_dir)?;
    let all_samples = store.leaf_groups();
    let train_set: BTreeSet<&str> = cfg.train_samples.iter().map(String::as_str).collect();
    let test_samples: Vec<String> = all_samples
        .iter()
        .filter(|s| !train_set.contains(s.as_str()))
        .cloned()
        .collect();
    let total_days = match all_samples.first() {
        Some(first) => store.day_count(first)?,
        None => 0,
    };
    drop(store);

    let train_day_end = cfg.train_day_range.1;
    if train_day_end >= total_days {
        warn!(
            "training days end at {train_day_end} but the store holds {total_days}; \
             the strict test set will be empty"
        );
    }
    let test_day_range = (train_day_end, total_days);

    let test_strict = make_dataset("test_strict", test_samples.clone(), test_day_range)?;
    let overlap_same_days =
        make_dataset("test_overlap_same_days", test_samples, cfg.train_day_range)?;
    let overlap_same_samples = make_dataset(
        "test_overlap_same_samples",
        cfg.train_samples.clone(),
        test_day_range,
    )?;
    let test_overlap = Concat::new(
        "test_overlap",
        vec![overlap_same_days, overlap_same_samples],
    );

    info!(
        "split sizes: train={} val={} test_strict={} test_overlap={}",
        train.len(),
        val.len(),
        test_strict.len(),
        test_overlap.len()
    );

    Ok(SplitLoaders {
        train: BatchLoader::new(train, cfg.batch_size, true, None),
        val: BatchLoader::new(val, cfg.batch_size, false, None),
        test_strict: BatchLoader::new(test_strict, cfg.batch_size, false, None),
        test_overlap: BatchLoader::new(test_overlap, cfg.batch_size, false, None),
    })
}

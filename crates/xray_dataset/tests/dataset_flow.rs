//! End-to-end tests over a synthetic scan store: store round-trips, index
//! resolution, patch extraction, split construction, and batch loading.

use burn_ndarray::NdArray;
use std::collections::BTreeSet;
use std::path::Path;
use xray_dataset::{
    build_split_loaders, Dimension, PatchDataset, PointSource, Selection, SplitConfig, StoreWriter,
};

type TestBackend = NdArray<f32>;

const DAYS: usize = 6;
const HEIGHTS: usize = 4;
const SIDE: usize = 8;

/// Build a store of `[days, heights, side, side]` samples whose data values
/// encode their (sample, day, height) origin, so a loaded point can be
/// traced back to the coordinate it claims to be.
fn build_store(dir: &Path, samples: &[&str]) -> anyhow::Result<()> {
    let mut writer = StoreWriter::create(dir)?;
    for (s_idx, name) in samples.iter().enumerate() {
        let mut data = Vec::new();
        let mut labels = Vec::new();
        for d in 0..DAYS {
            for h in 0..HEIGHTS {
                for _ in 0..SIDE * SIDE {
                    data.push(encode(s_idx, d, h));
                    labels.push(((d + h) % 5) as i64);
                }
            }
        }
        let shape = [DAYS, HEIGHTS, SIDE, SIDE];
        writer.put_f32(name, "data", &shape, &data)?;
        writer.put_i64(name, "labels", &shape, &labels)?;
    }
    writer.finish()?;
    Ok(())
}

fn encode(sample_idx: usize, day: usize, height: usize) -> f32 {
    (sample_idx * 10_000 + day * 100 + height) as f32
}

fn planar_dataset(
    dir: &Path,
    samples: &[&str],
    patch_size: Option<Vec<usize>>,
    patch_border: Option<Vec<usize>>,
) -> anyhow::Result<PatchDataset> {
    let selection = Selection {
        sample_list: samples.iter().map(|s| s.to_string()).collect(),
        height_range: (1, 3),
        day_range: (2, 5),
        dimension: Dimension::Planar,
    };
    Ok(PatchDataset::new(
        dir,
        selection,
        "test",
        patch_size,
        patch_border,
        true,
    )?)
}

#[test]
fn store_round_trip_and_leaf_discovery() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    build_store(tmp.path(), &["plates/s01", "plates/s00"])?;

    let store = xray_dataset::ArrayStore::open(tmp.path())?;
    assert_eq!(store.leaf_groups(), vec!["plates/s00", "plates/s01"]);
    assert_eq!(store.day_count("plates/s00")?, DAYS);

    let slab = store.read_data_day("plates/s01", 3)?;
    assert_eq!(slab.shape(), &[HEIGHTS, SIDE, SIDE]);
    assert_eq!(slab[[2, 0, 0]], encode(0, 3, 2));

    let labels = store.read_labels_day("plates/s01", 3)?;
    assert_eq!(labels.shape(), &[HEIGHTS, SIDE, SIDE]);
    assert_eq!(labels[[2, 0, 0]], 5 % 5);
    Ok(())
}

#[test]
fn opening_a_missing_store_fails() {
    let tmp = tempfile::tempdir().unwrap();
    assert!(xray_dataset::ArrayStore::open(&tmp.path().join("nowhere")).is_err());
}

#[test]
fn planar_index_resolution_round_trip() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let samples = ["plates/s00", "plates/s01"];
    build_store(tmp.path(), &samples)?;
    let dataset = planar_dataset(tmp.path(), &samples, None, None)?;

    // 2 samples x 3 days x 2 heights.
    assert_eq!(dataset.len(), 12);
    for idx in 0..dataset.len() {
        let coords = dataset.selection().coords_of(idx);
        let point = dataset.get(idx)?;
        assert_eq!(point.data.shape(), &[1, SIDE, SIDE]);
        assert_eq!(point.labels.shape(), &[SIDE, SIDE]);
        assert_eq!(point.mask.shape(), &[SIDE, SIDE]);
        assert!(point.mask.iter().all(|&m| m));
        assert_eq!(
            point.data[[0, 0, 0]],
            encode(coords.sample_idx, coords.day_idx, coords.height_idx)
        );
        assert_eq!(
            point.labels[[0, 0]],
            ((coords.day_idx + coords.height_idx) % 5) as i64
        );
        // The inverse formula lands back on the same flat index.
        assert_eq!(
            dataset
                .selection()
                .index_of(coords.sample_idx, coords.day_idx, coords.height_idx),
            idx
        );
    }
    Ok(())
}

#[test]
fn out_of_range_index_is_rejected() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let samples = ["plates/s00"];
    build_store(tmp.path(), &samples)?;
    let dataset = planar_dataset(tmp.path(), &samples, None, None)?;
    assert!(dataset.get(dataset.len()).is_err());
    Ok(())
}

#[test]
fn volumetric_points_carry_the_full_height_axis() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let samples = ["plates/s00"];
    build_store(tmp.path(), &samples)?;

    let selection = Selection {
        sample_list: vec!["plates/s00".into()],
        height_range: (0, 1),
        day_range: (0, DAYS),
        dimension: Dimension::Volumetric,
    };
    let dataset = PatchDataset::new(tmp.path(), selection, "vol", None, None, true)?;
    assert_eq!(dataset.len(), DAYS);

    for day in 0..DAYS {
        let point = dataset.get(day)?;
        assert_eq!(point.data.shape(), &[1, HEIGHTS, SIDE, SIDE]);
        assert_eq!(point.labels.shape(), &[HEIGHTS, SIDE, SIDE]);
        // Every height of the day's volume is present, unindexed.
        for h in 0..HEIGHTS {
            assert_eq!(point.data[[0, h, 0, 0]], encode(0, day, h));
        }
    }
    Ok(())
}

#[test]
fn full_extent_patch_keeps_everything() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let samples = ["plates/s00"];
    build_store(tmp.path(), &samples)?;
    // A patch spanning the whole slab has exactly one placement, so the
    // random draw is pinned at zero and the border has nothing to exclude.
    let dataset = planar_dataset(
        tmp.path(),
        &samples,
        Some(vec![SIDE, SIDE]),
        Some(vec![2, 2]),
    )?;
    let point = dataset.get(0)?;
    assert_eq!(point.data.shape(), &[1, SIDE, SIDE]);
    assert_eq!(point.mask.shape(), &[SIDE, SIDE]);
    assert!(point.mask.iter().all(|&m| m));
    Ok(())
}

#[test]
fn patch_crops_data_labels_and_mask_alike() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let samples = ["plates/s00"];
    build_store(tmp.path(), &samples)?;
    let dataset = planar_dataset(tmp.path(), &samples, Some(vec![4, 4]), Some(vec![1, 1]))?;
    let point = dataset.get(0)?;
    assert_eq!(point.data.shape(), &[1, 4, 4]);
    assert_eq!(point.labels.shape(), &[4, 4]);
    assert_eq!(point.mask.shape(), &[4, 4]);
    // Interior of the mask is always kept whatever the draw.
    assert!(point.mask[[1, 1]] && point.mask[[2, 2]]);
    Ok(())
}

#[test]
fn oversized_patch_is_a_typed_error() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let samples = ["plates/s00"];
    build_store(tmp.path(), &samples)?;
    let dataset = planar_dataset(tmp.path(), &samples, Some(vec![SIDE * 2, SIDE]), None)?;
    assert!(dataset.get(0).is_err());
    Ok(())
}

fn split_config(dir: &Path, seed: u64, train_day_end: usize) -> SplitConfig {
    SplitConfig {
        store_dir: dir.to_path_buf(),
        train_samples: vec!["plates/s00".into(), "plates/s01".into()],
        height_range: (0, HEIGHTS),
        train_day_range: (0, train_day_end),
        validation_split: 0.25,
        batch_size: 5,
        seed,
        dimension: Dimension::Planar,
        patch_size: None,
        patch_border: None,
    }
}

#[test]
fn split_partitions_are_disjoint_and_overlaps_share_one_axis() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let all = ["plates/s00", "plates/s01", "plates/s02", "plates/s03"];
    build_store(tmp.path(), &all)?;
    let loaders = build_split_loaders(&split_config(tmp.path(), 7, 4))?;

    // 2 samples x 4 days x 4 heights = 32 train+val points, 25% to val.
    assert_eq!(loaders.train.len(), 24);
    assert_eq!(loaders.val.len(), 8);

    let train_idx: BTreeSet<usize> = loaders.train.source().indices().iter().copied().collect();
    let val_idx: BTreeSet<usize> = loaders.val.source().indices().iter().copied().collect();
    assert!(train_idx.is_disjoint(&val_idx));
    let union: BTreeSet<usize> = train_idx.union(&val_idx).copied().collect();
    assert_eq!(union, (0..32).collect::<BTreeSet<usize>>());

    // Strict test: the complementary samples over the complementary days.
    let strict = loaders.test_strict.source().selection();
    assert_eq!(
        strict.sample_list,
        vec!["plates/s02".to_string(), "plates/s03".to_string()]
    );
    assert_eq!(strict.day_range, (4, DAYS));
    assert_eq!(loaders.test_strict.len(), 2 * 2 * HEIGHTS);

    // Overlap halves: same days first, then same samples.
    let parts = loaders.test_overlap.source().parts();
    assert_eq!(parts.len(), 2);
    let same_days = parts[0].selection();
    assert_eq!(
        same_days.sample_list,
        vec!["plates/s02".to_string(), "plates/s03".to_string()]
    );
    assert_eq!(same_days.day_range, (0, 4));
    let same_samples = parts[1].selection();
    assert_eq!(
        same_samples.sample_list,
        vec!["plates/s00".to_string(), "plates/s01".to_string()]
    );
    assert_eq!(same_samples.day_range, (4, DAYS));

    // Concat index space: first half maps to part 0, second to part 1.
    let len_a = parts[0].len();
    assert_eq!(loaders.test_overlap.source().locate(0)?, (0, 0));
    assert_eq!(loaders.test_overlap.source().locate(len_a)?, (1, 0));
    assert!(loaders
        .test_overlap
        .source()
        .locate(loaders.test_overlap.len())
        .is_err());
    Ok(())
}

#[test]
fn split_is_reproducible_for_a_fixed_seed() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let all = ["plates/s00", "plates/s01", "plates/s02", "plates/s03"];
    build_store(tmp.path(), &all)?;

    let a = build_split_loaders(&split_config(tmp.path(), 42, 4))?;
    let b = build_split_loaders(&split_config(tmp.path(), 42, 4))?;
    assert_eq!(a.train.source().indices(), b.train.source().indices());
    assert_eq!(a.val.source().indices(), b.val.source().indices());

    let c = build_split_loaders(&split_config(tmp.path(), 43, 4))?;
    assert_ne!(a.train.source().indices(), c.train.source().indices());
    Ok(())
}

#[test]
fn exhausted_day_range_yields_an_empty_strict_set() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let all = ["plates/s00", "plates/s01", "plates/s02"];
    build_store(tmp.path(), &all)?;

    // Training days swallow the whole span; not an error, just empty.
    let loaders = build_split_loaders(&split_config(tmp.path(), 1, DAYS))?;
    assert_eq!(loaders.test_strict.len(), 0);
    let mut strict = loaders.test_strict;
    let device = Default::default();
    assert!(strict.next_batch::<TestBackend>(&device)?.is_none());
    Ok(())
}

#[test]
fn loader_stacks_batches_and_signals_exhaustion() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let all = ["plates/s00", "plates/s01", "plates/s02", "plates/s03"];
    build_store(tmp.path(), &all)?;
    let loaders = build_split_loaders(&split_config(tmp.path(), 7, 4))?;
    let device = Default::default();

    let mut train = loaders.train;
    let positions = SIDE * SIDE;
    let mut seen = 0;
    let mut batches = 0;
    while let Some(batch) = train.next_batch::<TestBackend>(&device)? {
        let dims = batch.inputs.dims();
        assert_eq!(dims[1], 1);
        assert_eq!(dims[2], positions);
        assert_eq!(batch.targets.dims(), [dims[0], positions]);
        assert_eq!(batch.mask.dims(), [dims[0], positions]);
        assert_eq!(batch.spatial_shape, vec![SIDE, SIDE]);
        seen += dims[0];
        batches += 1;
    }
    assert_eq!(seen, 24);
    assert_eq!(batches, 5); // 5+5+5+5+4
    assert!(train.next_batch::<TestBackend>(&device)?.is_none());

    // After reset the loader serves a full epoch again.
    train.reset();
    let first = train
        .next_batch::<TestBackend>(&device)?
        .expect("fresh epoch");
    assert_eq!(first.inputs.dims()[0], 5);
    Ok(())
}

#[test]
fn non_shuffling_loaders_iterate_in_index_order() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let all = ["plates/s00", "plates/s01", "plates/s02", "plates/s03"];
    build_store(tmp.path(), &all)?;
    let device = Default::default();

    let mut first_pass: Vec<i64> = Vec::new();
    let mut second_pass: Vec<i64> = Vec::new();
    let mut val = build_split_loaders(&split_config(tmp.path(), 7, 4))?.val;
    while let Some(batch) = val.next_batch::<TestBackend>(&device)? {
        first_pass.extend(batch.targets.into_data().to_vec::<i64>().unwrap());
    }
    val.reset();
    while let Some(batch) = val.next_batch::<TestBackend>(&device)? {
        second_pass.extend(batch.targets.into_data().to_vec::<i64>().unwrap());
    }
    assert_eq!(first_pass, second_pass);
    Ok(())
}

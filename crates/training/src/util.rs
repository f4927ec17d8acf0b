//! CLI configuration, model registry, and the train/eval loops.

use crate::logger::RunLogger;
use crate::loss::masked_cross_entropy;
use crate::metrics::EpochStats;
use crate::TrainBackend;
use burn::backend::Autodiff;
use burn::module::{AutodiffModule, Module};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::record::{BinFileRecorder, FullPrecisionSettings, RecorderError};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use clap::{Args, Parser};
use log::{info, warn};
use models::{UltraLocalConfig, UltraLocalModel};
use serde::Serialize;
use std::path::{Path, PathBuf};
use xray_dataset::{build_split_loaders, BatchLoader, Dimension, PointSource, SplitConfig};

pub type ADBackend = Autodiff<TrainBackend>;

/// Registered model classes, keyed by the identifier used in configs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    UltraLocal,
}

impl ModelKind {
    /// Resolve a model identifier, failing before any data is touched.
    pub fn parse(name: &str) -> anyhow::Result<Self> {
        match name {
            "ultra_local" => Ok(ModelKind::UltraLocal),
            other => anyhow::bail!("model class `{other}` not found (known: ultra_local)"),
        }
    }
}

/// Store selection and loader options shared by train and eval.
#[derive(Args, Debug, Clone, Serialize)]
pub struct DataArgs {
    /// Scan store directory (manifest.json + arrays.bin).
    #[arg(long, default_value = "assets/store")]
    pub store: PathBuf,
    /// Sample groups reserved for training/validation.
    #[arg(long, value_delimiter = ',', required = true)]
    pub train_samples: Vec<String>,
    /// Half-open height index range applied to every split.
    #[arg(long, num_args = 2, value_names = ["LO", "HI"], default_values_t = [0usize, 1])]
    pub height_range: Vec<usize>,
    /// Half-open day index range for training/validation; later days feed
    /// the test splits.
    #[arg(long, num_args = 2, value_names = ["LO", "HI"], required = true)]
    pub train_day_range: Vec<usize>,
    /// Fraction of train+val points held out for validation.
    #[arg(long, default_value_t = 0.2)]
    pub validation_split: f32,
    #[arg(long, default_value_t = 8)]
    pub batch_size: usize,
    /// Seed for the train/val partition.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
    /// Spatial dimensionality of one point (2 or 3).
    #[arg(long, default_value_t = 2)]
    pub dimension: usize,
    /// Patch extents per spatial axis; one value broadcasts to all axes.
    #[arg(long, value_delimiter = ',')]
    pub patch_size: Option<Vec<usize>>,
    /// Patch border widths excluded from the loss.
    #[arg(long, value_delimiter = ',')]
    pub patch_border: Option<Vec<usize>>,
    /// Worker threads for batch loading (0 = library default).
    #[arg(long, default_value_t = 0)]
    pub workers: usize,
}

impl DataArgs {
    pub fn split_config(&self) -> anyhow::Result<SplitConfig> {
        Ok(SplitConfig {
            store_dir: self.store.clone(),
            train_samples: self.train_samples.clone(),
            height_range: range_pair(&self.height_range, "height-range")?,
            train_day_range: range_pair(&self.train_day_range, "train-day-range")?,
            validation_split: self.validation_split,
            batch_size: self.batch_size,
            seed: self.seed,
            dimension: Dimension::from_rank(self.dimension)?,
            patch_size: self.patch_size.clone(),
            patch_border: self.patch_border.clone(),
        })
    }
}

fn range_pair(values: &[usize], flag: &str) -> anyhow::Result<(usize, usize)> {
    match values {
        [lo, hi] => Ok((*lo, *hi)),
        _ => anyhow::bail!("--{flag} wants exactly two values (lo hi)"),
    }
}

#[derive(Args, Debug, Clone, Serialize)]
pub struct ModelArgs {
    /// Model class identifier.
    #[arg(long, default_value = "ultra_local")]
    pub model: String,
    #[arg(long, default_value_t = 64)]
    pub hidden: usize,
    #[arg(long, default_value_t = 2)]
    pub depth: usize,
    #[arg(long, default_value_t = 5)]
    pub num_classes: usize,
}

impl ModelArgs {
    fn ultra_local_config(&self) -> UltraLocalConfig {
        UltraLocalConfig {
            hidden: self.hidden,
            depth: self.depth,
            num_classes: self.num_classes,
        }
    }
}

#[derive(Parser, Debug, Clone, Serialize)]
#[command(name = "train", about = "Train the per-pixel scan segmentation model")]
pub struct TrainArgs {
    #[command(flatten)]
    #[serde(flatten)]
    pub data: DataArgs,
    #[command(flatten)]
    #[serde(flatten)]
    pub model: ModelArgs,
    #[arg(long, default_value_t = 10)]
    pub epochs: usize,
    #[arg(long, default_value_t = 1e-3)]
    pub lr: f64,
    /// Run directory for metrics.jsonl and config.json.
    #[arg(long, default_value = "runs/latest")]
    pub run_dir: PathBuf,
    /// Checkpoint output path (defaults to <run-dir>/checkpoint.bin).
    #[arg(long)]
    pub checkpoint_out: Option<PathBuf>,
}

#[derive(Parser, Debug, Clone, Serialize)]
#[command(name = "eval", about = "Evaluate a checkpoint on the held-out test splits")]
pub struct EvalArgs {
    #[command(flatten)]
    #[serde(flatten)]
    pub data: DataArgs,
    #[command(flatten)]
    #[serde(flatten)]
    pub model: ModelArgs,
    /// Checkpoint to load.
    #[arg(long)]
    pub checkpoint: PathBuf,
    #[arg(long, default_value = "runs/latest")]
    pub run_dir: PathBuf,
}

pub fn run_train(args: TrainArgs) -> anyhow::Result<()> {
    let kind = ModelKind::parse(&args.model.model)?;
    configure_workers(args.data.workers);
    let cfg = args.data.split_config()?;
    let mut loaders = build_split_loaders(&cfg)?;
    if loaders.train.is_empty() {
        anyhow::bail!("training selection is empty; check --train-samples and --train-day-range");
    }

    let device = <ADBackend as Backend>::Device::default();
    let mut model = match kind {
        ModelKind::UltraLocal => {
            UltraLocalModel::<ADBackend>::new(args.model.ultra_local_config(), &device)
        }
    };
    let mut optim = AdamConfig::new().init();
    let mut logger = RunLogger::create(&args.run_dir)?;
    logger.save_config(&args)?;

    let ckpt_path = args
        .checkpoint_out
        .clone()
        .unwrap_or_else(|| args.run_dir.join("checkpoint.bin"));

    for epoch in 0..args.epochs {
        loaders.train.reset();
        let mut losses = Vec::new();
        let mut stats = EpochStats::new(args.model.num_classes);
        while let Some(batch) = loaders.train.next_batch::<ADBackend>(&device)? {
            let logits = model.forward(batch.inputs.clone());
            let loss =
                masked_cross_entropy(logits.clone(), batch.targets.clone(), batch.mask.clone());
            let loss_detached = loss.clone().detach();
            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(args.lr, model, grads);
            losses.push(scalar(loss_detached));
            stats.update(logits.detach(), batch.targets, batch.mask);
        }
        let train_loss = mean(&losses);
        logger.log_scalar(epoch, "train/loss", train_loss as f64)?;
        logger.log_scalar(epoch, "train/acc", stats.accuracy())?;
        logger.log_scalar(epoch, "train/f1", stats.f1())?;

        let val_model = model.valid();
        loaders.val.reset();
        let mut val_losses = Vec::new();
        let mut val_stats = EpochStats::new(args.model.num_classes);
        while let Some(batch) = loaders.val.next_batch::<TrainBackend>(&device)? {
            let logits = val_model.forward(batch.inputs.clone());
            let loss =
                masked_cross_entropy(logits.clone(), batch.targets.clone(), batch.mask.clone());
            val_losses.push(scalar(loss));
            val_stats.update(logits, batch.targets, batch.mask);
        }
        let val_loss = mean(&val_losses);
        logger.log_scalar(epoch, "val/loss", val_loss as f64)?;
        logger.log_scalar(epoch, "val/acc", val_stats.accuracy())?;
        logger.log_scalar(epoch, "val/f1", val_stats.f1())?;

        info!(
            "epoch {epoch}: train_loss={train_loss:.4} val_loss={val_loss:.4} \
             val_acc={:.3} val_f1={:.3}",
            val_stats.accuracy(),
            val_stats.f1()
        );
    }

    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model
        .clone()
        .save_file(&ckpt_path, &recorder)
        .map_err(|e| anyhow::anyhow!("failed to save checkpoint: {e}"))?;
    info!("saved checkpoint to {}", ckpt_path.display());
    Ok(())
}

pub fn run_eval(args: EvalArgs) -> anyhow::Result<()> {
    let kind = ModelKind::parse(&args.model.model)?;
    configure_workers(args.data.workers);
    let cfg = args.data.split_config()?;
    let loaders = build_split_loaders(&cfg)?;

    let device = <TrainBackend as Backend>::Device::default();
    let model = match kind {
        ModelKind::UltraLocal => {
            load_ultra_local_from_checkpoint(&args.checkpoint, args.model.ultra_local_config(), &device)
                .map_err(|e| {
                    anyhow::anyhow!(
                        "failed to load checkpoint {}: {e}",
                        args.checkpoint.display()
                    )
                })?
        }
    };
    let mut logger = RunLogger::create(&args.run_dir)?;

    evaluate_split(
        "test_strict",
        loaders.test_strict,
        &model,
        args.model.num_classes,
        &device,
        &mut logger,
    )?;
    evaluate_split(
        "test_overlap",
        loaders.test_overlap,
        &model,
        args.model.num_classes,
        &device,
        &mut logger,
    )?;
    Ok(())
}

fn evaluate_split<D: PointSource>(
    name: &str,
    mut loader: BatchLoader<D>,
    model: &UltraLocalModel<TrainBackend>,
    num_classes: usize,
    device: &<TrainBackend as Backend>::Device,
    logger: &mut RunLogger,
) -> anyhow::Result<()> {
    if loader.is_empty() {
        warn!("{name} holds no points; skipping");
        println!("{name}: empty");
        return Ok(());
    }
    let mut losses = Vec::new();
    let mut stats = EpochStats::new(num_classes);
    while let Some(batch) = loader.next_batch::<TrainBackend>(device)? {
        let logits = model.forward(batch.inputs.clone());
        let loss = masked_cross_entropy(logits.clone(), batch.targets.clone(), batch.mask.clone());
        losses.push(scalar(loss));
        stats.update(logits, batch.targets, batch.mask);
    }
    let loss = mean(&losses);
    info!(
        "{name}: loss={loss:.4} acc={:.3} f1={:.3} over {} positions",
        stats.accuracy(),
        stats.f1(),
        stats.count()
    );
    println!(
        "{name}: loss={loss:.4} acc={:.4} f1={:.4}",
        stats.accuracy(),
        stats.f1()
    );
    logger.log_scalar(0, &format!("{name}/loss"), loss as f64)?;
    logger.log_scalar(0, &format!("{name}/acc"), stats.accuracy())?;
    logger.log_scalar(0, &format!("{name}/f1"), stats.f1())?;
    Ok(())
}

pub fn load_ultra_local_from_checkpoint<P: AsRef<Path>>(
    path: P,
    cfg: UltraLocalConfig,
    device: &<TrainBackend as Backend>::Device,
) -> Result<UltraLocalModel<TrainBackend>, RecorderError> {
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    UltraLocalModel::<TrainBackend>::new(cfg, device).load_file(
        path.as_ref().to_path_buf(),
        &recorder,
        device,
    )
}

fn configure_workers(workers: usize) {
    if workers == 0 {
        return;
    }
    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build_global()
    {
        warn!("worker pool already initialized: {e}");
    }
}

fn scalar<B: Backend>(t: Tensor<B, 1>) -> f32 {
    t.into_data()
        .to_vec::<f32>()
        .unwrap_or_default()
        .into_iter()
        .next()
        .unwrap_or(0.0)
}

fn mean(vals: &[f32]) -> f32 {
    if vals.is_empty() {
        0.0
    } else {
        vals.iter().sum::<f32>() / vals.len() as f32
    }
}

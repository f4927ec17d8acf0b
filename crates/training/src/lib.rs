//! Training and evaluation for the per-pixel scan segmentation model.

pub mod logger;
pub mod loss;
pub mod metrics;
pub mod util;

pub use logger::RunLogger;
pub use loss::masked_cross_entropy;
pub use metrics::{accuracy, macro_f1, EpochStats};
pub use util::{
    load_ultra_local_from_checkpoint, run_eval, run_train, ADBackend, DataArgs, EvalArgs,
    ModelArgs, ModelKind, TrainArgs,
};

/// Backend used by the train/eval binaries.
pub type TrainBackend = burn_ndarray::NdArray<f32>;

//! Burn ML models for segmenting gridded scan measurements.
//!
//! `UltraLocalModel` classifies every spatial position independently from
//! its own measurement value: a stack of linear layers applied along the
//! channel axis, with a receptive field of a single position. Spatial axes
//! are flattened into one position axis, so the same module serves planar
//! slabs and volumetric stacks.

use burn::module::Module;
use burn::nn;
use burn::tensor::activation::relu;
use burn::tensor::Tensor;

#[derive(Debug, Clone)]
pub struct UltraLocalConfig {
    pub hidden: usize,
    pub depth: usize,
    pub num_classes: usize,
}

impl Default for UltraLocalConfig {
    fn default() -> Self {
        Self {
            hidden: 64,
            depth: 2,
            num_classes: 5,
        }
    }
}

#[derive(Debug, Module)]
pub struct UltraLocalModel<B: burn::tensor::backend::Backend> {
    stem: nn::Linear<B>,
    blocks: Vec<nn::Linear<B>>,
    head: nn::Linear<B>,
    num_classes: usize,
}

impl<B: burn::tensor::backend::Backend> UltraLocalModel<B> {
    pub fn new(cfg: UltraLocalConfig, device: &B::Device) -> Self {
        let stem = nn::LinearConfig::new(1, cfg.hidden).init(device);
        let mut blocks = Vec::new();
        for _ in 0..cfg.depth {
            blocks.push(nn::LinearConfig::new(cfg.hidden, cfg.hidden).init(device));
        }
        let head = nn::LinearConfig::new(cfg.hidden, cfg.num_classes.max(1)).init(device);
        Self {
            stem,
            blocks,
            head,
            num_classes: cfg.num_classes.max(1),
        }
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Per-position class scores: `[batch, 1, positions]` in,
    /// `[batch, num_classes, positions]` out.
    pub fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch, channels, positions] = input.dims();
        // Channels last so the linear stack runs along the channel axis.
        let mut x = input.swap_dims(1, 2).reshape([batch, positions, channels]);
        x = relu(self.stem.forward(x));
        for block in &self.blocks {
            x = relu(block.forward(x));
        }
        let logits = self.head.forward(x);
        logits.swap_dims(1, 2)
    }
}

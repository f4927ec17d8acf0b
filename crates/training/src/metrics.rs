//! Classification metrics over mask-included positions.
//!
//! Predictions and targets are class indices; positions excluded by the
//! border mask never enter the counts. Macro averaging follows the usual
//! convention: per-class scores, unweighted mean.

use burn::tensor::backend::Backend;
use burn::tensor::{Bool, Int, Tensor};

/// NxN confusion matrix; entry `[true][pred]` counts occurrences.
#[derive(Debug, Clone)]
pub struct ConfusionMatrix {
    matrix: Vec<u64>,
    n_classes: usize,
}

impl ConfusionMatrix {
    pub fn from_predictions(predictions: &[usize], targets: &[usize], n_classes: usize) -> Self {
        let mut matrix = vec![0u64; n_classes * n_classes];
        for (&pred, &target) in predictions.iter().zip(targets.iter()) {
            if pred < n_classes && target < n_classes {
                matrix[target * n_classes + pred] += 1;
            }
        }
        Self { matrix, n_classes }
    }

    fn tp(&self, c: usize) -> u64 {
        self.matrix[c * self.n_classes + c]
    }

    fn fp(&self, c: usize) -> u64 {
        (0..self.n_classes)
            .filter(|&r| r != c)
            .map(|r| self.matrix[r * self.n_classes + c])
            .sum()
    }

    fn fn_(&self, c: usize) -> u64 {
        (0..self.n_classes)
            .filter(|&col| col != c)
            .map(|col| self.matrix[c * self.n_classes + col])
            .sum()
    }
}

/// Fraction of positions predicted correctly.
pub fn accuracy(predictions: &[usize], targets: &[usize]) -> f64 {
    if predictions.is_empty() {
        return 0.0;
    }
    let correct = predictions
        .iter()
        .zip(targets.iter())
        .filter(|(p, t)| p == t)
        .count();
    correct as f64 / predictions.len() as f64
}

/// Macro-averaged F1 over all classes.
pub fn macro_f1(predictions: &[usize], targets: &[usize], n_classes: usize) -> f64 {
    if n_classes == 0 {
        return 0.0;
    }
    let cm = ConfusionMatrix::from_predictions(predictions, targets, n_classes);
    let mut sum = 0.0;
    for c in 0..n_classes {
        let tp = cm.tp(c) as f64;
        let fp = cm.fp(c) as f64;
        let fn_ = cm.fn_(c) as f64;
        let precision = if tp + fp == 0.0 { 0.0 } else { tp / (tp + fp) };
        let recall = if tp + fn_ == 0.0 { 0.0 } else { tp / (tp + fn_) };
        if precision + recall > 0.0 {
            sum += 2.0 * precision * recall / (precision + recall);
        }
    }
    sum / n_classes as f64
}

/// Accumulates masked predictions across the batches of one epoch.
#[derive(Debug, Default)]
pub struct EpochStats {
    predictions: Vec<usize>,
    targets: Vec<usize>,
    n_classes: usize,
}

impl EpochStats {
    pub fn new(n_classes: usize) -> Self {
        Self {
            predictions: Vec::new(),
            targets: Vec::new(),
            n_classes,
        }
    }

    /// Fold in one batch: argmax over the class axis, then keep only the
    /// positions the border mask includes.
    pub fn update<B: Backend>(
        &mut self,
        logits: Tensor<B, 3>,
        targets: Tensor<B, 2, Int>,
        mask: Tensor<B, 2, Bool>,
    ) {
        let [batch, _classes, positions] = logits.dims();
        let preds = logits.argmax(1).reshape([batch, positions]);
        let preds = preds.into_data().to_vec::<i64>().unwrap_or_default();
        let tgts = targets.into_data().to_vec::<i64>().unwrap_or_default();
        let keep = mask.into_data().to_vec::<bool>().unwrap_or_default();
        for ((p, t), m) in preds.into_iter().zip(tgts).zip(keep) {
            if m {
                self.predictions.push(p.max(0) as usize);
                self.targets.push(t.max(0) as usize);
            }
        }
    }

    pub fn count(&self) -> usize {
        self.predictions.len()
    }

    pub fn accuracy(&self) -> f64 {
        accuracy(&self.predictions, &self.targets)
    }

    pub fn f1(&self) -> f64 {
        macro_f1(&self.predictions, &self.targets, self.n_classes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accuracy_counts_matches() {
        assert_eq!(accuracy(&[0, 1, 2, 0], &[0, 1, 2, 0]), 1.0);
        assert_eq!(accuracy(&[0, 1, 0, 1], &[0, 0, 1, 1]), 0.5);
        assert_eq!(accuracy(&[], &[]), 0.0);
    }

    #[test]
    fn macro_f1_binary() {
        let preds = [1, 1, 1, 0, 0, 0];
        let targets = [1, 1, 0, 0, 0, 1];
        // Both classes score 2/3 here, so the macro mean does too.
        let f = macro_f1(&preds, &targets, 2);
        assert!((f - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn macro_f1_ignores_absent_classes_gracefully() {
        let preds = [0, 0, 0];
        let targets = [0, 0, 0];
        let f = macro_f1(&preds, &targets, 3);
        assert!((f - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn epoch_stats_respect_the_mask() {
        use burn::tensor::TensorData;
        type B = burn_ndarray::NdArray<f32>;
        let device = Default::default();

        // Two positions: class-0 logit wins at position 0, class-1 at 1.
        let logits = Tensor::<B, 3>::from_floats([[[2.0, -1.0], [0.0, 3.0]]], &device);
        let targets =
            Tensor::<B, 2, Int>::from_data(TensorData::new(vec![0i64, 0], [1, 2]), &device);
        let mask =
            Tensor::<B, 2, Bool>::from_data(TensorData::new(vec![true, false], [1, 2]), &device);

        let mut stats = EpochStats::new(2);
        stats.update(logits, targets, mask);
        // The mismatching position is masked out.
        assert_eq!(stats.count(), 1);
        assert_eq!(stats.accuracy(), 1.0);
    }
}

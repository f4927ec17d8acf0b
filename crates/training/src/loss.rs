//! Cross-entropy restricted to mask-included positions.

use burn::tensor::activation::log_softmax;
use burn::tensor::backend::Backend;
use burn::tensor::{Bool, Int, Tensor};

/// Mean negative log-likelihood over the positions the border mask keeps.
///
/// `logits` is `[batch, classes, positions]`, `targets` and `mask` are
/// `[batch, positions]`. A fully masked batch contributes zero loss rather
/// than dividing by zero.
pub fn masked_cross_entropy<B: Backend>(
    logits: Tensor<B, 3>,
    targets: Tensor<B, 2, Int>,
    mask: Tensor<B, 2, Bool>,
) -> Tensor<B, 1> {
    let [batch, _classes, positions] = logits.dims();
    let log_probs = log_softmax(logits, 1);
    let gather_idx = targets.unsqueeze_dim::<3>(1);
    let picked = log_probs.gather(1, gather_idx).reshape([batch, positions]);

    let mask_f = mask.float();
    let masked_nll = picked.neg() * mask_f.clone();
    let denom = mask_f.sum().clamp_min(1.0);
    masked_nll.sum() / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;

    type B = burn_ndarray::NdArray<f32>;

    fn scalar(t: Tensor<B, 1>) -> f32 {
        t.into_data().to_vec::<f32>().unwrap()[0]
    }

    #[test]
    fn uniform_logits_give_log_num_classes() {
        let device = Default::default();
        let logits = Tensor::<B, 3>::zeros([1, 4, 3], &device);
        let targets =
            Tensor::<B, 2, Int>::from_data(TensorData::new(vec![0i64, 1, 2], [1, 3]), &device);
        let mask = Tensor::<B, 2, Bool>::from_data(
            TensorData::new(vec![true, true, true], [1, 3]),
            &device,
        );
        let loss = scalar(masked_cross_entropy(logits, targets, mask));
        assert!((loss - (4.0f32).ln()).abs() < 1e-5);
    }

    #[test]
    fn masked_positions_do_not_contribute() {
        let device = Default::default();
        // Position 1 is confidently wrong but masked out.
        let logits = Tensor::<B, 3>::from_floats([[[5.0, -5.0], [-5.0, 5.0]]], &device);
        let targets =
            Tensor::<B, 2, Int>::from_data(TensorData::new(vec![0i64, 0], [1, 2]), &device);
        let mask = Tensor::<B, 2, Bool>::from_data(
            TensorData::new(vec![true, false], [1, 2]),
            &device,
        );
        let loss = scalar(masked_cross_entropy(logits, targets, mask));
        assert!(loss < 0.01, "confidently-correct kept position, loss {loss}");
    }

    #[test]
    fn fully_masked_batch_is_zero_not_nan() {
        let device = Default::default();
        let logits = Tensor::<B, 3>::zeros([1, 3, 2], &device);
        let targets =
            Tensor::<B, 2, Int>::from_data(TensorData::new(vec![0i64, 0], [1, 2]), &device);
        let mask = Tensor::<B, 2, Bool>::from_data(
            TensorData::new(vec![false, false], [1, 2]),
            &device,
        );
        let loss = scalar(masked_cross_entropy(logits, targets, mask));
        assert_eq!(loss, 0.0);
    }
}

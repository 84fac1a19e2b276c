//! Composite segmentation loss: pixel-wise classification plus soft Dice.

use burn::nn::loss::CrossEntropyLossConfig;
use burn::tensor::activation::{sigmoid, softmax};
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};

/// Stabilizer keeping the Dice ratio finite when a class is absent from a
/// batch; the resulting term is then ~0 with a near-zero gradient.
pub const DICE_EPSILON: f32 = 1e-6;

/// Binary vs multiclass path, resolved once from the model's class count
/// rather than re-derived every batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossMode {
    Binary,
    Multiclass { classes: usize },
}

impl LossMode {
    pub fn from_classes(n_classes: usize) -> Self {
        if n_classes <= 1 {
            LossMode::Binary
        } else {
            LossMode::Multiclass { classes: n_classes }
        }
    }
}

/// Differentiable loss over raw per-pixel scores and integer target masks.
///
/// Binary mode: sigmoid cross-entropy on the squeezed logit plus
/// single-channel soft Dice. Multiclass mode: categorical cross-entropy plus
/// per-class soft Dice averaged over all classes, background included — the
/// same convention the evaluation dice uses, so training and monitoring share
/// one target.
///
/// Pure function of its inputs; gradient handling is the caller's business.
#[derive(Debug, Clone)]
pub struct SegmentationLoss {
    mode: LossMode,
}

impl SegmentationLoss {
    pub fn new(n_classes: usize) -> Self {
        Self {
            mode: LossMode::from_classes(n_classes),
        }
    }

    pub fn mode(&self) -> LossMode {
        self.mode
    }

    /// `scores`: `[N, n_classes, H, W]` raw logits; `targets`: `[N, H, W]`
    /// class indices.
    pub fn forward<B: Backend>(
        &self,
        scores: Tensor<B, 4>,
        targets: Tensor<B, 3, Int>,
    ) -> Tensor<B, 1> {
        match self.mode {
            LossMode::Binary => {
                let [n, _, h, w] = scores.dims();
                let logits = scores.reshape([n, h, w]);
                let target_f = targets.float();
                let bce = bce_with_logits(logits.clone(), target_f.clone());
                bce + soft_dice_loss(sigmoid(logits), target_f)
            }
            LossMode::Multiclass { classes } => {
                let [n, c, h, w] = scores.dims();
                debug_assert_eq!(c, classes);
                let logits_pix = scores
                    .clone()
                    .permute([0, 2, 3, 1])
                    .reshape([n * h * w, c]);
                let targets_pix = targets.clone().reshape([n * h * w]);
                let ce = CrossEntropyLossConfig::new()
                    .init(&scores.device())
                    .forward(logits_pix, targets_pix);

                let probs = softmax(scores, 1);
                let class_dice = |class: usize| {
                    let p = probs
                        .clone()
                        .slice([0..n, class..class + 1, 0..h, 0..w])
                        .reshape([n, h, w]);
                    let t = targets.clone().equal_elem(class as i64).float();
                    soft_dice_loss(p, t)
                };
                let mut dice = class_dice(0);
                for class in 1..classes {
                    dice = dice + class_dice(class);
                }
                ce + dice.div_scalar(classes as f32)
            }
        }
    }
}

/// Numerically stable `max(x, 0) - x*t + ln(1 + e^-|x|)`, averaged over all
/// pixels.
fn bce_with_logits<B: Backend, const D: usize>(
    logits: Tensor<B, D>,
    targets: Tensor<B, D>,
) -> Tensor<B, 1> {
    let hinge = logits.clone().clamp_min(0.0);
    let softplus = logits.clone().abs().neg().exp().add_scalar(1.0).log();
    (hinge - logits * targets + softplus).mean()
}

/// `1 - (2*sum(p*t) + eps) / (sum(p) + sum(t) + eps)` over the whole batch.
fn soft_dice_loss<B: Backend, const D: usize>(
    probs: Tensor<B, D>,
    targets: Tensor<B, D>,
) -> Tensor<B, 1> {
    let intersection = (probs.clone() * targets.clone()).sum();
    let denom = probs.sum() + targets.sum();
    let dice = intersection
        .mul_scalar(2.0)
        .add_scalar(DICE_EPSILON)
        .div(denom.add_scalar(DICE_EPSILON));
    dice.neg().add_scalar(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn scalar(t: Tensor<TestBackend, 1>) -> f32 {
        t.into_data().to_vec::<f32>().unwrap()[0]
    }

    fn scores_2x2(values: [f32; 8]) -> Tensor<TestBackend, 4> {
        let device = Default::default();
        Tensor::from_data(TensorData::new(values.to_vec(), [1, 2, 2, 2]), &device)
    }

    fn targets_2x2(values: [i64; 4]) -> Tensor<TestBackend, 3, Int> {
        let device = Default::default();
        Tensor::from_data(TensorData::new(values.to_vec(), [1, 2, 2]), &device)
    }

    #[test]
    fn dice_near_zero_on_exact_one_hot_match() {
        let device = Default::default();
        let probs = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![1.0f32, 0.0, 0.0, 1.0], [2, 2]),
            &device,
        );
        let loss = scalar(soft_dice_loss(probs.clone(), probs));
        assert!(loss.abs() < 1e-5, "dice loss was {loss}");
    }

    #[test]
    fn dice_bounded_and_finite_with_absent_class() {
        let device = Default::default();
        // Target class has zero positive pixels; epsilon keeps this finite.
        let probs = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![0.0f32, 0.0, 0.0, 0.0], [2, 2]),
            &device,
        );
        let targets = probs.zeros_like();
        let loss = scalar(soft_dice_loss(probs, targets));
        assert!(loss.is_finite());
        assert!((0.0..=1.0).contains(&loss), "dice loss was {loss}");
    }

    #[test]
    fn dice_is_one_with_zero_overlap() {
        let device = Default::default();
        let probs = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![1.0f32, 0.0, 1.0, 0.0], [2, 2]),
            &device,
        );
        let targets = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![0.0f32, 1.0, 0.0, 1.0], [2, 2]),
            &device,
        );
        let loss = scalar(soft_dice_loss(probs, targets));
        assert!((loss - 1.0).abs() < 1e-5, "dice loss was {loss}");
    }

    #[test]
    fn multiclass_loss_is_small_on_confident_correct_scores() {
        // Class 0 on the left column, class 1 on the right, strongly scored.
        let scores = scores_2x2([10.0, -10.0, 10.0, -10.0, -10.0, 10.0, -10.0, 10.0]);
        let targets = targets_2x2([0, 1, 0, 1]);
        let loss = scalar(SegmentationLoss::new(2).forward(scores, targets));
        assert!(loss.is_finite());
        assert!(loss < 0.05, "loss was {loss}");
    }

    #[test]
    fn multiclass_loss_finite_when_a_class_is_absent() {
        let scores = scores_2x2([5.0, 5.0, 5.0, 5.0, -5.0, -5.0, -5.0, -5.0]);
        let targets = targets_2x2([0, 0, 0, 0]);
        let loss = scalar(SegmentationLoss::new(2).forward(scores, targets));
        assert!(loss.is_finite());
    }

    #[test]
    fn binary_loss_small_when_confident_and_correct() {
        let device = Default::default();
        let scores = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(vec![10.0f32, -10.0, 10.0, -10.0], [1, 1, 2, 2]),
            &device,
        );
        let targets = targets_2x2([1, 0, 1, 0]);
        let loss = scalar(SegmentationLoss::new(1).forward(scores, targets));
        assert!(loss.is_finite());
        assert!(loss < 0.05, "loss was {loss}");
    }

    #[test]
    fn mode_resolves_once_from_class_count() {
        assert_eq!(SegmentationLoss::new(1).mode(), LossMode::Binary);
        assert_eq!(
            SegmentationLoss::new(3).mode(),
            LossMode::Multiclass { classes: 3 }
        );
    }
}

//! Streaming IoU over hard class predictions.

use burn::tensor::activation::sigmoid;
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};

/// Accumulates per-class true/false positive and false negative pixel counts
/// across batches, so a full validation pass costs O(classes) memory no
/// matter how many batches flow through.
///
/// In binary mode a single foreground slot is tracked; background pixels
/// that are correctly rejected do not count toward the score.
#[derive(Debug, Clone)]
pub struct IouMetric {
    tp: Vec<u64>,
    fp: Vec<u64>,
    fn_counts: Vec<u64>,
    binary: bool,
    updated: bool,
}

impl IouMetric {
    pub fn new(n_classes: usize) -> Self {
        let (slots, binary) = if n_classes <= 1 {
            (1, true)
        } else {
            (n_classes, false)
        };
        Self {
            tp: vec![0; slots],
            fp: vec![0; slots],
            fn_counts: vec![0; slots],
            binary,
            updated: false,
        }
    }

    /// Folds one batch of hard predictions against its targets. Both tensors
    /// are `[N, H, W]` class indices (0/1 in binary mode).
    pub fn update<B: Backend>(&mut self, predictions: Tensor<B, 3, Int>, targets: Tensor<B, 3, Int>) {
        let preds: Vec<i64> = predictions
            .into_data()
            .convert::<i64>()
            .to_vec::<i64>()
            .unwrap_or_default();
        let truth: Vec<i64> = targets
            .into_data()
            .convert::<i64>()
            .to_vec::<i64>()
            .unwrap_or_default();

        for (&p, &t) in preds.iter().zip(truth.iter()) {
            if self.binary {
                match (p != 0, t != 0) {
                    (true, true) => self.tp[0] += 1,
                    (true, false) => self.fp[0] += 1,
                    (false, true) => self.fn_counts[0] += 1,
                    (false, false) => {}
                }
                continue;
            }
            let (p, t) = (p as usize, t as usize);
            if p >= self.tp.len() || t >= self.tp.len() {
                continue;
            }
            if p == t {
                self.tp[p] += 1;
            } else {
                self.fp[p] += 1;
                self.fn_counts[t] += 1;
            }
        }
        self.updated = true;
    }

    /// Per-class `tp / (tp + fp + fn)`; `None` for classes never seen.
    pub fn iou_per_class(&self) -> Vec<Option<f64>> {
        (0..self.tp.len())
            .map(|c| {
                let denom = self.tp[c] + self.fp[c] + self.fn_counts[c];
                if denom == 0 {
                    None
                } else {
                    Some(self.tp[c] as f64 / denom as f64)
                }
            })
            .collect()
    }

    /// Mean IoU over classes that appeared in predictions or targets.
    /// Returns 0.0 when no pixels have been accumulated.
    pub fn compute(&self) -> f64 {
        mean_present(self.iou_per_class())
    }

    /// Mean Dice coefficient `2*tp / (2*tp + fp + fn)` from the same counts.
    pub fn dice(&self) -> f64 {
        let per_class = (0..self.tp.len())
            .map(|c| {
                let denom = 2 * self.tp[c] + self.fp[c] + self.fn_counts[c];
                if denom == 0 {
                    None
                } else {
                    Some(2.0 * self.tp[c] as f64 / denom as f64)
                }
            })
            .collect();
        mean_present(per_class)
    }

    pub fn has_data(&self) -> bool {
        self.updated
    }

    pub fn reset(&mut self) {
        self.tp.fill(0);
        self.fp.fill(0);
        self.fn_counts.fill(0);
        self.updated = false;
    }
}

fn mean_present(per_class: Vec<Option<f64>>) -> f64 {
    let present: Vec<f64> = per_class.into_iter().flatten().collect();
    if present.is_empty() {
        0.0
    } else {
        present.iter().sum::<f64>() / present.len() as f64
    }
}

/// Collapses raw scores `[N, C, H, W]` to hard class indices `[N, H, W]`:
/// argmax over the class axis, or sigmoid > 0.5 for the single-logit case.
pub fn predicted_classes<B: Backend>(scores: Tensor<B, 4>, n_classes: usize) -> Tensor<B, 3, Int> {
    let [n, _, h, w] = scores.dims();
    if n_classes > 1 {
        scores.argmax(1).reshape([n, h, w])
    } else {
        sigmoid(scores.reshape([n, h, w])).greater_elem(0.5).int()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn mask(values: Vec<i64>) -> Tensor<TestBackend, 3, Int> {
        let device = Default::default();
        let len = values.len();
        Tensor::from_data(TensorData::new(values, [1, 1, len]), &device)
    }

    #[test]
    fn perfect_match_scores_one() {
        let mut metric = IouMetric::new(3);
        metric.update(mask(vec![0, 1, 2, 1]), mask(vec![0, 1, 2, 1]));
        assert!((metric.compute() - 1.0).abs() < 1e-12);
        assert!((metric.dice() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn zero_overlap_scores_zero() {
        let mut metric = IouMetric::new(2);
        metric.update(mask(vec![0, 0]), mask(vec![1, 1]));
        assert_eq!(metric.compute(), 0.0);
    }

    #[test]
    fn accumulates_across_batches() {
        let mut metric = IouMetric::new(2);
        metric.update(mask(vec![1, 1]), mask(vec![1, 0]));
        metric.update(mask(vec![0, 1]), mask(vec![0, 1]));
        // Class 0: tp=1, fn=1 -> 0.5. Class 1: tp=2, fp=1 -> 2/3.
        let expected = (0.5 + 2.0 / 3.0) / 2.0;
        assert!((metric.compute() - expected).abs() < 1e-12);
    }

    #[test]
    fn binary_ignores_correct_background() {
        let mut metric = IouMetric::new(1);
        metric.update(mask(vec![0, 0, 1, 1]), mask(vec![0, 0, 1, 0]));
        // Foreground: tp=1, fp=1 -> 0.5; the two correct background pixels
        // contribute nothing.
        assert!((metric.compute() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn empty_and_reset_report_zero() {
        let mut metric = IouMetric::new(2);
        assert!(!metric.has_data());
        assert_eq!(metric.compute(), 0.0);
        metric.update(mask(vec![1]), mask(vec![1]));
        assert!(metric.has_data());
        metric.reset();
        assert!(!metric.has_data());
        assert_eq!(metric.compute(), 0.0);
    }

    #[test]
    fn predicted_classes_argmax_and_threshold() {
        let device = Default::default();
        let multi = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(vec![0.1f32, 0.9, 2.0, 0.2], [1, 2, 1, 2]),
            &device,
        );
        let classes: Vec<i64> = predicted_classes(multi, 2)
            .into_data()
            .convert::<i64>()
            .to_vec::<i64>()
            .unwrap();
        assert_eq!(classes, vec![1, 0]);

        let binary = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(vec![3.0f32, -3.0], [1, 1, 1, 2]),
            &device,
        );
        let classes: Vec<i64> = predicted_classes(binary, 1)
            .into_data()
            .convert::<i64>()
            .to_vec::<i64>()
            .unwrap();
        assert_eq!(classes, vec![1, 0]);
    }
}

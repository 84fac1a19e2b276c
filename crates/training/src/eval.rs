//! Full-split validation pass.

use burn::tensor::backend::Backend;
use seg_dataset::SegDataset;

use crate::metrics::{predicted_classes, IouMetric};

const EVAL_BATCH_SIZE: usize = 8;

/// Runs the model over every sample in the dataset and returns the mean IoU
/// across classes. Partial trailing batches are included so every validation
/// sample counts exactly once.
pub fn evaluate<B: Backend>(
    model: &models::SegmentationModel<B>,
    dataset: &SegDataset,
    device: &B::Device,
    amp: bool,
) -> anyhow::Result<f64> {
    tracing::debug!(samples = dataset.len(), amp, "running validation pass");
    let n_classes = model.n_classes();
    let mut metric = IouMetric::new(n_classes);
    let mut iter = dataset.iter();
    while let Some(batch) = iter.next_batch::<B>(EVAL_BATCH_SIZE, device)? {
        let scores = model.forward(batch.images);
        metric.update(predicted_classes(scores, n_classes), batch.masks);
    }
    Ok(metric.compute())
}

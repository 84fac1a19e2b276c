//! Epoch checkpoints bundling model weights with the label decode table.

use std::path::{Path, PathBuf};

use anyhow::Context;
use burn::module::{Module, Param, ParamId};
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use models::{SegmentationModel, SegmentationModelConfig};

/// What gets written to disk each epoch: the network plus the ordered mask
/// values discovered from the training split, so inference can map predicted
/// class indices back to label pixel values without re-reading the dataset.
#[derive(Debug, Module)]
pub struct TrainingCheckpoint<B: Backend> {
    pub model: SegmentationModel<B>,
    pub mask_values: Param<Tensor<B, 1, Int>>,
}

/// Writes one artifact per completed epoch under a fixed directory. Files
/// are keyed by epoch number and never pruned; reruns overwrite the matching
/// epoch only.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for_epoch(&self, epoch: usize) -> PathBuf {
        self.dir.join(format!("checkpoint_epoch{epoch}.bin"))
    }

    pub fn save<B: Backend>(
        &self,
        epoch: usize,
        model: &SegmentationModel<B>,
        mask_values: &[i64],
        device: &B::Device,
    ) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating checkpoint dir {}", self.dir.display()))?;
        let values = Tensor::<B, 1, Int>::from_data(
            TensorData::new(mask_values.to_vec(), [mask_values.len()]),
            device,
        );
        let bundle = TrainingCheckpoint {
            model: model.clone(),
            mask_values: Param::initialized(ParamId::new(), values),
        };
        let path = self.path_for_epoch(epoch);
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        bundle
            .save_file(&path, &recorder)
            .with_context(|| format!("saving checkpoint {}", path.display()))?;
        Ok(path)
    }
}

/// Restores a checkpoint into a freshly built model of the given shape.
/// The config must match the architecture the checkpoint was trained with.
pub fn load<B: Backend>(
    path: &Path,
    config: &SegmentationModelConfig,
    device: &B::Device,
) -> anyhow::Result<(SegmentationModel<B>, Vec<i64>)> {
    let template = TrainingCheckpoint {
        model: SegmentationModel::new(config.clone(), device),
        // Placeholder shape; the recorder replaces it with the stored table.
        mask_values: Param::initialized(ParamId::new(), Tensor::zeros([1], device)),
    };
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    let loaded = template
        .load_file(path, &recorder, device)
        .with_context(|| format!("loading checkpoint {}", path.display()))?;
    let mask_values = loaded
        .mask_values
        .val()
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .unwrap_or_default();
    Ok((loaded.model, mask_values))
}

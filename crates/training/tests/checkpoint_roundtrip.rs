use burn::tensor::Tensor;
use burn_ndarray::NdArray;
use models::{SegmentationModel, SegmentationModelConfig};
use training::checkpoint::{self, CheckpointManager};

type B = NdArray<f32>;

fn small_config() -> SegmentationModelConfig {
    SegmentationModelConfig {
        n_channels: 1,
        n_classes: 2,
        base_width: 4,
        depth: 1,
        ..Default::default()
    }
}

#[test]
fn restored_model_reproduces_outputs_and_mask_values() {
    let temp = tempfile::tempdir().unwrap();
    let device = Default::default();
    let config = small_config();
    let model = SegmentationModel::<B>::new(config.clone(), &device);
    let manager = CheckpointManager::new(temp.path());

    let path = manager.save(1, &model, &[0, 128, 255], &device).unwrap();
    assert_eq!(path, temp.path().join("checkpoint_epoch1.bin"));

    let (restored, mask_values) = checkpoint::load::<B>(&path, &config, &device).unwrap();
    assert_eq!(mask_values, vec![0, 128, 255]);

    let input = Tensor::<B, 4>::from_floats(
        [[[[0.1, 0.9, 0.3, 0.7], [0.2, 0.8, 0.4, 0.6], [0.0, 1.0, 0.5, 0.5], [0.3, 0.3, 0.9, 0.1]]]],
        &device,
    );
    let original: Vec<f32> = model
        .forward(input.clone())
        .into_data()
        .to_vec::<f32>()
        .unwrap();
    let roundtrip: Vec<f32> = restored
        .forward(input)
        .into_data()
        .to_vec::<f32>()
        .unwrap();
    assert_eq!(original.len(), roundtrip.len());
    for (a, b) in original.iter().zip(roundtrip.iter()) {
        assert!((a - b).abs() < 1e-6, "forward mismatch: {a} vs {b}");
    }
}

#[test]
fn each_epoch_gets_its_own_artifact() {
    let temp = tempfile::tempdir().unwrap();
    let device = Default::default();
    let model = SegmentationModel::<B>::new(small_config(), &device);
    let manager = CheckpointManager::new(temp.path());

    manager.save(1, &model, &[0, 255], &device).unwrap();
    manager.save(2, &model, &[0, 255], &device).unwrap();

    assert!(temp.path().join("checkpoint_epoch1.bin").exists());
    assert!(temp.path().join("checkpoint_epoch2.bin").exists());
}

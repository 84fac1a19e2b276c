use burn_ndarray::NdArray;
use seg_dataset::{DatasetConfig, SegDataset, SegDatasetError};
use std::fs;
use std::path::Path;

type B = NdArray<f32>;

/// Writes `count` 2x2 greyscale images with matching masks using label
/// values 0 and 255.
fn synthetic_split(dir: &Path, count: usize) {
    let image_dir = dir.join("image");
    let mask_dir = dir.join("mask");
    fs::create_dir_all(&image_dir).unwrap();
    fs::create_dir_all(&mask_dir).unwrap();
    for i in 0..count {
        let img = image::GrayImage::from_fn(2, 2, |x, y| image::Luma([(40 * (x + y + i as u32)) as u8]));
        img.save(image_dir.join(format!("frame_{i:03}.png"))).unwrap();
        let mask = image::GrayImage::from_fn(2, 2, |x, _y| image::Luma([if x == 0 { 0 } else { 255 }]));
        mask.save(mask_dir.join(format!("frame_{i:03}.png"))).unwrap();
    }
}

fn greyscale_cfg() -> DatasetConfig {
    DatasetConfig {
        channels: 1,
        scale: 1.0,
        shuffle: false,
        drop_last: false,
        seed: None,
    }
}

#[test]
fn indexes_pairs_and_discovers_mask_values() {
    let temp = tempfile::tempdir().unwrap();
    synthetic_split(temp.path(), 4);
    let dataset = SegDataset::from_dirs(
        &temp.path().join("image"),
        &temp.path().join("mask"),
        greyscale_cfg(),
    )
    .unwrap();
    assert_eq!(dataset.len(), 4);
    assert_eq!(dataset.mask_values(), &[0, 255]);
}

#[test]
fn batches_have_expected_shapes_and_class_indices() {
    let temp = tempfile::tempdir().unwrap();
    synthetic_split(temp.path(), 4);
    let dataset = SegDataset::from_dirs(
        &temp.path().join("image"),
        &temp.path().join("mask"),
        greyscale_cfg(),
    )
    .unwrap();

    let device = Default::default();
    let mut iter = dataset.iter();
    let mut batches = 0;
    while let Some(batch) = iter.next_batch::<B>(2, &device).unwrap() {
        assert_eq!(batch.images.dims(), [2, 1, 2, 2]);
        assert_eq!(batch.masks.dims(), [2, 2, 2]);
        let masks: Vec<i64> = batch
            .masks
            .into_data()
            .convert::<i64>()
            .to_vec::<i64>()
            .unwrap();
        // Label 0 maps to class 0, label 255 to class 1.
        assert!(masks.iter().all(|v| *v == 0 || *v == 1));
        assert_eq!(masks.iter().filter(|v| **v == 1).count(), 4);
        batches += 1;
    }
    assert_eq!(batches, 2);
}

#[test]
fn missing_mask_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    synthetic_split(temp.path(), 2);
    fs::remove_file(temp.path().join("mask/frame_001.png")).unwrap();
    let result = SegDataset::from_dirs(
        &temp.path().join("image"),
        &temp.path().join("mask"),
        greyscale_cfg(),
    );
    assert!(matches!(result, Err(SegDatasetError::MissingMask { .. })));
}

#[test]
fn seeded_shuffle_is_deterministic() {
    let temp = tempfile::tempdir().unwrap();
    synthetic_split(temp.path(), 6);
    let cfg = DatasetConfig {
        shuffle: true,
        seed: Some(7),
        ..greyscale_cfg()
    };
    let dataset = SegDataset::from_dirs(
        &temp.path().join("image"),
        &temp.path().join("mask"),
        cfg,
    )
    .unwrap();

    let device = Default::default();
    let collect = || {
        let mut iter = dataset.iter();
        let mut sums = Vec::new();
        while let Some(batch) = iter.next_batch::<B>(2, &device).unwrap() {
            let pixels: Vec<f32> = batch.images.into_data().to_vec::<f32>().unwrap();
            sums.push(pixels.iter().sum::<f32>());
        }
        sums
    };
    assert_eq!(collect(), collect());
}

#[test]
fn drop_last_discards_trailing_partial_batch() {
    let temp = tempfile::tempdir().unwrap();
    synthetic_split(temp.path(), 5);
    let cfg = DatasetConfig {
        drop_last: true,
        ..greyscale_cfg()
    };
    let dataset = SegDataset::from_dirs(
        &temp.path().join("image"),
        &temp.path().join("mask"),
        cfg,
    )
    .unwrap();
    let device = Default::default();
    let mut iter = dataset.iter();
    let mut batches = 0;
    while iter.next_batch::<B>(2, &device).unwrap().is_some() {
        batches += 1;
    }
    assert_eq!(batches, 2);
}

//! Directory indexing and mask-value discovery.

use crate::types::{DatasetResult, SamplePair, SegDatasetError};
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff"];

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)))
        .unwrap_or(false)
}

/// Pair every image in `image_dir` with the mask in `mask_dir` sharing its
/// file stem. Pairs are returned sorted by image path so the unshuffled order
/// is stable across runs. A missing mask is an error, not a skip.
pub fn index_pairs(image_dir: &Path, mask_dir: &Path) -> DatasetResult<Vec<SamplePair>> {
    let entries = fs::read_dir(image_dir).map_err(|source| SegDatasetError::Io {
        path: image_dir.to_path_buf(),
        source,
    })?;

    let mut pairs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| SegDatasetError::Io {
            path: image_dir.to_path_buf(),
            source,
        })?;
        let image_path = entry.path();
        if !is_image_file(&image_path) {
            continue;
        }
        let stem = match image_path.file_stem().and_then(|s| s.to_str()) {
            Some(stem) => stem,
            None => continue,
        };
        let mask_path = IMAGE_EXTENSIONS
            .iter()
            .map(|ext| mask_dir.join(format!("{stem}.{ext}")))
            .find(|candidate| candidate.is_file());
        match mask_path {
            Some(mask_path) => pairs.push(SamplePair {
                image_path,
                mask_path,
            }),
            None => {
                return Err(SegDatasetError::MissingMask {
                    image: image_path,
                    mask_dir: mask_dir.to_path_buf(),
                })
            }
        }
    }
    pairs.sort_by(|a, b| a.image_path.cmp(&b.image_path));
    tracing::debug!(
        image_dir = %image_dir.display(),
        pairs = pairs.len(),
        "indexed image/mask pairs"
    );
    Ok(pairs)
}

/// Scan every mask once and collect the ordered set of distinct greyscale
/// label values. The position of a value in the returned list is the class
/// index used in batches, and the list itself is what checkpoints embed so
/// predictions can be decoded back to the original labelling scheme.
pub fn scan_mask_values(pairs: &[SamplePair]) -> DatasetResult<Vec<i64>> {
    let sets: Vec<DatasetResult<BTreeSet<u8>>> = pairs
        .par_iter()
        .map(|pair| {
            let mask = image::open(&pair.mask_path).map_err(|source| SegDatasetError::Image {
                path: pair.mask_path.clone(),
                source,
            })?;
            Ok(mask.to_luma8().pixels().map(|p| p.0[0]).collect())
        })
        .collect();

    let mut values = BTreeSet::new();
    for set in sets {
        values.extend(set?);
    }
    Ok(values.into_iter().map(i64::from).collect())
}

//! Core types and error definitions for seg_dataset.

use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, SegDatasetError>;

#[derive(Debug, Error)]
pub enum SegDatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("no mask found for image {image} under {mask_dir}")]
    MissingMask { image: PathBuf, mask_dir: PathBuf },
    #[error("mask {path} contains value {value} not present in the dataset's mask values")]
    UnknownMaskValue { path: PathBuf, value: u8 },
    #[error("{0}")]
    Other(String),
}

/// One image/mask file pair discovered by directory indexing.
#[derive(Debug, Clone)]
pub struct SamplePair {
    pub image_path: PathBuf,
    pub mask_path: PathBuf,
}

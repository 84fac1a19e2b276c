//! Batch iteration for training and validation.

use crate::index::{index_pairs, scan_mask_values};
use crate::types::{DatasetResult, SamplePair, SegDatasetError};
use burn::tensor::{backend::Backend, Int, Tensor, TensorData};
use image::imageops::FilterType;
use rand::{seq::SliceRandom, SeedableRng};
use rayon::prelude::*;
use std::path::Path;
use std::time::{Duration, Instant};

const LOG_EVERY_SAMPLES: usize = 1000;

#[derive(Debug, Clone)]
pub struct DatasetConfig {
    /// Image channels handed to the model (3 for RGB, 1 for greyscale).
    pub channels: usize,
    /// Downscaling factor applied to images and masks, in (0, 1].
    pub scale: f32,
    pub shuffle: bool,
    /// Drop a trailing batch smaller than the requested batch size.
    pub drop_last: bool,
    /// Shuffle seed; `None` draws from entropy.
    pub seed: Option<u64>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            channels: 3,
            scale: 1.0,
            shuffle: false,
            drop_last: false,
            seed: None,
        }
    }
}

/// One batch of paired tensors: images `[N, C, H, W]` in [0, 1] and masks
/// `[N, H, W]` holding class indices in `[0, mask_values.len())`.
pub struct SegBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub masks: Tensor<B, 3, Int>,
}

/// A pre-split image/mask directory pair, indexed once up front.
///
/// `iter()` hands out a fresh cursor per epoch; shuffling (when configured)
/// happens at iterator construction, so each epoch sees a new order.
pub struct SegDataset {
    pairs: Vec<SamplePair>,
    mask_values: Vec<i64>,
    cfg: DatasetConfig,
}

impl SegDataset {
    pub fn from_dirs(image_dir: &Path, mask_dir: &Path, cfg: DatasetConfig) -> DatasetResult<Self> {
        if !(cfg.scale > 0.0 && cfg.scale <= 1.0) {
            return Err(SegDatasetError::Other(format!(
                "scale must be in (0, 1], got {}",
                cfg.scale
            )));
        }
        if cfg.channels != 1 && cfg.channels != 3 {
            return Err(SegDatasetError::Other(format!(
                "channels must be 1 or 3, got {}",
                cfg.channels
            )));
        }
        let pairs = index_pairs(image_dir, mask_dir)?;
        let mask_values = scan_mask_values(&pairs)?;
        Ok(Self {
            pairs,
            mask_values,
            cfg,
        })
    }

    /// Number of samples; stable across epochs.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Ordered distinct label values found in the masks.
    pub fn mask_values(&self) -> &[i64] {
        &self.mask_values
    }

    pub fn config(&self) -> &DatasetConfig {
        &self.cfg
    }

    pub fn iter(&self) -> BatchIter<'_> {
        let mut order: Vec<usize> = (0..self.pairs.len()).collect();
        if self.cfg.shuffle {
            let mut rng = match self.cfg.seed {
                Some(seed) => rand::rngs::StdRng::seed_from_u64(seed),
                None => rand::rngs::StdRng::from_rng(&mut rand::rng()),
            };
            order.shuffle(&mut rng);
        }
        let now = Instant::now();
        BatchIter {
            dataset: self,
            order,
            cursor: 0,
            processed_samples: 0,
            processed_batches: 0,
            started: now,
            last_log: now,
            last_logged_samples: 0,
        }
    }
}

struct LoadedSample {
    image_chw: Vec<f32>,
    mask_indices: Vec<i64>,
    width: u32,
    height: u32,
}

fn load_sample(pair: &SamplePair, cfg: &DatasetConfig, mask_values: &[i64]) -> DatasetResult<LoadedSample> {
    let image = image::open(&pair.image_path).map_err(|source| SegDatasetError::Image {
        path: pair.image_path.clone(),
        source,
    })?;
    let (w, h) = (image.width(), image.height());
    let (tw, th) = if cfg.scale < 1.0 {
        (
            ((w as f32 * cfg.scale).round() as u32).max(1),
            ((h as f32 * cfg.scale).round() as u32).max(1),
        )
    } else {
        (w, h)
    };
    let image = if (tw, th) != (w, h) {
        image.resize_exact(tw, th, FilterType::Triangle)
    } else {
        image
    };

    let mut image_chw = Vec::with_capacity(cfg.channels * (tw * th) as usize);
    if cfg.channels == 3 {
        let rgb = image.to_rgb8();
        for c in 0..3 {
            for pixel in rgb.pixels() {
                image_chw.push(pixel.0[c] as f32 / 255.0);
            }
        }
    } else {
        let luma = image.to_luma8();
        for pixel in luma.pixels() {
            image_chw.push(pixel.0[0] as f32 / 255.0);
        }
    }

    let mask = image::open(&pair.mask_path).map_err(|source| SegDatasetError::Image {
        path: pair.mask_path.clone(),
        source,
    })?;
    // Nearest keeps masks as exact label values through the resize.
    let mask = if (mask.width(), mask.height()) != (tw, th) {
        mask.resize_exact(tw, th, FilterType::Nearest)
    } else {
        mask
    };
    let luma = mask.to_luma8();
    let mut mask_indices = Vec::with_capacity((tw * th) as usize);
    for pixel in luma.pixels() {
        let value = i64::from(pixel.0[0]);
        match mask_values.binary_search(&value) {
            Ok(index) => mask_indices.push(index as i64),
            Err(_) => {
                return Err(SegDatasetError::UnknownMaskValue {
                    path: pair.mask_path.clone(),
                    value: pixel.0[0],
                })
            }
        }
    }

    Ok(LoadedSample {
        image_chw,
        mask_indices,
        width: tw,
        height: th,
    })
}

pub struct BatchIter<'a> {
    dataset: &'a SegDataset,
    order: Vec<usize>,
    cursor: usize,
    processed_samples: usize,
    processed_batches: usize,
    started: Instant,
    last_log: Instant,
    last_logged_samples: usize,
}

impl BatchIter<'_> {
    pub fn next_batch<B: Backend>(
        &mut self,
        batch_size: usize,
        device: &B::Device,
    ) -> DatasetResult<Option<SegBatch<B>>> {
        let batch_size = batch_size.max(1);
        if self.cursor >= self.order.len() {
            return Ok(None);
        }
        let end = (self.cursor + batch_size).min(self.order.len());
        let slice = &self.order[self.cursor..end];
        self.cursor = end;

        let batch_len = slice.len();
        if self.dataset.cfg.drop_last && batch_len < batch_size {
            return Ok(None);
        }

        let mut loaded: Vec<(usize, DatasetResult<LoadedSample>)> = slice
            .par_iter()
            .enumerate()
            .map(|(i, idx)| {
                (
                    i,
                    load_sample(
                        &self.dataset.pairs[*idx],
                        &self.dataset.cfg,
                        &self.dataset.mask_values,
                    ),
                )
            })
            .collect();
        loaded.sort_by_key(|(i, _)| *i);

        let mut images_buf: Vec<f32> = Vec::new();
        let mut masks_buf: Vec<i64> = Vec::new();
        let mut expected_size: Option<(u32, u32)> = None;
        for (_, result) in loaded {
            let sample = result?;
            let size = (sample.width, sample.height);
            match expected_size {
                None => expected_size = Some(size),
                Some(sz) if sz != size => {
                    return Err(SegDatasetError::Other(
                        "batch contains varying image sizes; keep each split's images the same size"
                            .to_string(),
                    ));
                }
                _ => {}
            }
            images_buf.extend_from_slice(&sample.image_chw);
            masks_buf.extend_from_slice(&sample.mask_indices);
        }

        let Some((width, height)) = expected_size else {
            return Ok(None);
        };
        let channels = self.dataset.cfg.channels;
        let images = Tensor::<B, 1>::from_floats(images_buf.as_slice(), device).reshape([
            batch_len,
            channels,
            height as usize,
            width as usize,
        ]);
        let masks = Tensor::<B, 1, Int>::from_data(
            TensorData::new(masks_buf, [batch_len * (height * width) as usize]),
            device,
        )
        .reshape([batch_len, height as usize, width as usize]);

        self.processed_samples += batch_len;
        self.processed_batches += 1;
        self.maybe_log_progress();

        Ok(Some(SegBatch { images, masks }))
    }

    fn maybe_log_progress(&mut self) {
        let processed_since = self
            .processed_samples
            .saturating_sub(self.last_logged_samples);
        let since_last = self.last_log.elapsed();
        if processed_since < LOG_EVERY_SAMPLES && since_last < Duration::from_secs(30) {
            return;
        }
        let secs = self.started.elapsed().as_secs_f32().max(0.001);
        let rate = self.processed_samples as f32 / secs;
        eprintln!(
            "[dataset] batches={} samples={} elapsed={:.1}s rate={:.1} img/s",
            self.processed_batches, self.processed_samples, secs, rate
        );
        self.last_logged_samples = self.processed_samples;
        self.last_log = Instant::now();
    }
}

//! Burn network modules for pixel classification.
//!
//! This crate defines the segmentation architecture used for training:
//! - `SegmentationModel`: Convolutional encoder/decoder producing per-pixel
//!   class scores.
//!
//! It is a pure Burn Module with no awareness of datasets or training
//! orchestration. The `training` crate wires it into the training loop.

use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, PaddingConfig2d};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::module::interpolate;
use burn::tensor::ops::{InterpolateMode, InterpolateOptions};
use burn::tensor::Tensor;

#[derive(Debug, Clone)]
pub struct SegmentationModelConfig {
    /// Input channels (3 for RGB, 1 for greyscale).
    pub n_channels: usize,
    /// Output score channels per pixel; 1 yields a single binary logit.
    pub n_classes: usize,
    /// Upsample with bilinear interpolation instead of transposed convolutions.
    pub bilinear: bool,
    /// Feature width of the first encoder stage; doubles per stage.
    pub base_width: usize,
    /// Number of pooling stages. Inputs must be at least `2^depth` pixels per side.
    pub depth: usize,
}

impl Default for SegmentationModelConfig {
    fn default() -> Self {
        Self {
            n_channels: 3,
            n_classes: 2,
            bilinear: false,
            base_width: 32,
            depth: 2,
        }
    }
}

/// Two 3x3 conv + batch-norm + relu stages at a fixed width.
#[derive(Debug, Module)]
struct DoubleConv<B: Backend> {
    conv1: Conv2d<B>,
    norm1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    norm2: BatchNorm<B, 2>,
}

impl<B: Backend> DoubleConv<B> {
    fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv1 = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);
        let norm1 = BatchNormConfig::new(out_channels).init(device);
        let conv2 = Conv2dConfig::new([out_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);
        let norm2 = BatchNormConfig::new(out_channels).init(device);
        Self {
            conv1,
            norm1,
            conv2,
            norm2,
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = relu(self.norm1.forward(self.conv1.forward(input)));
        relu(self.norm2.forward(self.conv2.forward(x)))
    }
}

#[derive(Debug, Module)]
struct DownBlock<B: Backend> {
    pool: MaxPool2d,
    conv: DoubleConv<B>,
}

impl<B: Backend> DownBlock<B> {
    fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let pool = MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();
        let conv = DoubleConv::new(in_channels, out_channels, device);
        Self { pool, conv }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        self.conv.forward(self.pool.forward(input))
    }
}

/// Decoder stage: upsample, merge the encoder skip, refine.
///
/// `upconv` is `None` when bilinear interpolation is used instead of a
/// transposed convolution. The upsampled tensor is resized to the skip's
/// spatial dimensions before concatenation, so odd input sizes survive the
/// round trip through the encoder.
#[derive(Debug, Module)]
struct UpBlock<B: Backend> {
    upconv: Option<ConvTranspose2d<B>>,
    conv: DoubleConv<B>,
}

impl<B: Backend> UpBlock<B> {
    fn new(in_channels: usize, skip_channels: usize, bilinear: bool, device: &B::Device) -> Self {
        if bilinear {
            let conv = DoubleConv::new(in_channels + skip_channels, skip_channels, device);
            Self { upconv: None, conv }
        } else {
            let upconv = ConvTranspose2dConfig::new([in_channels, skip_channels], [2, 2])
                .with_stride([2, 2])
                .init(device);
            let conv = DoubleConv::new(skip_channels + skip_channels, skip_channels, device);
            Self {
                upconv: Some(upconv),
                conv,
            }
        }
    }

    fn forward(&self, input: Tensor<B, 4>, skip: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, _, skip_h, skip_w] = skip.dims();
        let x = match &self.upconv {
            Some(upconv) => upconv.forward(input),
            None => interpolate(
                input,
                [skip_h, skip_w],
                InterpolateOptions::new(InterpolateMode::Bilinear),
            ),
        };
        let [_, _, h, w] = x.dims();
        let x = if (h, w) != (skip_h, skip_w) {
            interpolate(
                x,
                [skip_h, skip_w],
                InterpolateOptions::new(InterpolateMode::Nearest),
            )
        } else {
            x
        };
        self.conv.forward(Tensor::cat(vec![skip, x], 1))
    }
}

/// Convolutional encoder/decoder producing per-pixel class scores.
///
/// `forward` maps `[N, n_channels, H, W]` images to `[N, n_classes, H, W]`
/// scores (raw logits; a single channel when `n_classes == 1`).
#[derive(Debug, Module)]
pub struct SegmentationModel<B: Backend> {
    inc: DoubleConv<B>,
    downs: Vec<DownBlock<B>>,
    ups: Vec<UpBlock<B>>,
    head: Conv2d<B>,
    n_channels: usize,
    n_classes: usize,
}

impl<B: Backend> SegmentationModel<B> {
    pub fn new(cfg: SegmentationModelConfig, device: &B::Device) -> Self {
        let width = |stage: usize| cfg.base_width << stage;
        let inc = DoubleConv::new(cfg.n_channels, width(0), device);
        let mut downs = Vec::new();
        for stage in 0..cfg.depth {
            downs.push(DownBlock::new(width(stage), width(stage + 1), device));
        }
        let mut ups = Vec::new();
        for stage in (0..cfg.depth).rev() {
            ups.push(UpBlock::new(
                width(stage + 1),
                width(stage),
                cfg.bilinear,
                device,
            ));
        }
        let head = Conv2dConfig::new([width(0), cfg.n_classes.max(1)], [1, 1]).init(device);
        Self {
            inc,
            downs,
            ups,
            head,
            n_channels: cfg.n_channels,
            n_classes: cfg.n_classes.max(1),
        }
    }

    pub fn n_channels(&self) -> usize {
        self.n_channels
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = self.inc.forward(input);
        let mut skips = Vec::with_capacity(self.downs.len());
        for down in &self.downs {
            skips.push(x.clone());
            x = down.forward(x);
        }
        for up in &self.ups {
            // One skip per decoder stage by construction.
            let Some(skip) = skips.pop() else { break };
            x = up.forward(x, skip);
        }
        self.head.forward(x)
    }
}

pub mod prelude {
    pub use super::{SegmentationModel, SegmentationModelConfig};
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn forward_shapes_multiclass() {
        let device = Default::default();
        let cfg = SegmentationModelConfig {
            n_channels: 3,
            n_classes: 4,
            base_width: 8,
            depth: 2,
            ..Default::default()
        };
        let model = SegmentationModel::<TestBackend>::new(cfg, &device);
        let input = Tensor::zeros([2, 3, 16, 16], &device);
        let scores = model.forward(input);
        assert_eq!(scores.dims(), [2, 4, 16, 16]);
    }

    #[test]
    fn forward_shapes_binary_bilinear() {
        let device = Default::default();
        let cfg = SegmentationModelConfig {
            n_channels: 1,
            n_classes: 1,
            bilinear: true,
            base_width: 8,
            depth: 1,
            ..Default::default()
        };
        let model = SegmentationModel::<TestBackend>::new(cfg, &device);
        let input = Tensor::zeros([1, 1, 2, 2], &device);
        let scores = model.forward(input);
        assert_eq!(scores.dims(), [1, 1, 2, 2]);
    }

    #[test]
    fn forward_survives_odd_sizes() {
        let device = Default::default();
        let cfg = SegmentationModelConfig {
            n_channels: 3,
            n_classes: 2,
            base_width: 8,
            depth: 2,
            ..Default::default()
        };
        let model = SegmentationModel::<TestBackend>::new(cfg, &device);
        let input = Tensor::zeros([1, 3, 15, 13], &device);
        let scores = model.forward(input);
        assert_eq!(scores.dims(), [1, 2, 15, 13]);
    }
}

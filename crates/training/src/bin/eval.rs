use std::path::{Path, PathBuf};

use clap::Parser;
use models::{SegmentationModel, SegmentationModelConfig};
use seg_dataset::{DatasetConfig, SegDataset};
use training::{checkpoint, metrics::predicted_classes, metrics::IouMetric, TrainBackend};
use training::{validate_backend_choice, BackendKind};

#[derive(Parser, Debug)]
#[command(name = "eval", about = "Score a trained segmentation model on a held-out split")]
struct EvalArgs {
    /// Checkpoint to load; a freshly initialized model is scored if omitted.
    #[arg(short = 'f', long)]
    checkpoint: Option<String>,
    /// Dataset root containing the split directories.
    #[arg(long, default_value = "data")]
    data_root: String,
    /// Split to score (subdirectory of the dataset root).
    #[arg(long, default_value = "test")]
    split: String,
    /// Number of output classes the model was trained with.
    #[arg(short = 'c', long, default_value_t = 2)]
    classes: usize,
    /// Input channels (3 for RGB, 1 for greyscale).
    #[arg(long, default_value_t = 3)]
    channels: usize,
    /// Downscaling factor applied to images and masks.
    #[arg(short = 's', long, default_value_t = 0.5)]
    scale: f32,
    /// The checkpoint was trained with bilinear upsampling.
    #[arg(long)]
    bilinear: bool,
    /// Encoder pooling stages the checkpoint was trained with.
    #[arg(long, default_value_t = 2)]
    depth: usize,
    /// Batch size.
    #[arg(short = 'b', long, default_value_t = 8)]
    batch_size: usize,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    backend: BackendKind,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
    let args = EvalArgs::parse();
    validate_backend_choice(args.backend)?;

    let device = Default::default();
    let config = SegmentationModelConfig {
        n_channels: args.channels,
        n_classes: args.classes,
        bilinear: args.bilinear,
        depth: args.depth,
        ..Default::default()
    };
    let model: SegmentationModel<TrainBackend> = match &args.checkpoint {
        Some(path) => {
            let (model, mask_values) =
                checkpoint::load::<TrainBackend>(Path::new(path), &config, &device)?;
            println!("loaded {} (mask values {:?})", path, mask_values);
            model
        }
        None => {
            println!("no checkpoint given; scoring a freshly initialized model");
            SegmentationModel::new(config, &device)
        }
    };

    let root = PathBuf::from(&args.data_root).join(&args.split);
    let dataset = SegDataset::from_dirs(
        &root.join("image"),
        &root.join("mask"),
        DatasetConfig {
            channels: args.channels,
            scale: args.scale,
            shuffle: false,
            drop_last: false,
            seed: None,
        },
    )?;
    if dataset.is_empty() {
        anyhow::bail!("no samples under {}", root.display());
    }

    let mut metric = IouMetric::new(args.classes);
    let mut iter = dataset.iter();
    let batch_size = args.batch_size.max(1);
    while let Some(batch) = iter.next_batch::<TrainBackend>(batch_size, &device)? {
        let scores = model.forward(batch.images);
        metric.update(predicted_classes(scores, args.classes), batch.masks);
    }

    println!(
        "{}: {} samples, mean IoU {:.4}, mean dice {:.4}",
        args.split,
        dataset.len(),
        metric.compute(),
        metric.dice()
    );
    Ok(())
}

use std::path::{Path, PathBuf};

use burn::backend::Autodiff;
use burn::module::AutodiffModule;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::{GradientsParams, Optimizer, RmsPropConfig};
use clap::{Parser, ValueEnum};
use models::{SegmentationModel, SegmentationModelConfig};
use seg_dataset::{DatasetConfig, SegDataset};
use tracing::{debug, info, warn};

use crate::checkpoint::{self, CheckpointManager};
use crate::eval::evaluate;
use crate::logger::MetricLog;
use crate::loss::SegmentationLoss;
use crate::metrics::{predicted_classes, IouMetric};
use crate::scaler::{GradScaler, StepOutcome};
use crate::scheduler::ReduceOnPlateau;
use crate::TrainBackend;

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum BackendKind {
    NdArray,
    Wgpu,
}

#[derive(Parser, Debug)]
#[command(
    name = "train",
    about = "Train the segmentation model on images and target masks"
)]
pub struct TrainArgs {
    /// Number of epochs.
    #[arg(short = 'e', long, default_value_t = 5)]
    pub epochs: usize,
    /// Batch size.
    #[arg(short = 'b', long, default_value_t = 1)]
    pub batch_size: usize,
    /// Learning rate.
    #[arg(short = 'l', long, default_value_t = 1e-5)]
    pub learning_rate: f64,
    /// Resume from a checkpoint file.
    #[arg(short = 'f', long)]
    pub load: Option<String>,
    /// Downscaling factor applied to images and masks.
    #[arg(short = 's', long, default_value_t = 0.5)]
    pub scale: f32,
    /// Percent of the data used as validation (informational; splits are
    /// directory-based).
    #[arg(short = 'v', long, default_value_t = 10.0)]
    pub validation: f32,
    /// Use mixed precision (dynamic loss scaling).
    #[arg(long)]
    pub amp: bool,
    /// Use bilinear upsampling instead of transposed convolutions.
    #[arg(long)]
    pub bilinear: bool,
    /// Number of output classes.
    #[arg(short = 'c', long, default_value_t = 2)]
    pub classes: usize,
    /// Input channels (3 for RGB, 1 for greyscale).
    #[arg(long, default_value_t = 3)]
    pub channels: usize,
    /// Number of encoder pooling stages.
    #[arg(long, default_value_t = 2)]
    pub depth: usize,
    /// Dataset root containing train/ and val/ splits, each with image/ and
    /// mask/ subdirectories.
    #[arg(long, default_value = "data")]
    pub data_root: String,
    /// Directory receiving one checkpoint per epoch.
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: String,
    /// Skip writing checkpoints.
    #[arg(long)]
    pub no_save: bool,
    /// Directory receiving the metrics.jsonl run log.
    #[arg(long, default_value = "runs")]
    pub log_dir: String,
    /// Ceiling on the global gradient L2 norm, taken across all parameter
    /// tensors at once.
    #[arg(long, default_value_t = 1.0)]
    pub gradient_clipping: f32,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
}

type ADBackend = Autodiff<TrainBackend>;

pub fn run_train(args: TrainArgs) -> anyhow::Result<()> {
    validate_backend_choice(args.backend)?;
    if args.classes == 0 {
        anyhow::bail!("--classes must be at least 1");
    }
    if args.channels != 1 && args.channels != 3 {
        anyhow::bail!("--channels must be 1 (greyscale) or 3 (RGB)");
    }

    let root = PathBuf::from(&args.data_root);
    let train_set = SegDataset::from_dirs(
        &root.join("train/image"),
        &root.join("train/mask"),
        DatasetConfig {
            channels: args.channels,
            scale: args.scale,
            shuffle: true,
            drop_last: false,
            seed: None,
        },
    )?;
    let val_set = SegDataset::from_dirs(
        &root.join("val/image"),
        &root.join("val/mask"),
        DatasetConfig {
            channels: args.channels,
            scale: args.scale,
            shuffle: false,
            drop_last: false,
            seed: None,
        },
    )?;
    if train_set.is_empty() {
        anyhow::bail!("no training samples under {}/train", root.display());
    }
    if val_set.is_empty() {
        anyhow::bail!("no validation samples under {}/val", root.display());
    }
    let mask_values = train_set.mask_values().to_vec();
    if mask_values.len() > args.classes.max(2) {
        anyhow::bail!(
            "masks contain {} distinct values but the model predicts {} classes",
            mask_values.len(),
            args.classes
        );
    }

    let device = <ADBackend as burn::tensor::backend::Backend>::Device::default();
    let model_config = SegmentationModelConfig {
        n_channels: args.channels,
        n_classes: args.classes,
        bilinear: args.bilinear,
        depth: args.depth,
        ..Default::default()
    };
    let model = match &args.load {
        Some(path) => {
            let (model, stored_values) =
                checkpoint::load::<ADBackend>(Path::new(path), &model_config, &device)?;
            info!(checkpoint = %path, "resumed model from checkpoint");
            if stored_values != mask_values {
                warn!(
                    ?stored_values,
                    ?mask_values,
                    "checkpoint mask values differ from the training split"
                );
            }
            model
        }
        None => SegmentationModel::new(model_config, &device),
    };

    info!(
        epochs = args.epochs,
        batch_size = args.batch_size,
        learning_rate = args.learning_rate,
        train_samples = train_set.len(),
        val_samples = val_set.len(),
        classes = args.classes,
        amp = args.amp,
        "starting training"
    );

    train_model(&args, model, &train_set, &val_set, &mask_values, &device)
}

fn train_model(
    args: &TrainArgs,
    mut model: SegmentationModel<ADBackend>,
    train_set: &SegDataset,
    val_set: &SegDataset,
    mask_values: &[i64],
    device: &<ADBackend as burn::tensor::backend::Backend>::Device,
) -> anyhow::Result<()> {
    let mut optim = RmsPropConfig::new()
        .with_momentum(0.999)
        .with_weight_decay(Some(WeightDecayConfig::new(1e-8)))
        .init();
    let mut scheduler = ReduceOnPlateau::new(args.learning_rate);
    let mut scaler = GradScaler::new(args.amp);
    let criterion = SegmentationLoss::new(args.classes);
    let mut train_iou = IouMetric::new(args.classes);
    let mut metrics = MetricLog::create(Path::new(&args.log_dir));
    let checkpoints = CheckpointManager::new(&args.checkpoint_dir);

    let batch_size = args.batch_size.max(1);
    let division = division_step(train_set.len(), batch_size);
    let mut global_step: usize = 0;

    for epoch in 1..=args.epochs {
        train_iou.reset();
        let mut losses = Vec::new();
        let mut skipped: usize = 0;
        let mut iter = train_set.iter();
        loop {
            let batch = match iter.next_batch::<ADBackend>(batch_size, device)? {
                Some(batch) => batch,
                None => break,
            };
            let [_, channels, _, _] = batch.images.dims();
            if channels != model.n_channels() {
                anyhow::bail!(
                    "dataset yields {channels}-channel images but the model expects {}; \
                     check --channels against the input data",
                    model.n_channels()
                );
            }

            let scores = model.forward(batch.images);
            let loss = criterion.forward(scores.clone(), batch.masks.clone());
            let loss_val = scalar_value(loss.clone().detach());

            let grads = scaler.scale_loss(loss).backward();
            let mut grads = GradientsParams::from_grads(grads, &model);
            match scaler.unscale(&model, &mut grads, args.gradient_clipping) {
                StepOutcome::Applied => {
                    model = optim.step(scheduler.lr(), model, grads);
                    losses.push(loss_val);
                }
                StepOutcome::SkippedOverflow => {
                    skipped += 1;
                    warn!(
                        epoch,
                        global_step,
                        scale = scaler.scale(),
                        "gradient overflow, step skipped"
                    );
                }
            }

            train_iou.update(
                predicted_classes(scores.detach(), args.classes),
                batch.masks,
            );
            global_step += 1;
            debug!(epoch, global_step, loss = loss_val, "train step");

            if division > 0 && global_step % division == 0 {
                let score = evaluate(&model.valid(), val_set, device, args.amp)?;
                let lr = scheduler.step(score);
                info!(epoch, global_step, val_iou = score, lr, "mid-epoch validation");
            }
        }

        let avg_loss: f32 = if losses.is_empty() {
            0.0
        } else {
            losses.iter().sum::<f32>() / losses.len() as f32
        };
        metrics.log_scalar("train/loss", epoch, avg_loss as f64);
        metrics.log_scalar("train/mean_iou", epoch, train_iou.compute());
        // One entry per applied optimizer step; skipped-overflow steps are
        // excluded, so this is the number of parameter updates this epoch.
        metrics.log_scalar("train/steps", epoch, losses.len() as f64);

        let eval_model = model.valid();
        let (val_loss, val_iou) = validation_pass(&eval_model, val_set, &criterion, args.classes)?;
        metrics.log_scalar("val/loss", epoch, val_loss as f64);
        metrics.log_scalar("val/mean_iou", epoch, val_iou);
        let lr = scheduler.step(val_iou);

        info!(
            epoch,
            train_loss = avg_loss,
            train_iou = train_iou.compute(),
            val_loss,
            val_iou,
            lr,
            skipped,
            "epoch complete"
        );

        if !args.no_save {
            let inner_device = Default::default();
            let path = checkpoints.save(epoch, &eval_model, mask_values, &inner_device)?;
            info!(epoch, path = %path.display(), "checkpoint saved");
        }
    }

    Ok(())
}

/// Loss and IoU over the validation split on the inference backend.
fn validation_pass(
    model: &SegmentationModel<TrainBackend>,
    val_set: &SegDataset,
    criterion: &SegmentationLoss,
    n_classes: usize,
) -> anyhow::Result<(f32, f64)> {
    let device = Default::default();
    let mut metric = IouMetric::new(n_classes);
    let mut losses = Vec::new();
    let mut iter = val_set.iter();
    while let Some(batch) = iter.next_batch::<TrainBackend>(8, &device)? {
        let scores = model.forward(batch.images);
        losses.push(scalar_value(
            criterion.forward(scores.clone(), batch.masks.clone()),
        ));
        metric.update(predicted_classes(scores, n_classes), batch.masks);
    }
    let avg_loss = if losses.is_empty() {
        0.0
    } else {
        losses.iter().sum::<f32>() / losses.len() as f32
    };
    Ok((avg_loss, metric.compute()))
}

/// Interval (in optimizer steps) between mid-epoch validation rounds: five
/// per epoch, or zero (disabled) for datasets too small to divide.
pub fn division_step(n_train: usize, batch_size: usize) -> usize {
    if batch_size == 0 {
        return 0;
    }
    n_train / (5 * batch_size)
}

fn scalar_value<B: burn::tensor::backend::Backend>(t: burn::tensor::Tensor<B, 1>) -> f32 {
    t.into_data()
        .to_vec::<f32>()
        .unwrap_or_default()
        .into_iter()
        .next()
        .unwrap_or(0.0)
}

pub fn validate_backend_choice(kind: BackendKind) -> anyhow::Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => {
            anyhow::bail!("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend")
        }
        (BackendKind::NdArray, true) => {
            println!("note: built with backend-wgpu; training will still use the WGPU backend despite --backend ndarray");
        }
        _ => {}
    }
    Ok(())
}

#![recursion_limit = "256"]

pub mod checkpoint;
pub mod eval;
pub mod logger;
pub mod loss;
pub mod metrics;
pub mod scaler;
pub mod scheduler;
pub mod util;

pub use checkpoint::{CheckpointManager, TrainingCheckpoint};
pub use eval::evaluate;
pub use logger::MetricLog;
pub use loss::{LossMode, SegmentationLoss};
pub use metrics::{predicted_classes, IouMetric};
pub use scaler::{GradScaler, StepOutcome};
pub use scheduler::ReduceOnPlateau;
pub use util::{division_step, run_train, validate_backend_choice, BackendKind, TrainArgs};

/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;

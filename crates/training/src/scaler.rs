//! Dynamic loss scaling for reduced-precision training.
//!
//! The scaler multiplies the loss before backward so small gradients survive
//! a low-precision backend, then divides the gradients back out before the
//! optimizer sees them. Steps whose gradients contain inf/NaN are skipped and
//! the scale backs off; a long run of clean steps grows it again. Clean
//! gradients are clipped so their global L2 norm stays under the caller's
//! ceiling, across all parameter tensors at once.

use std::marker::PhantomData;

use burn::module::{AutodiffModule, ModuleVisitor, ParamId};
use burn::optim::GradientsParams;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::Tensor;

const INITIAL_SCALE: f32 = 65536.0;
const GROWTH_FACTOR: f32 = 2.0;
const BACKOFF_FACTOR: f32 = 0.5;
const GROWTH_INTERVAL: u32 = 2000;
const MIN_SCALE: f32 = 1.0;

/// What the caller should do with the gradients after unscaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Gradients are finite, unscaled, and norm-clipped; apply the optimizer
    /// step.
    Applied,
    /// Overflow detected; discard the gradients and continue.
    SkippedOverflow,
}

#[derive(Debug, Clone)]
pub struct GradScaler {
    enabled: bool,
    scale: f32,
    good_steps: u32,
}

impl GradScaler {
    /// Disabled scalers keep the scale pinned at 1.0 and never adjust it;
    /// non-finite gradients are still detected and reported as a skip.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            scale: if enabled { INITIAL_SCALE } else { 1.0 },
            good_steps: 0,
        }
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn scale_loss<B: AutodiffBackend>(&self, loss: Tensor<B, 1>) -> Tensor<B, 1> {
        if self.enabled {
            loss.mul_scalar(self.scale)
        } else {
            loss
        }
    }

    /// Divides every gradient by the current scale in place, checking for
    /// overflow along the way, then rescales the whole gradient set so its
    /// global L2 norm does not exceed `max_norm` (`<= 0` disables clipping).
    /// On overflow the scale is halved (never below 1.0) and the step must be
    /// skipped; after `GROWTH_INTERVAL` consecutive clean steps the scale
    /// doubles.
    pub fn unscale<B, M>(
        &mut self,
        module: &M,
        grads: &mut GradientsParams,
        max_norm: f32,
    ) -> StepOutcome
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
    {
        let mut visitor = UnscaleVisitor::<B> {
            grads,
            inv_scale: 1.0 / self.scale,
            sq_norm: 0.0,
            overflow: false,
            marker: PhantomData,
        };
        module.visit(&mut visitor);
        let overflow = visitor.overflow;
        let global_norm = visitor.sq_norm.sqrt();

        if !overflow && max_norm > 0.0 && global_norm > max_norm {
            let mut clip = RescaleVisitor::<B> {
                grads,
                factor: max_norm / global_norm,
                marker: PhantomData,
            };
            module.visit(&mut clip);
        }

        if !self.enabled {
            return if overflow {
                StepOutcome::SkippedOverflow
            } else {
                StepOutcome::Applied
            };
        }

        if overflow {
            self.scale = (self.scale * BACKOFF_FACTOR).max(MIN_SCALE);
            self.good_steps = 0;
            StepOutcome::SkippedOverflow
        } else {
            self.good_steps += 1;
            if self.good_steps >= GROWTH_INTERVAL {
                self.scale *= GROWTH_FACTOR;
                self.good_steps = 0;
            }
            StepOutcome::Applied
        }
    }
}

/// Unscales each gradient tensor and accumulates the squared L2 norm of the
/// unscaled set, so the global norm spans every parameter tensor rather than
/// being taken per tensor.
struct UnscaleVisitor<'a, B: AutodiffBackend> {
    grads: &'a mut GradientsParams,
    inv_scale: f32,
    sq_norm: f32,
    overflow: bool,
    marker: PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for UnscaleVisitor<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        let Some(grad) = self.grads.remove::<B::InnerBackend, D>(id) else {
            return;
        };
        let grad = grad.mul_scalar(self.inv_scale);
        let sq = (grad.clone() * grad.clone())
            .sum()
            .into_data()
            .to_vec::<f32>()
            .unwrap_or_default();
        match sq.first() {
            Some(value) if value.is_finite() => self.sq_norm += value,
            _ => self.overflow = true,
        }
        self.grads.register(id, grad);
    }
}

struct RescaleVisitor<'a, B: AutodiffBackend> {
    grads: &'a mut GradientsParams,
    factor: f32,
    marker: PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for RescaleVisitor<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        let Some(grad) = self.grads.remove::<B::InnerBackend, D>(id) else {
            return;
        };
        self.grads.register(id, grad.mul_scalar(self.factor));
    }
}

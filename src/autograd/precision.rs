//! Mixed-precision loss scaling.
//!
//! The loss is scaled up before backward so small gradients survive reduced
//! precision, gradients are unscaled before the optimizer step, and the scale
//! adapts to overflow: back off on a non-finite gradient, grow again after an
//! interval of clean steps. Steps skipped on overflow are counted so the
//! epoch report can surface them.

use crate::Tensor;

/// Compute precision for activations and gradients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precision {
    /// 32-bit floating point (default)
    #[default]
    Fp32,
    /// 16-bit floating point
    Fp16,
}

impl Precision {
    pub fn name(&self) -> &'static str {
        match self {
            Precision::Fp32 => "fp32",
            Precision::Fp16 => "fp16",
        }
    }

    pub fn is_reduced(&self) -> bool {
        matches!(self, Precision::Fp16)
    }
}

/// Configuration for mixed-precision training.
#[derive(Debug, Clone)]
pub struct MixedPrecisionConfig {
    pub compute_precision: Precision,
    /// Initial loss scale factor.
    pub initial_scale: f32,
    /// Factor applied to the scale after a clean growth interval.
    pub scale_growth_factor: f32,
    /// Factor applied to the scale on overflow.
    pub scale_backoff_factor: f32,
    /// Clean steps required before the scale grows.
    pub scale_growth_interval: usize,
    /// Whether the scale adapts at all.
    pub dynamic_scaling: bool,
}

impl MixedPrecisionConfig {
    /// Full precision: scale 1, no adaptation.
    pub fn fp32() -> Self {
        Self {
            compute_precision: Precision::Fp32,
            initial_scale: 1.0,
            scale_growth_factor: 2.0,
            scale_backoff_factor: 0.5,
            scale_growth_interval: 2000,
            dynamic_scaling: false,
        }
    }

    /// Half precision with dynamic scaling.
    pub fn fp16() -> Self {
        Self {
            compute_precision: Precision::Fp16,
            initial_scale: 65536.0, // 2^16
            scale_growth_factor: 2.0,
            scale_backoff_factor: 0.5,
            scale_growth_interval: 2000,
            dynamic_scaling: true,
        }
    }

    pub fn is_mixed(&self) -> bool {
        self.compute_precision.is_reduced()
    }
}

impl Default for MixedPrecisionConfig {
    fn default() -> Self {
        Self::fp32()
    }
}

/// Gradient scaler for mixed-precision training.
#[derive(Debug)]
pub struct GradScaler {
    scale: f32,
    growth_factor: f32,
    backoff_factor: f32,
    growth_interval: usize,
    steps_since_growth: usize,
    dynamic: bool,
    overflow_count: usize,
    successful_steps: usize,
}

impl GradScaler {
    pub fn new(initial_scale: f32) -> Self {
        Self {
            scale: initial_scale,
            growth_factor: 2.0,
            backoff_factor: 0.5,
            growth_interval: 2000,
            steps_since_growth: 0,
            dynamic: true,
            overflow_count: 0,
            successful_steps: 0,
        }
    }

    pub fn from_config(config: &MixedPrecisionConfig) -> Self {
        Self {
            scale: config.initial_scale,
            growth_factor: config.scale_growth_factor,
            backoff_factor: config.scale_backoff_factor,
            growth_interval: config.scale_growth_interval,
            steps_since_growth: 0,
            dynamic: config.dynamic_scaling,
            overflow_count: 0,
            successful_steps: 0,
        }
    }

    /// Current loss scale.
    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Unscale the gradients of `params` in place.
    ///
    /// Returns true when every gradient is finite; false signals that the
    /// optimizer step must be skipped.
    pub fn unscale_and_check(&self, params: &[Tensor]) -> bool {
        let inv_scale = 1.0 / self.scale;
        let mut valid = true;
        for param in params {
            if let Some(mut grad) = param.grad() {
                grad *= inv_scale;
                if grad.iter().any(|g| !g.is_finite()) {
                    valid = false;
                }
                param.set_grad(grad);
            }
        }
        valid
    }

    /// Adapt the scale after a step. `grads_valid` is the result of
    /// `unscale_and_check`.
    pub fn update(&mut self, grads_valid: bool) {
        if grads_valid {
            self.successful_steps += 1;
        } else {
            self.overflow_count += 1;
        }
        if !self.dynamic {
            return;
        }

        if grads_valid {
            self.steps_since_growth += 1;
            if self.steps_since_growth >= self.growth_interval {
                self.scale *= self.growth_factor;
                self.steps_since_growth = 0;
            }
        } else {
            self.scale = (self.scale * self.backoff_factor).max(1.0);
            self.steps_since_growth = 0;
        }
    }

    /// Steps skipped because of gradient overflow.
    pub fn overflow_count(&self) -> usize {
        self.overflow_count
    }

    /// Steps that went through to the optimizer.
    pub fn successful_steps(&self) -> usize {
        self.successful_steps
    }
}

impl Default for GradScaler {
    fn default() -> Self {
        Self::new(65536.0)
    }
}

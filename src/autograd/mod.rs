//! Tensors, gradient cells, and mixed-precision loss scaling.
//!
//! Unlike a per-op tape, forward passes here install one fused
//! [`BackwardOp`] per model call: losses seed gradients into the output grad
//! cells, then the fused node runs a single reverse pass into the parameter
//! gradients.

pub mod precision;
mod tensor;

pub use precision::{GradScaler, MixedPrecisionConfig, Precision};
pub use tensor::{BackwardOp, Tensor};

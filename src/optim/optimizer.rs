//! Optimizer trait.

use crate::Tensor;

/// Gradient-descent optimizer over a flat list of parameter tensors.
pub trait Optimizer {
    /// Apply one update using the gradients currently stored on `params`.
    fn step(&mut self, params: &mut [Tensor]);

    /// Clear the gradients of all parameters.
    fn zero_grad(&mut self, params: &mut [Tensor]) {
        for param in params.iter() {
            param.zero_grad();
        }
    }

    /// Current learning rate.
    fn lr(&self) -> f32;

    /// Set the learning rate (used by schedulers).
    fn set_lr(&mut self, lr: f32);
}

//! Learning rate schedulers.

use super::Optimizer;
use std::f32::consts::PI;

/// Learning rate scheduler trait.
pub trait LRScheduler {
    /// Get the current learning rate.
    fn get_lr(&self) -> f32;

    /// Advance the schedule by one step (called once per epoch here).
    fn step(&mut self);
}

/// Cosine Annealing Learning Rate Scheduler.
///
/// lr_t = lr_min + 0.5 * (lr_max - lr_min) * (1 + cos(π * t / T))
pub struct CosineAnnealingLR {
    lr_max: f32,
    lr_min: f32,
    t_max: usize,
    current_step: usize,
}

impl CosineAnnealingLR {
    /// Create a new cosine annealing scheduler.
    pub fn new(lr_max: f32, t_max: usize, lr_min: f32) -> Self {
        Self { lr_max, lr_min, t_max, current_step: 0 }
    }

    /// Scheduler with lr_min = 0.
    pub fn default_min(lr_max: f32, t_max: usize) -> Self {
        Self::new(lr_max, t_max, 0.0)
    }

    /// Apply the current learning rate to an optimizer.
    pub fn apply<O: Optimizer + ?Sized>(&self, optimizer: &mut O) {
        optimizer.set_lr(self.get_lr());
    }
}

impl LRScheduler for CosineAnnealingLR {
    fn get_lr(&self) -> f32 {
        if self.t_max == 0 || self.current_step >= self.t_max {
            return self.lr_min;
        }

        let progress = self.current_step as f32 / self.t_max as f32;
        let cosine_decay = 0.5 * (1.0 + (PI * progress).cos());
        self.lr_min + (self.lr_max - self.lr_min) * cosine_decay
    }

    fn step(&mut self) {
        self.current_step += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_initial_lr_is_lr_max() {
        let scheduler = CosineAnnealingLR::new(1.0, 100, 0.0);
        assert_abs_diff_eq!(scheduler.get_lr(), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_final_lr_is_lr_min() {
        let mut scheduler = CosineAnnealingLR::new(1.0, 100, 0.0);
        for _ in 0..100 {
            scheduler.step();
        }
        assert_abs_diff_eq!(scheduler.get_lr(), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_midpoint_is_half() {
        let mut scheduler = CosineAnnealingLR::new(1.0, 100, 0.0);
        for _ in 0..50 {
            scheduler.step();
        }
        assert_abs_diff_eq!(scheduler.get_lr(), 0.5, epsilon = 1e-4);
    }

    #[test]
    fn test_monotonic_non_increase_with_zero_min() {
        let mut scheduler = CosineAnnealingLR::default_min(1.0, 100);
        let mut prev_lr = scheduler.get_lr();
        for _ in 0..100 {
            scheduler.step();
            let current_lr = scheduler.get_lr();
            assert!(
                current_lr <= prev_lr,
                "lr should not increase: prev={prev_lr}, current={current_lr}"
            );
            prev_lr = current_lr;
        }
    }

    #[test]
    fn test_respects_nonzero_floor() {
        let mut scheduler = CosineAnnealingLR::new(1.0, 10, 0.1);
        for _ in 0..20 {
            scheduler.step();
        }
        assert_abs_diff_eq!(scheduler.get_lr(), 0.1, epsilon = 1e-6);
    }

    #[test]
    fn test_apply_to_optimizer() {
        use crate::optim::{AdamW, Optimizer};

        let mut optimizer = AdamW::default_params(1.0);
        let mut scheduler = CosineAnnealingLR::default_min(1.0, 10);

        scheduler.step();
        scheduler.apply(&mut optimizer);
        assert!(optimizer.lr() < 1.0);
    }
}

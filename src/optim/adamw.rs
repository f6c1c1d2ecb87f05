//! AdamW optimizer (Adam with decoupled weight decay).

use super::Optimizer;
use crate::Tensor;
use ndarray::Array1;

/// AdamW optimizer.
///
/// Weight decay is decoupled from the gradient-based update: instead of
/// adding decay to the gradient, it shrinks the parameters directly.
///
/// θ_t = (1 - lr * λ) * θ_{t-1} - lr_t * m_t / (√v_t + ε)
pub struct AdamW {
    lr: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    weight_decay: f32,
    t: u64,
    m: Vec<Option<Array1<f32>>>, // First moment
    v: Vec<Option<Array1<f32>>>, // Second moment
}

impl AdamW {
    /// Create a new AdamW optimizer.
    pub fn new(lr: f32, beta1: f32, beta2: f32, epsilon: f32, weight_decay: f32) -> Self {
        Self { lr, beta1, beta2, epsilon, weight_decay, t: 0, m: Vec::new(), v: Vec::new() }
    }

    /// AdamW with the distillation run defaults (betas 0.9/0.999, decay 5e-3).
    pub fn default_params(lr: f32) -> Self {
        Self::new(lr, 0.9, 0.999, 1e-8, 5e-3)
    }

    fn ensure_moments(&mut self, n: usize) {
        if self.m.len() < n {
            self.m.resize(n, None);
            self.v.resize(n, None);
        }
    }

    /// Optimizer step counter.
    #[must_use]
    pub fn step_count(&self) -> u64 {
        self.t
    }
}

impl Optimizer for AdamW {
    fn step(&mut self, params: &mut [Tensor]) {
        self.ensure_moments(params.len());
        self.t += 1;

        // Bias correction factors
        let lr_t = self.lr
            * ((1.0 - self.beta2.powi(self.t as i32)).sqrt()
                / (1.0 - self.beta1.powi(self.t as i32)));

        for (i, param) in params.iter_mut().enumerate() {
            let Some(grad) = param.grad() else { continue };

            // m_t = β1 * m_{t-1} + (1 - β1) * g
            let m_t = if let Some(m) = &self.m[i] {
                m * self.beta1 + &grad * (1.0 - self.beta1)
            } else {
                &grad * (1.0 - self.beta1)
            };

            // v_t = β2 * v_{t-1} + (1 - β2) * g²
            let grad_sq = &grad * &grad;
            let v_t = if let Some(v) = &self.v[i] {
                v * self.beta2 + &grad_sq * (1.0 - self.beta2)
            } else {
                &grad_sq * (1.0 - self.beta2)
            };

            let adaptive_update = &m_t / &(v_t.mapv(f32::sqrt) + self.epsilon) * lr_t;

            // Decoupled weight decay applied directly to the parameters
            let weight_decay_factor = 1.0 - self.lr * self.weight_decay;
            let updated = {
                let data = param.data();
                &*data * weight_decay_factor - &adaptive_update
            };
            *param.data_mut() = updated;

            self.m[i] = Some(m_t);
            self.v[i] = Some(v_t);
        }
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::arr1;

    #[test]
    fn test_quadratic_convergence() {
        // f(x) = x², gradient 2x
        let mut params = vec![Tensor::from_vec(vec![5.0, -3.0, 2.0], true)];
        let mut optimizer = AdamW::default_params(0.1);

        for _ in 0..100 {
            let grad = params[0].data().mapv(|x| 2.0 * x);
            params[0].set_grad(grad);
            optimizer.step(&mut params);
        }

        for &val in params[0].data().iter() {
            assert!(val.abs() < 0.5, "Value {val} did not converge");
        }
    }

    #[test]
    fn test_zero_gradient_applies_only_weight_decay() {
        let mut params = vec![Tensor::from_vec(vec![1.0], true)];
        let mut optimizer = AdamW::new(0.1, 0.9, 0.999, 1e-8, 0.1);

        params[0].set_grad(arr1(&[0.0]));
        optimizer.step(&mut params);

        // θ_t = (1 - lr * λ) * θ_{t-1} = 0.99
        assert_abs_diff_eq!(params[0].data()[0], 0.99, epsilon = 1e-6);
    }

    #[test]
    fn test_params_without_grad_are_untouched() {
        let mut params = vec![Tensor::from_vec(vec![1.0, 2.0], false)];
        let mut optimizer = AdamW::default_params(0.1);

        let initial = params[0].to_vec();
        optimizer.step(&mut params);
        assert_eq!(params[0].to_vec(), initial);
    }

    #[test]
    fn test_multiple_params_all_update() {
        let mut params =
            vec![Tensor::from_vec(vec![1.0, 2.0], true), Tensor::from_vec(vec![3.0, 4.0], true)];
        let mut optimizer = AdamW::default_params(0.1);

        params[0].set_grad(arr1(&[0.1, 0.2]));
        params[1].set_grad(arr1(&[0.3, 0.4]));
        optimizer.step(&mut params);

        assert!(params[0].data()[0] < 1.0);
        assert!(params[1].data()[0] < 3.0);
    }

    #[test]
    fn test_lr_getter_setter() {
        let mut optimizer = AdamW::default_params(0.1);
        assert_abs_diff_eq!(optimizer.lr(), 0.1, epsilon = 1e-6);
        optimizer.set_lr(0.01);
        assert_abs_diff_eq!(optimizer.lr(), 0.01, epsilon = 1e-6);
    }

    #[test]
    fn test_update_stays_finite_for_extreme_values() {
        let mut params = vec![Tensor::from_vec(vec![1e6, -1e6, 1e-6, -1e-6], true)];
        let mut optimizer = AdamW::default_params(0.001);

        let grad = params[0].data().mapv(|x| 2.0 * x);
        params[0].set_grad(grad);
        optimizer.step(&mut params);

        for &val in params[0].data().iter() {
            assert!(val.is_finite());
        }
    }

    #[test]
    fn test_zero_grad_clears_all() {
        let mut params = vec![Tensor::zeros(2, true), Tensor::zeros(2, true)];
        params[0].set_grad(arr1(&[1.0, 1.0]));
        params[1].set_grad(arr1(&[2.0, 2.0]));

        let mut optimizer = AdamW::default_params(0.1);
        optimizer.zero_grad(&mut params);

        assert!(params[0].grad().is_none());
        assert!(params[1].grad().is_none());
    }
}

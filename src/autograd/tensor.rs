//! Flat tensor with shared storage and a gradient cell.
//!
//! Data is a 1-D `Array1<f32>`; callers that need matrix semantics carry the
//! dimensions explicitly and index row-major. Cloning a `Tensor` shares both
//! the data and the gradient cell, so a parameter handed to the optimizer and
//! the same parameter inside a model see one storage.

use ndarray::Array1;
use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

/// Backward operation attached to a tensor produced by a forward pass.
///
/// Implementations read the gradients accumulated on their output tensors and
/// write gradients into their input/parameter grad cells. Model forward
/// passes install a single fused node so that `backward` runs exactly once
/// per forward/backward cycle.
pub trait BackwardOp {
    fn backward(&self);
}

/// Tensor with optional gradient tracking.
#[derive(Clone)]
pub struct Tensor {
    data: Rc<RefCell<Array1<f32>>>,
    grad: Rc<RefCell<Option<Array1<f32>>>>,
    requires_grad: bool,
    backward_op: Option<Rc<dyn BackwardOp>>,
}

impl Tensor {
    /// Create a tensor from an existing array.
    pub fn new(data: Array1<f32>, requires_grad: bool) -> Self {
        Self {
            data: Rc::new(RefCell::new(data)),
            grad: Rc::new(RefCell::new(None)),
            requires_grad,
            backward_op: None,
        }
    }

    /// Create a tensor from a vector.
    pub fn from_vec(data: Vec<f32>, requires_grad: bool) -> Self {
        Self::new(Array1::from(data), requires_grad)
    }

    /// Create a zero-filled tensor of length `n`.
    pub fn zeros(n: usize, requires_grad: bool) -> Self {
        Self::new(Array1::zeros(n), requires_grad)
    }

    /// Borrow the underlying data.
    pub fn data(&self) -> Ref<'_, Array1<f32>> {
        self.data.borrow()
    }

    /// Mutably borrow the underlying data.
    pub fn data_mut(&self) -> RefMut<'_, Array1<f32>> {
        self.data.borrow_mut()
    }

    /// Copy the data out as a plain vector.
    pub fn to_vec(&self) -> Vec<f32> {
        self.data.borrow().to_vec()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.borrow().len()
    }

    /// Whether the tensor holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether gradients are tracked for this tensor.
    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    /// Clone of the current gradient, if any.
    pub fn grad(&self) -> Option<Array1<f32>> {
        self.grad.borrow().clone()
    }

    /// Shared handle to the gradient cell, for backward ops.
    pub fn grad_cell(&self) -> Rc<RefCell<Option<Array1<f32>>>> {
        Rc::clone(&self.grad)
    }

    /// Replace the gradient.
    pub fn set_grad(&self, grad: Array1<f32>) {
        debug_assert_eq!(grad.len(), self.len());
        *self.grad.borrow_mut() = Some(grad);
    }

    /// Add into the gradient, initializing it when absent.
    pub fn accumulate_grad(&self, grad: Array1<f32>) {
        debug_assert_eq!(grad.len(), self.len());
        let mut cell = self.grad.borrow_mut();
        match cell.as_mut() {
            Some(existing) => *existing += &grad,
            None => *cell = Some(grad),
        }
    }

    /// Clear the gradient.
    pub fn zero_grad(&self) {
        *self.grad.borrow_mut() = None;
    }

    /// Attach the backward op that produced this tensor.
    pub fn set_backward_op(&mut self, op: Rc<dyn BackwardOp>) {
        self.backward_op = Some(op);
    }

    /// Backward op attached to this tensor, if any.
    pub fn backward_op(&self) -> Option<Rc<dyn BackwardOp>> {
        self.backward_op.clone()
    }
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor")
            .field("len", &self.len())
            .field("requires_grad", &self.requires_grad)
            .field("has_grad", &self.grad.borrow().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    #[test]
    fn test_clone_shares_storage() {
        let a = Tensor::from_vec(vec![1.0, 2.0], true);
        let b = a.clone();
        b.data_mut()[0] = 9.0;
        assert_eq!(a.data()[0], 9.0);
    }

    #[test]
    fn test_accumulate_grad_initializes_then_adds() {
        let t = Tensor::zeros(3, true);
        t.accumulate_grad(arr1(&[1.0, 2.0, 3.0]));
        t.accumulate_grad(arr1(&[1.0, 1.0, 1.0]));
        let g = t.grad().unwrap();
        assert_eq!(g, arr1(&[2.0, 3.0, 4.0]));
    }

    #[test]
    fn test_zero_grad_clears() {
        let t = Tensor::zeros(2, true);
        t.set_grad(arr1(&[1.0, 1.0]));
        t.zero_grad();
        assert!(t.grad().is_none());
    }

    #[test]
    fn test_grad_cell_is_shared_with_clone() {
        let a = Tensor::zeros(2, true);
        let b = a.clone();
        a.set_grad(arr1(&[5.0, 5.0]));
        assert_eq!(b.grad().unwrap()[0], 5.0);
    }
}

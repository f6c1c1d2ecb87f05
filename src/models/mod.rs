//! Teacher and student model adapters.
//!
//! Both sides of the distillation implement [`ScoredSequenceModel`]; the
//! frozen teacher never tracks gradients, the trainable student exposes its
//! temporal reset and layer-stack introspection on top of the common seam.

pub mod math;
mod student;
mod teacher;
pub mod weights;

pub use student::{SpikingStudent, StudentConfig, StudentOutput};
pub use teacher::{FrozenTeacher, TeacherOutput};

/// Common capability seam for sequence classifiers on either side of the
/// distillation.
pub trait ScoredSequenceModel {
    /// Number of output classes.
    fn num_classes(&self) -> usize;

    /// Vocabulary size of the embedding table.
    fn vocab_size(&self) -> usize;

    /// Width of the hidden representation.
    fn hidden_dim(&self) -> usize;
}

//! Distillation objective, training pipeline, and checkpointing.

pub mod checkpoint;
pub mod loss;
pub mod pipeline;

pub use checkpoint::{save_checkpoint, BestTracker, RunSignature};
pub use loss::{DistillLoss, DistillWeights, LossTerms};
pub use pipeline::{Distiller, EpochStats, RunReport};

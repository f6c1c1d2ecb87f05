//! destilar: knowledge distillation from frozen transformer classifiers into
//! temporally-encoded spiking students.
//!
//! A frozen teacher supplies logits, hidden states, and an embedding table; a
//! spiking student is trained against them with a four-term objective
//! (cross-entropy, embedding MSE, logit KL, per-layer representation MSE).
//! The [`distill::Distiller`] ties the pieces together into an epoch loop
//! with cosine learning-rate annealing, optional fp16 loss scaling, and
//! best-metric checkpointing.

pub mod autograd;
pub mod cli;
pub mod config;
pub mod data;
pub mod device;
pub mod distill;
pub mod error;
pub mod eval;
pub mod models;
pub mod optim;
pub mod tokenizer;

pub use autograd::Tensor;
pub use config::DistillConfig;
pub use distill::{Distiller, RunReport};
pub use error::{DistilarError, Result};

/// Run a full distillation job from a validated-on-entry configuration.
pub fn run(config: DistillConfig) -> Result<RunReport> {
    let mut distiller = Distiller::new(config)?;
    distiller.run()
}

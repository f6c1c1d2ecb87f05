//! Run configuration and startup validation.
//!
//! Every knob of a distillation run lives here. Validation happens once at
//! startup and is fatal: a run never starts with a configuration it cannot
//! finish.

use crate::autograd::MixedPrecisionConfig;
use crate::device::{Backend, Device};
use crate::distill::DistillWeights;
use crate::error::{DistilarError, Result};
use crate::eval::EvalMetric;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Full configuration of a distillation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistillConfig {
    /// Directory holding the teacher's `model.safetensors` and `vocab.txt`.
    pub teacher_path: PathBuf,
    /// CSV dataset with `type` and `description` columns.
    pub data_path: PathBuf,
    /// Directory checkpoints are written into.
    pub output_dir: PathBuf,
    /// Dataset tag recorded in checkpoint filenames.
    pub dataset: String,
    /// Optional pre-distillation student weights, loaded non-strictly.
    pub predistill_path: Option<PathBuf>,
    /// Augment the training split with word-dropout variants.
    pub augment: bool,

    pub seed: u64,
    pub batch_size: usize,
    pub lr: f32,
    pub epochs: usize,
    pub label_num: usize,
    pub max_length: usize,
    pub dim: usize,
    pub depth: usize,

    pub num_steps: usize,
    pub tau: f32,
    pub threshold: f32,
    pub ignored_layers: usize,

    pub ce_weight: f32,
    pub emb_weight: f32,
    pub logit_weight: f32,
    pub rep_weight: f32,

    /// Checkpoint-selection metric, `acc` or `mcc`.
    pub metric: String,
    /// `cpu` or `cuda:<index>`.
    pub device: String,
    /// Enable fp16 loss scaling.
    pub fp16: bool,
}

impl Default for DistillConfig {
    fn default() -> Self {
        Self {
            teacher_path: PathBuf::from("teacher"),
            data_path: PathBuf::from("dataset.csv"),
            output_dir: PathBuf::from("checkpoints"),
            dataset: "threat".to_string(),
            predistill_path: None,
            augment: false,
            seed: 42,
            batch_size: 4,
            lr: 1e-2,
            epochs: 100,
            label_num: 10,
            max_length: 64,
            dim: 768,
            depth: 6,
            num_steps: 32,
            tau: 10.0,
            threshold: 1.0,
            ignored_layers: 1,
            ce_weight: 0.0,
            emb_weight: 1.0,
            logit_weight: 1.0,
            rep_weight: 5.0,
            metric: "acc".to_string(),
            device: "cpu".to_string(),
            fp16: false,
        }
    }
}

impl DistillConfig {
    /// Validate every field. Called once before any work starts.
    pub fn validate(&self) -> Result<()> {
        fn positive(field: &str, value: usize) -> Result<()> {
            if value == 0 {
                return Err(DistilarError::config(
                    field,
                    "must be greater than zero",
                    format!("set --{} to a positive value", field.replace('_', "-")),
                ));
            }
            Ok(())
        }

        positive("batch_size", self.batch_size)?;
        positive("epochs", self.epochs)?;
        positive("label_num", self.label_num)?;
        positive("max_length", self.max_length)?;
        positive("dim", self.dim)?;
        positive("depth", self.depth)?;
        positive("num_steps", self.num_steps)?;

        if !(self.lr > 0.0) {
            return Err(DistilarError::config(
                "lr",
                format!("learning rate {} is not positive", self.lr),
                "set --lr to a positive value such as 1e-2",
            ));
        }
        if !(self.tau > 1.0) {
            return Err(DistilarError::config(
                "tau",
                format!("membrane time constant {} must exceed 1", self.tau),
                "set --tau above 1 so the leak factor stays in (0, 1)",
            ));
        }
        if !(self.threshold > 0.0) {
            return Err(DistilarError::config(
                "threshold",
                format!("firing threshold {} is not positive", self.threshold),
                "set --common-thr to a positive value such as 1.0",
            ));
        }
        if self.ignored_layers >= self.depth {
            return Err(DistilarError::config(
                "ignored_layers",
                format!(
                    "ignoring {} layers leaves no representation pairs at depth {}",
                    self.ignored_layers, self.depth
                ),
                "set --ignored-layers below --depths",
            ));
        }
        for (name, w) in [
            ("ce_weight", self.ce_weight),
            ("emb_weight", self.emb_weight),
            ("logit_weight", self.logit_weight),
            ("rep_weight", self.rep_weight),
        ] {
            if !(w >= 0.0) {
                return Err(DistilarError::config(
                    name,
                    format!("loss weight {w} must be non-negative"),
                    "use 0 to disable a term, positive values to weight it",
                ));
            }
        }

        self.eval_metric()?;
        self.device.parse::<Device>()?;
        Ok(())
    }

    pub fn eval_metric(&self) -> Result<EvalMetric> {
        self.metric.parse()
    }

    pub fn loss_weights(&self) -> DistillWeights {
        DistillWeights {
            ce: self.ce_weight,
            emb: self.emb_weight,
            logit: self.logit_weight,
            rep: self.rep_weight,
        }
    }

    /// Device and precision backend for this run.
    pub fn backend(&self) -> Result<Backend> {
        let device = self.device.parse::<Device>()?;
        let precision =
            if self.fp16 { MixedPrecisionConfig::fp16() } else { MixedPrecisionConfig::fp32() };
        Ok(Backend::new(device, precision))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        DistillConfig::default().validate().unwrap();
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let config = DistillConfig { batch_size: 0, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tau_at_or_below_one_rejected() {
        let config = DistillConfig { tau: 1.0, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ignored_layers_must_leave_pairs() {
        let config = DistillConfig { depth: 2, ignored_layers: 2, ..Default::default() };
        let err = config.validate().unwrap_err();
        assert!(err.is_user_error());
    }

    #[test]
    fn test_negative_loss_weight_rejected() {
        let config = DistillConfig { rep_weight: -1.0, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_metric_rejected() {
        let config = DistillConfig { metric: "f1".to_string(), ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backend_respects_fp16_flag() {
        let config = DistillConfig { fp16: true, ..Default::default() };
        let backend = config.backend().unwrap();
        assert!(backend.precision().is_mixed());
    }

    #[test]
    fn test_config_json_round_trip() {
        let config = DistillConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: DistillConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.dim, config.dim);
        assert_eq!(back.metric, config.metric);
    }
}

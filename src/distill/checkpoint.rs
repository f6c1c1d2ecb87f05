//! Best-metric checkpointing.
//!
//! A checkpoint is written whenever the epoch's validation metric ties or
//! beats the best seen so far. Nothing is rotated or deleted; the filename
//! carries the full run signature so checkpoints from different
//! hyperparameter settings never collide.

use crate::config::DistillConfig;
use crate::error::{DistilarError, Result};
use crate::models::weights::save_safetensors;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Tracks the best validation metric across epochs.
///
/// A tie with the current best qualifies: a later epoch matching the record
/// is the more-trained model and is worth keeping.
#[derive(Debug, Default)]
pub struct BestTracker {
    best: Option<f32>,
}

impl BestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn best(&self) -> Option<f32> {
        self.best
    }

    /// Record a metric value; returns whether it ties or beats the best.
    pub fn observe(&mut self, metric: f32) -> bool {
        let qualifies = self.best.map_or(true, |b| metric >= b);
        if self.best.map_or(true, |b| metric > b) {
            self.best = Some(metric);
        }
        qualifies
    }
}

/// Everything that identifies one saved checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSignature {
    pub dataset: String,
    pub epoch: usize,
    pub metric: String,
    pub metric_value: f32,
    pub seed: u64,
    pub batch_size: usize,
    pub lr: f32,
    pub epochs: usize,
    pub label_num: usize,
    pub depth: usize,
    pub max_length: usize,
    pub dim: usize,
    pub num_steps: usize,
    pub tau: f32,
    pub threshold: f32,
    pub ignored_layers: usize,
    pub ce_weight: f32,
    pub emb_weight: f32,
    pub logit_weight: f32,
    pub rep_weight: f32,
}

impl RunSignature {
    pub fn from_config(config: &DistillConfig, epoch: usize, metric_value: f32) -> Self {
        Self {
            dataset: config.dataset.clone(),
            epoch,
            metric: config.metric.clone(),
            metric_value,
            seed: config.seed,
            batch_size: config.batch_size,
            lr: config.lr,
            epochs: config.epochs,
            label_num: config.label_num,
            depth: config.depth,
            max_length: config.max_length,
            dim: config.dim,
            num_steps: config.num_steps,
            tau: config.tau,
            threshold: config.threshold,
            ignored_layers: config.ignored_layers,
            ce_weight: config.ce_weight,
            emb_weight: config.emb_weight,
            logit_weight: config.logit_weight,
            rep_weight: config.rep_weight,
        }
    }

    /// Filename stem encoding the full signature.
    pub fn file_stem(&self) -> String {
        format!(
            "{}_ep{}_{}{:.4}_seed{}_bs{}_lr{}_epochs{}_labels{}_depth{}_len{}_dim{}_T{}_tau{}_thr{}_ign{}_ce{}_emb{}_kd{}_rep{}",
            self.dataset,
            self.epoch,
            self.metric,
            self.metric_value,
            self.seed,
            self.batch_size,
            self.lr,
            self.epochs,
            self.label_num,
            self.depth,
            self.max_length,
            self.dim,
            self.num_steps,
            self.tau,
            self.threshold,
            self.ignored_layers,
            self.ce_weight,
            self.emb_weight,
            self.logit_weight,
            self.rep_weight,
        )
    }

    pub fn model_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.safetensors", self.file_stem()))
    }

    pub fn sidecar_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.json", self.file_stem()))
    }
}

/// Write the student weights plus a JSON sidecar describing the run.
pub fn save_checkpoint(
    dir: &Path,
    signature: &RunSignature,
    weights: &[(String, Vec<f32>, Vec<usize>)],
) -> Result<PathBuf> {
    let model_path = signature.model_path(dir);
    save_safetensors(weights, &model_path)?;

    let sidecar = serde_json::to_string_pretty(signature).map_err(|e| {
        DistilarError::io(
            format!("serializing run signature for {}", model_path.display()),
            std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        )
    })?;
    let sidecar_path = signature.sidecar_path(dir);
    std::fs::write(&sidecar_path, sidecar)
        .map_err(|e| DistilarError::io(format!("writing {}", sidecar_path.display()), e))?;

    Ok(model_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_ties_qualify() {
        let mut tracker = BestTracker::new();
        let decisions: Vec<bool> =
            [0.5, 0.6, 0.55, 0.6].iter().map(|&m| tracker.observe(m)).collect();
        assert_eq!(decisions, vec![true, true, false, true]);
        assert_eq!(tracker.best(), Some(0.6));
    }

    #[test]
    fn test_first_observation_always_qualifies() {
        let mut tracker = BestTracker::new();
        assert!(tracker.observe(0.0));
    }

    #[test]
    fn test_file_stem_carries_hyperparameters() {
        let config = DistillConfig::default();
        let sig = RunSignature::from_config(&config, 3, 0.8125);
        let stem = sig.file_stem();
        assert!(stem.starts_with("threat_ep3_acc0.8125"));
        assert!(stem.contains("seed42"));
        assert!(stem.contains("tau10"));
        assert!(stem.contains("rep5"));
    }

    #[test]
    fn test_distinct_epochs_get_distinct_paths() {
        let config = DistillConfig::default();
        let a = RunSignature::from_config(&config, 1, 0.5);
        let b = RunSignature::from_config(&config, 2, 0.5);
        assert_ne!(a.file_stem(), b.file_stem());
    }

    #[test]
    fn test_save_writes_model_and_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let config = DistillConfig::default();
        let sig = RunSignature::from_config(&config, 0, 0.5);
        let weights =
            vec![("emb.weight".to_string(), vec![1.0f32, 2.0, 3.0, 4.0], vec![2, 2])];

        let model_path = save_checkpoint(dir.path(), &sig, &weights).unwrap();
        assert!(model_path.exists());

        let sidecar = std::fs::read_to_string(sig.sidecar_path(dir.path())).unwrap();
        let parsed: RunSignature = serde_json::from_str(&sidecar).unwrap();
        assert_eq!(parsed.epoch, 0);
        assert_eq!(parsed.dataset, "threat");
    }
}

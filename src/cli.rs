//! Command-line surface and logging.

use crate::config::DistillConfig;
use clap::Parser;
use std::fmt;
use std::path::PathBuf;

/// Log severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Write a log line to stderr, keeping stdout clean for results.
pub fn log(level: LogLevel, message: &str) {
    eprintln!("[destilar][{level}] {message}");
}

/// Distill a frozen transformer classifier into a spiking student.
#[derive(Debug, Parser)]
#[command(name = "destilar", version, about)]
pub struct Cli {
    /// Directory with the teacher's model.safetensors and vocab.txt
    #[arg(long)]
    pub teacher_path: PathBuf,

    /// CSV dataset with `type` and `description` columns
    #[arg(long)]
    pub data_path: PathBuf,

    /// Directory to write checkpoints into
    #[arg(long, default_value = "checkpoints")]
    pub output_dir: PathBuf,

    /// Dataset tag recorded in checkpoint filenames
    #[arg(long, default_value = "threat")]
    pub dataset: String,

    /// Pre-distillation student weights to seed from (non-strict load)
    #[arg(long)]
    pub predistill_path: Option<PathBuf>,

    /// Augment the training split with word-dropout variants
    #[arg(long)]
    pub augment: bool,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    #[arg(long, default_value_t = 4)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 1e-2)]
    pub lr: f32,

    #[arg(long, default_value_t = 100)]
    pub epochs: usize,

    /// Number of output classes
    #[arg(long, default_value_t = 10)]
    pub label_num: usize,

    /// Token sequence length after padding/truncation
    #[arg(long, default_value_t = 64)]
    pub max_length: usize,

    /// Hidden width, shared with the teacher
    #[arg(long, default_value_t = 768)]
    pub dim: usize,

    /// Number of spiking layers
    #[arg(long, default_value_t = 6)]
    pub depths: usize,

    /// Simulation timesteps per forward pass
    #[arg(long, default_value_t = 32)]
    pub num_step: usize,

    /// Membrane time constant
    #[arg(long, default_value_t = 10.0)]
    pub tau: f32,

    /// Firing threshold
    #[arg(long, default_value_t = 1.0)]
    pub common_thr: f32,

    /// Leading layers excluded from the representation loss
    #[arg(long, default_value_t = 1)]
    pub ignored_layers: usize,

    #[arg(long, default_value_t = 0.0)]
    pub ce_weight: f32,

    #[arg(long, default_value_t = 1.0)]
    pub emb_weight: f32,

    #[arg(long, default_value_t = 1.0)]
    pub logit_weight: f32,

    #[arg(long, default_value_t = 5.0)]
    pub rep_weight: f32,

    /// Checkpoint-selection metric: acc or mcc
    #[arg(long, default_value = "acc")]
    pub metric: String,

    /// Compute device: cpu or cuda:<index>
    #[arg(long, default_value = "cpu")]
    pub device: String,

    /// Enable fp16 loss scaling
    #[arg(long)]
    pub fp16: bool,
}

impl Cli {
    pub fn into_config(self) -> DistillConfig {
        DistillConfig {
            teacher_path: self.teacher_path,
            data_path: self.data_path,
            output_dir: self.output_dir,
            dataset: self.dataset,
            predistill_path: self.predistill_path,
            augment: self.augment,
            seed: self.seed,
            batch_size: self.batch_size,
            lr: self.lr,
            epochs: self.epochs,
            label_num: self.label_num,
            max_length: self.max_length,
            dim: self.dim,
            depth: self.depths,
            num_steps: self.num_step,
            tau: self.tau,
            threshold: self.common_thr,
            ignored_layers: self.ignored_layers,
            ce_weight: self.ce_weight,
            emb_weight: self.emb_weight,
            logit_weight: self.logit_weight,
            rep_weight: self.rep_weight,
            metric: self.metric,
            device: self.device,
            fp16: self.fp16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_run_defaults() {
        let cli = Cli::parse_from(["destilar", "--teacher-path", "t", "--data-path", "d.csv"]);
        let config = cli.into_config();
        let defaults = DistillConfig::default();
        assert_eq!(config.seed, defaults.seed);
        assert_eq!(config.depth, defaults.depth);
        assert_eq!(config.num_steps, defaults.num_steps);
        assert_eq!(config.rep_weight, defaults.rep_weight);
        assert_eq!(config.metric, defaults.metric);
    }

    #[test]
    fn test_overrides_flow_through() {
        let cli = Cli::parse_from([
            "destilar",
            "--teacher-path",
            "t",
            "--data-path",
            "d.csv",
            "--depths",
            "2",
            "--num-step",
            "8",
            "--common-thr",
            "0.5",
            "--metric",
            "mcc",
            "--fp16",
        ]);
        let config = cli.into_config();
        assert_eq!(config.depth, 2);
        assert_eq!(config.num_steps, 8);
        assert_eq!(config.threshold, 0.5);
        assert_eq!(config.metric, "mcc");
        assert!(config.fp16);
    }

    #[test]
    fn test_cli_asserts() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}

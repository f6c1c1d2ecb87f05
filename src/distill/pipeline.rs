//! The distillation training loop.
//!
//! One `Distiller` owns both models and everything that drives an epoch:
//! tokenizer, objective, optimizer, schedule, loss scaler, and the
//! best-metric tracker. Fatal compatibility checks (label count, vocabulary,
//! layer alignment) all run at construction, never mid-run.

use crate::cli::{log, LogLevel};
use crate::config::DistillConfig;
use crate::data::{self, Example, Splits};
use crate::distill::checkpoint::{save_checkpoint, BestTracker, RunSignature};
use crate::distill::loss::{DistillLoss, LossTerms};
use crate::error::{DistilarError, Result};
use crate::eval::EvalMetric;
use crate::models::{
    FrozenTeacher, ScoredSequenceModel, SpikingStudent, StudentConfig,
};
use crate::optim::{AdamW, CosineAnnealingLR, LRScheduler, Optimizer};
use crate::autograd::GradScaler;
use crate::tokenizer::Tokenizer;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;

/// Per-epoch training summary: mean loss terms and step accounting.
#[derive(Debug, Clone, Copy)]
pub struct EpochStats {
    pub epoch: usize,
    pub mean: LossTerms,
    pub batches: usize,
    /// Optimizer steps skipped because of gradient overflow.
    pub skipped_steps: usize,
    pub lr: f32,
}

/// Outcome of a full run.
#[derive(Debug)]
pub struct RunReport {
    pub best_valid: Option<f32>,
    pub test_metric: f32,
    pub checkpoints: Vec<PathBuf>,
}

/// Owns a teacher/student pair and trains the student to completion.
pub struct Distiller {
    config: DistillConfig,
    teacher: FrozenTeacher,
    student: SpikingStudent,
    tokenizer: Tokenizer,
    loss: DistillLoss,
    optimizer: AdamW,
    scheduler: CosineAnnealingLR,
    scaler: GradScaler,
    metric: EvalMetric,
    tracker: BestTracker,
    rng: StdRng,
}

impl Distiller {
    /// Build a distiller, loading the teacher and validating every
    /// compatibility constraint up front.
    pub fn new(config: DistillConfig) -> Result<Self> {
        config.validate()?;

        let tokenizer = Tokenizer::from_vocab_file(&config.teacher_path.join("vocab.txt"))?;
        let teacher = FrozenTeacher::from_dir(&config.teacher_path, config.label_num)?;

        if teacher.hidden_dim() != config.dim {
            return Err(DistilarError::ShapeMismatch {
                expected: vec![config.dim],
                actual: vec![teacher.hidden_dim()],
            });
        }
        if teacher.vocab_size() != tokenizer.vocab_size() {
            return Err(DistilarError::VocabMismatch {
                teacher: teacher.vocab_size(),
                student: tokenizer.vocab_size(),
            });
        }

        let loss = DistillLoss::new(config.loss_weights(), config.ignored_layers);
        // Alignment failures must surface before the first epoch.
        loss.align_layers(teacher.num_layers(), config.depth)?;

        let student = SpikingStudent::new(
            StudentConfig {
                vocab_size: tokenizer.vocab_size(),
                dim: config.dim,
                depth: config.depth,
                num_classes: config.label_num,
                num_steps: config.num_steps,
                tau: config.tau,
                threshold: config.threshold,
            },
            config.seed,
        );

        if let Some(path) = &config.predistill_path {
            let matched = student.load_partial(path)?;
            log(
                LogLevel::Info,
                &format!("seeded {} tensor(s) from {}", matched, path.display()),
            );
        }

        let optimizer = AdamW::default_params(config.lr);
        let scheduler = CosineAnnealingLR::default_min(config.lr, config.epochs);
        let scaler = config.backend()?.grad_scaler();
        let metric = config.eval_metric()?;
        let rng = StdRng::seed_from_u64(config.seed);

        Ok(Self {
            config,
            teacher,
            student,
            tokenizer,
            loss,
            optimizer,
            scheduler,
            scaler,
            metric,
            tracker: BestTracker::new(),
            rng,
        })
    }

    pub fn student(&self) -> &SpikingStudent {
        &self.student
    }

    /// Load the dataset, split it, and train to completion.
    pub fn run(&mut self) -> Result<RunReport> {
        let weights = self.loss.weights();
        log(
            LogLevel::Info,
            &format!(
                "run: dataset '{}' seed {} device {} depth {} dim {} T {} tau {} thr {} metric {} \
                 weights ce {} emb {} kd {} rep {}",
                self.config.dataset,
                self.config.seed,
                self.config.device,
                self.config.depth,
                self.config.dim,
                self.config.num_steps,
                self.config.tau,
                self.config.threshold,
                self.metric,
                weights.ce,
                weights.emb,
                weights.logit,
                weights.rep,
            ),
        );

        let examples = data::load_csv(&self.config.data_path)?;
        let mut splits = data::split_dataset(examples, self.config.seed);
        if self.config.augment {
            let variants = data::augment_examples(&splits.train, &mut self.rng);
            log(LogLevel::Info, &format!("augmentation added {} variant(s)", variants.len()));
            splits.train.extend(variants);
        }
        log(
            LogLevel::Info,
            &format!(
                "dataset '{}': {} train / {} valid / {} test",
                self.config.dataset,
                splits.train.len(),
                splits.valid.len(),
                splits.test.len()
            ),
        );
        self.run_on_splits(&splits)
    }

    /// Train on pre-made splits. Checkpoints follow the validation metric;
    /// the test split is scored once at the end.
    pub fn run_on_splits(&mut self, splits: &Splits) -> Result<RunReport> {
        let mut checkpoints = Vec::new();

        for epoch in 0..self.config.epochs {
            let stats = self.train_epoch(epoch, &splits.train)?;
            let valid_metric = self.evaluate(&splits.valid)?;
            log(
                LogLevel::Info,
                &format!(
                    "epoch {}: loss {:.4} (ce {:.4} emb {:.4} kd {:.4} rep {:.4}) valid {} {:.4} lr {:.6}{}",
                    epoch,
                    stats.mean.total,
                    stats.mean.ce,
                    stats.mean.emb,
                    stats.mean.logit,
                    stats.mean.rep,
                    self.metric,
                    valid_metric,
                    stats.lr,
                    if stats.skipped_steps > 0 {
                        format!(" skipped {}", stats.skipped_steps)
                    } else {
                        String::new()
                    },
                ),
            );

            if self.tracker.observe(valid_metric) {
                let signature = RunSignature::from_config(&self.config, epoch, valid_metric);
                let path =
                    save_checkpoint(&self.config.output_dir, &signature, &self.student.state_dict())?;
                log(LogLevel::Info, &format!("saved checkpoint {}", path.display()));
                checkpoints.push(path);
            }

            // One schedule step per epoch.
            self.scheduler.step();
            self.scheduler.apply(&mut self.optimizer);
        }

        let test_metric = self.evaluate(&splits.test)?;
        log(
            LogLevel::Info,
            &format!("test {} {:.4}", self.metric, test_metric),
        );

        Ok(RunReport { best_valid: self.tracker.best(), test_metric, checkpoints })
    }

    /// One pass over the training split.
    pub fn train_epoch(&mut self, epoch: usize, train: &[Example]) -> Result<EpochStats> {
        self.student.train();
        let batches = data::batches(train, self.config.batch_size, Some(&mut self.rng));
        let mut params = self.student.parameters();

        let mut sums = LossTerms::default();
        let mut skipped = 0usize;
        for batch in &batches {
            self.student.reset_state();
            self.optimizer.zero_grad(&mut params);

            // One tokenization feeds both forward passes.
            let input = self.tokenizer.encode_batch(&batch.texts, self.config.max_length);
            let teacher_out = self.teacher.forward(&input)?;
            let student_out = self.student.forward(&input);

            let terms = self.loss.compute(
                &student_out,
                &self.student.embedding_weights(),
                &teacher_out,
                self.teacher.embedding_weights(),
                &batch.labels,
                self.scaler.scale(),
            )?;

            if let Some(op) = student_out.logits.backward_op() {
                op.backward();
            }

            let grads_valid = self.scaler.unscale_and_check(&params);
            if grads_valid {
                self.optimizer.step(&mut params);
            } else {
                skipped += 1;
            }
            self.scaler.update(grads_valid);

            sums.ce += terms.ce;
            sums.emb += terms.emb;
            sums.logit += terms.logit;
            sums.rep += terms.rep;
            sums.total += terms.total;
        }

        let n = batches.len().max(1) as f32;
        Ok(EpochStats {
            epoch,
            mean: LossTerms {
                ce: sums.ce / n,
                emb: sums.emb / n,
                logit: sums.logit / n,
                rep: sums.rep / n,
                total: sums.total / n,
            },
            batches: batches.len(),
            skipped_steps: skipped,
            lr: self.optimizer.lr(),
        })
    }

    /// Score a split with the configured metric. Inference mode, no shuffle.
    pub fn evaluate(&self, examples: &[Example]) -> Result<f32> {
        self.student.eval();

        let mut predictions = Vec::with_capacity(examples.len());
        let mut labels = Vec::with_capacity(examples.len());
        for batch in data::batches(examples, self.config.batch_size, None) {
            self.student.reset_state();
            let input = self.tokenizer.encode_batch(&batch.texts, self.config.max_length);
            let out = self.student.forward(&input);

            let mean = out.mean_logits();
            for b in 0..out.batch_size {
                // First index wins ties.
                let mut pred = 0;
                let mut best = f32::NEG_INFINITY;
                for (c, &v) in mean.row(b).iter().enumerate() {
                    if v > best {
                        best = v;
                        pred = c;
                    }
                }
                predictions.push(pred);
            }
            labels.extend_from_slice(&batch.labels);
        }
        self.student.reset_state();

        Ok(self.metric.compute(&predictions, &labels))
    }
}

//! The four-term distillation objective.
//!
//! Each term produces a reported scalar and seeds an analytic gradient into
//! the student output (or embedding) grad cells. Seeded gradients carry the
//! term weight and the loss scale, so the fused backward pass that follows
//! needs no knowledge of the objective.

use crate::autograd::Tensor;
use crate::error::{DistilarError, Result};
use crate::models::{StudentOutput, TeacherOutput};
use ndarray::{Array1, Array2};

/// Relative weights of the loss terms.
#[derive(Debug, Clone, Copy)]
pub struct DistillWeights {
    /// Cross-entropy against gold labels.
    pub ce: f32,
    /// MSE between embedding tables.
    pub emb: f32,
    /// KL divergence from the teacher's output distribution.
    pub logit: f32,
    /// Per-layer representation MSE.
    pub rep: f32,
}

impl Default for DistillWeights {
    fn default() -> Self {
        Self { ce: 0.0, emb: 1.0, logit: 1.0, rep: 5.0 }
    }
}

/// Unweighted scalar values of each term plus the weighted total.
#[derive(Debug, Clone, Copy, Default)]
pub struct LossTerms {
    pub ce: f32,
    pub emb: f32,
    pub logit: f32,
    pub rep: f32,
    pub total: f32,
}

/// Distillation objective bound to a weighting and a layer-alignment policy.
pub struct DistillLoss {
    weights: DistillWeights,
    ignored_layers: usize,
}

impl DistillLoss {
    pub fn new(weights: DistillWeights, ignored_layers: usize) -> Self {
        Self { weights, ignored_layers }
    }

    pub fn weights(&self) -> DistillWeights {
        self.weights
    }

    /// Map each student layer to an index into the teacher's hidden-state
    /// stack (where index 0 is the embedding output).
    ///
    /// The teacher's transformer layers are subsampled with a uniform stride
    /// starting at index 1 (the first layer above the embedding output), so
    /// each student layer pairs with the first teacher layer of its stride
    /// group; a depth that does not divide the teacher layer count has no
    /// unambiguous alignment and is rejected.
    pub fn align_layers(&self, teacher_layers: usize, student_depth: usize) -> Result<Vec<usize>> {
        if student_depth == 0 || teacher_layers == 0 {
            return Err(DistilarError::StackAlignment {
                message: format!(
                    "teacher has {teacher_layers} layers, student has {student_depth}"
                ),
            });
        }
        if teacher_layers % student_depth != 0 {
            return Err(DistilarError::StackAlignment {
                message: format!(
                    "student depth {student_depth} does not divide teacher layer count {teacher_layers}"
                ),
            });
        }
        if self.ignored_layers >= student_depth {
            return Err(DistilarError::StackAlignment {
                message: format!(
                    "ignoring {} layers leaves no pairs at depth {student_depth}",
                    self.ignored_layers
                ),
            });
        }

        let stride = teacher_layers / student_depth;
        Ok((0..student_depth).map(|i| i * stride + 1).collect())
    }

    /// Compute all four terms and seed gradients.
    ///
    /// `loss_scale` is the mixed-precision scale; it multiplies every seeded
    /// gradient while the reported scalars stay unscaled. Terms with weight
    /// zero are reported but seed nothing.
    pub fn compute(
        &self,
        student: &StudentOutput,
        student_emb: &Tensor,
        teacher: &TeacherOutput,
        teacher_emb: &[f32],
        labels: &[usize],
        loss_scale: f32,
    ) -> Result<LossTerms> {
        let batch = student.batch_size;
        let classes = student.num_classes;
        if labels.len() != batch || teacher.logits.nrows() != batch {
            return Err(DistilarError::ShapeMismatch {
                expected: vec![batch],
                actual: vec![labels.len(), teacher.logits.nrows()],
            });
        }
        if teacher.logits.ncols() != classes {
            return Err(DistilarError::ShapeMismatch {
                expected: vec![batch, classes],
                actual: vec![batch, teacher.logits.ncols()],
            });
        }
        let rows = batch * student.seq_len;
        let dim = student.reps[0].len() / rows;

        let emb = self.embedding_term(student_emb, teacher_emb, dim, loss_scale)?;
        let (ce, logit) = self.logit_terms(student, teacher, labels, loss_scale);
        let rep = self.representation_term(student, teacher, loss_scale)?;

        let w = &self.weights;
        let total = w.ce * ce + w.emb * emb + w.logit * logit + w.rep * rep;
        Ok(LossTerms { ce, emb, logit, rep, total })
    }

    /// MSE between the student and teacher embedding tables.
    fn embedding_term(
        &self,
        student_emb: &Tensor,
        teacher_emb: &[f32],
        dim: usize,
        loss_scale: f32,
    ) -> Result<f32> {
        if student_emb.len() != teacher_emb.len() {
            return Err(DistilarError::VocabMismatch {
                teacher: teacher_emb.len() / dim.max(1),
                student: student_emb.len() / dim.max(1),
            });
        }

        let n = student_emb.len() as f32;
        let mut loss = 0.0f32;
        {
            let data = student_emb.data();
            for (s, &t) in data.iter().zip(teacher_emb) {
                let diff = s - t;
                loss += diff * diff;
            }
        }
        loss /= n;

        if self.weights.emb != 0.0 {
            let coeff = 2.0 / n * self.weights.emb * loss_scale;
            let data = student_emb.data();
            let grad: Array1<f32> = data
                .iter()
                .zip(teacher_emb)
                .map(|(s, &t)| (s - t) * coeff)
                .collect();
            drop(data);
            student_emb.accumulate_grad(grad);
        }
        Ok(loss)
    }

    /// Cross-entropy on the time-averaged logits and KL divergence from the
    /// teacher's distribution. Both share one softmax over the student mean.
    fn logit_terms(
        &self,
        student: &StudentOutput,
        teacher: &TeacherOutput,
        labels: &[usize],
        loss_scale: f32,
    ) -> (f32, f32) {
        let batch = student.batch_size;
        let classes = student.num_classes;
        let steps = student.time_steps;
        let inv_batch = 1.0 / batch as f32;

        let s_mean = student.mean_logits();
        let log_q = log_softmax_rows(&s_mean);
        let p_teacher = softmax_rows(&teacher.logits);

        let mut ce = 0.0f32;
        let mut kl = 0.0f32;
        // dL/d(s_mean) for the weighted ce + kl combination
        let mut g_mean = Array2::<f32>::zeros((batch, classes));
        for b in 0..batch {
            for c in 0..classes {
                let q = log_q[[b, c]].exp();
                let p = p_teacher[[b, c]];

                if c == labels[b] {
                    ce -= log_q[[b, c]] * inv_batch;
                }
                if p > 0.0 {
                    kl += p * (p.ln() - log_q[[b, c]]) * inv_batch;
                }

                let onehot = if c == labels[b] { 1.0 } else { 0.0 };
                let g_ce = (q - onehot) * inv_batch;
                let g_kl = (q - p) * inv_batch;
                g_mean[[b, c]] = self.weights.ce * g_ce + self.weights.logit * g_kl;
            }
        }

        if self.weights.ce != 0.0 || self.weights.logit != 0.0 {
            // The mean over timesteps spreads the gradient evenly.
            let coeff = loss_scale / steps as f32;
            let mut g_logits = Array1::<f32>::zeros(steps * batch * classes);
            for t in 0..steps {
                for b in 0..batch {
                    for c in 0..classes {
                        g_logits[(t * batch + b) * classes + c] = g_mean[[b, c]] * coeff;
                    }
                }
            }
            student.logits.accumulate_grad(g_logits);
        }

        (ce, kl)
    }

    /// Per-layer MSE between time-averaged spike rates and the aligned
    /// teacher hidden states, summed over pairs and divided by batch size.
    fn representation_term(
        &self,
        student: &StudentOutput,
        teacher: &TeacherOutput,
        loss_scale: f32,
    ) -> Result<f32> {
        let depth = student.reps.len();
        let aligned = self.align_layers(teacher.hidden_states.len() - 1, depth)?;
        let inv_batch = 1.0 / student.batch_size as f32;

        let mut total = 0.0f32;
        for layer in self.ignored_layers..depth {
            let rep = &student.reps[layer];
            let target = &teacher.hidden_states[aligned[layer]];
            if rep.len() != target.len() {
                return Err(DistilarError::ShapeMismatch {
                    expected: vec![target.len()],
                    actual: vec![rep.len()],
                });
            }

            let n = rep.len() as f32;
            let mut mse = 0.0f32;
            {
                let data = rep.data();
                for (s, &t) in data.iter().zip(target) {
                    let diff = s - t;
                    mse += diff * diff;
                }
            }
            mse /= n;
            total += mse * inv_batch;

            if self.weights.rep != 0.0 {
                let coeff = 2.0 / n * inv_batch * self.weights.rep * loss_scale;
                let data = rep.data();
                let grad: Array1<f32> =
                    data.iter().zip(target).map(|(s, &t)| (s - t) * coeff).collect();
                drop(data);
                rep.accumulate_grad(grad);
            }
        }
        Ok(total)
    }
}

/// Row-wise softmax with the usual max-subtraction for stability.
pub fn softmax_rows(logits: &Array2<f32>) -> Array2<f32> {
    let mut out = log_softmax_rows(logits);
    out.mapv_inplace(f32::exp);
    out
}

/// Row-wise log-softmax.
pub fn log_softmax_rows(logits: &Array2<f32>) -> Array2<f32> {
    let mut out = logits.clone();
    for mut row in out.rows_mut() {
        let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let log_sum = row.iter().map(|&v| (v - max).exp()).sum::<f32>().ln();
        row.mapv_inplace(|v| v - max - log_sum);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SpikingStudent, StudentConfig};
    use crate::tokenizer::TokenizedInput;
    use approx::assert_relative_eq;
    use ndarray::arr2;

    fn student_config() -> StudentConfig {
        StudentConfig {
            vocab_size: 6,
            dim: 4,
            depth: 2,
            num_classes: 3,
            num_steps: 4,
            tau: 2.0,
            threshold: 0.5,
        }
    }

    fn forward_pair() -> (SpikingStudent, StudentOutput, TeacherOutput) {
        let student = SpikingStudent::new(student_config(), 42);
        let input = TokenizedInput {
            input_ids: arr2(&[[2usize, 3, 0], [4, 0, 0]]),
            attention_mask: arr2(&[[1.0f32, 1.0, 0.0], [1.0, 0.0, 0.0]]),
        };
        let out = student.forward(&input);

        // Teacher with 4 transformer layers so depth 2 aligns at stride 2.
        let rows_dim = 2 * 3 * 4;
        let teacher = TeacherOutput {
            logits: arr2(&[[1.0, 0.0, -1.0], [0.0, 2.0, 0.0]]),
            hidden_states: vec![vec![0.1f32; rows_dim]; 5],
            batch_size: 2,
            seq_len: 3,
        };
        (student, out, teacher)
    }

    #[test]
    fn test_alignment_stride_two() {
        let loss = DistillLoss::new(DistillWeights::default(), 1);
        let aligned = loss.align_layers(12, 6).unwrap();
        assert_eq!(aligned, vec![1, 3, 5, 7, 9, 11]);
    }

    #[test]
    fn test_alignment_skips_embedding_output() {
        let loss = DistillLoss::new(DistillWeights::default(), 0);
        for (layers, depth) in [(4usize, 2usize), (12, 4), (6, 6)] {
            let aligned = loss.align_layers(layers, depth).unwrap();
            assert_eq!(aligned[0], 1);
            assert!(aligned.iter().all(|&i| i >= 1 && i <= layers));
        }
    }

    #[test]
    fn test_alignment_rejects_non_divisible_depth() {
        let loss = DistillLoss::new(DistillWeights::default(), 0);
        assert!(matches!(
            loss.align_layers(12, 5),
            Err(DistilarError::StackAlignment { .. })
        ));
    }

    #[test]
    fn test_total_is_weighted_sum() {
        let weights = DistillWeights { ce: 0.5, emb: 1.0, logit: 2.0, rep: 3.0 };
        let loss = DistillLoss::new(weights, 1);
        let (student, out, teacher) = forward_pair();
        let teacher_emb = vec![0.0f32; 6 * 4];

        let terms = loss
            .compute(&out, &student.embedding_weights(), &teacher, &teacher_emb, &[0, 1], 1.0)
            .unwrap();
        let expected =
            0.5 * terms.ce + 1.0 * terms.emb + 2.0 * terms.logit + 3.0 * terms.rep;
        assert_relative_eq!(terms.total, expected, epsilon = 1e-6);
    }

    #[test]
    fn test_all_zero_weights_give_zero_total() {
        let weights = DistillWeights { ce: 0.0, emb: 0.0, logit: 0.0, rep: 0.0 };
        let loss = DistillLoss::new(weights, 1);
        let (student, out, teacher) = forward_pair();
        let teacher_emb = vec![0.0f32; 6 * 4];

        let terms = loss
            .compute(&out, &student.embedding_weights(), &teacher, &teacher_emb, &[0, 1], 1.0)
            .unwrap();
        assert_eq!(terms.total, 0.0);
        // Nothing seeded either.
        assert!(out.logits.grad().is_none());
        assert!(student.embedding_weights().grad().is_none());
    }

    #[test]
    fn test_kl_is_zero_for_identical_distributions() {
        let loss = DistillLoss::new(DistillWeights::default(), 1);
        let (student, out, _) = forward_pair();

        // Teacher logits equal to the student's time-averaged logits.
        let teacher = TeacherOutput {
            logits: out.mean_logits(),
            hidden_states: vec![vec![0.1f32; 2 * 3 * 4]; 5],
            batch_size: 2,
            seq_len: 3,
        };
        let teacher_emb = vec![0.0f32; 6 * 4];
        let terms = loss
            .compute(&out, &student.embedding_weights(), &teacher, &teacher_emb, &[0, 1], 1.0)
            .unwrap();
        assert_relative_eq!(terms.logit, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_ce_for_uniform_logits_is_ln_classes() {
        let logits = arr2(&[[0.0f32, 0.0, 0.0]]);
        let log_q = log_softmax_rows(&logits);
        assert_relative_eq!(-log_q[[0, 0]], (3.0f32).ln(), epsilon = 1e-6);
    }

    #[test]
    fn test_embedding_identical_tables_score_zero() {
        let loss = DistillLoss::new(DistillWeights::default(), 1);
        let (student, out, teacher) = forward_pair();
        let teacher_emb = student.embedding_weights().to_vec();

        let terms = loss
            .compute(&out, &student.embedding_weights(), &teacher, &teacher_emb, &[0, 1], 1.0)
            .unwrap();
        assert_relative_eq!(terms.emb, 0.0);
    }

    #[test]
    fn test_vocab_mismatch_rejected() {
        let loss = DistillLoss::new(DistillWeights::default(), 1);
        let (student, out, teacher) = forward_pair();
        let teacher_emb = vec![0.0f32; 8 * 4]; // vocab 8 vs student's 6

        assert!(matches!(
            loss.compute(&out, &student.embedding_weights(), &teacher, &teacher_emb, &[0, 1], 1.0),
            Err(DistilarError::VocabMismatch { teacher: 8, student: 6 })
        ));
    }

    #[test]
    fn test_gradients_seeded_on_active_terms() {
        let loss = DistillLoss::new(DistillWeights::default(), 1);
        let (student, out, teacher) = forward_pair();
        let teacher_emb = vec![0.0f32; 6 * 4];

        loss.compute(&out, &student.embedding_weights(), &teacher, &teacher_emb, &[0, 1], 1.0)
            .unwrap();

        assert!(out.logits.grad().is_some());
        assert!(student.embedding_weights().grad().is_some());
        // Ignored first layer gets nothing, the rest do.
        assert!(out.reps[0].grad().is_none());
        assert!(out.reps[1].grad().is_some());
    }

    #[test]
    fn test_loss_scale_multiplies_seeded_gradients() {
        let (student_a, out_a, teacher) = forward_pair();
        let teacher_emb = vec![0.0f32; 6 * 4];
        let loss = DistillLoss::new(DistillWeights::default(), 1);
        loss.compute(&out_a, &student_a.embedding_weights(), &teacher, &teacher_emb, &[0, 1], 1.0)
            .unwrap();

        let (student_b, out_b, teacher_b) = forward_pair();
        loss.compute(&out_b, &student_b.embedding_weights(), &teacher_b, &teacher_emb, &[0, 1], 4.0)
            .unwrap();

        let g1 = student_a.embedding_weights().grad().unwrap();
        let g4 = student_b.embedding_weights().grad().unwrap();
        for (a, b) in g1.iter().zip(g4.iter()) {
            assert_relative_eq!(*b, 4.0 * *a, epsilon = 1e-5);
        }
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn softmax_rows_sum_to_one(
                vals in proptest::collection::vec(-10.0f32..10.0, 3..12)
            ) {
                let n = vals.len();
                let logits = Array2::from_shape_vec((1, n), vals).unwrap();
                let p = softmax_rows(&logits);
                let sum: f32 = p.iter().sum();
                prop_assert!((sum - 1.0).abs() < 1e-4);
            }

            #[test]
            fn kl_against_self_is_nonnegative_and_small(
                vals in proptest::collection::vec(-5.0f32..5.0, 4usize)
            ) {
                let logits = Array2::from_shape_vec((1, 4), vals).unwrap();
                let p = softmax_rows(&logits);
                let log_q = log_softmax_rows(&logits);
                let kl: f32 = (0..4)
                    .map(|c| p[[0, c]] * (p[[0, c]].ln() - log_q[[0, c]]))
                    .sum();
                prop_assert!(kl.abs() < 1e-4);
            }
        }
    }
}

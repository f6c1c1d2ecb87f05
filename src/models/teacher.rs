//! Frozen transformer teacher.
//!
//! The teacher is loaded once from a SafeTensors snapshot and never trains:
//! its weights live in plain buffers with no gradient storage, so nothing
//! can accumulate into them by construction.

use crate::error::{DistilarError, Result};
use crate::models::math::matmul;
use crate::models::weights::load_safetensors;
use crate::models::ScoredSequenceModel;
use crate::tokenizer::TokenizedInput;
use ndarray::Array2;
use std::path::Path;

/// One teacher forward pass over a batch.
pub struct TeacherOutput {
    /// Classification logits `[batch, classes]`.
    pub logits: Array2<f32>,
    /// Hidden-state stack, flattened `[batch * seq_len * dim]` per entry.
    /// Index 0 is the embedding output, indices `1..=num_layers` the
    /// transformer block outputs.
    pub hidden_states: Vec<Vec<f32>>,
    pub batch_size: usize,
    pub seq_len: usize,
}

/// A frozen sequence classifier used as the distillation source.
pub struct FrozenTeacher {
    embedding: Vec<f32>,       // [vocab, dim]
    layers: Vec<Vec<f32>>,     // [dim, dim] each
    classifier: Vec<f32>,      // [dim, classes]
    vocab_size: usize,
    dim: usize,
    classes: usize,
}

impl FrozenTeacher {
    /// Load a teacher from `<dir>/model.safetensors`.
    ///
    /// Expects `embedding.weight [V, D]`, `layers.{i}.weight [D, D]` for a
    /// contiguous run of `i`, and `classifier.weight [D, C]`. The classifier
    /// width must match `expected_classes`.
    pub fn from_dir(dir: &Path, expected_classes: usize) -> Result<Self> {
        let path = dir.join("model.safetensors");
        let (weights, shapes) = load_safetensors(&path)?;

        let want = |name: &str| -> Result<(Vec<f32>, Vec<usize>)> {
            match (weights.get(name), shapes.get(name)) {
                (Some(w), Some(s)) => Ok((w.clone(), s.clone())),
                _ => Err(DistilarError::MalformedCheckpoint {
                    path: path.clone(),
                    message: format!("missing tensor '{name}'"),
                }),
            }
        };

        let (embedding, emb_shape) = want("embedding.weight")?;
        if emb_shape.len() != 2 {
            return Err(DistilarError::MalformedCheckpoint {
                path: path.clone(),
                message: format!("embedding.weight has rank {}, expected 2", emb_shape.len()),
            });
        }
        let (vocab_size, dim) = (emb_shape[0], emb_shape[1]);

        let mut layers = Vec::new();
        while weights.contains_key(&format!("layers.{}.weight", layers.len())) {
            let name = format!("layers.{}.weight", layers.len());
            let (w, shape) = want(&name)?;
            if shape != [dim, dim] {
                return Err(DistilarError::ShapeMismatch {
                    expected: vec![dim, dim],
                    actual: shape,
                });
            }
            layers.push(w);
        }
        if layers.is_empty() {
            return Err(DistilarError::MalformedCheckpoint {
                path: path.clone(),
                message: "no layers.N.weight tensors found".to_string(),
            });
        }

        let (classifier, head_shape) = want("classifier.weight")?;
        if head_shape.len() != 2 || head_shape[0] != dim {
            return Err(DistilarError::ShapeMismatch {
                expected: vec![dim, expected_classes],
                actual: head_shape,
            });
        }
        let classes = head_shape[1];
        if classes != expected_classes {
            return Err(DistilarError::LabelCountMismatch {
                teacher: classes,
                expected: expected_classes,
            });
        }

        Ok(Self { embedding, layers, classifier, vocab_size, dim, classes })
    }

    /// Build a teacher directly from weight buffers. Used by tests and by
    /// synthetic-teacher tooling.
    pub fn from_weights(
        embedding: Vec<f32>,
        layers: Vec<Vec<f32>>,
        classifier: Vec<f32>,
        vocab_size: usize,
        dim: usize,
        classes: usize,
    ) -> Result<Self> {
        if embedding.len() != vocab_size * dim {
            return Err(DistilarError::ShapeMismatch {
                expected: vec![vocab_size, dim],
                actual: vec![embedding.len() / dim.max(1), dim],
            });
        }
        for w in &layers {
            if w.len() != dim * dim {
                return Err(DistilarError::ShapeMismatch {
                    expected: vec![dim, dim],
                    actual: vec![w.len() / dim.max(1), dim],
                });
            }
        }
        if classifier.len() != dim * classes {
            return Err(DistilarError::ShapeMismatch {
                expected: vec![dim, classes],
                actual: vec![classifier.len() / classes.max(1), classes],
            });
        }
        Ok(Self { embedding, layers, classifier, vocab_size, dim, classes })
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// The raw embedding table, `[vocab, dim]` row-major.
    pub fn embedding_weights(&self) -> &[f32] {
        &self.embedding
    }

    /// Forward a tokenized batch. No gradient state is touched.
    pub fn forward(&self, input: &TokenizedInput) -> Result<TeacherOutput> {
        let batch_size = input.batch_size();
        let seq_len = input.seq_len();
        let rows = batch_size * seq_len;

        // Embedding lookup into [rows, dim].
        let mut hidden = vec![0.0f32; rows * self.dim];
        for (pos, &id) in input.input_ids.iter().enumerate() {
            if id >= self.vocab_size {
                return Err(DistilarError::VocabMismatch {
                    teacher: self.vocab_size,
                    student: id + 1,
                });
            }
            let src = &self.embedding[id * self.dim..(id + 1) * self.dim];
            hidden[pos * self.dim..(pos + 1) * self.dim].copy_from_slice(src);
        }

        let mut hidden_states = Vec::with_capacity(self.layers.len() + 1);
        hidden_states.push(hidden.clone());

        for weight in &self.layers {
            hidden = matmul(&hidden, weight, rows, self.dim, self.dim);
            for v in hidden.iter_mut() {
                *v = v.tanh();
            }
            hidden_states.push(hidden.clone());
        }

        // Attention-masked mean pool over positions, then the linear head.
        let mut pooled = vec![0.0f32; batch_size * self.dim];
        for b in 0..batch_size {
            let mut count = 0.0f32;
            for l in 0..seq_len {
                let m = input.attention_mask[[b, l]];
                if m == 0.0 {
                    continue;
                }
                count += m;
                let row = &hidden[(b * seq_len + l) * self.dim..(b * seq_len + l + 1) * self.dim];
                for (acc, &v) in pooled[b * self.dim..(b + 1) * self.dim].iter_mut().zip(row) {
                    *acc += v;
                }
            }
            let denom = count.max(1.0);
            for acc in pooled[b * self.dim..(b + 1) * self.dim].iter_mut() {
                *acc /= denom;
            }
        }

        let logits_flat = matmul(&pooled, &self.classifier, batch_size, self.dim, self.classes);
        let logits = Array2::from_shape_vec((batch_size, self.classes), logits_flat)
            .map_err(|_| DistilarError::ShapeMismatch {
                expected: vec![batch_size, self.classes],
                actual: vec![batch_size * self.classes],
            })?;

        Ok(TeacherOutput { logits, hidden_states, batch_size, seq_len })
    }
}

impl ScoredSequenceModel for FrozenTeacher {
    fn num_classes(&self) -> usize {
        self.classes
    }

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    fn hidden_dim(&self) -> usize {
        self.dim
    }
}

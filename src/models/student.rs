//! Temporally-encoded spiking student.
//!
//! Token embeddings drive a stack of leaky integrate-and-fire layers for a
//! fixed number of timesteps. Firing is a hard threshold on the forward pass
//! and an arctan surrogate on the backward pass; membrane reset is soft and
//! detached from the gradient. Each training forward installs one fused
//! backward node that replays the whole unrolled computation in reverse, so
//! gradients flow through time exactly once no matter how many loss terms
//! read the outputs.

use crate::autograd::{BackwardOp, Tensor};
use crate::error::Result;
use crate::models::math::{matmul, transpose};
use crate::models::weights::load_safetensors;
use crate::models::ScoredSequenceModel;
use crate::tokenizer::TokenizedInput;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::{Cell, RefCell};
use std::path::Path;
use std::rc::Rc;

/// Architecture and neuron hyperparameters of the spiking student.
#[derive(Debug, Clone, Copy)]
pub struct StudentConfig {
    pub vocab_size: usize,
    pub dim: usize,
    pub depth: usize,
    pub num_classes: usize,
    /// Simulation timesteps per forward pass.
    pub num_steps: usize,
    /// Membrane time constant.
    pub tau: f32,
    /// Firing threshold.
    pub threshold: f32,
}

/// Arctan surrogate derivative of the firing threshold, evaluated at the
/// membrane's distance from threshold.
fn surrogate_grad(x: f32) -> f32 {
    1.0 / (1.0 + (std::f32::consts::PI * x).powi(2))
}

/// One student forward pass over a batch.
pub struct StudentOutput {
    /// Time-averaged spike rates per layer, each `[batch * seq_len * dim]`.
    pub reps: Vec<Tensor>,
    /// Per-timestep classification logits, flat `[steps * batch * classes]`.
    pub logits: Tensor,
    pub batch_size: usize,
    pub seq_len: usize,
    pub time_steps: usize,
    pub num_classes: usize,
}

impl StudentOutput {
    /// Logits averaged over the time dimension, `[batch, classes]`.
    pub fn mean_logits(&self) -> Array2<f32> {
        let data = self.logits.data();
        let mut out = Array2::zeros((self.batch_size, self.num_classes));
        let inv_t = 1.0 / self.time_steps as f32;
        for t in 0..self.time_steps {
            for b in 0..self.batch_size {
                for c in 0..self.num_classes {
                    out[[b, c]] +=
                        data[(t * self.batch_size + b) * self.num_classes + c] * inv_t;
                }
            }
        }
        out
    }
}

/// Everything the fused backward pass needs to replay the forward in reverse.
struct ForwardCache {
    ids: Vec<usize>,
    batch_size: usize,
    seq_len: usize,
    /// Embedded input `[rows * dim]`, identical at every timestep.
    x: Vec<f32>,
    /// Membrane potentials before reset, `[depth][steps][rows * dim]`.
    u: Vec<Vec<Vec<f32>>>,
    /// Binary spikes, `[depth][steps][rows * dim]`.
    s: Vec<Vec<Vec<f32>>>,
    /// Output handles whose grad cells seed the backward pass.
    reps: Vec<Tensor>,
    logits: Tensor,
}

/// Spiking classifier trained against a frozen teacher.
pub struct SpikingStudent {
    cfg: StudentConfig,
    emb: Tensor,
    layers: Vec<Tensor>,
    head: Tensor,
    /// Per-layer membrane potentials carried across forward calls until
    /// [`SpikingStudent::reset_state`]. Empty means fully discharged.
    membranes: Rc<RefCell<Vec<Vec<f32>>>>,
    cache: Rc<RefCell<Option<ForwardCache>>>,
    training: Cell<bool>,
}

impl SpikingStudent {
    /// Initialize with uniform weights scaled by `1/sqrt(dim)`.
    pub fn new(cfg: StudentConfig, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let bound = 1.0 / (cfg.dim as f32).sqrt();
        let mut uniform = |n: usize| -> Tensor {
            let data: Vec<f32> = (0..n).map(|_| rng.gen_range(-bound..bound)).collect();
            Tensor::from_vec(data, true)
        };

        let emb = uniform(cfg.vocab_size * cfg.dim);
        let layers = (0..cfg.depth).map(|_| uniform(cfg.dim * cfg.dim)).collect();
        let head = uniform(cfg.dim * cfg.num_classes);

        Self {
            cfg,
            emb,
            layers,
            head,
            membranes: Rc::new(RefCell::new(Vec::new())),
            cache: Rc::new(RefCell::new(None)),
            training: Cell::new(true),
        }
    }

    pub fn config(&self) -> &StudentConfig {
        &self.cfg
    }

    /// Switch to training mode: forward passes cache activations and attach
    /// a backward node.
    pub fn train(&self) {
        self.training.set(true);
    }

    /// Switch to inference mode: no caching, no gradient tracking.
    pub fn eval(&self) {
        self.training.set(false);
    }

    /// Discharge all membrane state and drop any pending backward cache.
    ///
    /// Must run between batches; leftover charge from one batch would leak
    /// into the next forward pass otherwise.
    pub fn reset_state(&self) {
        self.membranes.borrow_mut().clear();
        *self.cache.borrow_mut() = None;
    }

    /// Whether undischarged membrane state is being carried.
    pub fn carries_state(&self) -> bool {
        !self.membranes.borrow().is_empty()
    }

    /// The embedding table handle, `[vocab, dim]` row-major.
    pub fn embedding_weights(&self) -> Tensor {
        self.emb.clone()
    }

    /// All trainable parameter handles, in checkpoint order.
    pub fn parameters(&self) -> Vec<Tensor> {
        let mut params = vec![self.emb.clone()];
        params.extend(self.layers.iter().cloned());
        params.push(self.head.clone());
        params
    }

    /// Named weights with shapes, for checkpointing.
    pub fn state_dict(&self) -> Vec<(String, Vec<f32>, Vec<usize>)> {
        let d = self.cfg.dim;
        let mut entries =
            vec![("emb.weight".to_string(), self.emb.to_vec(), vec![self.cfg.vocab_size, d])];
        for (i, layer) in self.layers.iter().enumerate() {
            entries.push((format!("layers.{i}.weight"), layer.to_vec(), vec![d, d]));
        }
        entries.push(("head.weight".to_string(), self.head.to_vec(), vec![d, self.cfg.num_classes]));
        entries
    }

    /// Load weights from a checkpoint, skipping tensors whose name or size
    /// does not match. Returns the number of tensors loaded.
    pub fn load_partial(&self, path: &Path) -> Result<usize> {
        let (weights, _) = load_safetensors(path)?;
        let mut matched = 0;
        let mut targets: Vec<(String, &Tensor)> =
            vec![("emb.weight".to_string(), &self.emb), ("head.weight".to_string(), &self.head)];
        for (i, layer) in self.layers.iter().enumerate() {
            targets.push((format!("layers.{i}.weight"), layer));
        }

        for (name, tensor) in targets {
            if let Some(data) = weights.get(&name) {
                if data.len() == tensor.len() {
                    *tensor.data_mut() = Array1::from(data.clone());
                    matched += 1;
                }
            }
        }
        Ok(matched)
    }

    /// Run the LIF stack for `num_steps` timesteps.
    ///
    /// Layer 0 receives the static token embeddings at every timestep; each
    /// deeper layer receives the previous layer's spikes. In training mode
    /// the returned logits carry a fused backward node covering the whole
    /// unrolled pass.
    pub fn forward(&self, input: &TokenizedInput) -> StudentOutput {
        let cfg = &self.cfg;
        let batch = input.batch_size();
        let seq = input.seq_len();
        let rows = batch * seq;
        let d = cfg.dim;
        let steps = cfg.num_steps;
        let decay = 1.0 - 1.0 / cfg.tau;
        let training = self.training.get();

        let ids: Vec<usize> = input.input_ids.iter().copied().collect();

        // Embedding lookup into [rows, dim].
        let mut x = vec![0.0f32; rows * d];
        {
            let emb = self.emb.data();
            for (pos, &id) in ids.iter().enumerate() {
                debug_assert!(id < cfg.vocab_size);
                for k in 0..d {
                    x[pos * d + k] = emb[id * d + k];
                }
            }
        }

        let mut membranes = self.membranes.borrow_mut();
        let stale = membranes.len() != cfg.depth || membranes.iter().any(|m| m.len() != rows * d);
        if stale {
            *membranes = vec![vec![0.0f32; rows * d]; cfg.depth];
        }

        let weight_data: Vec<Vec<f32>> = self.layers.iter().map(|w| w.to_vec()).collect();
        let head_data = self.head.to_vec();

        let mut u_cache: Vec<Vec<Vec<f32>>> = vec![Vec::with_capacity(steps); cfg.depth];
        let mut s_cache: Vec<Vec<Vec<f32>>> = vec![Vec::with_capacity(steps); cfg.depth];
        let mut rep_acc = vec![vec![0.0f32; rows * d]; cfg.depth];
        let mut logits_flat = vec![0.0f32; steps * batch * cfg.num_classes];
        let inv_steps = 1.0 / steps as f32;
        let inv_seq = 1.0 / seq as f32;

        for t in 0..steps {
            let mut spikes: Vec<f32> = Vec::new();
            for l in 0..cfg.depth {
                let layer_input: &[f32] = if l == 0 { &x } else { &spikes };
                let current = matmul(layer_input, &weight_data[l], rows, d, d);

                let membrane = &mut membranes[l];
                let mut u = vec![0.0f32; rows * d];
                let mut s = vec![0.0f32; rows * d];
                for j in 0..rows * d {
                    let u_j = membrane[j] * decay + current[j] / cfg.tau;
                    let fired = if u_j >= cfg.threshold { 1.0 } else { 0.0 };
                    // Soft reset, detached from the gradient path.
                    membrane[j] = u_j - fired * cfg.threshold;
                    rep_acc[l][j] += fired * inv_steps;
                    u[j] = u_j;
                    s[j] = fired;
                }

                if training {
                    u_cache[l].push(u);
                    s_cache[l].push(s.clone());
                }
                spikes = s;
            }

            // Mean-pool the top layer's spikes over positions, then project.
            let mut pooled = vec![0.0f32; batch * d];
            for b in 0..batch {
                for p in 0..seq {
                    let row = &spikes[(b * seq + p) * d..(b * seq + p + 1) * d];
                    for (acc, &v) in pooled[b * d..(b + 1) * d].iter_mut().zip(row) {
                        *acc += v * inv_seq;
                    }
                }
            }
            let logits_t = matmul(&pooled, &head_data, batch, d, cfg.num_classes);
            let offset = t * batch * cfg.num_classes;
            logits_flat[offset..offset + batch * cfg.num_classes].copy_from_slice(&logits_t);
        }
        drop(membranes);

        let reps: Vec<Tensor> =
            rep_acc.into_iter().map(|r| Tensor::from_vec(r, training)).collect();
        let mut logits = Tensor::from_vec(logits_flat, training);

        if training {
            *self.cache.borrow_mut() = Some(ForwardCache {
                ids,
                batch_size: batch,
                seq_len: seq,
                x,
                u: u_cache,
                s: s_cache,
                reps: reps.clone(),
                logits: logits.clone(),
            });
            logits.set_backward_op(Rc::new(StudentBackward {
                cfg: self.cfg,
                emb: self.emb.clone(),
                layers: self.layers.clone(),
                head: self.head.clone(),
                cache: Rc::clone(&self.cache),
            }));
        }

        StudentOutput {
            reps,
            logits,
            batch_size: batch,
            seq_len: seq,
            time_steps: steps,
            num_classes: cfg.num_classes,
        }
    }
}

impl ScoredSequenceModel for SpikingStudent {
    fn num_classes(&self) -> usize {
        self.cfg.num_classes
    }

    fn vocab_size(&self) -> usize {
        self.cfg.vocab_size
    }

    fn hidden_dim(&self) -> usize {
        self.cfg.dim
    }
}

/// Fused backward node for one student forward pass.
///
/// Reads the gradients seeded on the logits and representation tensors and
/// backpropagates through time into the head, layer, and embedding grad
/// cells. Consumes the forward cache, so a second invocation is a no-op.
struct StudentBackward {
    cfg: StudentConfig,
    emb: Tensor,
    layers: Vec<Tensor>,
    head: Tensor,
    cache: Rc<RefCell<Option<ForwardCache>>>,
}

impl BackwardOp for StudentBackward {
    fn backward(&self) {
        let Some(cache) = self.cache.borrow_mut().take() else {
            return;
        };

        let cfg = &self.cfg;
        let batch = cache.batch_size;
        let seq = cache.seq_len;
        let rows = batch * seq;
        let d = cfg.dim;
        let steps = cfg.num_steps;
        let classes = cfg.num_classes;
        let decay = 1.0 - 1.0 / cfg.tau;
        let inv_tau = 1.0 / cfg.tau;
        let inv_seq = 1.0 / seq as f32;
        let inv_steps = 1.0 / steps as f32;

        let g_logits = cache
            .logits
            .grad()
            .map(|g| g.to_vec())
            .unwrap_or_else(|| vec![0.0; steps * batch * classes]);

        let head_data = self.head.to_vec();
        let head_t = transpose(&head_data, d, classes);

        // Head gradient and top-layer spike gradients from the logits path.
        let mut g_head = vec![0.0f32; d * classes];
        let mut g_spikes: Vec<Vec<f32>> = vec![vec![0.0f32; rows * d]; steps];
        for t in 0..steps {
            let gl = &g_logits[t * batch * classes..(t + 1) * batch * classes];
            let s_top = &cache.s[cfg.depth - 1][t];

            let mut pooled = vec![0.0f32; batch * d];
            for b in 0..batch {
                for p in 0..seq {
                    let row = &s_top[(b * seq + p) * d..(b * seq + p + 1) * d];
                    for (acc, &v) in pooled[b * d..(b + 1) * d].iter_mut().zip(row) {
                        *acc += v * inv_seq;
                    }
                }
            }

            let pooled_t = transpose(&pooled, batch, d);
            for (acc, v) in g_head.iter_mut().zip(matmul(&pooled_t, gl, d, batch, classes)) {
                *acc += v;
            }

            let g_pool = matmul(gl, &head_t, batch, classes, d);
            for b in 0..batch {
                for p in 0..seq {
                    let dst =
                        &mut g_spikes[t][(b * seq + p) * d..(b * seq + p + 1) * d];
                    for (acc, &v) in dst.iter_mut().zip(&g_pool[b * d..(b + 1) * d]) {
                        *acc += v * inv_seq;
                    }
                }
            }
        }
        self.head.accumulate_grad(Array1::from(g_head));

        // Walk the layer stack top-down, each layer unrolled backward in time.
        let mut g_x = vec![0.0f32; rows * d];
        for l in (0..cfg.depth).rev() {
            if let Some(g_rep) = cache.reps[l].grad() {
                for g_s_t in g_spikes.iter_mut() {
                    for (acc, &g) in g_s_t.iter_mut().zip(g_rep.iter()) {
                        *acc += g * inv_steps;
                    }
                }
            }

            let weight = self.layers[l].to_vec();
            let weight_t = transpose(&weight, d, d);
            let mut g_weight = vec![0.0f32; d * d];
            let mut g_below: Vec<Vec<f32>> = if l > 0 {
                vec![vec![0.0f32; rows * d]; steps]
            } else {
                Vec::new()
            };

            let mut g_membrane = vec![0.0f32; rows * d];
            for t in (0..steps).rev() {
                let u_t = &cache.u[l][t];
                let mut g_current = vec![0.0f32; rows * d];
                for j in 0..rows * d {
                    let g_u = g_spikes[t][j] * surrogate_grad(u_t[j] - cfg.threshold)
                        + g_membrane[j];
                    g_current[j] = g_u * inv_tau;
                    g_membrane[j] = g_u * decay;
                }

                let layer_input: &[f32] =
                    if l == 0 { &cache.x } else { &cache.s[l - 1][t] };
                let input_t = transpose(layer_input, rows, d);
                for (acc, v) in g_weight.iter_mut().zip(matmul(&input_t, &g_current, d, rows, d))
                {
                    *acc += v;
                }

                let g_input = matmul(&g_current, &weight_t, rows, d, d);
                if l > 0 {
                    for (acc, v) in g_below[t].iter_mut().zip(g_input) {
                        *acc += v;
                    }
                } else {
                    for (acc, v) in g_x.iter_mut().zip(g_input) {
                        *acc += v;
                    }
                }
            }

            self.layers[l].accumulate_grad(Array1::from(g_weight));
            g_spikes = g_below;
        }

        // Scatter input gradients into the embedding rows that produced them.
        let mut g_emb = vec![0.0f32; cfg.vocab_size * d];
        for (pos, &id) in cache.ids.iter().enumerate() {
            let src = &g_x[pos * d..(pos + 1) * d];
            for (acc, &v) in g_emb[id * d..(id + 1) * d].iter_mut().zip(src) {
                *acc += v;
            }
        }
        self.emb.accumulate_grad(Array1::from(g_emb));
    }
}

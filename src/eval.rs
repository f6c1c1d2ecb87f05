//! Classification metrics for checkpoint selection.

use crate::error::{DistilarError, Result};
use std::fmt;
use std::str::FromStr;

/// Metric used to rank epochs for checkpointing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalMetric {
    Accuracy,
    /// Matthews correlation coefficient, robust to class imbalance.
    Mcc,
}

impl EvalMetric {
    pub fn compute(&self, predictions: &[usize], labels: &[usize]) -> f32 {
        match self {
            EvalMetric::Accuracy => accuracy(predictions, labels),
            EvalMetric::Mcc => matthews_corrcoef(predictions, labels),
        }
    }
}

impl fmt::Display for EvalMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalMetric::Accuracy => write!(f, "acc"),
            EvalMetric::Mcc => write!(f, "mcc"),
        }
    }
}

impl FromStr for EvalMetric {
    type Err = DistilarError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "acc" => Ok(EvalMetric::Accuracy),
            "mcc" => Ok(EvalMetric::Mcc),
            other => Err(DistilarError::config(
                "metric",
                format!("unknown metric '{other}'"),
                "use \"acc\" or \"mcc\"",
            )),
        }
    }
}

/// Fraction of predictions matching labels. Empty input scores 0.
pub fn accuracy(predictions: &[usize], labels: &[usize]) -> f32 {
    debug_assert_eq!(predictions.len(), labels.len());
    if predictions.is_empty() {
        return 0.0;
    }
    let correct = predictions.iter().zip(labels).filter(|(p, l)| p == l).count();
    correct as f32 / predictions.len() as f32
}

/// Multi-class Matthews correlation coefficient.
///
/// Computed from the confusion matrix as
/// `(c*s - Σ p_k t_k) / sqrt((s² - Σ p_k²)(s² - Σ t_k²))` where `c` is the
/// number correct, `s` the sample count, `p_k`/`t_k` the predicted/true
/// counts per class. A degenerate denominator (a single predicted or true
/// class) scores 0.
pub fn matthews_corrcoef(predictions: &[usize], labels: &[usize]) -> f32 {
    debug_assert_eq!(predictions.len(), labels.len());
    if predictions.is_empty() {
        return 0.0;
    }

    let classes = predictions.iter().chain(labels).max().map_or(0, |&m| m + 1);
    let mut pred_counts = vec![0.0f64; classes];
    let mut true_counts = vec![0.0f64; classes];
    let mut correct = 0.0f64;
    for (&p, &l) in predictions.iter().zip(labels) {
        pred_counts[p] += 1.0;
        true_counts[l] += 1.0;
        if p == l {
            correct += 1.0;
        }
    }

    let s = predictions.len() as f64;
    let cov = correct * s
        - pred_counts.iter().zip(&true_counts).map(|(p, t)| p * t).sum::<f64>();
    let pred_var = s * s - pred_counts.iter().map(|p| p * p).sum::<f64>();
    let true_var = s * s - true_counts.iter().map(|t| t * t).sum::<f64>();

    let denom = (pred_var * true_var).sqrt();
    if denom == 0.0 {
        0.0
    } else {
        (cov / denom) as f32
    }
}

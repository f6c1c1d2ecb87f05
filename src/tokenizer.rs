//! Vocabulary tokenizer shared by teacher and student.
//!
//! Word-level tokenizer over a `vocab.txt` file (one token per line). Ids are
//! line numbers; `[PAD]` and `[UNK]` must be present. Every batch encodes to
//! rectangular `[batch, max_length]` id and mask matrices, so teacher and
//! student forward passes can share one tokenization per batch.

use crate::error::{DistilarError, Result};
use ndarray::Array2;
use std::collections::HashMap;
use std::path::Path;

pub const PAD_TOKEN: &str = "[PAD]";
pub const UNK_TOKEN: &str = "[UNK]";

/// Tokenized batch: rectangular id and attention-mask matrices.
///
/// Invariant: both fields share the batch dimension and sequence length.
#[derive(Debug, Clone)]
pub struct TokenizedInput {
    /// Token ids, `[batch, max_length]`.
    pub input_ids: Array2<usize>,
    /// 1.0 for real tokens, 0.0 for padding, `[batch, max_length]`.
    pub attention_mask: Array2<f32>,
}

impl TokenizedInput {
    pub fn batch_size(&self) -> usize {
        self.input_ids.nrows()
    }

    pub fn seq_len(&self) -> usize {
        self.input_ids.ncols()
    }
}

/// Word-level vocabulary tokenizer.
pub struct Tokenizer {
    vocab: HashMap<String, usize>,
    pad_id: usize,
    unk_id: usize,
}

impl Tokenizer {
    /// Load a tokenizer from a `vocab.txt` file.
    pub fn from_vocab_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DistilarError::ModelNotFound { path: path.to_path_buf() });
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| DistilarError::io(format!("reading vocab {}", path.display()), e))?;

        let vocab: HashMap<String, usize> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .enumerate()
            .map(|(id, token)| (token.to_string(), id))
            .collect();

        Self::from_vocab(vocab)
    }

    /// Build a tokenizer from an in-memory vocabulary.
    pub fn from_vocab(vocab: HashMap<String, usize>) -> Result<Self> {
        let pad_id = *vocab.get(PAD_TOKEN).ok_or_else(|| {
            DistilarError::config("vocab", "missing [PAD] token", "add [PAD] to vocab.txt")
        })?;
        let unk_id = *vocab.get(UNK_TOKEN).ok_or_else(|| {
            DistilarError::config("vocab", "missing [UNK] token", "add [UNK] to vocab.txt")
        })?;
        Ok(Self { vocab, pad_id, unk_id })
    }

    /// Number of distinct tokens.
    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    pub fn pad_id(&self) -> usize {
        self.pad_id
    }

    /// Split a text into lowercase word tokens.
    fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
        text.split(|c: char| c.is_whitespace() || (c.is_ascii_punctuation() && c != '-'))
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
    }

    /// Encode a batch of raw texts, truncating/padding to `max_length`.
    ///
    /// An empty text encodes to an all-pad row; it is never an error.
    pub fn encode_batch(&self, texts: &[String], max_length: usize) -> TokenizedInput {
        let batch = texts.len();
        let mut input_ids = Array2::from_elem((batch, max_length), self.pad_id);
        let mut attention_mask = Array2::zeros((batch, max_length));

        for (row, text) in texts.iter().enumerate() {
            for (col, token) in Self::tokenize(text).take(max_length).enumerate() {
                input_ids[[row, col]] = *self.vocab.get(&token).unwrap_or(&self.unk_id);
                attention_mask[[row, col]] = 1.0;
            }
        }

        TokenizedInput { input_ids, attention_mask }
    }
}

//! Threat dataset: labels, CSV loading, splits, and batching.

use crate::error::{DistilarError, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::Path;

/// The fixed threat-type label set, in label-id order.
pub const THREAT_TYPES: [&str; 10] = [
    "x-mitre-matrix",
    "course-of-action",
    "malware",
    "tool",
    "x-mitre-tactic",
    "attack-pattern",
    "x-mitre-data-component",
    "campaign",
    "intrusion-set",
    "x-mitre-data-source",
];

/// Map a threat-type string to its label id.
pub fn threat_label_id(threat_type: &str) -> Option<usize> {
    THREAT_TYPES.iter().position(|&t| t == threat_type)
}

/// One labeled example.
#[derive(Debug, Clone)]
pub struct Example {
    pub text: String,
    pub label: usize,
}

/// A mini-batch of raw texts and integer labels.
///
/// Fixed batch length except possibly the final batch of a split.
#[derive(Debug, Clone)]
pub struct TextBatch {
    pub texts: Vec<String>,
    pub labels: Vec<usize>,
}

impl TextBatch {
    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }
}

fn csv_io(e: csv::Error) -> std::io::Error {
    match e.into_kind() {
        csv::ErrorKind::Io(io) => io,
        other => std::io::Error::new(std::io::ErrorKind::InvalidData, format!("{other:?}")),
    }
}

/// Load examples from a CSV file with `type` and `description` columns.
///
/// A missing or empty description recovers to the empty string; an unknown
/// threat type is a data error.
pub fn load_csv(path: &Path) -> Result<Vec<Example>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|e| DistilarError::io(format!("opening dataset {}", path.display()), csv_io(e)))?;

    let headers = reader
        .headers()
        .map_err(|e| DistilarError::io("reading CSV header".to_string(), csv_io(e)))?
        .clone();
    let type_col = headers.iter().position(|h| h == "type").ok_or_else(|| {
        DistilarError::config("dataset", "missing 'type' column", "add a label column named 'type'")
    })?;
    let text_col = headers.iter().position(|h| h == "description").ok_or_else(|| {
        DistilarError::config(
            "dataset",
            "missing 'description' column",
            "add a free-text column named 'description'",
        )
    })?;

    let mut examples = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record =
            record.map_err(|e| DistilarError::io(format!("reading CSV row {row}"), csv_io(e)))?;
        let threat_type = record.get(type_col).unwrap_or_default();
        let label = threat_label_id(threat_type).ok_or_else(|| DistilarError::Data {
            row,
            message: format!("unknown threat type '{threat_type}'"),
        })?;
        // Missing text recovers to empty, never fatal.
        let text = record.get(text_col).unwrap_or_default().to_string();
        examples.push(Example { text, label });
    }
    Ok(examples)
}

/// Word-dropout augmentation: one variant per multi-word example, with a
/// single randomly chosen word removed. Labels are preserved.
pub fn augment_examples(examples: &[Example], rng: &mut StdRng) -> Vec<Example> {
    use rand::Rng;

    let mut variants = Vec::new();
    for example in examples {
        let words: Vec<&str> = example.text.split_whitespace().collect();
        if words.len() < 2 {
            continue;
        }
        let drop = rng.gen_range(0..words.len());
        let text = words
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != drop)
            .map(|(_, w)| *w)
            .collect::<Vec<_>>()
            .join(" ");
        variants.push(Example { text, label: example.label });
    }
    variants
}

/// Train/valid/test split of a dataset.
pub struct Splits {
    pub train: Vec<Example>,
    pub valid: Vec<Example>,
    pub test: Vec<Example>,
}

/// Seeded 80/10/10 split.
pub fn split_dataset(mut examples: Vec<Example>, seed: u64) -> Splits {
    let mut rng = StdRng::seed_from_u64(seed);
    examples.shuffle(&mut rng);

    let n = examples.len();
    let train_size = n * 8 / 10;
    let valid_size = n / 10;

    let test = examples.split_off(train_size + valid_size);
    let valid = examples.split_off(train_size);
    Splits { train: examples, valid, test }
}

/// Cut a split into mini-batches, optionally shuffling example order first.
pub fn batches(examples: &[Example], batch_size: usize, shuffle: Option<&mut StdRng>) -> Vec<TextBatch> {
    let mut order: Vec<usize> = (0..examples.len()).collect();
    if let Some(rng) = shuffle {
        order.shuffle(rng);
    }

    order
        .chunks(batch_size.max(1))
        .map(|chunk| TextBatch {
            texts: chunk.iter().map(|&i| examples[i].text.clone()).collect(),
            labels: chunk.iter().map(|&i| examples[i].label).collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic(n: usize) -> Vec<Example> {
        (0..n)
            .map(|i| Example { text: format!("sample {i}"), label: i % 2 })
            .collect()
    }

    #[test]
    fn test_threat_label_ids_are_stable() {
        assert_eq!(threat_label_id("x-mitre-matrix"), Some(0));
        assert_eq!(threat_label_id("malware"), Some(2));
        assert_eq!(threat_label_id("x-mitre-data-source"), Some(9));
        assert_eq!(threat_label_id("benign"), None);
    }

    #[test]
    fn test_split_proportions() {
        let splits = split_dataset(synthetic(100), 42);
        assert_eq!(splits.train.len(), 80);
        assert_eq!(splits.valid.len(), 10);
        assert_eq!(splits.test.len(), 10);
    }

    #[test]
    fn test_split_is_seed_deterministic() {
        let a = split_dataset(synthetic(50), 7);
        let b = split_dataset(synthetic(50), 7);
        let texts = |s: &Splits| s.train.iter().map(|e| e.text.clone()).collect::<Vec<_>>();
        assert_eq!(texts(&a), texts(&b));
    }

    #[test]
    fn test_batches_fixed_size_except_last() {
        let examples = synthetic(10);
        let got = batches(&examples, 4, None);
        assert_eq!(got.len(), 3);
        assert_eq!(got[0].len(), 4);
        assert_eq!(got[1].len(), 4);
        assert_eq!(got[2].len(), 2);
    }

    #[test]
    fn test_unshuffled_batches_preserve_order() {
        let examples = synthetic(6);
        let got = batches(&examples, 3, None);
        assert_eq!(got[0].texts[0], "sample 0");
        assert_eq!(got[1].texts[2], "sample 5");
    }

    #[test]
    fn test_augment_drops_one_word_and_keeps_label() {
        let examples = vec![
            Example { text: "malware drops payload".to_string(), label: 2 },
            Example { text: "tool".to_string(), label: 3 },
        ];
        let mut rng = StdRng::seed_from_u64(42);
        let variants = augment_examples(&examples, &mut rng);

        // Single-word texts produce no variant.
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].label, 2);
        assert_eq!(variants[0].text.split_whitespace().count(), 2);
    }

    #[test]
    fn test_csv_round_trip_with_empty_description() {
        use std::io::Write;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dataset.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "type,description").unwrap();
        writeln!(file, "malware,\"drops a payload\"").unwrap();
        writeln!(file, "tool,").unwrap();
        drop(file);

        let examples = load_csv(&path).unwrap();
        assert_eq!(examples.len(), 2);
        assert_eq!(examples[0].label, 2);
        assert_eq!(examples[1].text, "");
    }

    #[test]
    fn test_csv_unknown_label_is_data_error() {
        use std::io::Write;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dataset.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "type,description").unwrap();
        writeln!(file, "benign,hello").unwrap();
        drop(file);

        assert!(matches!(load_csv(&path), Err(DistilarError::Data { row: 0, .. })));
    }
}

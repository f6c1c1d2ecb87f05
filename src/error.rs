//! Error types with actionable diagnostics.
//!
//! All errors carry enough context to resolve the problem without digging
//! through the training loop. Configuration errors are fatal at startup.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for destilar operations.
pub type Result<T> = std::result::Result<T, DistilarError>;

/// Errors that can occur while configuring or running a distillation job.
#[derive(Error, Debug)]
pub enum DistilarError {
    /// Configuration value is invalid.
    #[error("Invalid configuration value for '{field}': {message}\n  → {suggestion}")]
    ConfigValue { field: String, message: String, suggestion: String },

    /// Teacher head size does not match the configured class count.
    #[error("Teacher predicts {teacher} classes but {expected} were configured\n  → Point --teacher-path at a checkpoint fine-tuned for this label set")]
    LabelCountMismatch { teacher: usize, expected: usize },

    /// Teacher and student vocabularies differ, so embedding matrices are not comparable.
    #[error("Vocabulary size mismatch: teacher {teacher}, student {student}\n  → Both models must share the tokenizer vocabulary for the embedding loss")]
    VocabMismatch { teacher: usize, student: usize },

    /// Model or vocabulary file not found.
    #[error("Model file not found: {path}\n  → Check the path or download the checkpoint")]
    ModelNotFound { path: PathBuf },

    /// Checkpoint file could not be parsed.
    #[error("Malformed checkpoint {path}: {message}")]
    MalformedCheckpoint { path: PathBuf, message: String },

    /// Invalid tensor shape.
    #[error("Tensor shape mismatch: expected {expected:?}, got {actual:?}\n  → Check teacher/student architecture compatibility")]
    ShapeMismatch { expected: Vec<usize>, actual: Vec<usize> },

    /// Teacher and student representation stacks cannot be aligned.
    #[error("Representation stacks cannot be aligned: {message}\n  → Check --depths and --ignored-layers against the teacher layer count")]
    StackAlignment { message: String },

    /// Dataset row is unusable.
    #[error("Data error at row {row}: {message}")]
    Data { row: usize, message: String },

    /// IO error with context.
    #[error("IO error: {context}\n  Cause: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl DistilarError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { context: context.into(), source }
    }

    /// Create a configuration error.
    pub fn config(
        field: impl Into<String>,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::ConfigValue {
            field: field.into(),
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Whether this error is resolvable by changing the invocation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigValue { .. }
                | Self::LabelCountMismatch { .. }
                | Self::VocabMismatch { .. }
                | Self::ModelNotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display_carries_suggestion() {
        let err = DistilarError::config("metric", "unknown metric 'f1'", "use \"acc\" or \"mcc\"");
        let msg = err.to_string();
        assert!(msg.contains("metric"));
        assert!(msg.contains("acc"));
    }

    #[test]
    fn test_user_error_classification() {
        assert!(DistilarError::LabelCountMismatch { teacher: 2, expected: 10 }.is_user_error());
        let io = DistilarError::io(
            "reading vocab",
            std::io::Error::new(std::io::ErrorKind::Other, "boom"),
        );
        assert!(!io.is_user_error());
    }
}

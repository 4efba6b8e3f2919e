//! Error types for the nlprt-core library.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for model construction and prediction.
///
/// Every failure is reported to the immediate caller; nothing is retried
/// internally. A failed construction never yields a handle and a failed
/// prediction never yields a partial result.
#[derive(Error, Debug)]
pub enum NlpError {
    /// Architecture tag or model type outside the registry, or an
    /// architecture that cannot serve the requested task.
    #[error("unsupported architecture: {0}")]
    UnsupportedArchitecture(String),

    /// A required artifact file does not exist.
    #[error("artifact not found: {}", .0.display())]
    ArtifactNotFound(PathBuf),

    /// The config file disagrees with the architecture or the loaded graph.
    #[error("config mismatch: {0}")]
    ConfigMismatch(String),

    /// The weights file is missing, corrupt or truncated.
    #[error("failed to load weights: {0}")]
    WeightLoadFailure(String),

    /// The vocabulary (or merges) file could not be turned into a tokenizer.
    #[error("invalid vocabulary: {0}")]
    InvalidVocabulary(String),

    /// The model handle was released before this call.
    #[error("model has been closed")]
    ModelClosed,

    /// Zero-shot classification was called without candidate labels.
    #[error("zero-shot classification requires at least one label")]
    EmptyLabelSet,

    /// Translation was called without a target language.
    #[error("translation requires a target language")]
    MissingTargetLanguage,

    /// A language name or code that the runtime does not know.
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// Forward pass produced unusable output (shape, type, numerics).
    #[error("inference failed: {0}")]
    InferenceFailure(String),

    /// Error from the backend layer during a forward pass.
    #[error("backend error: {0}")]
    Inference(#[from] nlprt_inference::InferenceError),

    /// Runtime configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NlpError {
    /// Stable numeric code, used across the C boundary.
    pub fn code(&self) -> i32 {
        match self {
            NlpError::UnsupportedArchitecture(_) => 1,
            NlpError::ArtifactNotFound(_) => 2,
            NlpError::ConfigMismatch(_) => 3,
            NlpError::WeightLoadFailure(_) => 4,
            NlpError::ModelClosed => 5,
            NlpError::EmptyLabelSet => 6,
            NlpError::MissingTargetLanguage => 7,
            NlpError::InferenceFailure(_) | NlpError::Inference(_) => 8,
            NlpError::InvalidVocabulary(_) => 9,
            NlpError::UnsupportedLanguage(_) => 10,
            NlpError::Config(_) => 11,
            NlpError::Io(_) => 12,
        }
    }
}

/// Result type for the nlprt-core library.
pub type Result<T> = std::result::Result<T, NlpError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_codes_are_distinct_for_taxonomy() {
        let errors = [
            NlpError::UnsupportedArchitecture("x".into()),
            NlpError::ArtifactNotFound(PathBuf::from("/x")),
            NlpError::ConfigMismatch("x".into()),
            NlpError::WeightLoadFailure("x".into()),
            NlpError::ModelClosed,
            NlpError::EmptyLabelSet,
            NlpError::MissingTargetLanguage,
            NlpError::InferenceFailure("x".into()),
            NlpError::InvalidVocabulary("x".into()),
            NlpError::UnsupportedLanguage("x".into()),
            NlpError::Config("x".into()),
            NlpError::Io(std::io::Error::other("x")),
        ];
        let codes: HashSet<i32> = errors.iter().map(NlpError::code).collect();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_backend_errors_share_the_inference_code() {
        let backend = NlpError::from(nlprt_inference::InferenceError::MissingInput(
            "input_ids".to_string(),
        ));
        assert_eq!(backend.code(), NlpError::InferenceFailure("x".into()).code());
    }

    #[test]
    fn test_artifact_not_found_message() {
        let err = NlpError::ArtifactNotFound(PathBuf::from("/tmp/missing/config.json"));
        assert_eq!(err.to_string(), "artifact not found: /tmp/missing/config.json");
    }
}

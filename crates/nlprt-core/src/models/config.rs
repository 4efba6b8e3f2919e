//! Configuration structures for the runtime and its pipelines.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{NlpError, Result};

/// Main configuration for the nlprt runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Where default model artifacts live.
    pub models: ModelStoreConfig,

    /// Tokenization and tensor shape settings.
    pub tokenization: TokenizationConfig,

    /// POS / NER settings.
    pub token_classification: TokenClassificationConfig,

    /// Question answering settings.
    pub qa: QaConfig,

    /// Zero-shot classification settings.
    pub zero_shot: ZeroShotConfig,

    /// Summarization decoding settings.
    pub summarization: DecodingConfig,

    /// Translation settings.
    pub translation: TranslationConfig,

    /// Text generation decoding settings.
    pub generation: DecodingConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            models: ModelStoreConfig::default(),
            tokenization: TokenizationConfig::default(),
            token_classification: TokenClassificationConfig::default(),
            qa: QaConfig::default(),
            zero_shot: ZeroShotConfig::default(),
            summarization: DecodingConfig::summarization(),
            translation: TranslationConfig::default(),
            generation: DecodingConfig::sampling(),
        }
    }
}

/// Location and naming of cached model artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelStoreConfig {
    /// Directory holding one sub-directory per default model.
    pub cache_dir: PathBuf,

    /// File name of the exported graph inside a model directory.
    pub weights_file: String,
}

impl Default for ModelStoreConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("models"),
            weights_file: "model.onnx".to_string(),
        }
    }
}

/// Tokenizer and tensor shape settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenizationConfig {
    /// Maximum encoder-side sequence length; longer inputs are truncated.
    /// Static-shape backends pad every input to this length.
    pub max_sequence_length: usize,

    /// Padded decoder length for static-shape encoder-decoder graphs.
    pub decoder_length: usize,

    /// Force lowercasing on or off; `None` infers it from the vocabulary.
    pub lowercase: Option<bool>,

    /// Run a validation forward pass at load time to check output dimensions.
    pub validate_outputs: bool,
}

impl Default for TokenizationConfig {
    fn default() -> Self {
        Self {
            max_sequence_length: 128,
            decoder_length: 64,
            lowercase: None,
            validate_outputs: true,
        }
    }
}

/// POS tagging / NER settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenClassificationConfig {
    /// Labels never reported as entities.
    pub ignore_labels: Vec<String>,
}

impl Default for TokenClassificationConfig {
    fn default() -> Self {
        Self {
            ignore_labels: vec!["O".to_string()],
        }
    }
}

/// Question answering settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QaConfig {
    /// Number of ranked answers to return.
    pub top_k: usize,

    /// Longest answer span, in tokens.
    pub max_answer_length: usize,
}

impl Default for QaConfig {
    fn default() -> Self {
        Self {
            top_k: 1,
            max_answer_length: 15,
        }
    }
}

/// Zero-shot classification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZeroShotConfig {
    /// Hypothesis template; `{}` is replaced with each candidate label.
    pub hypothesis_template: String,

    /// Score labels independently instead of as one distribution.
    pub multi_label: bool,
}

impl Default for ZeroShotConfig {
    fn default() -> Self {
        Self {
            hypothesis_template: "This example is {}.".to_string(),
            multi_label: false,
        }
    }
}

/// Translation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationConfig {
    /// Source language assumed when a call does not name one.
    pub default_source_language: Option<String>,

    /// Decoding settings.
    pub decoding: DecodingConfig,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            default_source_language: Some("English".to_string()),
            decoding: DecodingConfig {
                max_length: 64,
                min_length: 0,
                num_beams: 3,
                no_repeat_ngram_size: 0,
                ..DecodingConfig::default()
            },
        }
    }
}

/// Autoregressive decoding settings shared by summarization, translation
/// and generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodingConfig {
    /// Maximum number of generated tokens.
    pub max_length: usize,

    /// End-of-sequence is suppressed until this many tokens were generated.
    pub min_length: usize,

    /// Beam width; 1 means greedy or sampled decoding.
    pub num_beams: usize,

    /// Number of ranked candidates to return (at most `num_beams`).
    pub num_return_sequences: usize,

    /// Sample from the distribution instead of taking the argmax.
    pub do_sample: bool,

    /// Sampling temperature.
    pub temperature: f32,

    /// Keep only the k most likely tokens when sampling (0 = disabled).
    pub top_k: usize,

    /// Nucleus sampling threshold (1.0 = disabled).
    pub top_p: f32,

    /// Penalty applied to logits of tokens already generated (1.0 = disabled).
    pub repetition_penalty: f32,

    /// Forbid repeating any n-gram of this size (0 = disabled).
    pub no_repeat_ngram_size: usize,

    /// Exponent applied to hypothesis length when ranking beams.
    pub length_penalty: f32,

    /// Stop beam search once `num_beams` hypotheses are finished.
    pub early_stopping: bool,

    /// Seed for the per-call sampling RNG.
    pub seed: u64,
}

impl Default for DecodingConfig {
    fn default() -> Self {
        Self {
            max_length: 56,
            min_length: 0,
            num_beams: 1,
            num_return_sequences: 1,
            do_sample: false,
            temperature: 1.0,
            top_k: 50,
            top_p: 1.0,
            repetition_penalty: 1.0,
            no_repeat_ngram_size: 0,
            length_penalty: 1.0,
            early_stopping: true,
            seed: 42,
        }
    }
}

impl DecodingConfig {
    /// Beam search preset used for summarization.
    pub fn summarization() -> Self {
        Self {
            max_length: 142,
            min_length: 56,
            num_beams: 3,
            no_repeat_ngram_size: 3,
            ..Self::default()
        }
    }

    /// Sampling preset used for open-ended generation.
    pub fn sampling() -> Self {
        Self {
            max_length: 56,
            do_sample: true,
            top_k: 50,
            top_p: 0.9,
            no_repeat_ngram_size: 3,
            ..Self::default()
        }
    }

    /// Greedy decoding.
    pub fn greedy() -> Self {
        Self {
            do_sample: false,
            num_beams: 1,
            ..Self::default()
        }
    }

    /// Check the settings are usable.
    pub fn validate(&self) -> Result<()> {
        if self.num_beams == 0 {
            return Err(NlpError::Config("num_beams must be at least 1".to_string()));
        }
        if self.num_return_sequences == 0 || self.num_return_sequences > self.num_beams.max(1) {
            return Err(NlpError::Config(format!(
                "num_return_sequences must be between 1 and num_beams ({})",
                self.num_beams
            )));
        }
        if self.do_sample && self.temperature <= 0.0 {
            return Err(NlpError::Config("temperature must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(NlpError::Config("top_p must be within [0, 1]".to_string()));
        }
        Ok(())
    }
}

impl RuntimeConfig {
    /// Default configuration with the task presets applied.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| NlpError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).map_err(|e| NlpError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Directory holding the artifacts of a cached model repository.
    pub fn model_dir(&self, repo_id: &str) -> PathBuf {
        self.models.cache_dir.join(repo_id.replace('/', "--"))
    }
}

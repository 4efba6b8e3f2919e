//! Tasks, their default models, and the on-disk artifact layout.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::architecture::{Architecture, ModelFamily, TokenizerKind};
use crate::error::{NlpError, Result};

/// The eight inference tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Task {
    Sentiment,
    Pos,
    Ner,
    QuestionAnswering,
    Summarization,
    ZeroShot,
    Translation,
    Generation,
}

/// Hard-coded model used by a task's default constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultModel {
    /// Hugging Face repository id.
    pub repo_id: &'static str,
    pub architecture: Architecture,
}

impl Task {
    pub const ALL: [Task; 8] = [
        Task::Sentiment,
        Task::Pos,
        Task::Ner,
        Task::QuestionAnswering,
        Task::Summarization,
        Task::ZeroShot,
        Task::Translation,
        Task::Generation,
    ];

    /// Short name used by the CLI and in logs.
    pub fn name(self) -> &'static str {
        match self {
            Task::Sentiment => "sentiment",
            Task::Pos => "pos",
            Task::Ner => "ner",
            Task::QuestionAnswering => "qa",
            Task::Summarization => "summarization",
            Task::ZeroShot => "zero-shot",
            Task::Translation => "translation",
            Task::Generation => "generation",
        }
    }

    pub fn default_model(self) -> DefaultModel {
        let (repo_id, architecture) = match self {
            Task::Sentiment => (
                "distilbert-base-uncased-finetuned-sst-2-english",
                Architecture::DistilBert,
            ),
            Task::Pos => ("vblagoje/bert-english-uncased-finetuned-pos", Architecture::Bert),
            Task::Ner => ("dbmdz/bert-large-cased-finetuned-conll03-english", Architecture::Bert),
            Task::QuestionAnswering => (
                "distilbert-base-cased-distilled-squad",
                Architecture::DistilBert,
            ),
            Task::Summarization => ("facebook/bart-large-cnn", Architecture::Bart),
            Task::ZeroShot => ("facebook/bart-large-mnli", Architecture::Bart),
            Task::Translation => ("Helsinki-NLP/opus-mt-en-fr", Architecture::Marian),
            Task::Generation => ("gpt2", Architecture::Gpt2),
        };
        DefaultModel {
            repo_id,
            architecture,
        }
    }

    /// Whether a graph of `architecture` can serve this task.
    pub fn supports(self, architecture: Architecture) -> bool {
        let family = architecture.family();
        match self {
            Task::Sentiment | Task::ZeroShot => {
                family == ModelFamily::Encoder || architecture == Architecture::Bart
            }
            Task::Pos | Task::Ner | Task::QuestionAnswering => family == ModelFamily::Encoder,
            Task::Summarization => matches!(architecture, Architecture::Bart | Architecture::T5),
            Task::Translation => family == ModelFamily::EncoderDecoder,
            Task::Generation => family == ModelFamily::Decoder,
        }
    }

    /// Whether the task runs an autoregressive decode loop.
    pub fn is_generative(self) -> bool {
        matches!(
            self,
            Task::Summarization | Task::Translation | Task::Generation
        )
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Task {
    type Err = NlpError;

    fn from_str(s: &str) -> Result<Self> {
        let needle = s.trim().to_lowercase();
        match needle.as_str() {
            "summarize" => Ok(Task::Summarization),
            "translate" => Ok(Task::Translation),
            "generate" | "text-generation" => Ok(Task::Generation),
            "question-answering" => Ok(Task::QuestionAnswering),
            _ => Task::ALL
                .iter()
                .copied()
                .find(|t| t.name() == needle)
                .ok_or_else(|| NlpError::Config(format!("unknown task '{}'", s))),
        }
    }
}

/// The four files a model is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    /// Exported ONNX graph with embedded weights.
    pub weights: PathBuf,
    /// `config.json`.
    pub config: PathBuf,
    /// `vocab.txt`, `vocab.json` or a complete `tokenizer.json`.
    pub vocab: PathBuf,
    /// `merges.txt`, only for byte-level BPE vocabularies.
    pub merges: Option<PathBuf>,
}

impl ArtifactPaths {
    pub fn new(
        weights: impl Into<PathBuf>,
        config: impl Into<PathBuf>,
        vocab: impl Into<PathBuf>,
        merges: Option<PathBuf>,
    ) -> Self {
        Self {
            weights: weights.into(),
            config: config.into(),
            vocab: vocab.into(),
            merges,
        }
    }

    /// Build from raw strings, where an empty merges path means "none".
    pub fn from_strs(weights: &str, config: &str, vocab: &str, merges: &str) -> Self {
        let merges = (!merges.trim().is_empty()).then(|| PathBuf::from(merges));
        Self::new(weights, config, vocab, merges)
    }

    /// Resolve the conventional file names inside a model directory.
    ///
    /// A `tokenizer.json` wins over the raw vocabulary files when present.
    pub fn in_dir(dir: &Path, weights_file: &str, architecture: Architecture) -> Self {
        let tokenizer_json = dir.join("tokenizer.json");
        let kind = architecture.tokenizer_kind();

        let (vocab, merges) = if tokenizer_json.exists() {
            (tokenizer_json, None)
        } else {
            match kind {
                TokenizerKind::WordPiece => (dir.join("vocab.txt"), None),
                TokenizerKind::ByteLevelBpe => {
                    (dir.join("vocab.json"), Some(dir.join("merges.txt")))
                }
                TokenizerKind::SentencePiece => (dir.join("vocab.json"), None),
            }
        };

        Self {
            weights: dir.join(weights_file),
            config: dir.join("config.json"),
            vocab,
            merges,
        }
    }

    /// Whether the vocabulary path names a serialized `tokenizers` pipeline.
    pub fn vocab_is_tokenizer_json(&self) -> bool {
        self.vocab
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with("tokenizer.json"))
    }

    /// Every path that must exist for `architecture`.
    pub fn required(&self, architecture: Architecture) -> Result<Vec<&Path>> {
        let mut paths = vec![self.weights.as_path(), self.config.as_path(), self.vocab.as_path()];
        let needs_merges = architecture.tokenizer_kind() == TokenizerKind::ByteLevelBpe
            && !self.vocab_is_tokenizer_json();
        if needs_merges {
            match &self.merges {
                Some(merges) => paths.push(merges.as_path()),
                None => return Err(NlpError::ArtifactNotFound(self.vocab.with_file_name("merges.txt"))),
            }
        }
        Ok(paths)
    }
}

/// Files to fetch from the hub for a default model, as `(remote, local)` names.
pub fn remote_files(architecture: Architecture) -> Vec<(&'static str, &'static str)> {
    let mut files = vec![("onnx/model.onnx", "model.onnx"), ("config.json", "config.json")];
    match architecture.tokenizer_kind() {
        TokenizerKind::WordPiece => files.push(("vocab.txt", "vocab.txt")),
        TokenizerKind::ByteLevelBpe => {
            files.push(("vocab.json", "vocab.json"));
            files.push(("merges.txt", "merges.txt"));
        }
        TokenizerKind::SentencePiece => files.push(("tokenizer.json", "tokenizer.json")),
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_models_support_their_task() {
        for task in Task::ALL {
            let default = task.default_model();
            assert!(
                task.supports(default.architecture),
                "{} default {} is incompatible",
                task,
                default.repo_id
            );
        }
    }

    #[test]
    fn test_task_compatibility() {
        assert!(!Task::Generation.supports(Architecture::Bert));
        assert!(!Task::Ner.supports(Architecture::Bart));
        assert!(Task::ZeroShot.supports(Architecture::Bart));
        assert!(Task::Translation.supports(Architecture::T5));
        assert!(!Task::Summarization.supports(Architecture::Marian));
    }

    #[test]
    fn test_task_names_parse() {
        for task in Task::ALL {
            assert_eq!(task.name().parse::<Task>().unwrap(), task);
        }
        assert_eq!("summarize".parse::<Task>().unwrap(), Task::Summarization);
        assert!("ocr".parse::<Task>().is_err());
    }

    #[test]
    fn test_empty_merges_means_none() {
        let paths = ArtifactPaths::from_strs("m.onnx", "config.json", "vocab.txt", "");
        assert_eq!(paths.merges, None);
        assert_eq!(paths.required(Architecture::Bert).unwrap().len(), 3);
    }

    #[test]
    fn test_bpe_requires_merges() {
        let paths = ArtifactPaths::from_strs("m.onnx", "config.json", "/m/vocab.json", "");
        assert!(matches!(
            paths.required(Architecture::Gpt2),
            Err(NlpError::ArtifactNotFound(_))
        ));

        let paths = ArtifactPaths::from_strs("m.onnx", "config.json", "/m/tokenizer.json", "");
        assert!(paths.required(Architecture::Roberta).is_ok());
    }

    #[test]
    fn test_in_dir_layout() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ArtifactPaths::in_dir(dir.path(), "model.onnx", Architecture::Gpt2);
        assert_eq!(paths.vocab, dir.path().join("vocab.json"));
        assert_eq!(paths.merges, Some(dir.path().join("merges.txt")));

        std::fs::write(dir.path().join("tokenizer.json"), "{}").unwrap();
        let paths = ArtifactPaths::in_dir(dir.path(), "model.onnx", Architecture::Gpt2);
        assert_eq!(paths.vocab, dir.path().join("tokenizer.json"));
        assert_eq!(paths.merges, None);
    }
}

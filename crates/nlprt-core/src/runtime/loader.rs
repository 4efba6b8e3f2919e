//! Turns artifact files into a validated, ready-to-use model handle.

use nlprt_inference::{BackendLoader, InferenceBackend, SequenceShape};
use tracing::{debug, info};

use super::{EncoderInput, LoadedModel, ModelHandle};
use crate::architecture::{Architecture, ModelFamily};
use crate::error::{NlpError, Result};
use crate::models::{ArtifactPaths, ModelConfig, RuntimeConfig, Task};
use crate::tokenizer::build_tokenizer;

/// Builds model handles with an injected backend loader.
///
/// Construction is atomic: any failing step returns an error and nothing
/// loaded so far survives.
pub struct ArtifactLoader<'a, L> {
    backend_loader: &'a L,
    config: &'a RuntimeConfig,
}

impl<'a, L: BackendLoader> ArtifactLoader<'a, L> {
    pub fn new(backend_loader: &'a L, config: &'a RuntimeConfig) -> Self {
        Self {
            backend_loader,
            config,
        }
    }

    /// Load the task's default model from the model cache directory.
    pub fn load_default(&self, task: Task) -> Result<ModelHandle<L::Backend>> {
        let default = task.default_model();
        let dir = self.config.model_dir(default.repo_id);
        let paths = ArtifactPaths::in_dir(
            &dir,
            &self.config.models.weights_file,
            default.architecture,
        );
        info!("Loading default {} model {}", task, default.repo_id);
        self.load(task, &paths, default.architecture)
    }

    /// Load a model for `task` from explicit files.
    ///
    /// The config is validated against `architecture` before the remaining
    /// files are looked up, since which vocabulary files are required
    /// depends on the architecture.
    pub fn load(
        &self,
        task: Task,
        paths: &ArtifactPaths,
        architecture: Architecture,
    ) -> Result<ModelHandle<L::Backend>> {
        if !paths.config.is_file() {
            return Err(NlpError::ArtifactNotFound(paths.config.clone()));
        }
        let config = ModelConfig::from_file(&paths.config, architecture)?;

        for path in paths.required(architecture)? {
            if !path.is_file() {
                return Err(NlpError::ArtifactNotFound(path.to_path_buf()));
            }
        }

        if !task.supports(architecture) {
            return Err(NlpError::UnsupportedArchitecture(format!(
                "{} models cannot serve the {} task",
                architecture, task
            )));
        }
        check_labels(task, &config)?;

        let tokenization = &self.config.tokenization;
        let lowercase = tokenization.lowercase.or(config.do_lower_case);
        let tokenizer = build_tokenizer(
            architecture,
            &paths.vocab,
            paths.merges.as_deref(),
            lowercase,
        )?;

        if let Some(declared) = config.vocab_size {
            if tokenizer.vocab_size() > declared {
                return Err(NlpError::ConfigMismatch(format!(
                    "vocabulary has {} tokens but config declares vocab_size {}",
                    tokenizer.vocab_size(),
                    declared
                )));
            }
        }

        let shape = SequenceShape {
            sequence_length: tokenization.max_sequence_length,
            decoder_length: tokenization.decoder_length,
        };
        let backend = self
            .backend_loader
            .load(&paths.weights, shape)
            .map_err(|e| {
                NlpError::WeightLoadFailure(format!("{}: {}", paths.weights.display(), e))
            })?;
        debug!(
            "Graph inputs {:?}, outputs {:?}",
            backend.input_names(),
            backend.output_names()
        );

        let model = LoadedModel {
            task,
            architecture,
            config,
            tokenizer,
            backend,
            max_sequence_length: tokenization.max_sequence_length,
        };

        if tokenization.validate_outputs {
            check_outputs(&model)?;
        }

        info!(
            "Loaded {} model ({}, {} labels, {} tokens)",
            task,
            architecture,
            model.config.num_labels(),
            model.tokenizer.vocab_size()
        );
        Ok(ModelHandle::new(model))
    }
}

fn check_labels(task: Task, config: &ModelConfig) -> Result<()> {
    match task {
        Task::Sentiment | Task::Pos | Task::Ner | Task::ZeroShot if config.num_labels() == 0 => {
            Err(NlpError::ConfigMismatch(format!(
                "{} models need a label mapping, config declares none",
                task
            )))
        }
        Task::ZeroShot if config.find_label("entail").is_none() => Err(NlpError::ConfigMismatch(
            "zero-shot models need an entailment label".to_string(),
        )),
        _ => Ok(()),
    }
}

/// Run one forward pass over an empty input and compare the output
/// dimension with what the config declares.
fn check_outputs<B: InferenceBackend>(model: &LoadedModel<B>) -> Result<()> {
    let mismatch = |e: NlpError| match e {
        NlpError::ConfigMismatch(_) => e,
        other => NlpError::ConfigMismatch(format!("validation forward pass failed: {}", other)),
    };

    let seq = model.tokenizer.encode("").map_err(mismatch)?;
    let input = if seq.is_empty() {
        EncoderInput::from_ids(vec![model.generation_start_id()])
    } else {
        EncoderInput::from(&seq)
    };

    let decoder = [model.decoder_start_id()];
    let prefix = (model.task.is_generative()
        && model.architecture.family() == ModelFamily::EncoderDecoder)
        .then_some(&decoder[..]);
    let out = model.session().run(&input, prefix).map_err(mismatch)?;
    let labels = model.config.num_labels();

    let (what, expected, got) = match model.task {
        Task::Sentiment | Task::ZeroShot => {
            ("labels", labels, out.sequence_logits().map_err(mismatch)?.len())
        }
        Task::Pos | Task::Ner => {
            let rows = out.token_logits().map_err(mismatch)?;
            let width = rows.first().map_or(labels, Vec::len);
            ("labels", labels, width)
        }
        Task::QuestionAnswering => {
            out.span_logits().map_err(mismatch)?;
            return Ok(());
        }
        Task::Summarization | Task::Translation | Task::Generation => {
            let got = out.next_token_logits().map_err(mismatch)?.len();
            ("vocabulary entries", expected_vocab(model, got), got)
        }
    };

    if expected != got {
        return Err(NlpError::ConfigMismatch(format!(
            "graph produces {} outputs but config declares {} {}",
            got, expected, what
        )));
    }
    debug!("Output width checked: {} {}", got, what);
    Ok(())
}

/// Without a declared vocab size, any output covering the tokenizer passes.
fn expected_vocab<B>(model: &LoadedModel<B>, got: usize) -> usize {
    match model.config.vocab_size {
        Some(declared) => declared,
        None if got >= model.tokenizer.vocab_size() => got,
        None => model.tokenizer.vocab_size(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fixtures;
    use pretty_assertions::assert_eq;

    fn config() -> RuntimeConfig {
        RuntimeConfig::default()
    }

    #[test]
    fn test_load_sentiment_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let paths = fixtures::sentiment_artifacts(dir.path());
        let config = config();
        let spec = fixtures::sentiment_loader();
        let loader = ArtifactLoader::new(&spec, &config);

        let handle = loader.load(Task::Sentiment, &paths, Architecture::DistilBert).unwrap();
        let model = handle.get().unwrap();
        assert_eq!(model.config.labels, vec!["NEGATIVE", "POSITIVE"]);
        assert_eq!(model.architecture, Architecture::DistilBert);
    }

    #[test]
    fn test_every_architecture_loads_and_rejects_a_mismatched_tag() {
        let config = config();
        for architecture in Architecture::ALL {
            let dir = tempfile::tempdir().unwrap();
            let (task, paths, backend_loader) = fixtures::artifacts_for(architecture, dir.path());
            let loader = ArtifactLoader::new(&backend_loader, &config);

            let loaded = loader.load(task, &paths, architecture);
            assert!(loaded.is_ok(), "{} failed: {:?}", architecture, loaded.err());

            for other in Architecture::ALL.into_iter().filter(|a| *a != architecture) {
                let err = loader.load(task, &paths, other).err();
                assert!(
                    matches!(err, Some(NlpError::ConfigMismatch(_))),
                    "{} loaded as {} gave {:?}",
                    architecture,
                    other,
                    err
                );
            }
        }
    }

    #[test]
    fn test_wordpiece_artifacts_under_a_bpe_tag() {
        let dir = tempfile::tempdir().unwrap();
        let paths = fixtures::sentiment_artifacts(dir.path());
        let config = config();
        let spec = fixtures::sentiment_loader();
        let loader = ArtifactLoader::new(&spec, &config);

        for other in [Architecture::Roberta, Architecture::Bart, Architecture::Gpt2] {
            match loader.load(Task::Sentiment, &paths, other) {
                Err(NlpError::ConfigMismatch(message)) => assert!(message.contains("distilbert")),
                result => panic!("{} gave {:?}", other, result.err()),
            }
        }
    }

    #[test]
    fn test_missing_config_is_reported_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = fixtures::sentiment_artifacts(dir.path());
        std::fs::remove_file(&paths.config).unwrap();
        paths.merges = None;
        let config = config();
        let spec = fixtures::sentiment_loader();
        let loader = ArtifactLoader::new(&spec, &config);

        match loader.load(Task::Sentiment, &paths, Architecture::Gpt2) {
            Err(NlpError::ArtifactNotFound(path)) => assert_eq!(path, paths.config),
            other => panic!("unexpected {:?}", other.err()),
        }
    }

    #[test]
    fn test_missing_file_is_artifact_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = fixtures::sentiment_artifacts(dir.path());
        paths.vocab = dir.path().join("missing-vocab.txt");
        let config = config();
        let spec = fixtures::sentiment_loader();
        let loader = ArtifactLoader::new(&spec, &config);

        match loader.load(Task::Sentiment, &paths, Architecture::DistilBert) {
            Err(NlpError::ArtifactNotFound(path)) => assert_eq!(path, paths.vocab),
            other => panic!("unexpected {:?}", other.err()),
        }
    }

    #[test]
    fn test_corrupt_weights_fail_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let paths = fixtures::sentiment_artifacts(dir.path());
        std::fs::write(&paths.weights, b"\x00\x01garbage").unwrap();
        let config = config();
        let spec = fixtures::sentiment_loader();
        let loader = ArtifactLoader::new(&spec, &config);

        assert!(matches!(
            loader.load(Task::Sentiment, &paths, Architecture::DistilBert),
            Err(NlpError::WeightLoadFailure(_))
        ));
    }

    #[test]
    fn test_label_count_must_match_graph_output() {
        let dir = tempfile::tempdir().unwrap();
        let paths = fixtures::sentiment_artifacts(dir.path());
        fixtures::write_json(
            &paths.config,
            serde_json::json!({
                "model_type": "distilbert",
                "dim": 8,
                "n_layers": 1,
                "id2label": {"0": "NEGATIVE", "1": "NEUTRAL", "2": "POSITIVE"}
            }),
        );
        let config = config();
        let spec = fixtures::sentiment_loader();
        let loader = ArtifactLoader::new(&spec, &config);

        assert!(matches!(
            loader.load(Task::Sentiment, &paths, Architecture::DistilBert),
            Err(NlpError::ConfigMismatch(_))
        ));
    }

    #[test]
    fn test_output_validation_can_be_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let paths = fixtures::sentiment_artifacts(dir.path());
        fixtures::write_json(
            &paths.config,
            serde_json::json!({
                "model_type": "distilbert",
                "dim": 8,
                "n_layers": 1,
                "id2label": {"0": "A", "1": "B", "2": "C"}
            }),
        );
        let mut config = config();
        config.tokenization.validate_outputs = false;
        let spec = fixtures::sentiment_loader();
        let loader = ArtifactLoader::new(&spec, &config);

        assert!(loader.load(Task::Sentiment, &paths, Architecture::DistilBert).is_ok());
    }

    #[test]
    fn test_task_incompatible_architecture() {
        let dir = tempfile::tempdir().unwrap();
        let paths = fixtures::sentiment_artifacts(dir.path());
        let config = config();
        let spec = fixtures::sentiment_loader();
        let loader = ArtifactLoader::new(&spec, &config);

        assert!(matches!(
            loader.load(Task::Generation, &paths, Architecture::DistilBert),
            Err(NlpError::UnsupportedArchitecture(_))
        ));
    }

    #[test]
    fn test_load_default_reads_cache_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config();
        config.models.cache_dir = dir.path().to_path_buf();

        let model_dir = config.model_dir(Task::Sentiment.default_model().repo_id);
        std::fs::create_dir_all(&model_dir).unwrap();
        fixtures::sentiment_artifacts(&model_dir);

        let spec = fixtures::sentiment_loader();
        let loader = ArtifactLoader::new(&spec, &config);
        assert!(loader.load_default(Task::Sentiment).is_ok());

        let err = loader.load_default(Task::Ner).err();
        assert!(matches!(err, Some(NlpError::ArtifactNotFound(_))));
    }
}

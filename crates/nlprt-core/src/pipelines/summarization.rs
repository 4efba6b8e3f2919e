//! Abstractive summarization with an encoder-decoder model.

use nlprt_inference::{BackendLoader, InferenceBackend};
use tracing::info;

use super::seq2seq;
use crate::architecture::Architecture;
use crate::error::Result;
use crate::models::{ArtifactPaths, DecodingConfig, RuntimeConfig, Task};
use crate::runtime::{ArtifactLoader, ModelHandle};

#[derive(Debug)]
pub struct SummarizationModel<B> {
    handle: ModelHandle<B>,
    decoding: DecodingConfig,
}

impl<B: InferenceBackend> SummarizationModel<B> {
    /// Default model: DistilBART fine-tuned on CNN/DailyMail.
    pub fn new<L>(loader: &L, config: &RuntimeConfig) -> Result<Self>
    where
        L: BackendLoader<Backend = B>,
    {
        let handle = ArtifactLoader::new(loader, config).load_default(Task::Summarization)?;
        Ok(Self {
            handle,
            decoding: config.summarization.clone(),
        })
    }

    pub fn from_files<L>(
        loader: &L,
        paths: &ArtifactPaths,
        architecture: Architecture,
        config: &RuntimeConfig,
    ) -> Result<Self>
    where
        L: BackendLoader<Backend = B>,
    {
        let handle =
            ArtifactLoader::new(loader, config).load(Task::Summarization, paths, architecture)?;
        Ok(Self {
            handle,
            decoding: config.summarization.clone(),
        })
    }

    /// Replace the decoding settings.
    pub fn with_decoding(mut self, decoding: DecodingConfig) -> Self {
        self.decoding = decoding;
        self
    }

    /// Summaries of `text`, best first; at most `num_return_sequences`.
    pub fn summarize(&self, text: &str) -> Result<Vec<String>> {
        let model = self.handle.get()?;

        let input = match model.architecture {
            Architecture::T5 => format!("summarize: {}", text),
            _ => text.to_string(),
        };
        let mut seq = model.tokenizer.encode(&input)?;
        seq.truncate(model.encoder_limit());

        let summaries =
            seq2seq::generate(model, &seq, &self.decoding, model.config.forced_bos_token_id)?;
        info!("Summarized {} tokens into {} candidates", seq.len(), summaries.len());
        Ok(summaries)
    }

    pub fn close(&mut self) {
        self.handle.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NlpError;
    use crate::test_support::{fixtures, ScriptedBackend};
    use pretty_assertions::assert_eq;

    fn model(dir: &std::path::Path, decoding: DecodingConfig) -> SummarizationModel<ScriptedBackend> {
        let paths = fixtures::summarization_artifacts(dir);
        SummarizationModel::from_files(
            &fixtures::copy_loader(),
            &paths,
            Architecture::Bart,
            &RuntimeConfig::default(),
        )
        .unwrap()
        .with_decoding(decoding)
    }

    #[test]
    fn test_beam_search_returns_ranked_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let decoding = DecodingConfig {
            min_length: 0,
            max_length: 20,
            num_return_sequences: 2,
            ..DecodingConfig::summarization()
        };
        let model = model(dir.path(), decoding);

        let summaries = model.summarize("the cat sat").unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0], "the cat sat");
    }

    #[test]
    fn test_greedy_summary() {
        let dir = tempfile::tempdir().unwrap();
        let model = model(dir.path(), DecodingConfig::greedy());
        assert_eq!(model.summarize("the cat").unwrap(), vec!["the cat"]);
    }

    #[test]
    fn test_max_length_bounds_output() {
        let dir = tempfile::tempdir().unwrap();
        let decoding = DecodingConfig {
            max_length: 1,
            ..DecodingConfig::greedy()
        };
        let model = model(dir.path(), decoding);
        assert_eq!(model.summarize("the cat sat").unwrap(), vec!["the"]);
    }

    #[test]
    fn test_closed_model() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = model(dir.path(), DecodingConfig::greedy());
        model.close();
        assert!(matches!(
            model.summarize("the cat sat"),
            Err(NlpError::ModelClosed)
        ));
    }
}

//! Open-ended text generation with decoder-only models.

use nlprt_inference::{BackendLoader, InferenceBackend};
use tracing::info;

use super::decoding::{decode, DecodeParams};
use crate::architecture::Architecture;
use crate::error::{NlpError, Result};
use crate::models::{ArtifactPaths, DecodingConfig, RuntimeConfig, Task};
use crate::runtime::{ArtifactLoader, EncoderInput, ModelHandle};

#[derive(Debug)]
pub struct TextGenerationModel<B> {
    handle: ModelHandle<B>,
    decoding: DecodingConfig,
}

impl<B: InferenceBackend> TextGenerationModel<B> {
    /// Default model: GPT-2.
    pub fn new<L>(loader: &L, config: &RuntimeConfig) -> Result<Self>
    where
        L: BackendLoader<Backend = B>,
    {
        let handle = ArtifactLoader::new(loader, config).load_default(Task::Generation)?;
        Ok(Self {
            handle,
            decoding: config.generation.clone(),
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
            ArtifactLoader::new(loader, config).load(Task::Generation, paths, architecture)?;
        Ok(Self {
            handle,
            decoding: config.generation.clone(),
        })
    }

    pub fn with_decoding(mut self, decoding: DecodingConfig) -> Self {
        self.decoding = decoding;
        self
    }

    /// Continue `prompt`. The returned text starts with the prompt.
    ///
    /// `prefix` conditions the model but is not part of the output. When
    /// the context exceeds the sequence limit its oldest tokens are dropped.
    pub fn generate(&self, prompt: &str, prefix: Option<&str>) -> Result<String> {
        let model = self.handle.get()?;

        let mut context = match prefix {
            Some(prefix) if !prefix.is_empty() => model.tokenizer.encode_plain(prefix)?.ids(),
            _ => Vec::new(),
        };
        context.extend(model.tokenizer.encode_plain(prompt)?.ids());
        if context.is_empty() {
            context.push(model.generation_start_id());
        }

        let limit = model.encoder_limit();
        let keep = limit.saturating_sub(1).max(1);
        if context.len() > keep {
            context.drain(..context.len() - keep);
        }

        let session = model.session();
        let params = DecodeParams {
            eos: model.eos_id(),
            forced_bos: None,
            max_total_len: Some(limit),
        };
        let hypotheses = decode(&self.decoding, &context, &params, |seq| {
            session
                .run(&EncoderInput::from_ids(seq.to_vec()), None)?
                .next_token_logits()
        })?;
        let best = hypotheses
            .first()
            .ok_or_else(|| NlpError::InferenceFailure("decoder produced no output".to_string()))?;

        let continuation = model.tokenizer.decode(&best.tokens)?;
        info!(
            "Generated {} tokens from a {} token context",
            best.tokens.len(),
            context.len()
        );
        Ok(format!("{}{}", prompt, continuation))
    }

    pub fn close(&mut self) {
        self.handle.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fixtures, ScriptedBackend};
    use pretty_assertions::assert_eq;

    fn model(dir: &std::path::Path, config: &RuntimeConfig) -> TextGenerationModel<ScriptedBackend> {
        let paths = fixtures::generation_artifacts(dir);
        TextGenerationModel::from_files(&fixtures::lm_loader(), &paths, Architecture::Gpt2, config)
            .unwrap()
    }

    #[test]
    fn test_greedy_continuation_starts_with_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let model = model(dir.path(), &RuntimeConfig::default()).with_decoding(DecodingConfig::greedy());
        assert_eq!(model.generate("the", None).unwrap(), "the cat sat");
    }

    #[test]
    fn test_prefix_conditions_but_is_stripped() {
        let dir = tempfile::tempdir().unwrap();
        let model = model(dir.path(), &RuntimeConfig::default()).with_decoding(DecodingConfig::greedy());
        assert_eq!(model.generate(" cat", Some("the")).unwrap(), " cat sat");
    }

    #[test]
    fn test_empty_prompt_starts_from_bos() {
        let dir = tempfile::tempdir().unwrap();
        let model = model(dir.path(), &RuntimeConfig::default()).with_decoding(DecodingConfig::greedy());
        assert_eq!(model.generate("", None).unwrap(), "the cat sat");
    }

    #[test]
    fn test_seeded_sampling_is_reproducible() {
        let dir = tempfile::tempdir().unwrap();
        let model = model(dir.path(), &RuntimeConfig::default());
        let first = model.generate("the", None).unwrap();
        assert_eq!(first, model.generate("the", None).unwrap());
        assert!(first.starts_with("the"));
    }

    #[test]
    fn test_context_is_left_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RuntimeConfig::default();
        config.tokenization.max_sequence_length = 2;
        let mut model = model(dir.path(), &config).with_decoding(DecodingConfig::greedy());

        // only the last token fits, leaving room for one generated token
        assert_eq!(model.generate("the cat", None).unwrap(), "the cat sat");

        model.close();
        assert!(matches!(
            model.generate("the", None),
            Err(NlpError::ModelClosed)
        ));
    }
}

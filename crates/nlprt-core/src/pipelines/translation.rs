//! Machine translation with encoder-decoder models.
//!
//! Marian multi-target models select the output language with a `>>xx<<`
//! token in front of the source; T5 reads the language pair from a task
//! prefix. Single-pair Marian models ignore both languages.

use nlprt_inference::{BackendLoader, InferenceBackend};
use tracing::{debug, info, warn};

use super::seq2seq;
use crate::architecture::Architecture;
use crate::error::{NlpError, Result};
use crate::language::Language;
use crate::models::{ArtifactPaths, DecodingConfig, RuntimeConfig, Task};
use crate::runtime::{ArtifactLoader, LoadedModel, ModelHandle};
use crate::tokenizer::TokenSequence;

#[derive(Debug)]
pub struct TranslationModel<B> {
    handle: ModelHandle<B>,
    decoding: DecodingConfig,
    default_source: Option<String>,
}

impl<B: InferenceBackend> TranslationModel<B> {
    /// Default model: Marian English to French.
    pub fn new<L>(loader: &L, config: &RuntimeConfig) -> Result<Self>
    where
        L: BackendLoader<Backend = B>,
    {
        let handle = ArtifactLoader::new(loader, config).load_default(Task::Translation)?;
        Ok(Self::with_handle(handle, config))
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
            ArtifactLoader::new(loader, config).load(Task::Translation, paths, architecture)?;
        Ok(Self::with_handle(handle, config))
    }

    fn with_handle(handle: ModelHandle<B>, config: &RuntimeConfig) -> Self {
        Self {
            handle,
            decoding: config.translation.decoding.clone(),
            default_source: config.translation.default_source_language.clone(),
        }
    }

    pub fn with_decoding(mut self, decoding: DecodingConfig) -> Self {
        self.decoding = decoding;
        self
    }

    /// Translate `text` into `target`.
    ///
    /// `source` may be omitted: Marian models do not need it and T5 falls
    /// back to the configured default source language.
    pub fn translate(&self, text: &str, source: Option<&str>, target: &str) -> Result<String> {
        let model = self.handle.get()?;

        if target.trim().is_empty() {
            return Err(NlpError::MissingTargetLanguage);
        }
        let target: Language = target.parse()?;
        let source = source
            .filter(|s| !s.trim().is_empty())
            .map(str::parse::<Language>)
            .transpose()?;

        let mut seq = match model.architecture {
            Architecture::T5 => {
                let source = self.t5_source(source)?;
                model.tokenizer.encode(&t5_prompt(source, target, text))?
            }
            _ => marian_source(model, text, source, target)?,
        };
        seq.truncate(model.encoder_limit());

        let best = seq2seq::generate(model, &seq, &self.decoding, model.config.forced_bos_token_id)?
            .into_iter()
            .next()
            .ok_or_else(|| NlpError::InferenceFailure("decoder produced no output".to_string()))?;

        info!("Translated {} source tokens into {}", seq.len(), target);
        Ok(best)
    }

    pub fn close(&mut self) {
        self.handle.release();
    }

    fn t5_source(&self, source: Option<Language>) -> Result<Language> {
        match (source, &self.default_source) {
            (Some(source), _) => Ok(source),
            (None, Some(default)) => default.parse(),
            (None, None) => Err(NlpError::Config(
                "T5 translation needs a source language and none is configured".to_string(),
            )),
        }
    }
}

fn t5_prompt(source: Language, target: Language, text: &str) -> String {
    format!("translate {} to {}: {}", source, target, text)
}

fn marian_source<B: InferenceBackend>(
    model: &LoadedModel<B>,
    text: &str,
    source: Option<Language>,
    target: Language,
) -> Result<TokenSequence> {
    let mut seq = model.tokenizer.encode(text)?;
    match model.tokenizer.token_to_id(&target.marian_token()) {
        Some(id) => seq.prepend_special(id),
        None => warn!(
            "Vocabulary has no {} token; the model translates into its fixed target",
            target.marian_token()
        ),
    }
    if let Some(source) = source {
        debug!("Source language {} is implied by the model", source);
    }
    Ok(seq)
}

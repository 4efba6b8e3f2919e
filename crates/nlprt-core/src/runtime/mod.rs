//! Loaded models and their lifecycle.

pub mod loader;
pub mod session;

pub use loader::ArtifactLoader;
pub use session::{EncoderInput, ForwardOutput, Session};

use nlprt_inference::InferenceBackend;
use tracing::info;

use crate::architecture::Architecture;
use crate::error::{NlpError, Result};
use crate::models::{ModelConfig, Task};
use crate::tokenizer::TextTokenizer;

/// Everything a pipeline needs from one model.
///
/// Immutable after construction: predictions only read it.
#[derive(Debug)]
pub struct LoadedModel<B> {
    pub task: Task,
    pub architecture: Architecture,
    pub config: ModelConfig,
    pub tokenizer: TextTokenizer,
    pub backend: B,
    /// Longest encoder input; longer inputs are truncated.
    pub max_sequence_length: usize,
}

impl<B: InferenceBackend> LoadedModel<B> {
    /// Session over this model's backend.
    pub fn session(&self) -> Session<'_, B> {
        Session::new(&self.backend, self.pad_id())
    }

    /// Token id used for padding.
    pub fn pad_id(&self) -> u32 {
        self.config
            .pad_token_id
            .or(self.tokenizer.special_ids().pad)
            .unwrap_or(0)
    }

    /// End-of-sequence id for decode loops.
    pub fn eos_id(&self) -> Option<u32> {
        self.config.eos_token_id.or(self.tokenizer.special_ids().eos)
    }

    /// First decoder token of encoder-decoder graphs.
    pub fn decoder_start_id(&self) -> u32 {
        let fallback = match self.architecture {
            Architecture::Bart => self.eos_id(),
            _ => None,
        };
        self.config
            .decoder_start_token_id
            .or(fallback)
            .unwrap_or_else(|| self.pad_id())
    }

    /// Token fed to decoder-only graphs when the prompt is empty.
    pub fn generation_start_id(&self) -> u32 {
        let special = self.tokenizer.special_ids();
        self.config
            .bos_token_id
            .or(special.bos)
            .or(self.eos_id())
            .unwrap_or(0)
    }

    /// Effective encoder length: configured limit, capped by a static graph shape.
    pub fn encoder_limit(&self) -> usize {
        match self.backend.fixed_sequence_length() {
            Some(fixed) => fixed.min(self.max_sequence_length),
            None => self.max_sequence_length,
        }
    }
}

/// Owning handle to a loaded model.
///
/// Releasing drops weights, tokenizer and backend at once; every later
/// access fails with [`NlpError::ModelClosed`].
#[derive(Debug)]
pub struct ModelHandle<B> {
    inner: Option<LoadedModel<B>>,
}

impl<B> ModelHandle<B> {
    pub fn new(model: LoadedModel<B>) -> Self {
        Self { inner: Some(model) }
    }

    /// Borrow the loaded model.
    pub fn get(&self) -> Result<&LoadedModel<B>> {
        self.inner.as_ref().ok_or(NlpError::ModelClosed)
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    /// Drop the model. Idempotent.
    pub fn release(&mut self) {
        if let Some(model) = self.inner.take() {
            info!("Released {} model ({})", model.task, model.architecture);
        }
    }
}

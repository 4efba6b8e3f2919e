//! Core library for nlprt, a multi-task transformer inference runtime.
//!
//! This crate provides:
//! - Architecture registry (tokenizer kind, graph family, config keys, special tokens)
//! - Artifact loading with config validation and a validation forward pass
//! - Tokenization with byte offsets into the caller's text
//! - Task pipelines: sentiment, POS, NER, QA, summarization, zero-shot,
//!   translation and text generation
//!
//! Pipelines are generic over the forward-pass backend; pass a
//! [`BackendLoader`] such as `TractLoader` when constructing a model.

pub mod architecture;
pub mod error;
pub mod language;
pub mod models;
pub mod pipelines;
pub mod runtime;
pub mod tokenizer;

#[cfg(any(test, feature = "test-support"))]
#[doc(hidden)]
pub mod test_support;

pub use architecture::{Architecture, ModelFamily, TokenizerKind};
pub use error::{NlpError, Result};
pub use language::Language;
pub use models::{ArtifactPaths, DecodingConfig, ModelConfig, RuntimeConfig, Task};
pub use pipelines::{
    Answer, Entity, NerModel, PosModel, PosTag, QaModel, Sentiment, SentimentModel, Span,
    SummarizationModel, TextGenerationModel, TranslationModel, ZeroShotLabel, ZeroShotModel,
};
pub use tokenizer::{TextTokenizer, TokenSequence};

/// Re-export backend types.
pub use nlprt_inference::{BackendLoader, InferenceBackend, InputTensor, OutputTensor};

#[cfg(feature = "ort")]
pub use nlprt_inference::{OrtBackend, OrtLoader};

#[cfg(feature = "tract")]
pub use nlprt_inference::{TractBackend, TractLoader};

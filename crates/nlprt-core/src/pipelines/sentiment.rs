//! Sentiment analysis: one forward pass, argmax over the label logits.

use nlprt_inference::{BackendLoader, InferenceBackend};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{argmax, softmax};
use crate::architecture::Architecture;
use crate::error::{NlpError, Result};
use crate::models::{ArtifactPaths, RuntimeConfig, Task};
use crate::runtime::{ArtifactLoader, EncoderInput, ModelHandle};

/// Predicted polarity and its probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sentiment {
    pub label: String,
    pub score: f32,
}

/// Sentiment classifier over a sequence classification head.
#[derive(Debug)]
pub struct SentimentModel<B> {
    handle: ModelHandle<B>,
}

impl<B: InferenceBackend> SentimentModel<B> {
    /// Default model: DistilBERT fine-tuned on SST-2.
    pub fn new<L>(loader: &L, config: &RuntimeConfig) -> Result<Self>
    where
        L: BackendLoader<Backend = B>,
    {
        let handle = ArtifactLoader::new(loader, config).load_default(Task::Sentiment)?;
        Ok(Self { handle })
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
        let handle = ArtifactLoader::new(loader, config).load(Task::Sentiment, paths, architecture)?;
        Ok(Self { handle })
    }

    /// Classify `text`. Binary polarity labels are reported as
    /// `Positive` / `Negative`.
    pub fn predict(&self, text: &str) -> Result<Sentiment> {
        let model = self.handle.get()?;

        let mut seq = model.tokenizer.encode(text)?;
        seq.truncate(model.encoder_limit());

        let output = model.session().run(&EncoderInput::from(&seq), None)?;
        let logits = output.sequence_logits()?;
        if logits.len() != model.config.num_labels() {
            return Err(NlpError::InferenceFailure(format!(
                "expected {} logits, got {}",
                model.config.num_labels(),
                logits.len()
            )));
        }

        let probs = softmax(&logits);
        let best = argmax(&probs)
            .ok_or_else(|| NlpError::InferenceFailure("empty logits".to_string()))?;
        let raw = model.config.label(best).unwrap_or_default();
        let label = polarity(raw, probs.len());

        debug!("Sentiment {} ({:.3}) for {} tokens", label, probs[best], seq.len());
        Ok(Sentiment {
            label,
            score: probs[best],
        })
    }

    /// Release the model. Later predictions fail with `ModelClosed`.
    pub fn close(&mut self) {
        self.handle.release();
    }
}

fn polarity(label: &str, num_labels: usize) -> String {
    if num_labels == 2 {
        match label.to_uppercase().as_str() {
            "POSITIVE" | "POS" | "LABEL_1" => return "Positive".to_string(),
            "NEGATIVE" | "NEG" | "LABEL_0" => return "Negative".to_string(),
            _ => {}
        }
    }
    label.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fixtures;
    use pretty_assertions::assert_eq;

    fn model(dir: &std::path::Path) -> SentimentModel<crate::test_support::ScriptedBackend> {
        let paths = fixtures::sentiment_artifacts(dir);
        SentimentModel::from_files(
            &fixtures::sentiment_loader(),
            &paths,
            Architecture::DistilBert,
            &RuntimeConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_positive_and_negative() {
        let dir = tempfile::tempdir().unwrap();
        let model = model(dir.path());

        let result = model.predict("I love this library!").unwrap();
        assert_eq!(result.label, "Positive");
        assert!(result.score > 0.5);

        let result = model.predict("This is terrible.").unwrap();
        assert_eq!(result.label, "Negative");
        assert!(result.score > 0.5);
    }

    #[test]
    fn test_empty_text_is_classified() {
        let dir = tempfile::tempdir().unwrap();
        let model = model(dir.path());
        let result = model.predict("").unwrap();
        assert!((0.0..=1.0).contains(&result.score));
    }

    #[test]
    fn test_closed_model() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = model(dir.path());
        model.close();
        assert!(matches!(model.predict("I love it"), Err(NlpError::ModelClosed)));
    }

    #[test]
    fn test_concurrent_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let model = model(dir.path());

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|i| {
                    let model = &model;
                    scope.spawn(move || {
                        let text = if i % 2 == 0 { "I love this" } else { "This is terrible" };
                        model.predict(text).unwrap().label
                    })
                })
                .collect();
            let labels: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            assert_eq!(labels, vec!["Positive", "Negative", "Positive", "Negative"]);
        });
    }

    #[test]
    fn test_polarity_names() {
        assert_eq!(polarity("LABEL_1", 2), "Positive");
        assert_eq!(polarity("negative", 2), "Negative");
        assert_eq!(polarity("joy", 6), "joy");
        assert_eq!(polarity("POSITIVE", 3), "POSITIVE");
    }

    /// Runs against real exported artifacts when `NLPRT_SST2_DIR` points at
    /// a directory with `model.onnx`, `config.json` and `vocab.txt`.
    #[test]
    #[ignore]
    #[cfg(feature = "tract")]
    fn test_sst2_end_to_end() {
        let Ok(dir) = std::env::var("NLPRT_SST2_DIR") else {
            return;
        };
        let dir = std::path::PathBuf::from(dir);
        let paths = ArtifactPaths::in_dir(&dir, "model.onnx", Architecture::DistilBert);
        let model = SentimentModel::from_files(
            &nlprt_inference::TractLoader,
            &paths,
            Architecture::DistilBert,
            &RuntimeConfig::default(),
        )
        .unwrap();

        let result = model.predict("I love this library!").unwrap();
        assert_eq!(result.label, "Positive");
        assert!(result.score > 0.5);
        assert_eq!(model.predict("This is terrible.").unwrap().label, "Negative");
    }
}

//! Part-of-speech tagging.

use nlprt_inference::{BackendLoader, InferenceBackend};
use serde::{Deserialize, Serialize};

use super::token_classification::label_words;
use crate::architecture::Architecture;
use crate::error::Result;
use crate::models::{ArtifactPaths, RuntimeConfig, Task};
use crate::runtime::{ArtifactLoader, ModelHandle};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosTag {
    pub word: String,
    pub label: String,
    pub score: f32,
}

/// One tag per word; sub-word pieces take the first piece's label.
#[derive(Debug)]
pub struct PosModel<B> {
    handle: ModelHandle<B>,
}

impl<B: InferenceBackend> PosModel<B> {
    pub fn new<L>(loader: &L, config: &RuntimeConfig) -> Result<Self>
    where
        L: BackendLoader<Backend = B>,
    {
        let handle = ArtifactLoader::new(loader, config).load_default(Task::Pos)?;
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
        let handle = ArtifactLoader::new(loader, config).load(Task::Pos, paths, architecture)?;
        Ok(Self { handle })
    }

    pub fn predict(&self, text: &str) -> Result<Vec<PosTag>> {
        let model = self.handle.get()?;
        let words = label_words(model, text)?;

        Ok(words
            .into_iter()
            .map(|w| PosTag {
                word: text.get(w.begin..w.end).unwrap_or_default().to_string(),
                label: model.config.label(w.label).unwrap_or_default().to_string(),
                score: w.score,
            })
            .collect())
    }

    pub fn close(&mut self) {
        self.handle.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NlpError;
    use crate::test_support::fixtures;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_subwords_take_first_piece_label() {
        let dir = tempfile::tempdir().unwrap();
        let paths = fixtures::pos_artifacts(dir.path());
        let model = PosModel::from_files(
            &fixtures::pos_loader(),
            &paths,
            Architecture::Bert,
            &RuntimeConfig::default(),
        )
        .unwrap();

        let tags = model.predict("Amy walking").unwrap();
        let pairs: Vec<(&str, &str)> = tags
            .iter()
            .map(|t| (t.word.as_str(), t.label.as_str()))
            .collect();
        assert_eq!(pairs, vec![("Amy", "PROPN"), ("walking", "VERB")]);
    }

    #[test]
    fn test_empty_text_has_no_tags() {
        let dir = tempfile::tempdir().unwrap();
        let paths = fixtures::pos_artifacts(dir.path());
        let mut model = PosModel::from_files(
            &fixtures::pos_loader(),
            &paths,
            Architecture::Bert,
            &RuntimeConfig::default(),
        )
        .unwrap();

        assert!(model.predict("").unwrap().is_empty());
        model.close();
        assert!(matches!(model.predict("Amy"), Err(NlpError::ModelClosed)));
    }
}

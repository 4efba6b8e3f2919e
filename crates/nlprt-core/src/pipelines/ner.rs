//! Named-entity recognition with BIO / BIOES span merging.

use nlprt_inference::{BackendLoader, InferenceBackend};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::token_classification::{label_words, WordLabel};
use crate::architecture::Architecture;
use crate::error::Result;
use crate::models::{ArtifactPaths, RuntimeConfig, Task};
use crate::runtime::{ArtifactLoader, ModelHandle};

/// Byte range into the input text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub begin: usize,
    pub end: usize,
}

/// A merged entity. `word` is exactly `text[offset.begin..offset.end]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub word: String,
    /// Entity type without its `B-` / `I-` / `E-` / `S-` prefix.
    pub label: String,
    /// Mean score of the merged words.
    pub score: f32,
    pub offset: Span,
}

#[derive(Debug)]
pub struct NerModel<B> {
    handle: ModelHandle<B>,
    ignore_labels: Vec<String>,
}

impl<B: InferenceBackend> NerModel<B> {
    pub fn new<L>(loader: &L, config: &RuntimeConfig) -> Result<Self>
    where
        L: BackendLoader<Backend = B>,
    {
        let handle = ArtifactLoader::new(loader, config).load_default(Task::Ner)?;
        Ok(Self {
            handle,
            ignore_labels: config.token_classification.ignore_labels.clone(),
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
        let handle = ArtifactLoader::new(loader, config).load(Task::Ner, paths, architecture)?;
        Ok(Self {
            handle,
            ignore_labels: config.token_classification.ignore_labels.clone(),
        })
    }

    pub fn predict(&self, text: &str) -> Result<Vec<Entity>> {
        let model = self.handle.get()?;
        let words = label_words(model, text)?;

        let tagged: Vec<(Tag<'_>, &WordLabel)> = words
            .iter()
            .map(|w| {
                let label = model.config.label(w.label).unwrap_or_default();
                (self.tag(label), w)
            })
            .collect();

        let entities = merge(text, &tagged);
        debug!("Found {} entities in {} words", entities.len(), words.len());
        Ok(entities)
    }

    pub fn close(&mut self) {
        self.handle.release();
    }

    fn tag<'l>(&self, label: &'l str) -> Tag<'l> {
        if self.ignore_labels.iter().any(|l| l == label) {
            return Tag::Outside;
        }
        match label.split_once('-') {
            Some(("B", kind)) => Tag::Begin(kind),
            Some(("I", kind)) => Tag::Inside(kind),
            Some(("E", kind)) => Tag::End(kind),
            Some(("S", kind)) => Tag::Single(kind),
            _ if label == "O" => Tag::Outside,
            _ => Tag::Inside(label),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag<'a> {
    Outside,
    Begin(&'a str),
    Inside(&'a str),
    End(&'a str),
    Single(&'a str),
}

struct Open<'a> {
    kind: &'a str,
    begin: usize,
    end: usize,
    scores: Vec<f32>,
}

impl<'a> Open<'a> {
    fn word(kind: &'a str, word: &WordLabel) -> Self {
        Self {
            kind,
            begin: word.begin,
            end: word.end,
            scores: vec![word.score],
        }
    }

    fn extend(&mut self, word: &WordLabel) {
        self.end = word.end;
        self.scores.push(word.score);
    }

    fn finish(self, text: &str) -> Entity {
        let score = self.scores.iter().sum::<f32>() / self.scores.len().max(1) as f32;
        Entity {
            word: text.get(self.begin..self.end).unwrap_or_default().to_string(),
            label: self.kind.to_string(),
            score,
            offset: Span {
                begin: self.begin,
                end: self.end,
            },
        }
    }
}

/// Merge contiguous words of the same entity type.
///
/// `B-` always opens a new entity; `I-` continues an open entity of the same
/// type or opens one. `E-` closes the open entity of its type, and `S-` is
/// a complete one-word entity.
fn merge(text: &str, tagged: &[(Tag<'_>, &WordLabel)]) -> Vec<Entity> {
    let mut entities = Vec::new();
    let mut open: Option<Open<'_>> = None;

    for &(tag, word) in tagged {
        match tag {
            Tag::Inside(kind) | Tag::End(kind) if open.as_ref().is_some_and(|o| o.kind == kind) => {
                if let Some(current) = open.as_mut() {
                    current.extend(word);
                }
                if matches!(tag, Tag::End(_)) {
                    entities.extend(open.take().map(|done| done.finish(text)));
                }
            }
            Tag::Outside => entities.extend(open.take().map(|done| done.finish(text))),
            Tag::Begin(kind) | Tag::Inside(kind) => {
                entities.extend(open.take().map(|done| done.finish(text)));
                open = Some(Open::word(kind, word));
            }
            Tag::End(kind) | Tag::Single(kind) => {
                entities.extend(open.take().map(|done| done.finish(text)));
                entities.push(Open::word(kind, word).finish(text));
            }
        }
    }

    entities.extend(open.map(|done| done.finish(text)));
    entities
}

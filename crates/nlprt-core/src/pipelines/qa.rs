//! Extractive question answering.

use nlprt_inference::{BackendLoader, InferenceBackend};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::softmax;
use crate::architecture::Architecture;
use crate::error::Result;
use crate::models::{ArtifactPaths, RuntimeConfig, Task};
use crate::runtime::{ArtifactLoader, EncoderInput, ModelHandle};

/// An answer span. `answer` is exactly `context[start..end]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub answer: String,
    pub score: f32,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug)]
pub struct QaModel<B> {
    handle: ModelHandle<B>,
    top_k: usize,
    max_answer_length: usize,
}

impl<B: InferenceBackend> QaModel<B> {
    pub fn new<L>(loader: &L, config: &RuntimeConfig) -> Result<Self>
    where
        L: BackendLoader<Backend = B>,
    {
        let handle = ArtifactLoader::new(loader, config).load_default(Task::QuestionAnswering)?;
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
        let handle = ArtifactLoader::new(loader, config).load(
            Task::QuestionAnswering,
            paths,
            architecture,
        )?;
        Ok(Self::with_handle(handle, config))
    }

    fn with_handle(handle: ModelHandle<B>, config: &RuntimeConfig) -> Self {
        Self {
            handle,
            top_k: config.qa.top_k.max(1),
            max_answer_length: config.qa.max_answer_length.max(1),
        }
    }

    /// Number of answers returned per question.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    /// Answer `question` from `context`, best span first.
    ///
    /// The context is truncated when the pair exceeds the sequence limit; an
    /// empty context yields no answers.
    pub fn predict(&self, question: &str, context: &str) -> Result<Vec<Answer>> {
        let model = self.handle.get()?;

        let mut seq = model.tokenizer.encode_pair(question, context)?;
        seq.truncate(model.encoder_limit());

        let output = model.session().run(&EncoderInput::from(&seq), None)?;
        let (start_logits, end_logits) = output.span_logits()?;

        let positions = seq.content_positions(1);
        if positions.is_empty() {
            return Ok(Vec::new());
        }

        let start_probs = softmax(&positions.iter().map(|&p| start_logits[p]).collect::<Vec<_>>());
        let end_probs = softmax(&positions.iter().map(|&p| end_logits[p]).collect::<Vec<_>>());
        let tokens = seq.tokens();

        let mut spans: Vec<(usize, usize, f32)> = Vec::new();
        for (i, &ps) in start_probs.iter().enumerate() {
            let last = (i + self.max_answer_length).min(positions.len());
            for (j, &pe) in end_probs.iter().enumerate().take(last).skip(i) {
                let begin = tokens[positions[i]].begin;
                let end = tokens[positions[j]].end;
                if end > begin {
                    spans.push((begin, end, ps * pe));
                }
            }
        }
        spans.sort_by(|a, b| b.2.total_cmp(&a.2));

        let mut answers: Vec<Answer> = Vec::with_capacity(self.top_k);
        for (start, end, score) in spans {
            if answers.iter().any(|a| a.start == start && a.end == end) {
                continue;
            }
            let Some(answer) = context.get(start..end) else {
                continue;
            };
            answers.push(Answer {
                answer: answer.to_string(),
                score,
                start,
                end,
            });
            if answers.len() == self.top_k {
                break;
            }
        }

        debug!(
            "QA over {} context tokens: {} answers",
            positions.len(),
            answers.len()
        );
        Ok(answers)
    }

    pub fn close(&mut self) {
        self.handle.release();
    }
}

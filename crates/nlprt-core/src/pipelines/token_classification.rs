//! Word-level labels from a token classification head, shared by POS and NER.

use nlprt_inference::InferenceBackend;

use super::{argmax, softmax};
use crate::error::{NlpError, Result};
use crate::runtime::{EncoderInput, LoadedModel};

/// Label of one whole word, taken from its first sub-word piece.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct WordLabel {
    pub begin: usize,
    pub end: usize,
    pub label: usize,
    pub score: f32,
}

/// Label every word of `text`; the word's span covers all its pieces.
pub(crate) fn label_words<B: InferenceBackend>(
    model: &LoadedModel<B>,
    text: &str,
) -> Result<Vec<WordLabel>> {
    let mut seq = model.tokenizer.encode(text)?;
    seq.truncate(model.encoder_limit());

    let output = model.session().run(&EncoderInput::from(&seq), None)?;
    let rows = output.token_logits()?;
    let num_labels = model.config.num_labels();

    let mut words: Vec<WordLabel> = Vec::new();
    let mut current: Option<u32> = None;

    for (token, row) in seq.tokens().iter().zip(&rows) {
        if token.special {
            current = None;
            continue;
        }
        if token.word.is_some() && token.word == current {
            if let Some(last) = words.last_mut() {
                last.end = last.end.max(token.end);
            }
            continue;
        }
        current = token.word;

        if row.len() != num_labels {
            return Err(NlpError::InferenceFailure(format!(
                "token logits have {} labels, config declares {}",
                row.len(),
                num_labels
            )));
        }
        let probs = softmax(row);
        let label = argmax(&probs)
            .ok_or_else(|| NlpError::InferenceFailure("empty token logits".to_string()))?;

        words.push(WordLabel {
            begin: token.begin,
            end: token.end,
            label,
            score: probs[label],
        });
    }

    Ok(words)
}

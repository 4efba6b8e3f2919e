//! Task pipelines: tokenize, run the graph, aggregate into a result.
//!
//! Every pipeline owns a [`ModelHandle`](crate::runtime::ModelHandle) and
//! exposes a default constructor, a from-files constructor, its predict
//! method(s) and `close`. Predictions take `&self` and allocate their
//! scratch tensors per call, so one model can serve several threads.
//! `close` takes `&mut self`, which keeps release from interleaving with an
//! in-flight prediction.

pub mod decoding;
pub mod generation;
pub mod ner;
pub mod pos;
pub mod qa;
pub mod sentiment;
mod seq2seq;
pub mod summarization;
mod token_classification;
pub mod translation;
pub mod zero_shot;

pub use generation::TextGenerationModel;
pub use ner::{Entity, NerModel, Span};
pub use pos::{PosModel, PosTag};
pub use qa::{Answer, QaModel};
pub use sentiment::{Sentiment, SentimentModel};
pub use summarization::SummarizationModel;
pub use translation::TranslationModel;
pub use zero_shot::{ZeroShotLabel, ZeroShotModel};

/// Numerically stable softmax.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return vec![0.0; logits.len()];
    }
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Log of [`softmax`].
pub fn log_softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return vec![f32::NEG_INFINITY; logits.len()];
    }
    let log_sum = logits.iter().map(|l| (l - max).exp()).sum::<f32>().ln() + max;
    logits.iter().map(|l| l - log_sum).collect()
}

/// Index of the largest value; the first one wins ties.
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (ix, &v) in values.iter().enumerate() {
        match best {
            Some(b) if values[b] >= v => {}
            _ if v.is_nan() => {}
            _ => best = Some(ix),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax_sums_to_one() {
        let probs = softmax(&[1.0, 2.0, 3.0]);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(probs[2] > probs[1] && probs[1] > probs[0]);
    }

    #[test]
    fn test_softmax_handles_masked_logits() {
        let probs = softmax(&[f32::NEG_INFINITY, 0.0]);
        assert_eq!(probs, vec![0.0, 1.0]);
        assert_eq!(softmax(&[f32::NEG_INFINITY; 2]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_log_softmax_matches_softmax() {
        let logits = [0.5, -1.0, 2.0];
        for (lp, p) in log_softmax(&logits).iter().zip(softmax(&logits)) {
            assert!((lp.exp() - p).abs() < 1e-6);
        }
    }

    #[test]
    fn test_argmax_first_wins_ties() {
        assert_eq!(argmax(&[1.0, 3.0, 3.0]), Some(1));
        assert_eq!(argmax(&[]), None);
        assert_eq!(argmax(&[f32::NEG_INFINITY, f32::NEG_INFINITY]), Some(0));
    }
}

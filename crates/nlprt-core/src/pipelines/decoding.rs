//! Autoregressive decoding: greedy, beam search and top-k/top-p sampling.
//!
//! The model is abstracted as a step function from the token sequence so far
//! to next-token logits, so the same loop drives encoder-decoder and
//! decoder-only graphs.

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::trace;

use super::{argmax, log_softmax, softmax};
use crate::error::{NlpError, Result};
use crate::models::DecodingConfig;

/// Model-specific stopping and forcing rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeParams {
    /// End-of-sequence token; generation of a sequence stops when it is chosen.
    pub eos: Option<u32>,
    /// Token forced as the first generated token.
    pub forced_bos: Option<u32>,
    /// Upper bound on prefix plus generated tokens, for fixed-shape graphs.
    pub max_total_len: Option<usize>,
}

/// One finished candidate: generated tokens (prefix and EOS excluded) and
/// its length-normalized log-probability.
#[derive(Debug, Clone, PartialEq)]
pub struct Hypothesis {
    pub tokens: Vec<u32>,
    pub score: f32,
}

/// Decode from `prefix`, returning up to `num_return_sequences` candidates
/// ranked best first.
pub fn decode<F>(
    config: &DecodingConfig,
    prefix: &[u32],
    params: &DecodeParams,
    step: F,
) -> Result<Vec<Hypothesis>>
where
    F: FnMut(&[u32]) -> Result<Vec<f32>>,
{
    config.validate()?;

    let mut budget = config.max_length;
    if let Some(total) = params.max_total_len {
        budget = budget.min(total.saturating_sub(prefix.len()));
    }

    let processor = LogitsProcessor { config, params };
    if config.num_beams > 1 {
        beam_search(config, prefix, params, &processor, budget, step)
    } else if config.do_sample {
        sample(config, prefix, params, &processor, budget, step)
    } else {
        greedy(prefix, params, &processor, budget, step)
    }
}

struct LogitsProcessor<'a> {
    config: &'a DecodingConfig,
    params: &'a DecodeParams,
}

impl LogitsProcessor<'_> {
    fn apply(&self, logits: &mut [f32], sequence: &[u32], generated: usize) {
        let penalty = self.config.repetition_penalty;
        if penalty != 1.0 {
            let mut seen: Vec<u32> = sequence.to_vec();
            seen.sort_unstable();
            seen.dedup();
            for token in seen {
                if let Some(l) = logits.get_mut(token as usize) {
                    *l = if *l > 0.0 { *l / penalty } else { *l * penalty };
                }
            }
        }

        for token in banned_ngram_tokens(sequence, self.config.no_repeat_ngram_size) {
            if let Some(l) = logits.get_mut(token as usize) {
                *l = f32::NEG_INFINITY;
            }
        }

        if generated < self.config.min_length {
            if let Some(l) = self.params.eos.and_then(|eos| logits.get_mut(eos as usize)) {
                *l = f32::NEG_INFINITY;
            }
        }

        if generated == 0 {
            if let Some(forced) = self.params.forced_bos {
                if (forced as usize) < logits.len() {
                    for (ix, l) in logits.iter_mut().enumerate() {
                        if ix != forced as usize {
                            *l = f32::NEG_INFINITY;
                        }
                    }
                }
            }
        }
    }
}

/// Tokens that would complete an n-gram already present in `sequence`.
fn banned_ngram_tokens(sequence: &[u32], n: usize) -> Vec<u32> {
    if n == 0 || sequence.len() + 1 < n {
        return Vec::new();
    }
    let context = &sequence[sequence.len() + 1 - n..];
    sequence
        .windows(n)
        .filter(|w| &w[..n - 1] == context)
        .map(|w| w[n - 1])
        .collect()
}

fn greedy<F>(
    prefix: &[u32],
    params: &DecodeParams,
    processor: &LogitsProcessor<'_>,
    budget: usize,
    mut step: F,
) -> Result<Vec<Hypothesis>>
where
    F: FnMut(&[u32]) -> Result<Vec<f32>>,
{
    let mut sequence = prefix.to_vec();
    let mut score = 0.0;

    for _ in 0..budget {
        let mut logits = step(&sequence)?;
        processor.apply(&mut logits, &sequence, sequence.len() - prefix.len());
        let logprobs = log_softmax(&logits);
        let Some(token) = argmax(&logprobs).filter(|&ix| logprobs[ix].is_finite()) else {
            break;
        };
        score += logprobs[token];
        trace!("greedy step {} -> {}", sequence.len() - prefix.len(), token);
        if Some(token as u32) == params.eos {
            break;
        }
        sequence.push(token as u32);
    }

    let tokens = sequence[prefix.len()..].to_vec();
    let score = score / tokens.len().max(1) as f32;
    Ok(vec![Hypothesis { tokens, score }])
}

fn sample<F>(
    config: &DecodingConfig,
    prefix: &[u32],
    params: &DecodeParams,
    processor: &LogitsProcessor<'_>,
    budget: usize,
    mut step: F,
) -> Result<Vec<Hypothesis>>
where
    F: FnMut(&[u32]) -> Result<Vec<f32>>,
{
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut sequence = prefix.to_vec();
    let mut score = 0.0;

    for _ in 0..budget {
        let mut logits = step(&sequence)?;
        processor.apply(&mut logits, &sequence, sequence.len() - prefix.len());
        for l in logits.iter_mut() {
            *l /= config.temperature;
        }
        filter_top_k(&mut logits, config.top_k);
        filter_top_p(&mut logits, config.top_p);

        let probs = softmax(&logits);
        let Ok(dist) = WeightedIndex::new(&probs) else {
            break;
        };
        let token = dist.sample(&mut rng);
        score += probs[token].ln();
        trace!("sampled step {} -> {}", sequence.len() - prefix.len(), token);
        if Some(token as u32) == params.eos {
            break;
        }
        sequence.push(token as u32);
    }

    let tokens = sequence[prefix.len()..].to_vec();
    let score = score / tokens.len().max(1) as f32;
    Ok(vec![Hypothesis { tokens, score }])
}

/// Keep the `k` largest logits (0 disables the filter).
fn filter_top_k(logits: &mut [f32], k: usize) {
    if k == 0 || k >= logits.len() {
        return;
    }
    let mut sorted: Vec<f32> = logits.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));
    let threshold = sorted[k - 1];
    for l in logits.iter_mut() {
        if *l < threshold {
            *l = f32::NEG_INFINITY;
        }
    }
}

/// Keep the smallest set of tokens whose probability mass reaches `p`.
fn filter_top_p(logits: &mut [f32], p: f32) {
    if p >= 1.0 {
        return;
    }
    let probs = softmax(logits);
    let mut order: Vec<usize> = (0..logits.len()).collect();
    order.sort_by(|&a, &b| probs[b].total_cmp(&probs[a]));

    let mut cumulative = 0.0;
    let mut keep = order.len();
    for (rank, &ix) in order.iter().enumerate() {
        cumulative += probs[ix];
        if cumulative >= p {
            keep = rank + 1;
            break;
        }
    }
    for &ix in &order[keep..] {
        logits[ix] = f32::NEG_INFINITY;
    }
}

struct Beam {
    sequence: Vec<u32>,
    score: f32,
}

fn beam_search<F>(
    config: &DecodingConfig,
    prefix: &[u32],
    params: &DecodeParams,
    processor: &LogitsProcessor<'_>,
    budget: usize,
    mut step: F,
) -> Result<Vec<Hypothesis>>
where
    F: FnMut(&[u32]) -> Result<Vec<f32>>,
{
    let width = config.num_beams;
    let normalize = |score: f32, len: usize| score / (len.max(1) as f32).powf(config.length_penalty);

    let mut beams = vec![Beam {
        sequence: prefix.to_vec(),
        score: 0.0,
    }];
    let mut finished: Vec<Hypothesis> = Vec::new();

    for _ in 0..budget {
        let mut candidates: Vec<(usize, u32, f32)> = Vec::new();
        for (beam_ix, beam) in beams.iter().enumerate() {
            let mut logits = step(&beam.sequence)?;
            processor.apply(&mut logits, &beam.sequence, beam.sequence.len() - prefix.len());
            let logprobs = log_softmax(&logits);

            let mut order: Vec<usize> = (0..logprobs.len()).collect();
            order.sort_by(|&a, &b| logprobs[b].total_cmp(&logprobs[a]));
            for &token in order.iter().take(2 * width) {
                if logprobs[token].is_finite() {
                    candidates.push((beam_ix, token as u32, beam.score + logprobs[token]));
                }
            }
        }
        candidates.sort_by(|a, b| b.2.total_cmp(&a.2));

        let mut next = Vec::with_capacity(width);
        for (rank, (beam_ix, token, score)) in candidates.into_iter().enumerate() {
            let parent = &beams[beam_ix];
            if Some(token) == params.eos {
                if rank < width {
                    let tokens = parent.sequence[prefix.len()..].to_vec();
                    let len = tokens.len() + 1;
                    finished.push(Hypothesis {
                        tokens,
                        score: normalize(score, len),
                    });
                }
                continue;
            }
            let mut sequence = parent.sequence.clone();
            sequence.push(token);
            next.push(Beam { sequence, score });
            if next.len() == width {
                break;
            }
        }

        beams = next;
        trace!("beam step: {} live, {} finished", beams.len(), finished.len());
        if beams.is_empty() || (config.early_stopping && finished.len() >= width) {
            break;
        }
    }

    for beam in beams {
        let tokens = beam.sequence[prefix.len()..].to_vec();
        let len = tokens.len();
        finished.push(Hypothesis {
            tokens,
            score: normalize(beam.score, len),
        });
    }

    if finished.is_empty() {
        return Err(NlpError::InferenceFailure(
            "beam search produced no hypothesis".to_string(),
        ));
    }
    finished.sort_by(|a, b| b.score.total_cmp(&a.score));
    finished.truncate(config.num_return_sequences);
    Ok(finished)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const EOS: u32 = 0;

    fn params() -> DecodeParams {
        DecodeParams {
            eos: Some(EOS),
            ..DecodeParams::default()
        }
    }

    fn peaked(vocab: usize, best: usize) -> Vec<f32> {
        let mut logits = vec![0.0; vocab];
        logits[best] = 5.0;
        logits
    }

    fn from_probs(probs: &[f32]) -> Vec<f32> {
        probs.iter().map(|p| p.max(1e-6).ln()).collect()
    }

    #[test]
    fn test_greedy_stops_at_eos() {
        // [1] -> 2 -> 3 -> eos
        let step = |seq: &[u32]| {
            Ok(match seq.len() {
                1 => peaked(5, 2),
                2 => peaked(5, 3),
                _ => peaked(5, EOS as usize),
            })
        };
        let hyps = decode(&DecodingConfig::greedy(), &[1], &params(), step).unwrap();
        assert_eq!(hyps.len(), 1);
        assert_eq!(hyps[0].tokens, vec![2, 3]);
    }

    #[test]
    fn test_max_length_bounds_generation() {
        let config = DecodingConfig {
            max_length: 3,
            ..DecodingConfig::greedy()
        };
        let hyps = decode(&config, &[1], &params(), |_: &[u32]| Ok(peaked(5, 4))).unwrap();
        assert_eq!(hyps[0].tokens, vec![4, 4, 4]);

        let capped = DecodeParams {
            max_total_len: Some(3),
            ..params()
        };
        let hyps = decode(&config, &[1], &capped, |_: &[u32]| Ok(peaked(5, 4))).unwrap();
        assert_eq!(hyps[0].tokens, vec![4, 4]);
    }

    #[test]
    fn test_min_length_suppresses_eos() {
        let config = DecodingConfig {
            min_length: 2,
            max_length: 10,
            ..DecodingConfig::greedy()
        };
        let step = |_: &[u32]| {
            let mut logits = peaked(5, EOS as usize);
            logits[3] = 1.0;
            Ok(logits)
        };
        let hyps = decode(&config, &[1], &params(), step).unwrap();
        assert_eq!(hyps[0].tokens, vec![3, 3]);
    }

    #[test]
    fn test_no_repeat_ngram() {
        let config = DecodingConfig {
            no_repeat_ngram_size: 2,
            max_length: 4,
            ..DecodingConfig::greedy()
        };
        let step = |_: &[u32]| {
            let mut logits = peaked(5, 2);
            logits[3] = 1.0;
            Ok(logits)
        };
        let hyps = decode(&config, &[1], &params(), step).unwrap();
        assert_eq!(hyps[0].tokens, vec![2, 2, 3, 2]);
    }

    #[test]
    fn test_repetition_penalty() {
        let config = DecodingConfig {
            repetition_penalty: 2.0,
            max_length: 2,
            ..DecodingConfig::greedy()
        };
        let step = |_: &[u32]| Ok(vec![-10.0, -10.0, 1.0, 0.9, -10.0]);
        let hyps = decode(&config, &[1], &params(), step).unwrap();
        assert_eq!(hyps[0].tokens, vec![2, 3]);
    }

    #[test]
    fn test_forced_bos() {
        let forced = DecodeParams {
            forced_bos: Some(4),
            ..params()
        };
        let config = DecodingConfig {
            max_length: 2,
            ..DecodingConfig::greedy()
        };
        let hyps = decode(&config, &[1], &forced, |_: &[u32]| Ok(peaked(5, 2))).unwrap();
        assert_eq!(hyps[0].tokens, vec![4, 2]);
    }

    #[test]
    fn test_beam_search_beats_greedy() {
        // After the start token, A (2) is likelier than B (3), but B is
        // almost surely followed by EOS while A is not.
        let step = |seq: &[u32]| {
            Ok(match seq {
                [1] => from_probs(&[0.0, 0.0, 0.6, 0.4, 0.0]),
                [1, 2] => from_probs(&[0.25, 0.0, 0.25, 0.25, 0.25]),
                [1, 3] => from_probs(&[0.95, 0.0, 0.02, 0.02, 0.01]),
                _ => from_probs(&[0.9, 0.0, 0.05, 0.03, 0.02]),
            })
        };

        let greedy = decode(
            &DecodingConfig {
                max_length: 3,
                ..DecodingConfig::greedy()
            },
            &[1],
            &params(),
            step,
        )
        .unwrap();
        assert_eq!(greedy[0].tokens, vec![2]);

        let config = DecodingConfig {
            num_beams: 2,
            num_return_sequences: 2,
            max_length: 3,
            ..DecodingConfig::greedy()
        };
        let hyps = decode(&config, &[1], &params(), step).unwrap();
        assert_eq!(hyps.len(), 2);
        assert_eq!(hyps[0].tokens, vec![3]);
        assert!(hyps[0].score >= hyps[1].score);
    }

    #[test]
    fn test_sampling_is_seeded() {
        let config = DecodingConfig {
            max_length: 8,
            ..DecodingConfig::sampling()
        };
        let step = |_: &[u32]| Ok(vec![-5.0, 0.5, 0.4, 0.3, 0.2, 0.1]);
        let a = decode(&config, &[1], &params(), step).unwrap();
        let b = decode(&config, &[1], &params(), step).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_top_k_one_is_greedy() {
        let config = DecodingConfig {
            max_length: 4,
            top_k: 1,
            no_repeat_ngram_size: 0,
            ..DecodingConfig::sampling()
        };
        let hyps = decode(&config, &[1], &params(), |_: &[u32]| Ok(vec![-5.0, 0.1, 2.0, 0.3])).unwrap();
        assert_eq!(hyps[0].tokens, vec![2, 2, 2, 2]);
    }

    #[test]
    fn test_top_p_filter() {
        let mut logits = from_probs(&[0.5, 0.3, 0.15, 0.05]);
        filter_top_p(&mut logits, 0.75);
        assert!(logits[0].is_finite() && logits[1].is_finite());
        assert!(logits[2].is_infinite() && logits[3].is_infinite());
    }

    #[test]
    fn test_banned_ngrams() {
        assert_eq!(banned_ngram_tokens(&[1, 2, 3, 1], 2), vec![2]);
        assert_eq!(banned_ngram_tokens(&[1, 2], 3), Vec::<u32>::new());
        assert_eq!(banned_ngram_tokens(&[4, 5], 1), vec![4, 5]);
    }
}

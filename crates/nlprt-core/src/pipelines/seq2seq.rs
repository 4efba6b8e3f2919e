//! Encoder-decoder decode loop shared by summarization and translation.

use nlprt_inference::InferenceBackend;
use tracing::debug;

use super::decoding::{decode, DecodeParams};
use crate::error::Result;
use crate::models::DecodingConfig;
use crate::runtime::{EncoderInput, LoadedModel};
use crate::tokenizer::TokenSequence;

/// Decode from an encoded source, returning ranked texts.
///
/// The encoder input is re-fed on every step; the graph sees the decoder
/// prefix grow one token at a time.
pub(crate) fn generate<B: InferenceBackend>(
    model: &LoadedModel<B>,
    source: &TokenSequence,
    decoding: &DecodingConfig,
    forced_bos: Option<u32>,
) -> Result<Vec<String>> {
    let encoder = EncoderInput::from(source);
    let session = model.session();
    let params = DecodeParams {
        eos: model.eos_id(),
        forced_bos,
        max_total_len: session.max_decoder_len(),
    };
    let start = [model.decoder_start_id()];

    let hypotheses = decode(decoding, &start, &params, |prefix| {
        session.run(&encoder, Some(prefix))?.next_token_logits()
    })?;

    debug!(
        "Decoded {} candidates from {} source tokens",
        hypotheses.len(),
        source.len()
    );

    hypotheses
        .iter()
        .map(|h| model.tokenizer.decode(&h.tokens).map(|s| s.trim().to_string()))
        .collect()
}

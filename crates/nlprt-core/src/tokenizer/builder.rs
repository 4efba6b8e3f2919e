//! Construction of a `tokenizers` pipeline from raw vocabulary files.

use std::collections::HashMap;
use std::path::Path;

use serde_json::Value;
use tokenizers::decoders::DecoderWrapper;
use tokenizers::models::bpe::BPE;
use tokenizers::models::unigram::Unigram;
use tokenizers::models::wordpiece::WordPiece;
use tokenizers::normalizers::bert::BertNormalizer;
use tokenizers::normalizers::unicode::NFKC;
use tokenizers::normalizers::utils::{Lowercase, Sequence};
use tokenizers::normalizers::NormalizerWrapper;
use tokenizers::pre_tokenizers::bert::BertPreTokenizer;
use tokenizers::pre_tokenizers::byte_level::ByteLevel;
use tokenizers::pre_tokenizers::metaspace::Metaspace;
use tokenizers::pre_tokenizers::PreTokenizerWrapper;
use tokenizers::{AddedToken, Tokenizer};
use tracing::debug;

use super::TextTokenizer;
use crate::architecture::{Architecture, TokenizerKind};
use crate::error::{NlpError, Result};

/// Build the tokenizer for `architecture` from its vocabulary files.
///
/// A `tokenizer.json` is loaded as-is. Otherwise the vocabulary format
/// follows the architecture's tokenizer kind:
/// - WordPiece: `vocab.txt`, one token per line
/// - byte-level BPE: `vocab.json` plus `merges.txt`
/// - SentencePiece: `vocab.json` as a `[[piece, score], ...]` list or a
///   `{piece: id}` map
///
/// `lowercase` overrides case handling; when `None` a WordPiece vocabulary
/// without any upper-case token is treated as uncased.
pub fn build_tokenizer(
    architecture: Architecture,
    vocab: &Path,
    merges: Option<&Path>,
    lowercase: Option<bool>,
) -> Result<TextTokenizer> {
    let is_tokenizer_json = vocab
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with("tokenizer.json"));

    let mut tokenizer = if is_tokenizer_json {
        Tokenizer::from_file(vocab).map_err(|e| invalid(vocab, e))?
    } else {
        match architecture.tokenizer_kind() {
            TokenizerKind::WordPiece => wordpiece(architecture, vocab, lowercase)?,
            TokenizerKind::ByteLevelBpe => {
                let merges = merges.ok_or_else(|| {
                    NlpError::InvalidVocabulary(format!(
                        "{} vocabularies need a merges file",
                        architecture
                    ))
                })?;
                byte_level_bpe(vocab, merges)?
            }
            TokenizerKind::SentencePiece => sentencepiece(architecture, vocab, lowercase)?,
        }
    };

    register_special_tokens(&mut tokenizer, architecture);

    debug!(
        "Built {:?} tokenizer for {} with {} tokens",
        architecture.tokenizer_kind(),
        architecture,
        tokenizer.get_vocab_size(true)
    );

    TextTokenizer::new(tokenizer, architecture)
}

fn invalid(path: &Path, e: impl std::fmt::Display) -> NlpError {
    NlpError::InvalidVocabulary(format!("{}: {}", path.display(), e))
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| invalid(path, e))
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| invalid(path, "path is not valid UTF-8"))
}

fn wordpiece(architecture: Architecture, path: &Path, lowercase: Option<bool>) -> Result<Tokenizer> {
    let content = read_text(path)?;
    let mut vocab = HashMap::new();
    for (index, line) in content.lines().enumerate() {
        let token = line.trim_end_matches('\r');
        if !token.is_empty() {
            vocab.insert(token.to_string(), index as u32);
        }
    }
    if vocab.is_empty() {
        return Err(invalid(path, "vocabulary is empty"));
    }

    let unk = architecture.special_tokens().unk;
    if !vocab.contains_key(unk) {
        return Err(invalid(path, format!("missing unknown token {}", unk)));
    }

    let lowercase = lowercase.unwrap_or_else(|| {
        architecture.lowercase_by_default() || vocab_is_uncased(vocab.keys().map(String::as_str))
    });

    let model = WordPiece::builder()
        .vocab(vocab)
        .unk_token(unk.to_string())
        .build()
        .map_err(|e| invalid(path, e))?;

    let mut tokenizer = Tokenizer::new(model);
    tokenizer
        .with_normalizer(NormalizerWrapper::from(BertNormalizer::new(
            true, true, None, lowercase,
        )))
        .with_pre_tokenizer(PreTokenizerWrapper::from(BertPreTokenizer))
        .with_decoder(DecoderWrapper::from(
            tokenizers::decoders::wordpiece::WordPiece::default(),
        ));
    Ok(tokenizer)
}

fn byte_level_bpe(vocab: &Path, merges: &Path) -> Result<Tokenizer> {
    let model = BPE::from_file(path_str(vocab)?, path_str(merges)?)
        .build()
        .map_err(|e| invalid(vocab, e))?;

    let mut tokenizer = Tokenizer::new(model);
    tokenizer
        .with_pre_tokenizer(PreTokenizerWrapper::from(ByteLevel::new(false, true, true)))
        .with_decoder(DecoderWrapper::from(ByteLevel::default()));
    Ok(tokenizer)
}

fn sentencepiece(
    architecture: Architecture,
    path: &Path,
    lowercase: Option<bool>,
) -> Result<Tokenizer> {
    let content = read_text(path)?;
    let value: Value = serde_json::from_str(&content).map_err(|e| invalid(path, e))?;
    let pieces = unigram_pieces(&value).map_err(|e| invalid(path, e))?;

    let unk = architecture.special_tokens().unk;
    let unk_id = pieces
        .iter()
        .position(|(piece, _)| piece == unk)
        .ok_or_else(|| invalid(path, format!("missing unknown token {}", unk)))?;

    let model = Unigram::from(pieces, Some(unk_id), false).map_err(|e| invalid(path, e))?;

    let normalizer = if lowercase.unwrap_or(architecture.lowercase_by_default()) {
        NormalizerWrapper::from(Sequence::new(vec![
            NormalizerWrapper::from(NFKC),
            NormalizerWrapper::from(Lowercase),
        ]))
    } else {
        NormalizerWrapper::from(NFKC)
    };

    let mut tokenizer = Tokenizer::new(model);
    tokenizer
        .with_normalizer(normalizer)
        .with_pre_tokenizer(PreTokenizerWrapper::from(Metaspace::default()))
        .with_decoder(DecoderWrapper::from(Metaspace::default()));
    Ok(tokenizer)
}

/// Read unigram pieces from either a scored list or a `{piece: id}` map.
///
/// Map vocabularies carry no scores; every piece gets the same score, which
/// makes segmentation prefer the fewest pieces.
fn unigram_pieces(value: &Value) -> std::result::Result<Vec<(String, f64)>, String> {
    match value {
        Value::Array(entries) => entries
            .iter()
            .map(|entry| {
                let piece = entry.get(0).and_then(Value::as_str);
                let score = entry.get(1).and_then(Value::as_f64);
                match (piece, score) {
                    (Some(piece), Some(score)) => Ok((piece.to_string(), score)),
                    _ => Err(format!("malformed vocabulary entry {}", entry)),
                }
            })
            .collect(),
        Value::Object(map) => {
            let mut entries = Vec::with_capacity(map.len());
            for (piece, id) in map {
                let id = id
                    .as_u64()
                    .ok_or_else(|| format!("id of '{}' is not an integer", piece))?;
                entries.push((id as usize, piece.clone()));
            }
            entries.sort_by_key(|(id, _)| *id);
            for (expected, (id, _)) in entries.iter().enumerate() {
                if *id != expected {
                    return Err(format!("token ids are not contiguous at {}", expected));
                }
            }
            Ok(entries.into_iter().map(|(_, piece)| (piece, 0.0)).collect())
        }
        _ => Err("expected a list of [piece, score] pairs or a token map".to_string()),
    }
    .and_then(|pieces: Vec<(String, f64)>| {
        if pieces.is_empty() {
            Err("vocabulary is empty".to_string())
        } else {
            Ok(pieces)
        }
    })
}

/// Whether no ordinary token of a WordPiece vocabulary has upper-case letters.
fn vocab_is_uncased<'a>(tokens: impl Iterator<Item = &'a str>) -> bool {
    !tokens
        .filter(|t| !(t.starts_with('[') && t.ends_with(']')))
        .any(|t| t.chars().any(char::is_uppercase))
}

/// Keep special tokens (and Marian `>>xx<<` language markers) from being
/// split, and let `decode` skip them.
fn register_special_tokens(tokenizer: &mut Tokenizer, architecture: Architecture) {
    let tokens = architecture.special_tokens();
    let mut specials: Vec<String> = [tokens.cls, tokens.sep, tokens.pad, Some(tokens.unk), tokens.bos, tokens.eos]
        .into_iter()
        .flatten()
        .filter(|t| tokenizer.token_to_id(t).is_some())
        .map(str::to_string)
        .collect();

    specials.extend(
        tokenizer
            .get_vocab(false)
            .into_keys()
            .filter(|t| t.starts_with(">>") && t.ends_with("<<")),
    );
    specials.sort();
    specials.dedup();

    let added: Vec<AddedToken> = specials
        .into_iter()
        .map(|t| AddedToken::from(t, true))
        .collect();
    tokenizer.add_special_tokens(&added);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fixtures;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_uncased_detection() {
        assert!(vocab_is_uncased(["[CLS]", "[UNK]", "hello", "##s"].into_iter()));
        assert!(!vocab_is_uncased(["[CLS]", "Paris"].into_iter()));
    }

    #[test]
    fn test_uncased_vocab_lowercases_input() {
        let dir = tempfile::tempdir().unwrap();
        let vocab = dir.path().join("vocab.txt");
        std::fs::write(&vocab, "[PAD]\n[UNK]\n[CLS]\n[SEP]\nhello\nworld\n").unwrap();

        let tokenizer = build_tokenizer(Architecture::Bert, &vocab, None, None).unwrap();
        let seq = tokenizer.encode("Hello World").unwrap();
        assert_eq!(tokenizer.decode(&seq.ids()).unwrap(), "hello world");
    }

    #[test]
    fn test_empty_vocab_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let vocab = dir.path().join("vocab.txt");
        std::fs::write(&vocab, "").unwrap();
        assert!(matches!(
            build_tokenizer(Architecture::Bert, &vocab, None, None),
            Err(NlpError::InvalidVocabulary(_))
        ));
    }

    #[test]
    fn test_wordpiece_requires_cls_and_sep() {
        let dir = tempfile::tempdir().unwrap();
        let vocab = dir.path().join("vocab.txt");
        std::fs::write(&vocab, "[UNK]\nhello\n").unwrap();
        let err = build_tokenizer(Architecture::Bert, &vocab, None, None).unwrap_err();
        assert!(err.to_string().contains("[CLS]"));
    }

    #[test]
    fn test_byte_level_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (vocab, merges) = fixtures::write_bpe_vocab(dir.path());
        let tokenizer = build_tokenizer(Architecture::Gpt2, &vocab, Some(&merges), None).unwrap();

        let text = "the cat sat";
        let seq = tokenizer.encode(text).unwrap();
        assert!(seq.tokens().iter().all(|t| !t.special));
        assert_eq!(tokenizer.decode(&seq.ids()).unwrap(), text);

        let words: Vec<&str> = seq.tokens().iter().map(|t| &text[t.begin..t.end]).collect();
        assert_eq!(words, vec!["the", "cat", "sat"]);
    }

    #[test]
    fn test_byte_level_needs_merges() {
        let dir = tempfile::tempdir().unwrap();
        let (vocab, _) = fixtures::write_bpe_vocab(dir.path());
        assert!(matches!(
            build_tokenizer(Architecture::Gpt2, &vocab, None, None),
            Err(NlpError::InvalidVocabulary(_))
        ));
    }

    #[test]
    fn test_sentencepiece_list_and_map_formats() {
        let dir = tempfile::tempdir().unwrap();
        let vocab = fixtures::write_sentencepiece_vocab(dir.path());
        let tokenizer = build_tokenizer(Architecture::Marian, &vocab, None, None).unwrap();

        let seq = tokenizer.encode("hello world").unwrap();
        assert_eq!(seq.ids().last().copied(), tokenizer.special_ids().eos);
        assert_eq!(tokenizer.decode(&seq.ids()).unwrap(), "hello world");
        assert!(tokenizer.token_to_id(">>fr<<").is_some());

        let map = dir.path().join("map.json");
        std::fs::write(&map, r#"{"<pad>": 0, "</s>": 1, "<unk>": 2, "▁hello": 3}"#).unwrap();
        let tokenizer = build_tokenizer(Architecture::T5, &map, None, None).unwrap();
        assert_eq!(tokenizer.encode("hello").unwrap().ids(), vec![3, 1]);
    }

    #[test]
    fn test_sentencepiece_map_must_be_contiguous() {
        let dir = tempfile::tempdir().unwrap();
        let map = dir.path().join("vocab.json");
        std::fs::write(&map, r#"{"<unk>": 0, "</s>": 3}"#).unwrap();
        assert!(matches!(
            build_tokenizer(Architecture::T5, &map, None, None),
            Err(NlpError::InvalidVocabulary(_))
        ));
    }
}

//! Text to token sequences and back.
//!
//! Sub-word segmentation is delegated to the `tokenizers` crate. This module
//! wraps raw encodings with the architecture's special tokens, keeps byte
//! offsets into the caller's text, and truncates without dropping the
//! trailing special tokens.

mod builder;

pub use builder::build_tokenizer;

use tokenizers::Tokenizer;

use crate::architecture::{Architecture, PairTemplate};
use crate::error::{NlpError, Result};

/// One token of a [`TokenSequence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub id: u32,
    /// Byte offset of the first byte covered in the source text.
    pub begin: usize,
    /// Byte offset one past the last byte covered in the source text.
    pub end: usize,
    /// Inserted by the template rather than produced from text.
    pub special: bool,
    /// Index of the pre-tokenized word inside its input text.
    pub word: Option<u32>,
    /// Which input the token came from (0 = first text, 1 = second text).
    pub sequence: Option<usize>,
    pub type_id: u32,
}

impl Token {
    fn special(id: u32, type_id: u32) -> Self {
        Self {
            id,
            begin: 0,
            end: 0,
            special: true,
            word: None,
            sequence: None,
            type_id,
        }
    }
}

/// Ordered tokens produced from one text or a text pair.
///
/// Offsets of content tokens are byte positions in the text they came from
/// and never decrease within one input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenSequence {
    tokens: Vec<Token>,
}

impl TokenSequence {
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn ids(&self) -> Vec<u32> {
        self.tokens.iter().map(|t| t.id).collect()
    }

    pub fn type_ids(&self) -> Vec<u32> {
        self.tokens.iter().map(|t| t.type_id).collect()
    }

    /// Positions of the content tokens that came from input `sequence`.
    pub fn content_positions(&self, sequence: usize) -> Vec<usize> {
        self.tokens
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.special && t.sequence == Some(sequence))
            .map(|(ix, _)| ix)
            .collect()
    }

    /// Prepend a special token, e.g. a target-language marker.
    pub fn prepend_special(&mut self, id: u32) {
        self.tokens.insert(0, Token::special(id, 0));
    }

    /// Shorten to `max_len` tokens by dropping content tokens from the end
    /// of the last input first. Special tokens are kept.
    pub fn truncate(&mut self, max_len: usize) {
        let last = self.tokens.iter().filter_map(|t| t.sequence).max().unwrap_or(0);
        self.truncate_preferring(max_len, last);
    }

    /// Like [`truncate`](Self::truncate), but drops from input `sequence`
    /// before touching the others.
    pub fn truncate_preferring(&mut self, max_len: usize, sequence: usize) {
        while self.tokens.len() > max_len {
            let victim = self
                .tokens
                .iter()
                .rposition(|t| !t.special && t.sequence == Some(sequence))
                .or_else(|| self.tokens.iter().rposition(|t| !t.special));
            match victim {
                Some(ix) => {
                    self.tokens.remove(ix);
                }
                None => break,
            }
        }
    }
}

/// Special token ids resolved against a vocabulary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpecialIds {
    pub cls: Option<u32>,
    pub sep: Option<u32>,
    pub pad: Option<u32>,
    pub unk: Option<u32>,
    pub bos: Option<u32>,
    pub eos: Option<u32>,
}

/// Tokenizer bound to one architecture's special-token template.
pub struct TextTokenizer {
    inner: Tokenizer,
    template: PairTemplate,
    special: SpecialIds,
}

impl std::fmt::Debug for TextTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextTokenizer")
            .field("template", &self.template)
            .field("special", &self.special)
            .field("vocab_size", &self.vocab_size())
            .finish()
    }
}

impl TextTokenizer {
    pub(crate) fn new(inner: Tokenizer, architecture: Architecture) -> Result<Self> {
        let tokens = architecture.special_tokens();
        let lookup = |t: Option<&str>| t.and_then(|t| inner.token_to_id(t));
        let special = SpecialIds {
            cls: lookup(tokens.cls),
            sep: lookup(tokens.sep),
            pad: lookup(tokens.pad),
            unk: lookup(Some(tokens.unk)),
            bos: lookup(tokens.bos),
            eos: lookup(tokens.eos),
        };

        let required: &[(Option<&str>, Option<u32>)] = match tokens.template {
            PairTemplate::ClsSep | PairTemplate::Roberta | PairTemplate::XLNet => {
                &[(tokens.cls, special.cls), (tokens.sep, special.sep)]
            }
            PairTemplate::SuffixEos => &[(tokens.eos, special.eos)],
            PairTemplate::Bare => &[],
        };
        for (name, id) in required {
            if id.is_none() {
                return Err(NlpError::InvalidVocabulary(format!(
                    "vocabulary lacks the {} token required by {}",
                    name.unwrap_or("special"),
                    architecture
                )));
            }
        }

        Ok(Self {
            inner,
            template: tokens.template,
            special,
        })
    }

    pub fn special_ids(&self) -> SpecialIds {
        self.special
    }

    /// Vocabulary size including added tokens.
    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }

    pub fn token_to_id(&self, token: &str) -> Option<u32> {
        self.inner.token_to_id(token)
    }

    /// Encode one text wrapped in the architecture's special tokens.
    ///
    /// Empty text yields a sequence holding only the special tokens.
    pub fn encode(&self, text: &str) -> Result<TokenSequence> {
        let a = self.encode_raw(text, 0)?;
        Ok(self.wrap(a, None))
    }

    /// Encode a text pair (question/context, premise/hypothesis).
    pub fn encode_pair(&self, first: &str, second: &str) -> Result<TokenSequence> {
        let a = self.encode_raw(first, 0)?;
        let b = self.encode_raw(second, 1)?;
        Ok(self.wrap(a, Some(b)))
    }

    /// Encode without any special tokens, e.g. for decoder prompts.
    pub fn encode_plain(&self, text: &str) -> Result<TokenSequence> {
        Ok(TokenSequence {
            tokens: self.encode_raw(text, 0)?,
        })
    }

    /// Decode ids to text, skipping special tokens.
    pub fn decode(&self, ids: &[u32]) -> Result<String> {
        self.inner
            .decode(ids, true)
            .map_err(|e| NlpError::InferenceFailure(format!("decoding failed: {}", e)))
    }

    fn encode_raw(&self, text: &str, sequence: usize) -> Result<Vec<Token>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| NlpError::InferenceFailure(format!("tokenization failed: {}", e)))?;

        let tokens = encoding
            .get_ids()
            .iter()
            .zip(encoding.get_offsets())
            .zip(encoding.get_word_ids())
            .map(|((&id, &(begin, end)), &word)| {
                let (begin, end) = trim_span(text, begin, end);
                Token {
                    id,
                    begin,
                    end,
                    special: false,
                    word,
                    sequence: Some(sequence),
                    type_id: sequence as u32,
                }
            })
            .collect();
        Ok(tokens)
    }

    fn wrap(&self, a: Vec<Token>, b: Option<Vec<Token>>) -> TokenSequence {
        let s = self.special;
        let mut tokens = Vec::with_capacity(a.len() + b.as_ref().map_or(0, Vec::len) + 4);
        let push = |tokens: &mut Vec<Token>, id: Option<u32>, type_id: u32| {
            if let Some(id) = id {
                tokens.push(Token::special(id, type_id));
            }
        };

        match self.template {
            PairTemplate::ClsSep => {
                push(&mut tokens, s.cls, 0);
                tokens.extend(a);
                push(&mut tokens, s.sep, 0);
                if let Some(b) = b {
                    tokens.extend(b);
                    push(&mut tokens, s.sep, 1);
                }
            }
            PairTemplate::Roberta => {
                push(&mut tokens, s.cls, 0);
                tokens.extend(a.into_iter().map(|t| Token { type_id: 0, ..t }));
                push(&mut tokens, s.sep, 0);
                if let Some(b) = b {
                    push(&mut tokens, s.sep, 0);
                    tokens.extend(b.into_iter().map(|t| Token { type_id: 0, ..t }));
                    push(&mut tokens, s.sep, 0);
                }
            }
            PairTemplate::SuffixEos => {
                tokens.extend(a.into_iter().map(|t| Token { type_id: 0, ..t }));
                push(&mut tokens, s.eos, 0);
                if let Some(b) = b {
                    tokens.extend(b.into_iter().map(|t| Token { type_id: 0, ..t }));
                    push(&mut tokens, s.eos, 0);
                }
            }
            PairTemplate::XLNet => {
                tokens.extend(a);
                push(&mut tokens, s.sep, 0);
                if let Some(b) = b {
                    tokens.extend(b);
                    push(&mut tokens, s.sep, 1);
                }
                push(&mut tokens, s.cls, 2);
            }
            PairTemplate::Bare => {
                tokens.extend(a);
                if let Some(b) = b {
                    tokens.extend(b);
                }
            }
        }

        TokenSequence { tokens }
    }
}

/// Narrow a token's span so it does not start or end on whitespace.
///
/// Byte-level and metaspace pre-tokenizers attach the preceding space to a
/// token; slicing the source with the raw offsets would include it.
fn trim_span(text: &str, begin: usize, end: usize) -> (usize, usize) {
    let bytes = text.as_bytes();
    let mut end = end.min(bytes.len());
    let mut begin = begin.min(end);
    while begin < end && bytes[begin].is_ascii_whitespace() {
        begin += 1;
    }
    while end > begin && bytes[end - 1].is_ascii_whitespace() {
        end -= 1;
    }
    (begin, end)
}

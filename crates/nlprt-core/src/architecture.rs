//! Registry of supported transformer architectures.
//!
//! Pure lookups: an architecture maps to a tokenizer kind, a graph family,
//! the config keys that describe its shape, and its special tokens.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{NlpError, Result};

/// Supported transformer architectures.
///
/// The integer tags are stable and shared with the C surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Architecture {
    Bert,
    DistilBert,
    Roberta,
    XlmRoberta,
    Electra,
    Albert,
    XLNet,
    Bart,
    Marian,
    T5,
    Gpt2,
}

/// Tokenization algorithm used by an architecture's vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenizerKind {
    /// `vocab.txt`, `##` continuation pieces.
    WordPiece,
    /// `vocab.json` + `merges.txt`, byte-level alphabet.
    ByteLevelBpe,
    /// Unigram pieces with `▁` word boundaries.
    SentencePiece,
}

/// Shape of the exported graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelFamily {
    /// Bidirectional encoder with a task head.
    Encoder,
    /// Encoder plus autoregressive decoder.
    EncoderDecoder,
    /// Autoregressive decoder only.
    Decoder,
}

/// How special tokens wrap single sequences and pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairTemplate {
    /// `[CLS] A [SEP]` / `[CLS] A [SEP] B [SEP]`
    ClsSep,
    /// `<s> A </s>` / `<s> A </s> </s> B </s>`
    Roberta,
    /// `A </s>` / `A </s> B </s>`
    SuffixEos,
    /// `A <sep> <cls>` / `A <sep> B <sep> <cls>`
    XLNet,
    /// No special tokens.
    Bare,
}

/// Special token strings for an architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialTokens {
    pub cls: Option<&'static str>,
    pub sep: Option<&'static str>,
    pub pad: Option<&'static str>,
    pub unk: &'static str,
    pub bos: Option<&'static str>,
    pub eos: Option<&'static str>,
    pub template: PairTemplate,
}

/// Config keys carrying the hyperparameters a config must declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeKeys {
    pub hidden_size: &'static str,
    pub num_layers: &'static str,
    pub vocab_size: &'static str,
}

impl Architecture {
    /// Every registered architecture, in tag order.
    pub const ALL: [Architecture; 11] = [
        Architecture::Bert,
        Architecture::DistilBert,
        Architecture::Roberta,
        Architecture::XlmRoberta,
        Architecture::Electra,
        Architecture::Albert,
        Architecture::XLNet,
        Architecture::Bart,
        Architecture::Marian,
        Architecture::T5,
        Architecture::Gpt2,
    ];

    /// Resolve an integer tag.
    pub fn from_tag(tag: i32) -> Result<Self> {
        usize::try_from(tag)
            .ok()
            .and_then(|ix| Self::ALL.get(ix).copied())
            .ok_or_else(|| NlpError::UnsupportedArchitecture(format!("unknown tag {}", tag)))
    }

    /// Integer tag of this architecture.
    pub fn tag(self) -> i32 {
        Self::ALL.iter().position(|a| *a == self).unwrap_or_default() as i32
    }

    /// The `model_type` value Hugging Face configs use for this architecture.
    pub fn model_type(self) -> &'static str {
        match self {
            Architecture::Bert => "bert",
            Architecture::DistilBert => "distilbert",
            Architecture::Roberta => "roberta",
            Architecture::XlmRoberta => "xlm-roberta",
            Architecture::Electra => "electra",
            Architecture::Albert => "albert",
            Architecture::XLNet => "xlnet",
            Architecture::Bart => "bart",
            Architecture::Marian => "marian",
            Architecture::T5 => "t5",
            Architecture::Gpt2 => "gpt2",
        }
    }

    /// Resolve a config `model_type` value.
    pub fn from_model_type(model_type: &str) -> Result<Self> {
        let normalized = model_type.trim().to_lowercase().replace('_', "-");
        Self::ALL
            .iter()
            .copied()
            .find(|a| a.model_type() == normalized)
            .ok_or_else(|| NlpError::UnsupportedArchitecture(model_type.to_string()))
    }

    /// Resolve a model class name from a config's `architectures` list,
    /// e.g. `DistilBertForSequenceClassification` or `MarianMTModel`.
    pub fn from_class_name(class: &str) -> Option<Self> {
        let class = class.to_lowercase();
        Self::ALL
            .into_iter()
            .filter(|a| class.starts_with(&a.model_type().replace('-', "")))
            .max_by_key(|a| a.model_type().len())
    }

    /// Tokenizer algorithm for this architecture.
    pub fn tokenizer_kind(self) -> TokenizerKind {
        match self {
            Architecture::Bert | Architecture::DistilBert | Architecture::Electra => {
                TokenizerKind::WordPiece
            }
            Architecture::Roberta | Architecture::Bart | Architecture::Gpt2 => {
                TokenizerKind::ByteLevelBpe
            }
            Architecture::XlmRoberta
            | Architecture::Albert
            | Architecture::XLNet
            | Architecture::Marian
            | Architecture::T5 => TokenizerKind::SentencePiece,
        }
    }

    /// Graph family for this architecture.
    pub fn family(self) -> ModelFamily {
        match self {
            Architecture::Bart | Architecture::Marian | Architecture::T5 => {
                ModelFamily::EncoderDecoder
            }
            Architecture::Gpt2 => ModelFamily::Decoder,
            _ => ModelFamily::Encoder,
        }
    }

    /// Config keys for hidden size, layer count and vocabulary size.
    pub fn shape_keys(self) -> ShapeKeys {
        let (hidden_size, num_layers) = match self {
            Architecture::Bert
            | Architecture::Roberta
            | Architecture::XlmRoberta
            | Architecture::Electra
            | Architecture::Albert => ("hidden_size", "num_hidden_layers"),
            Architecture::DistilBert => ("dim", "n_layers"),
            Architecture::XLNet => ("d_model", "n_layer"),
            Architecture::Bart | Architecture::Marian => ("d_model", "encoder_layers"),
            Architecture::T5 => ("d_model", "num_layers"),
            Architecture::Gpt2 => ("n_embd", "n_layer"),
        };
        ShapeKeys {
            hidden_size,
            num_layers,
            vocab_size: "vocab_size",
        }
    }

    /// Special tokens and the template used to wrap inputs.
    pub fn special_tokens(self) -> SpecialTokens {
        match self {
            Architecture::Bert | Architecture::DistilBert | Architecture::Electra => SpecialTokens {
                cls: Some("[CLS]"),
                sep: Some("[SEP]"),
                pad: Some("[PAD]"),
                unk: "[UNK]",
                bos: None,
                eos: None,
                template: PairTemplate::ClsSep,
            },
            Architecture::Albert => SpecialTokens {
                cls: Some("[CLS]"),
                sep: Some("[SEP]"),
                pad: Some("<pad>"),
                unk: "<unk>",
                bos: None,
                eos: None,
                template: PairTemplate::ClsSep,
            },
            Architecture::Roberta | Architecture::XlmRoberta | Architecture::Bart => SpecialTokens {
                cls: Some("<s>"),
                sep: Some("</s>"),
                pad: Some("<pad>"),
                unk: "<unk>",
                bos: Some("<s>"),
                eos: Some("</s>"),
                template: PairTemplate::Roberta,
            },
            Architecture::XLNet => SpecialTokens {
                cls: Some("<cls>"),
                sep: Some("<sep>"),
                pad: Some("<pad>"),
                unk: "<unk>",
                bos: Some("<s>"),
                eos: Some("</s>"),
                template: PairTemplate::XLNet,
            },
            Architecture::Marian | Architecture::T5 => SpecialTokens {
                cls: None,
                sep: Some("</s>"),
                pad: Some("<pad>"),
                unk: "<unk>",
                bos: None,
                eos: Some("</s>"),
                template: PairTemplate::SuffixEos,
            },
            Architecture::Gpt2 => SpecialTokens {
                cls: None,
                sep: None,
                pad: None,
                unk: "<|endoftext|>",
                bos: Some("<|endoftext|>"),
                eos: Some("<|endoftext|>"),
                template: PairTemplate::Bare,
            },
        }
    }

    /// Whether the vocabulary lowercases input unless told otherwise.
    pub fn lowercase_by_default(self) -> bool {
        matches!(self, Architecture::Albert)
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.model_type())
    }
}

impl FromStr for Architecture {
    type Err = NlpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().parse::<i32>() {
            Ok(tag) => Self::from_tag(tag),
            Err(_) => Self::from_model_type(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_round_trip() {
        for (ix, arch) in Architecture::ALL.iter().enumerate() {
            assert_eq!(arch.tag(), ix as i32);
            assert_eq!(Architecture::from_tag(ix as i32).unwrap(), *arch);
        }
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        assert!(matches!(
            Architecture::from_tag(11),
            Err(NlpError::UnsupportedArchitecture(_))
        ));
        assert!(matches!(
            Architecture::from_tag(-1),
            Err(NlpError::UnsupportedArchitecture(_))
        ));
    }

    #[test]
    fn test_model_type_lookup() {
        assert_eq!(Architecture::from_model_type("xlm-roberta").unwrap(), Architecture::XlmRoberta);
        assert_eq!(Architecture::from_model_type("XLM_ROBERTA").unwrap(), Architecture::XlmRoberta);
        assert_eq!("gpt2".parse::<Architecture>().unwrap(), Architecture::Gpt2);
        assert_eq!("7".parse::<Architecture>().unwrap(), Architecture::Bart);
        assert!(Architecture::from_model_type("llama").is_err());
    }

    #[test]
    fn test_class_name_lookup() {
        let cases = [
            ("BertForTokenClassification", Architecture::Bert),
            ("DistilBertForSequenceClassification", Architecture::DistilBert),
            ("XLMRobertaForSequenceClassification", Architecture::XlmRoberta),
            ("RobertaForQuestionAnswering", Architecture::Roberta),
            ("AlbertForMaskedLM", Architecture::Albert),
            ("MarianMTModel", Architecture::Marian),
            ("GPT2LMHeadModel", Architecture::Gpt2),
        ];
        for (class, expected) in cases {
            assert_eq!(Architecture::from_class_name(class), Some(expected), "{}", class);
        }
        assert_eq!(Architecture::from_class_name("LlamaForCausalLM"), None);
    }

    #[test]
    fn test_tokenizer_kinds() {
        assert_eq!(Architecture::DistilBert.tokenizer_kind(), TokenizerKind::WordPiece);
        assert_eq!(Architecture::Gpt2.tokenizer_kind(), TokenizerKind::ByteLevelBpe);
        assert_eq!(Architecture::T5.tokenizer_kind(), TokenizerKind::SentencePiece);
    }

    #[test]
    fn test_families() {
        assert_eq!(Architecture::Bart.family(), ModelFamily::EncoderDecoder);
        assert_eq!(Architecture::Gpt2.family(), ModelFamily::Decoder);
        assert_eq!(Architecture::XLNet.family(), ModelFamily::Encoder);
    }

    #[test]
    fn test_shape_keys_follow_config_conventions() {
        assert_eq!(Architecture::DistilBert.shape_keys().hidden_size, "dim");
        assert_eq!(Architecture::Gpt2.shape_keys().num_layers, "n_layer");
        assert_eq!(Architecture::Marian.shape_keys().hidden_size, "d_model");
    }
}

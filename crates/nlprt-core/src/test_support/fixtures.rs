//! Tiny on-disk artifacts and scripted graphs for every task.
//!
//! Vocabulary ids are list positions, so scripts can look tokens up by
//! text. Weights files only carry the `MOCK <script>` marker that
//! [`ScriptedLoader`] checks for and [`super::FixtureLoader`] dispatches on.

use std::path::{Path, PathBuf};

use ndarray::{ArrayD, IxDyn};
use nlprt_inference::{InputTensor, OutputTensor};
use serde_json::{json, Value};

use super::{Outputs, ScriptedBackend, ScriptedLoader};
use crate::architecture::{Architecture, TokenizerKind};
use crate::models::{ArtifactPaths, ModelConfig, Task};
use crate::runtime::LoadedModel;
use crate::tokenizer::build_tokenizer;

pub const WORDPIECE: &[&str] = &[
    "[PAD]", "[UNK]", "[CLS]", "[SEP]", "[MASK]", "the", "quick", "brown", "fox", "Amy", "lives",
    "in", "Paris", "Amélie", "loves", "love", "I", "this", "library", "it", "!", "This", "is",
    "terrible", ".", "?", "where", "does", "live", "Dupont", "works", "at", "Google", "New",
    "York", "election", "results", "politics", "sports", "example", "The", "team", "won",
    "match", "walk", "##ing", "##s",
];

pub const BPE: &[&str] = &[
    "<|endoftext|>", "<s>", "</s>", "<pad>", "<unk>", "t", "h", "e", "Ġ", "c", "a", "s", "th",
    "the", "at", "Ġc", "Ġcat", "Ġs", "Ġsat",
];

const MERGES: &[&str] = &["t h", "th e", "a t", "Ġ c", "Ġc at", "Ġ s", "Ġs at"];

pub const SENTENCEPIECE: &[(&str, f64)] = &[
    ("<pad>", 0.0),
    ("</s>", 0.0),
    ("<unk>", 0.0),
    ("<s>", 0.0),
    ("[CLS]", 0.0),
    ("[SEP]", 0.0),
    ("<cls>", 0.0),
    ("<sep>", 0.0),
    (">>fr<<", 0.0),
    (">>de<<", 0.0),
    ("▁hello", -2.0),
    ("▁world", -2.0),
    ("▁bonjour", -2.0),
    ("▁monde", -2.0),
    ("▁hallo", -2.0),
    ("▁welt", -2.0),
];

fn position(vocab: &[&str], token: &str) -> i64 {
    vocab
        .iter()
        .position(|t| *t == token)
        .unwrap_or_else(|| panic!("fixture vocabulary lacks {}", token)) as i64
}

fn wp(token: &str) -> i64 {
    position(WORDPIECE, token)
}

fn bpe(token: &str) -> i64 {
    position(BPE, token)
}

fn sp(token: &str) -> i64 {
    let pieces: Vec<&str> = SENTENCEPIECE.iter().map(|(p, _)| *p).collect();
    position(&pieces, token)
}

fn vocab_len(kind: TokenizerKind) -> usize {
    match kind {
        TokenizerKind::WordPiece => WORDPIECE.len(),
        TokenizerKind::ByteLevelBpe => BPE.len(),
        TokenizerKind::SentencePiece => SENTENCEPIECE.len(),
    }
}

pub fn write_json(path: &Path, value: Value) {
    std::fs::write(path, serde_json::to_string_pretty(&value).unwrap()).unwrap();
}

pub fn write_wordpiece_vocab(dir: &Path) -> PathBuf {
    let path = dir.join("vocab.txt");
    std::fs::write(&path, WORDPIECE.join("\n")).unwrap();
    path
}

pub fn write_bpe_vocab(dir: &Path) -> (PathBuf, PathBuf) {
    let vocab = dir.join("vocab.json");
    let map: serde_json::Map<String, Value> = BPE
        .iter()
        .enumerate()
        .map(|(id, token)| (token.to_string(), json!(id)))
        .collect();
    write_json(&vocab, Value::Object(map));

    let merges = dir.join("merges.txt");
    std::fs::write(&merges, format!("#version: 0.2\n{}\n", MERGES.join("\n"))).unwrap();
    (vocab, merges)
}

pub fn write_sentencepiece_vocab(dir: &Path) -> PathBuf {
    let path = dir.join("vocab.json");
    let entries: Vec<Value> = SENTENCEPIECE
        .iter()
        .map(|(piece, score)| json!([piece, score]))
        .collect();
    write_json(&path, Value::Array(entries));
    path
}

/// Minimal valid config for `architecture`, merged with `extra`.
pub fn config_for(architecture: Architecture, extra: Value) -> Value {
    let keys = architecture.shape_keys();
    let mut config = json!({
        "model_type": architecture.model_type(),
        "vocab_size": vocab_len(architecture.tokenizer_kind()),
    });
    config[keys.hidden_size] = json!(8);
    config[keys.num_layers] = json!(1);
    if let (Value::Object(map), Value::Object(extra)) = (&mut config, extra) {
        map.extend(extra);
    }
    config
}

fn write_artifacts(architecture: Architecture, script: &str, dir: &Path, config: Value) -> ArtifactPaths {
    let weights = dir.join("model.onnx");
    std::fs::write(&weights, format!("MOCK {}", script)).unwrap();
    let config_path = dir.join("config.json");
    write_json(&config_path, config);

    let (vocab, merges) = match architecture.tokenizer_kind() {
        TokenizerKind::WordPiece => (write_wordpiece_vocab(dir), None),
        TokenizerKind::ByteLevelBpe => {
            let (vocab, merges) = write_bpe_vocab(dir);
            (vocab, Some(merges))
        }
        TokenizerKind::SentencePiece => (write_sentencepiece_vocab(dir), None),
    };
    ArtifactPaths::new(weights, config_path, vocab, merges)
}

fn binary_labels() -> Value {
    json!({"id2label": {"0": "NEGATIVE", "1": "POSITIVE"}})
}

pub fn sentiment_artifacts(dir: &Path) -> ArtifactPaths {
    let arch = Architecture::DistilBert;
    write_artifacts(arch, "sentiment", dir, config_for(arch, binary_labels()))
}

pub fn pos_artifacts(dir: &Path) -> ArtifactPaths {
    let arch = Architecture::Bert;
    let labels = json!({"id2label": {"0": "NOUN", "1": "PROPN", "2": "VERB", "3": "PUNCT"}});
    write_artifacts(arch, "pos", dir, config_for(arch, labels))
}

pub fn ner_artifacts(dir: &Path) -> ArtifactPaths {
    let arch = Architecture::Bert;
    let labels = json!({"id2label": {
        "0": "O", "1": "B-PER", "2": "I-PER", "3": "B-ORG", "4": "I-ORG", "5": "B-LOC", "6": "I-LOC"
    }});
    write_artifacts(arch, "ner", dir, config_for(arch, labels))
}

pub fn qa_artifacts(dir: &Path) -> ArtifactPaths {
    let arch = Architecture::Bert;
    write_artifacts(arch, "qa", dir, config_for(arch, json!({})))
}

pub fn zero_shot_artifacts(dir: &Path) -> ArtifactPaths {
    let arch = Architecture::Bert;
    let labels = json!({"id2label": {"0": "contradiction", "1": "neutral", "2": "entailment"}});
    write_artifacts(arch, "zero-shot", dir, config_for(arch, labels))
}

pub fn summarization_artifacts(dir: &Path) -> ArtifactPaths {
    let arch = Architecture::Bart;
    let ids = json!({
        "pad_token_id": bpe("<pad>"),
        "bos_token_id": bpe("<s>"),
        "eos_token_id": bpe("</s>"),
        "decoder_start_token_id": bpe("</s>"),
    });
    write_artifacts(arch, "copy", dir, config_for(arch, ids))
}

pub fn translation_artifacts(dir: &Path) -> ArtifactPaths {
    let arch = Architecture::Marian;
    let ids = json!({
        "pad_token_id": sp("<pad>"),
        "eos_token_id": sp("</s>"),
        "decoder_start_token_id": sp("<pad>"),
    });
    write_artifacts(arch, "dictionary", dir, config_for(arch, ids))
}

fn t5_artifacts(dir: &Path) -> ArtifactPaths {
    let arch = Architecture::T5;
    let ids = json!({
        "pad_token_id": sp("<pad>"),
        "eos_token_id": sp("</s>"),
        "decoder_start_token_id": sp("<pad>"),
    });
    write_artifacts(arch, "t5-copy", dir, config_for(arch, ids))
}

pub fn generation_artifacts(dir: &Path) -> ArtifactPaths {
    let arch = Architecture::Gpt2;
    let ids = json!({
        "bos_token_id": bpe("<|endoftext|>"),
        "eos_token_id": bpe("<|endoftext|>"),
    });
    write_artifacts(arch, "lm", dir, config_for(arch, ids))
}

/// Artifacts and a matching loader for one task `architecture` can serve.
pub fn artifacts_for(architecture: Architecture, dir: &Path) -> (Task, ArtifactPaths, ScriptedLoader) {
    match architecture {
        Architecture::Bart => (Task::Summarization, summarization_artifacts(dir), copy_loader()),
        Architecture::T5 => (
            Task::Summarization,
            t5_artifacts(dir),
            t5_copy_loader(),
        ),
        Architecture::Marian => (Task::Translation, translation_artifacts(dir), dictionary_loader()),
        Architecture::Gpt2 => (Task::Generation, generation_artifacts(dir), lm_loader()),
        _ => (
            Task::Sentiment,
            write_artifacts(architecture, "sentiment", dir, config_for(architecture, binary_labels())),
            sentiment_loader(),
        ),
    }
}

/// A BERT sentiment model assembled in memory around `backend`.
pub fn loaded_bert(task: Task, backend: ScriptedBackend) -> LoadedModel<ScriptedBackend> {
    let dir = tempfile::tempdir().unwrap();
    let vocab = write_wordpiece_vocab(dir.path());
    let architecture = Architecture::Bert;
    LoadedModel {
        task,
        architecture,
        config: ModelConfig::from_value(config_for(architecture, binary_labels()), architecture)
            .unwrap(),
        tokenizer: build_tokenizer(architecture, &vocab, None, None).unwrap(),
        backend,
        max_sequence_length: 128,
    }
}

fn ids_of(inputs: &[(&str, InputTensor)], name: &str) -> Vec<i64> {
    match inputs.iter().find(|(n, _)| *n == name) {
        Some((_, InputTensor::Int64(a))) => a.iter().copied().collect(),
        Some((_, InputTensor::Int32(a))) => a.iter().map(|&v| v as i64).collect(),
        _ => Vec::new(),
    }
}

fn tensor(shape: &[usize], data: Vec<f32>) -> OutputTensor {
    OutputTensor::Float32(ArrayD::from_shape_vec(IxDyn(shape), data).unwrap())
}

/// `[1, steps, vocab]` logits peaked at one target per step.
fn peaked(vocab: usize, targets: &[i64]) -> OutputTensor {
    let mut data = vec![0.0; targets.len() * vocab];
    for (step, &target) in targets.iter().enumerate() {
        data[step * vocab + target as usize] = 10.0;
    }
    tensor(&[1, targets.len(), vocab], data)
}

const ENCODER: &[&str] = &["input_ids", "attention_mask"];
const ENCODER_WITH_TYPES: &[&str] = &["input_ids", "attention_mask", "token_type_ids"];
const SEQ2SEQ: &[&str] = &[
    "input_ids",
    "attention_mask",
    "decoder_input_ids",
    "decoder_attention_mask",
];

/// Two-label classifier counting "love" against "terrible".
pub fn sentiment_loader() -> ScriptedLoader {
    let (positive, negative) = (wp("love"), wp("terrible"));
    ScriptedLoader::new(ENCODER, move |inputs| {
        let ids = ids_of(inputs, "input_ids");
        let count = |word: i64| ids.iter().filter(|&&id| id == word).count() as f32;
        Ok(vec![(
            "logits".to_string(),
            tensor(&[1, 2], vec![2.0 * count(negative), 2.0 * count(positive)]),
        )])
    })
}

fn tagger<T>(num_labels: usize, tag: T) -> impl Fn(&[(&str, InputTensor)]) -> Outputs + Send + Sync + 'static
where
    T: Fn(i64) -> usize + Send + Sync + 'static,
{
    move |inputs| {
        let ids = ids_of(inputs, "input_ids");
        let mut data = Vec::with_capacity(ids.len() * num_labels);
        for &id in &ids {
            let best = tag(id);
            data.extend((0..num_labels).map(|label| if label == best { 4.0 } else { 0.0 }));
        }
        Ok(vec![("logits".to_string(), tensor(&[1, ids.len(), num_labels], data))])
    }
}

pub fn pos_loader() -> ScriptedLoader {
    let proper: Vec<i64> = ["Amy", "Amélie", "Paris", "Google", "Dupont", "New", "York"]
        .into_iter()
        .map(wp)
        .collect();
    let verbs: Vec<i64> = ["walk", "lives", "loves", "works", "live"].into_iter().map(wp).collect();
    let punct: Vec<i64> = [".", "!", "?"].into_iter().map(wp).collect();

    ScriptedLoader::new(
        ENCODER_WITH_TYPES,
        tagger(4, move |id| {
            if proper.contains(&id) {
                1
            } else if verbs.contains(&id) {
                2
            } else if punct.contains(&id) {
                3
            } else {
                0
            }
        }),
    )
}

pub fn ner_loader() -> ScriptedLoader {
    let table: Vec<(i64, usize)> = [
        ("Amy", 1),
        ("Amélie", 1),
        ("Dupont", 2),
        ("Google", 3),
        ("Paris", 5),
        ("New", 5),
        ("York", 6),
    ]
    .into_iter()
    .map(|(word, label)| (wp(word), label))
    .collect();

    ScriptedLoader::new(
        ENCODER_WITH_TYPES,
        tagger(7, move |id| {
            table
                .iter()
                .find(|(word, _)| *word == id)
                .map_or(0, |(_, label)| *label)
        }),
    )
}

/// Span head pointing at "Paris" wherever it occurs.
pub fn qa_loader() -> ScriptedLoader {
    let paris = wp("Paris");
    ScriptedLoader::new(ENCODER_WITH_TYPES, move |inputs| {
        let ids = ids_of(inputs, "input_ids");
        let span: Vec<f32> = ids
            .iter()
            .map(|&id| if id == paris { 5.0 } else { 0.0 })
            .collect();
        Ok(vec![
            ("start_logits".to_string(), tensor(&[1, ids.len()], span.clone())),
            ("end_logits".to_string(), tensor(&[1, ids.len()], span)),
        ])
    })
}

/// NLI head entailing "politics" for election texts and "sports" for match texts.
pub fn zero_shot_loader() -> ScriptedLoader {
    let topics: Vec<(i64, Vec<i64>)> = vec![
        (wp("politics"), vec![wp("election")]),
        (wp("sports"), vec![wp("team"), wp("won"), wp("match")]),
    ];
    ScriptedLoader::new(ENCODER_WITH_TYPES, move |inputs| {
        let ids = ids_of(inputs, "input_ids");
        let entailed = topics
            .iter()
            .any(|(label, cues)| ids.contains(label) && cues.iter().any(|c| ids.contains(c)));
        let entail = if entailed { 3.0 } else { -3.0 };
        Ok(vec![("logits".to_string(), tensor(&[1, 3], vec![-entail, 0.0, entail]))])
    })
}

fn seq2seq_loader<S>(script: S) -> ScriptedLoader
where
    S: Fn(&[(&str, InputTensor)]) -> Outputs + Send + Sync + 'static,
{
    ScriptedLoader::new(SEQ2SEQ, script)
}

/// Decoder that copies the encoder tokens (minus `skip`) and then stops.
fn copy(skip: Vec<i64>, eos: i64, vocab: usize) -> impl Fn(&[(&str, InputTensor)]) -> Outputs + Send + Sync + 'static {
    move |inputs| {
        let source: Vec<i64> = ids_of(inputs, "input_ids")
            .into_iter()
            .filter(|id| !skip.contains(id))
            .collect();
        let steps = ids_of(inputs, "decoder_input_ids").len();
        let targets: Vec<i64> = (0..steps)
            .map(|step| source.get(step).copied().unwrap_or(eos))
            .collect();
        Ok(vec![("logits".to_string(), peaked(vocab, &targets))])
    }
}

/// BART summarizer echoing its input.
pub fn copy_loader() -> ScriptedLoader {
    seq2seq_loader(copy(vec![bpe("<s>"), bpe("<pad>")], bpe("</s>"), BPE.len()))
}

/// T5 summarizer echoing its input.
fn t5_copy_loader() -> ScriptedLoader {
    seq2seq_loader(copy(vec![sp("<pad>")], sp("</s>"), SENTENCEPIECE.len()))
}

/// Marian translator with a two-word dictionary per target language.
/// Without a language token it translates into French.
pub fn dictionary_loader() -> ScriptedLoader {
    let (fr, de, pad, eos) = (sp(">>fr<<"), sp(">>de<<"), sp("<pad>"), sp("</s>"));
    let french = [(sp("▁hello"), sp("▁bonjour")), (sp("▁world"), sp("▁monde"))];
    let german = [(sp("▁hello"), sp("▁hallo")), (sp("▁world"), sp("▁welt"))];

    seq2seq_loader(move |inputs| {
        let ids = ids_of(inputs, "input_ids");
        let dictionary = if ids.contains(&de) { german } else { french };
        let source: Vec<i64> = ids
            .iter()
            .copied()
            .filter(|id| ![fr, de, pad].contains(id))
            .map(|id| {
                dictionary
                    .iter()
                    .find(|(word, _)| *word == id)
                    .map_or(id, |(_, translated)| *translated)
            })
            .collect();
        let steps = ids_of(inputs, "decoder_input_ids").len();
        let targets: Vec<i64> = (0..steps)
            .map(|step| source.get(step).copied().unwrap_or(eos))
            .collect();
        Ok(vec![("logits".to_string(), peaked(SENTENCEPIECE.len(), &targets))])
    })
}

/// GPT-2 that only knows "the cat sat".
pub fn lm_loader() -> ScriptedLoader {
    let chain = [
        (bpe("<|endoftext|>"), bpe("the")),
        (bpe("the"), bpe("Ġcat")),
        (bpe("Ġcat"), bpe("Ġsat")),
    ];
    let eos = bpe("<|endoftext|>");
    ScriptedLoader::new(ENCODER, move |inputs| {
        let targets: Vec<i64> = ids_of(inputs, "input_ids")
            .into_iter()
            .map(|id| {
                chain
                    .iter()
                    .find(|(from, _)| *from == id)
                    .map_or(eos, |(_, next)| *next)
            })
            .collect();
        Ok(vec![("logits".to_string(), peaked(BPE.len(), &targets))])
    })
}

/// Loader for the script named in a fixture weights file.
pub fn loader_named(script: &str) -> Option<ScriptedLoader> {
    let loader = match script {
        "sentiment" => sentiment_loader(),
        "pos" => pos_loader(),
        "ner" => ner_loader(),
        "qa" => qa_loader(),
        "zero-shot" => zero_shot_loader(),
        "copy" => copy_loader(),
        "t5-copy" => t5_copy_loader(),
        "dictionary" => dictionary_loader(),
        "lm" => lm_loader(),
        _ => return None,
    };
    Some(loader)
}

//! Parsed `config.json` of a model, validated against the architecture registry.

use std::path::Path;

use serde_json::{Map, Value};
use tracing::debug;

use crate::architecture::Architecture;
use crate::error::{NlpError, Result};

/// Hyperparameters and label mapping of one model.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// `model_type` declared by the file, if any.
    pub model_type: Option<String>,
    /// Labels ordered by output index, from `id2label`.
    pub labels: Vec<String>,
    pub vocab_size: Option<usize>,
    pub hidden_size: usize,
    pub num_layers: usize,
    pub pad_token_id: Option<u32>,
    pub bos_token_id: Option<u32>,
    pub eos_token_id: Option<u32>,
    pub decoder_start_token_id: Option<u32>,
    pub forced_bos_token_id: Option<u32>,
    pub max_position_embeddings: Option<usize>,
    pub do_lower_case: Option<bool>,
    raw: Map<String, Value>,
}

impl ModelConfig {
    /// Read and validate a config file for `architecture`.
    pub fn from_file(path: &Path, architecture: Architecture) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&content).map_err(|e| {
            NlpError::ConfigMismatch(format!("{} is not valid JSON: {}", path.display(), e))
        })?;
        Self::from_value(value, architecture)
    }

    /// Validate an already-parsed config for `architecture`.
    pub fn from_value(value: Value, architecture: Architecture) -> Result<Self> {
        let Value::Object(raw) = value else {
            return Err(NlpError::ConfigMismatch(
                "config must be a JSON object".to_string(),
            ));
        };

        let model_type = raw
            .get("model_type")
            .and_then(Value::as_str)
            .map(str::to_string);

        match &model_type {
            Some(declared) => check_declared(declared, architecture)?,
            None => check_undeclared(&raw, architecture)?,
        }

        let keys = architecture.shape_keys();
        let hidden_size = required_dim(&raw, keys.hidden_size, architecture)?;
        let num_layers = required_dim(&raw, keys.num_layers, architecture)?;
        let vocab_size = count(&raw, keys.vocab_size)?;

        let labels = parse_labels(&raw)?;

        let config = Self {
            model_type,
            labels,
            vocab_size,
            hidden_size,
            num_layers,
            pad_token_id: token_id(&raw, "pad_token_id")?,
            bos_token_id: token_id(&raw, "bos_token_id")?,
            eos_token_id: token_id(&raw, "eos_token_id")?,
            decoder_start_token_id: token_id(&raw, "decoder_start_token_id")?,
            forced_bos_token_id: token_id(&raw, "forced_bos_token_id")?,
            max_position_embeddings: match count(&raw, "max_position_embeddings")? {
                Some(n) => Some(n),
                None => count(&raw, "n_positions")?,
            },
            do_lower_case: raw.get("do_lower_case").and_then(Value::as_bool),
            raw,
        };

        debug!(
            "Parsed {} config: hidden={} layers={} labels={} vocab={:?}",
            architecture,
            config.hidden_size,
            config.num_layers,
            config.labels.len(),
            config.vocab_size
        );

        Ok(config)
    }

    /// Number of labels of the classification head.
    pub fn num_labels(&self) -> usize {
        self.labels.len()
    }

    /// Label for an output index.
    pub fn label(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    /// Index of the first label whose lowercase form contains `needle`.
    pub fn find_label(&self, needle: &str) -> Option<usize> {
        self.labels
            .iter()
            .position(|l| l.to_lowercase().contains(needle))
    }

    /// Raw config value for keys the typed fields do not cover.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.raw.get(key)
    }
}

fn check_declared(declared: &str, architecture: Architecture) -> Result<()> {
    let declared_arch = Architecture::from_model_type(declared).map_err(|_| {
        NlpError::ConfigMismatch(format!(
            "config declares unknown model_type '{}' for architecture '{}'",
            declared, architecture
        ))
    })?;
    if declared_arch != architecture {
        return Err(NlpError::ConfigMismatch(format!(
            "config declares model_type '{}' but architecture '{}' was requested",
            declared, architecture
        )));
    }
    Ok(())
}

/// Without `model_type`, the first `architectures` class names the model.
/// Failing that, the shape keys must single out the requested architecture.
fn check_undeclared(raw: &Map<String, Value>, architecture: Architecture) -> Result<()> {
    let class = raw
        .get("architectures")
        .and_then(Value::as_array)
        .and_then(|classes| classes.first())
        .and_then(Value::as_str);

    if let Some(class) = class {
        return match Architecture::from_class_name(class) {
            Some(found) if found == architecture => Ok(()),
            Some(found) => Err(NlpError::ConfigMismatch(format!(
                "config describes a {} model ({}) but architecture '{}' was requested",
                found, class, architecture
            ))),
            None => Err(NlpError::ConfigMismatch(format!(
                "config names unknown model class '{}'",
                class
            ))),
        };
    }

    let keys = architecture.shape_keys();
    let lookalikes: Vec<&str> = Architecture::ALL
        .into_iter()
        .filter(|a| *a != architecture && a.shape_keys() == keys)
        .map(Architecture::model_type)
        .collect();
    if lookalikes.is_empty() {
        return Ok(());
    }
    Err(NlpError::ConfigMismatch(format!(
        "config declares no model_type and its keys also fit {}; expected model_type '{}'",
        lookalikes.join(", "),
        architecture.model_type()
    )))
}

fn out_of_range(key: &str, value: u64) -> NlpError {
    NlpError::ConfigMismatch(format!("'{}' value {} is out of range", key, value))
}

/// Optional non-negative count such as `vocab_size`.
fn count(raw: &Map<String, Value>, key: &str) -> Result<Option<usize>> {
    raw.get(key)
        .and_then(Value::as_u64)
        .map(|v| usize::try_from(v).map_err(|_| out_of_range(key, v)))
        .transpose()
}

fn required_dim(raw: &Map<String, Value>, key: &str, architecture: Architecture) -> Result<usize> {
    match count(raw, key)? {
        Some(v) if v > 0 => Ok(v),
        Some(_) => Err(NlpError::ConfigMismatch(format!("'{}' must be positive", key))),
        None => Err(NlpError::ConfigMismatch(format!(
            "missing '{}' required by {} configs",
            key, architecture
        ))),
    }
}

/// Token ids appear as integers or, for some decoders, as lists.
fn token_id(raw: &Map<String, Value>, key: &str) -> Result<Option<u32>> {
    let value = match raw.get(key) {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::Array(items)) => items.first().and_then(Value::as_u64),
        _ => None,
    };
    value
        .map(|v| u32::try_from(v).map_err(|_| out_of_range(key, v)))
        .transpose()
}

fn parse_labels(raw: &Map<String, Value>) -> Result<Vec<String>> {
    let declared = count(raw, "num_labels")?;

    let Some(id2label) = raw.get("id2label") else {
        return Ok((0..declared.unwrap_or(0)).map(|i| format!("LABEL_{}", i)).collect());
    };

    let map = id2label
        .as_object()
        .ok_or_else(|| NlpError::ConfigMismatch("id2label must be an object".to_string()))?;

    let mut entries = Vec::with_capacity(map.len());
    for (key, value) in map {
        let index: usize = key.trim().parse().map_err(|_| {
            NlpError::ConfigMismatch(format!("id2label key '{}' is not an index", key))
        })?;
        let label = value.as_str().ok_or_else(|| {
            NlpError::ConfigMismatch(format!("id2label value for {} is not a string", index))
        })?;
        entries.push((index, label.to_string()));
    }
    entries.sort_by_key(|(index, _)| *index);

    for (expected, (index, _)) in entries.iter().enumerate() {
        if *index != expected {
            return Err(NlpError::ConfigMismatch(format!(
                "id2label is not contiguous: expected index {}, found {}",
                expected, index
            )));
        }
    }

    if let Some(n) = declared {
        if n != entries.len() {
            return Err(NlpError::ConfigMismatch(format!(
                "num_labels is {} but id2label has {} entries",
                n,
                entries.len()
            )));
        }
    }

    Ok(entries.into_iter().map(|(_, label)| label).collect())
}

//! Zero-shot classification through natural-language inference.
//!
//! Each candidate label becomes a hypothesis ("This example is {label}.")
//! scored against the text as premise. With a closed label set the
//! entailment logits are normalized across labels; in multi-label mode
//! every label is scored independently as entailment against contradiction,
//! or against all other NLI classes when the head has no contradiction label.

use nlprt_inference::{BackendLoader, InferenceBackend};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::softmax;
use crate::architecture::Architecture;
use crate::error::{NlpError, Result};
use crate::models::{ArtifactPaths, RuntimeConfig, Task};
use crate::runtime::{ArtifactLoader, EncoderInput, LoadedModel, ModelHandle};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZeroShotLabel {
    pub text: String,
    pub score: f64,
}

#[derive(Debug)]
pub struct ZeroShotModel<B> {
    handle: ModelHandle<B>,
    hypothesis_template: String,
    multi_label: bool,
}

impl<B: InferenceBackend> ZeroShotModel<B> {
    /// Default model: BART fine-tuned on MNLI.
    pub fn new<L>(loader: &L, config: &RuntimeConfig) -> Result<Self>
    where
        L: BackendLoader<Backend = B>,
    {
        let handle = ArtifactLoader::new(loader, config).load_default(Task::ZeroShot)?;
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
        let handle = ArtifactLoader::new(loader, config).load(Task::ZeroShot, paths, architecture)?;
        Ok(Self::with_handle(handle, config))
    }

    fn with_handle(handle: ModelHandle<B>, config: &RuntimeConfig) -> Self {
        Self {
            handle,
            hypothesis_template: config.zero_shot.hypothesis_template.clone(),
            multi_label: config.zero_shot.multi_label,
        }
    }

    /// Score labels independently instead of as one distribution.
    pub fn with_multi_label(mut self, multi_label: bool) -> Self {
        self.multi_label = multi_label;
        self
    }

    /// Rank `labels` for `text`, best first.
    pub fn predict(&self, text: &str, labels: &[&str]) -> Result<Vec<ZeroShotLabel>> {
        let model = self.handle.get()?;
        if labels.is_empty() {
            return Err(NlpError::EmptyLabelSet);
        }

        let entail_ix = model.config.find_label("entail").ok_or_else(|| {
            NlpError::ConfigMismatch("model has no entailment label".to_string())
        })?;
        let contra_ix = model.config.find_label("contradict");

        let mut entail = Vec::with_capacity(labels.len());
        let mut independent = Vec::with_capacity(labels.len());
        for label in labels {
            let logits = self.nli_logits(model, text, label)?;
            entail.push(logits[entail_ix]);
            let probability = match contra_ix {
                Some(c) => softmax(&[logits[c], logits[entail_ix]])[1],
                None => softmax(&logits)[entail_ix],
            };
            independent.push(f64::from(probability));
        }

        let scores: Vec<f64> = if self.multi_label {
            independent
        } else {
            softmax(&entail).into_iter().map(f64::from).collect()
        };

        let mut ranked: Vec<ZeroShotLabel> = labels
            .iter()
            .zip(scores)
            .map(|(label, score)| ZeroShotLabel {
                text: label.to_string(),
                score,
            })
            .collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));

        debug!(
            "Zero-shot over {} labels (multi_label={}): top '{}'",
            ranked.len(),
            self.multi_label,
            ranked[0].text
        );
        Ok(ranked)
    }

    pub fn close(&mut self) {
        self.handle.release();
    }

    fn nli_logits(&self, model: &LoadedModel<B>, premise: &str, label: &str) -> Result<Vec<f32>> {
        let hypothesis = self.hypothesis_template.replace("{}", label);
        let mut seq = model.tokenizer.encode_pair(premise, &hypothesis)?;
        seq.truncate_preferring(model.encoder_limit(), 0);

        let output = model.session().run(&EncoderInput::from(&seq), None)?;
        let logits = output.sequence_logits()?;
        if logits.len() != model.config.num_labels() {
            return Err(NlpError::InferenceFailure(format!(
                "expected {} NLI logits, got {}",
                model.config.num_labels(),
                logits.len()
            )));
        }
        Ok(logits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fixtures, ScriptedBackend, ScriptedLoader};
    use ndarray::{ArrayD, IxDyn};
    use nlprt_inference::OutputTensor;
    use pretty_assertions::assert_eq;

    fn model(dir: &std::path::Path) -> ZeroShotModel<ScriptedBackend> {
        let paths = fixtures::zero_shot_artifacts(dir);
        ZeroShotModel::from_files(
            &fixtures::zero_shot_loader(),
            &paths,
            Architecture::Bert,
            &RuntimeConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_election_text_ranks_politics_first() {
        let dir = tempfile::tempdir().unwrap();
        let model = model(dir.path());

        let ranked = model
            .predict("The election results", &["sports", "politics"])
            .unwrap();
        assert_eq!(ranked[0].text, "politics");
        assert_eq!(ranked.len(), 2);

        let total: f64 = ranked.iter().map(|l| l.score).sum();
        assert!((total - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_multi_label_scores_independently() {
        let dir = tempfile::tempdir().unwrap();
        let model = model(dir.path()).with_multi_label(true);

        let ranked = model
            .predict("The team won the election", &["politics", "sports"])
            .unwrap();
        assert!(ranked.iter().all(|l| l.score > 0.5));
    }

    #[test]
    fn test_empty_label_set() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = model(dir.path());
        assert!(matches!(
            model.predict("The election results", &[]),
            Err(NlpError::EmptyLabelSet)
        ));

        model.close();
        assert!(matches!(
            model.predict("The election results", &["politics"]),
            Err(NlpError::ModelClosed)
        ));
    }

    #[test]
    fn test_two_way_nli_head_scores_entailment_against_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let paths = fixtures::zero_shot_artifacts(dir.path());
        fixtures::write_json(
            &paths.config,
            fixtures::config_for(
                Architecture::Bert,
                serde_json::json!({"id2label": {"0": "entailment", "1": "not_entailment"}}),
            ),
        );
        let loader = ScriptedLoader::new(&["input_ids", "attention_mask"], |_| {
            let logits = ArrayD::from_shape_vec(IxDyn(&[1, 2]), vec![2.0, 0.0]).unwrap();
            Ok(vec![("logits".to_string(), OutputTensor::Float32(logits))])
        });
        let model = ZeroShotModel::from_files(&loader, &paths, Architecture::Bert, &RuntimeConfig::default())
            .unwrap()
            .with_multi_label(true);

        let ranked = model.predict("The election results", &["politics"]).unwrap();
        let expected = 1.0 / (1.0 + (-2.0f64).exp());
        assert!((ranked[0].score - expected).abs() < 1e-5, "{}", ranked[0].score);
    }
}

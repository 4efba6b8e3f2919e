//! Scripted backends standing in for ONNX graphs in tests.

pub mod fixtures;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nlprt_inference::{
    BackendLoader, InferenceBackend, InferenceError, InputTensor, OutputTensor, SequenceShape,
};

type Outputs = nlprt_inference::Result<Vec<(String, OutputTensor)>>;
type Script = dyn Fn(&[(&str, InputTensor)]) -> Outputs + Send + Sync;

/// Backend whose forward pass is a closure over the named inputs.
pub struct ScriptedBackend {
    inputs: Vec<String>,
    outputs: Vec<String>,
    script: Arc<Script>,
    fixed: Option<(usize, usize)>,
    poison: Arc<AtomicBool>,
}

impl ScriptedBackend {
    pub fn new<F>(inputs: &[&str], script: F) -> Self
    where
        F: Fn(&[(&str, InputTensor)]) -> Outputs + Send + Sync + 'static,
    {
        Self::from_script(inputs, Arc::new(script))
    }

    fn from_script(inputs: &[&str], script: Arc<Script>) -> Self {
        Self {
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: vec!["logits".to_string()],
            script,
            fixed: None,
            poison: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Pretend the graph was compiled for static encoder/decoder lengths.
    pub fn with_fixed_lengths(mut self, sequence: usize, decoder: usize) -> Self {
        self.fixed = Some((sequence, decoder));
        self
    }

    /// Flag set when the backend is dropped.
    pub fn poison(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.poison)
    }
}

impl std::fmt::Debug for ScriptedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedBackend")
            .field("inputs", &self.inputs)
            .field("fixed", &self.fixed)
            .finish()
    }
}

impl Drop for ScriptedBackend {
    fn drop(&mut self) {
        self.poison.store(true, Ordering::SeqCst);
    }
}

impl InferenceBackend for ScriptedBackend {
    fn run(&self, inputs: &[(&str, InputTensor)]) -> Outputs {
        for name in &self.inputs {
            if !inputs.iter().any(|(n, _)| n == name) {
                return Err(InferenceError::MissingInput(name.clone()));
            }
        }
        (self.script)(inputs)
    }

    fn input_names(&self) -> &[String] {
        &self.inputs
    }

    fn output_names(&self) -> &[String] {
        &self.outputs
    }

    fn fixed_sequence_length(&self) -> Option<usize> {
        self.fixed.map(|(sequence, _)| sequence)
    }

    fn fixed_decoder_length(&self) -> Option<usize> {
        self.fixed.map(|(_, decoder)| decoder)
    }
}

/// Loader producing [`ScriptedBackend`]s from weights files that start
/// with `MOCK`; anything else is rejected like a corrupt graph.
pub struct ScriptedLoader {
    inputs: Vec<&'static str>,
    script: Arc<Script>,
}

impl ScriptedLoader {
    pub fn new<F>(inputs: &[&'static str], script: F) -> Self
    where
        F: Fn(&[(&str, InputTensor)]) -> Outputs + Send + Sync + 'static,
    {
        Self {
            inputs: inputs.to_vec(),
            script: Arc::new(script),
        }
    }
}

impl BackendLoader for ScriptedLoader {
    type Backend = ScriptedBackend;

    fn load(&self, path: &Path, _shape: SequenceShape) -> nlprt_inference::Result<ScriptedBackend> {
        let bytes = std::fs::read(path)?;
        if !bytes.starts_with(b"MOCK") {
            return Err(InferenceError::Graph(format!(
                "{} is not a scripted graph",
                path.display()
            )));
        }
        Ok(ScriptedBackend::from_script(&self.inputs, Arc::clone(&self.script)))
    }
}

/// Loader dispatching on the `MOCK <script>` marker written by
/// [`fixtures`], for callers that build their loader with `Default`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixtureLoader;

impl BackendLoader for FixtureLoader {
    type Backend = ScriptedBackend;

    fn load(&self, path: &Path, shape: SequenceShape) -> nlprt_inference::Result<ScriptedBackend> {
        let bytes = std::fs::read(path)?;
        let script = bytes
            .strip_prefix(b"MOCK ")
            .map(String::from_utf8_lossy)
            .unwrap_or_default();
        let loader = fixtures::loader_named(script.trim()).ok_or_else(|| {
            InferenceError::Graph(format!("{} names no fixture script", path.display()))
        })?;
        loader.load(path, shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_loader_follows_the_weights_marker() {
        let dir = tempfile::tempdir().unwrap();
        let paths = fixtures::ner_artifacts(dir.path());
        let backend = FixtureLoader.load(&paths.weights, SequenceShape::default()).unwrap();
        assert!(backend.input_names().iter().any(|n| n == "token_type_ids"));

        std::fs::write(&paths.weights, "MOCK nothing").unwrap();
        assert!(FixtureLoader.load(&paths.weights, SequenceShape::default()).is_err());
    }
}

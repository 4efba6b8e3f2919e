//! Forward-pass backend implementations.

#[cfg(feature = "ort")]
pub mod ort;

#[cfg(feature = "tract")]
pub mod tract;

use std::path::Path;

use crate::{InputTensor, OutputTensor, Result};

/// Trait for ONNX forward-pass backends.
///
/// A backend owns one loaded graph and its weights. Weights are read-only
/// once loaded, so `run` takes `&self` and any scratch memory is allocated
/// per call; a backend can serve concurrent callers.
pub trait InferenceBackend: Send + Sync {
    /// Run a forward pass with the given named inputs.
    ///
    /// # Arguments
    /// * `inputs` - Named input tensors
    ///
    /// # Returns
    /// Named output tensors from the graph
    fn run(&self, inputs: &[(&str, InputTensor)]) -> Result<Vec<(String, OutputTensor)>>;

    /// Get the input names expected by the graph.
    fn input_names(&self) -> &[String];

    /// Get the output names produced by the graph.
    fn output_names(&self) -> &[String];

    /// Sequence length every encoder-side input must be padded to, if the
    /// graph was compiled for a static shape.
    fn fixed_sequence_length(&self) -> Option<usize> {
        None
    }

    /// Sequence length every decoder-side input must be padded to, if the
    /// graph was compiled for a static shape.
    fn fixed_decoder_length(&self) -> Option<usize> {
        None
    }
}

/// Static shape hints handed to a [`BackendLoader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceShape {
    /// Padded length for `input_ids`, `attention_mask` and `token_type_ids`.
    pub sequence_length: usize,
    /// Padded length for `decoder_input_ids` and `decoder_attention_mask`.
    pub decoder_length: usize,
}

impl SequenceShape {
    /// Shape of the named input, choosing the decoder length for decoder-side inputs.
    pub fn for_input(&self, name: &str) -> [usize; 2] {
        if name.starts_with("decoder") {
            [1, self.decoder_length]
        } else {
            [1, self.sequence_length]
        }
    }
}

impl Default for SequenceShape {
    fn default() -> Self {
        Self {
            sequence_length: 128,
            decoder_length: 64,
        }
    }
}

/// Factory turning a weights file into a ready backend.
///
/// This is the seam the model loader is parameterized over: the runtime
/// decides which backend to build at composition time and passes the loader
/// down, instead of resolving symbols from a shared library.
pub trait BackendLoader {
    /// Backend produced by this loader.
    type Backend: InferenceBackend;

    /// Load the weights file at `path`.
    fn load(&self, path: &Path, shape: SequenceShape) -> Result<Self::Backend>;
}

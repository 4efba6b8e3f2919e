//! ONNX Runtime (ort) backend for native platforms with XNNPACK.
//!
//! Unlike tract, ONNX Runtime handles dynamic sequence axes, so this backend
//! reports no fixed lengths and callers skip padding.

use std::path::Path;
use std::sync::Mutex;

use ndarray::ArrayD;
use ort::ep::XNNPACK;
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::Tensor;
use tracing::debug;

use crate::backend::{BackendLoader, SequenceShape};
use crate::error::InferenceError;
use crate::tensor::{InputTensor, OutputTensor};
use crate::{InferenceBackend, Result};

/// Backend using ONNX Runtime for native inference.
pub struct OrtBackend {
    session: Mutex<Session>,
    input_names: Vec<String>,
    output_names: Vec<String>,
}

impl OrtBackend {
    /// Load a graph from a file path.
    pub fn from_file<P: AsRef<Path>>(path: P, intra_threads: usize) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading ONNX graph from: {}", path.display());

        let bytes = std::fs::read(path)?;
        Self::commit(&bytes, intra_threads)
    }

    fn commit(bytes: &[u8], intra_threads: usize) -> Result<Self> {
        debug!("Loading ONNX graph from {} bytes", bytes.len());

        let session = Session::builder()
            .map_err(|e| InferenceError::Graph(e.to_string()))?
            .with_execution_providers([XNNPACK::default().build()])
            .map_err(|e| InferenceError::Graph(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| InferenceError::Graph(e.to_string()))?
            .with_intra_threads(intra_threads)
            .map_err(|e| InferenceError::Graph(e.to_string()))?
            .commit_from_memory(bytes)
            .map_err(|e| InferenceError::Graph(e.to_string()))?;

        let input_names: Vec<String> = session
            .inputs()
            .iter()
            .map(|i| i.name().to_string())
            .collect();

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        debug!("Graph inputs: {:?}", input_names);
        debug!("Graph outputs: {:?}", output_names);

        Ok(Self {
            session: Mutex::new(session),
            input_names,
            output_names,
        })
    }

    fn convert_input(tensor: &InputTensor) -> Result<ort::session::SessionInputValue<'static>> {
        let shape: Vec<i64> = tensor.shape().iter().map(|&s| s as i64).collect();
        let value = match tensor {
            InputTensor::Float32(arr) => {
                Tensor::from_array((shape, arr.iter().cloned().collect::<Vec<f32>>())).map(Into::into)
            }
            InputTensor::Int32(arr) => {
                Tensor::from_array((shape, arr.iter().cloned().collect::<Vec<i32>>())).map(Into::into)
            }
            InputTensor::Int64(arr) => {
                Tensor::from_array((shape, arr.iter().cloned().collect::<Vec<i64>>())).map(Into::into)
            }
        };
        value.map_err(|e| InferenceError::Shape {
            shape: tensor.shape().to_vec(),
            reason: e.to_string(),
        })
    }
}

impl InferenceBackend for OrtBackend {
    fn run(&self, inputs: &[(&str, InputTensor)]) -> Result<Vec<(String, OutputTensor)>> {
        let ort_inputs: Vec<(&str, ort::session::SessionInputValue<'static>)> = inputs
            .iter()
            .filter(|(name, _)| self.input_names.iter().any(|n| n == name))
            .map(|(name, tensor)| Ok((*name, Self::convert_input(tensor)?)))
            .collect::<Result<Vec<_>>>()?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| InferenceError::SessionPoisoned)?;

        let outputs = session
            .run(ort_inputs)
            .map_err(|e| InferenceError::Forward(e.to_string()))?;

        let mut results = Vec::with_capacity(outputs.len());

        for (name, value) in outputs.iter() {
            let tensor = if let Ok((shape_ref, data)) = value.try_extract_tensor::<f32>() {
                let shape: Vec<usize> = shape_ref.iter().map(|&s| s as usize).collect();
                let arr = ArrayD::from_shape_vec(ndarray::IxDyn(&shape), data.to_vec())
                    .map_err(|e| InferenceError::Shape {
                        shape: shape.clone(),
                        reason: e.to_string(),
                    })?;
                OutputTensor::Float32(arr)
            } else if let Ok((shape_ref, data)) = value.try_extract_tensor::<i64>() {
                let shape: Vec<usize> = shape_ref.iter().map(|&s| s as usize).collect();
                let arr = ArrayD::from_shape_vec(ndarray::IxDyn(&shape), data.to_vec())
                    .map_err(|e| InferenceError::Shape {
                        shape: shape.clone(),
                        reason: e.to_string(),
                    })?;
                OutputTensor::Int64(arr)
            } else {
                return Err(InferenceError::UnsupportedOutput(name.to_string()));
            };

            results.push((name.to_string(), tensor));
        }

        Ok(results)
    }

    fn input_names(&self) -> &[String] {
        &self.input_names
    }

    fn output_names(&self) -> &[String] {
        &self.output_names
    }
}

/// [`BackendLoader`] building [`OrtBackend`]s.
#[derive(Debug, Clone, Copy)]
pub struct OrtLoader {
    /// Intra-op thread count for each session.
    pub intra_threads: usize,
}

impl Default for OrtLoader {
    fn default() -> Self {
        Self { intra_threads: 4 }
    }
}

impl BackendLoader for OrtLoader {
    type Backend = OrtBackend;

    fn load(&self, path: &Path, _shape: SequenceShape) -> Result<OrtBackend> {
        OrtBackend::from_file(path, self.intra_threads)
    }
}

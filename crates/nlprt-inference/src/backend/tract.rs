//! Tract backend: pure-Rust ONNX execution with static sequence shapes.

use std::path::Path;

use ndarray::ArrayD;
use tract_onnx::prelude::*;
use tracing::debug;

use crate::backend::{BackendLoader, SequenceShape};
use crate::error::InferenceError;
use crate::tensor::{InputTensor, OutputTensor};
use crate::{InferenceBackend, Result};

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Backend using Tract. Every input is pinned to `[1, length]` at load time,
/// so callers pad token sequences to [`InferenceBackend::fixed_sequence_length`].
pub struct TractBackend {
    model: Plan,
    input_names: Vec<String>,
    output_names: Vec<String>,
    shape: SequenceShape,
}

impl TractBackend {
    /// Load a graph from a file path, pinning inputs to `shape`.
    pub fn from_file<P: AsRef<Path>>(path: P, shape: SequenceShape) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading ONNX graph with Tract from: {}", path.display());

        let model = tract_onnx::onnx()
            .model_for_path(path)
            .map_err(|e| InferenceError::Graph(format!("{}: {}", path.display(), e)))?;

        Self::pin_and_compile(model, shape)
    }

    fn pin_and_compile(mut model: InferenceModel, shape: SequenceShape) -> Result<Self> {
        let inputs = model
            .input_outlets()
            .map_err(|e| InferenceError::Graph(e.to_string()))?
            .to_vec();

        let mut input_names = Vec::with_capacity(inputs.len());
        for (ix, outlet) in inputs.iter().enumerate() {
            let name = model.node(outlet.node).name.clone();
            let dims = shape.for_input(&name);
            model
                .set_input_fact(ix, InferenceFact::dt_shape(i64::datum_type(), &dims[..]))
                .map_err(|e| InferenceError::StaticShape {
                    name: name.clone(),
                    dims,
                    reason: e.to_string(),
                })?;
            input_names.push(name);
        }

        let output_names: Vec<String> = model
            .output_outlets()
            .map_err(|e| InferenceError::Graph(e.to_string()))?
            .iter()
            .map(|outlet| {
                model
                    .outlet_label(*outlet)
                    .map(str::to_string)
                    .unwrap_or_else(|| model.node(outlet.node).name.clone())
            })
            .collect();

        debug!("Graph inputs: {:?}", input_names);
        debug!("Graph outputs: {:?}", output_names);

        let model = model
            .into_typed()
            .map_err(|e| InferenceError::Graph(format!("type inference failed: {}", e)))?
            .into_optimized()
            .map_err(|e| InferenceError::Graph(format!("optimization failed: {}", e)))?
            .into_runnable()
            .map_err(|e| InferenceError::Graph(e.to_string()))?;

        Ok(Self {
            model,
            input_names,
            output_names,
            shape,
        })
    }

    fn convert_input(tensor: &InputTensor) -> Result<TValue> {
        fn to_tract<T: Datum + Clone>(arr: &ArrayD<T>) -> Result<TValue> {
            let data: Vec<T> = arr.iter().cloned().collect();
            tract_ndarray::ArrayD::from_shape_vec(tract_ndarray::IxDyn(arr.shape()), data)
                .map(|a| a.into_tvalue())
                .map_err(|e| InferenceError::Shape {
                    shape: arr.shape().to_vec(),
                    reason: e.to_string(),
                })
        }

        match tensor {
            InputTensor::Float32(arr) => to_tract(arr),
            InputTensor::Int32(arr) => to_tract(arr),
            InputTensor::Int64(arr) => to_tract(arr),
        }
    }
}

impl InferenceBackend for TractBackend {
    fn run(&self, inputs: &[(&str, InputTensor)]) -> Result<Vec<(String, OutputTensor)>> {
        // Tract feeds inputs positionally, so follow the graph's declared order.
        let tract_inputs: TVec<TValue> = self
            .input_names
            .iter()
            .map(|name| {
                let tensor = inputs
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, t)| t)
                    .ok_or_else(|| InferenceError::MissingInput(name.clone()))?;
                Self::convert_input(tensor)
            })
            .collect::<Result<TVec<_>>>()?;

        let outputs = self
            .model
            .run(tract_inputs)
            .map_err(|e| InferenceError::Forward(e.to_string()))?;

        let mut results = Vec::with_capacity(outputs.len());

        for (idx, output) in outputs.iter().enumerate() {
            let name = self
                .output_names
                .get(idx)
                .cloned()
                .unwrap_or_else(|| format!("output_{}", idx));

            let tensor = if let Ok(view) = output.to_array_view::<f32>() {
                let data: Vec<f32> = view.iter().cloned().collect();
                let arr = ArrayD::from_shape_vec(ndarray::IxDyn(view.shape()), data)
                    .map_err(|e| InferenceError::Shape {
                        shape: view.shape().to_vec(),
                        reason: e.to_string(),
                    })?;
                OutputTensor::Float32(arr)
            } else if let Ok(view) = output.to_array_view::<i64>() {
                let data: Vec<i64> = view.iter().cloned().collect();
                let arr = ArrayD::from_shape_vec(ndarray::IxDyn(view.shape()), data)
                    .map_err(|e| InferenceError::Shape {
                        shape: view.shape().to_vec(),
                        reason: e.to_string(),
                    })?;
                OutputTensor::Int64(arr)
            } else {
                return Err(InferenceError::UnsupportedOutput(name));
            };

            results.push((name, tensor));
        }

        Ok(results)
    }

    fn input_names(&self) -> &[String] {
        &self.input_names
    }

    fn output_names(&self) -> &[String] {
        &self.output_names
    }

    fn fixed_sequence_length(&self) -> Option<usize> {
        Some(self.shape.sequence_length)
    }

    fn fixed_decoder_length(&self) -> Option<usize> {
        Some(self.shape.decoder_length)
    }
}

/// [`BackendLoader`] building [`TractBackend`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct TractLoader;

impl BackendLoader for TractLoader {
    type Backend = TractBackend;

    fn load(&self, path: &Path, shape: SequenceShape) -> Result<TractBackend> {
        TractBackend::from_file(path, shape)
    }
}

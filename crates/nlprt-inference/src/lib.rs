//! ONNX forward-pass layer for nlprt.
//!
//! This crate provides a unified interface for running exported transformer
//! graphs across different backends:
//! - `tract` for pure-Rust execution with static sequence shapes (default)
//! - `ort` with the XNNPACK execution provider for native platforms

mod backend;
mod error;
mod tensor;

pub use backend::{BackendLoader, InferenceBackend, SequenceShape};
pub use error::InferenceError;
pub use tensor::{InputTensor, OutputTensor};

#[cfg(feature = "ort")]
pub use backend::ort::{OrtBackend, OrtLoader};

#[cfg(feature = "tract")]
pub use backend::tract::{TractBackend, TractLoader};

/// Result type for forward-pass operations.
pub type Result<T> = std::result::Result<T, InferenceError>;

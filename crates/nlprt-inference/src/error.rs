//! Error types for the forward-pass layer.

use thiserror::Error;

/// Errors raised while compiling or running a transformer graph.
#[derive(Error, Debug)]
pub enum InferenceError {
    /// The weights file could not be parsed or compiled into a runnable graph.
    #[error("cannot compile graph: {0}")]
    Graph(String),

    /// A token input could not be pinned to the static sequence shape.
    #[error("cannot pin input '{name}' to {dims:?}: {reason}")]
    StaticShape {
        name: String,
        dims: [usize; 2],
        reason: String,
    },

    /// The graph declares an input the caller did not provide.
    #[error("missing input tensor '{0}'")]
    MissingInput(String),

    /// Tensor data does not fill the shape it was given.
    #[error("data does not fit shape {shape:?}: {reason}")]
    Shape { shape: Vec<usize>, reason: String },

    /// The forward pass itself failed.
    #[error("forward pass failed: {0}")]
    Forward(String),

    /// An output holds neither f32 logits nor i64 ids.
    #[error("output '{0}' has an unsupported element type")]
    UnsupportedOutput(String),

    /// A previous caller panicked while holding the session.
    #[error("session lock poisoned")]
    SessionPoisoned,

    /// The weights file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_shape_message_names_the_input() {
        let err = InferenceError::StaticShape {
            name: "decoder_input_ids".to_string(),
            dims: [1, 64],
            reason: "rank mismatch".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "cannot pin input 'decoder_input_ids' to [1, 64]: rank mismatch"
        );
    }
}

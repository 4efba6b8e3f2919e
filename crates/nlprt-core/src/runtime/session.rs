//! Named-input assembly and logits extraction around one forward pass.

use ndarray::{ArrayD, Axis, Ix2, Ix3};
use nlprt_inference::{InferenceBackend, InputTensor, OutputTensor};
use tracing::trace;

use crate::error::{NlpError, Result};
use crate::tokenizer::TokenSequence;

/// Encoder-side inputs of a forward pass.
#[derive(Debug, Clone, Default)]
pub struct EncoderInput {
    pub ids: Vec<u32>,
    pub type_ids: Vec<u32>,
}

impl From<&TokenSequence> for EncoderInput {
    fn from(seq: &TokenSequence) -> Self {
        Self {
            ids: seq.ids(),
            type_ids: seq.type_ids(),
        }
    }
}

impl EncoderInput {
    /// Ids without segment information; all type ids are zero.
    pub fn from_ids(ids: Vec<u32>) -> Self {
        let type_ids = vec![0; ids.len()];
        Self { ids, type_ids }
    }
}

/// Runs a backend with inputs named after the graph's declared inputs.
///
/// Static-shape backends get every input padded to their fixed length;
/// the pad positions are masked out and ignored when reading logits.
pub struct Session<'a, B> {
    backend: &'a B,
    pad_id: u32,
}

impl<'a, B: InferenceBackend> Session<'a, B> {
    pub fn new(backend: &'a B, pad_id: u32) -> Self {
        Self { backend, pad_id }
    }

    /// Longest decoder input the graph accepts, if fixed.
    pub fn max_decoder_len(&self) -> Option<usize> {
        self.backend.fixed_decoder_length()
    }

    /// Run the graph over an encoder input and an optional decoder prefix.
    pub fn run(&self, encoder: &EncoderInput, decoder: Option<&[u32]>) -> Result<ForwardOutput> {
        let encoder_len = encoder.ids.len();
        let decoder_len = decoder.map_or(0, <[u32]>::len);
        let enc_width = self.width(encoder_len, self.backend.fixed_sequence_length())?;
        let dec_width = self.width(decoder_len, self.backend.fixed_decoder_length())?;

        let mut inputs: Vec<(&str, InputTensor)> = Vec::new();
        for name in self.backend.input_names() {
            let tensor = match name.as_str() {
                "input_ids" => self.ids_tensor(&encoder.ids, enc_width)?,
                "attention_mask" => mask_tensor(encoder_len, enc_width)?,
                "token_type_ids" => self.padded(
                    encoder.type_ids.iter().map(|&t| t as i64).collect(),
                    enc_width,
                    0,
                )?,
                "position_ids" => {
                    self.padded((0..encoder_len as i64).collect(), enc_width, 0)?
                }
                "decoder_input_ids" => {
                    let ids = decoder.ok_or_else(|| {
                        NlpError::InferenceFailure(
                            "graph expects decoder_input_ids but none were given".to_string(),
                        )
                    })?;
                    self.ids_tensor(ids, dec_width)?
                }
                "decoder_attention_mask" => mask_tensor(decoder_len, dec_width)?,
                other => {
                    return Err(NlpError::InferenceFailure(format!(
                        "graph input '{}' is not supported",
                        other
                    )));
                }
            };
            inputs.push((name.as_str(), tensor));
        }

        trace!(
            "Forward pass: encoder {}/{} decoder {}/{}",
            encoder_len,
            enc_width,
            decoder_len,
            dec_width
        );

        let outputs = self.backend.run(&inputs)?;
        Ok(ForwardOutput {
            outputs,
            encoder_len,
            decoder_len,
        })
    }

    fn width(&self, len: usize, fixed: Option<usize>) -> Result<usize> {
        match fixed {
            Some(fixed) if len > fixed => Err(NlpError::InferenceFailure(format!(
                "input of {} tokens exceeds the graph's fixed length {}",
                len, fixed
            ))),
            Some(fixed) => Ok(fixed),
            None => Ok(len),
        }
    }

    fn ids_tensor(&self, ids: &[u32], width: usize) -> Result<InputTensor> {
        self.padded(ids.iter().map(|&id| id as i64).collect(), width, self.pad_id as i64)
    }

    fn padded(&self, mut values: Vec<i64>, width: usize, fill: i64) -> Result<InputTensor> {
        values.resize(width, fill);
        Ok(InputTensor::from_i64(values, &[1, width])?)
    }
}

fn mask_tensor(len: usize, width: usize) -> Result<InputTensor> {
    let mut mask = vec![1i64; len];
    mask.resize(width, 0);
    Ok(InputTensor::from_i64(mask, &[1, width])?)
}

/// Named outputs of one forward pass plus the unpadded input lengths.
#[derive(Debug)]
pub struct ForwardOutput {
    outputs: Vec<(String, OutputTensor)>,
    encoder_len: usize,
    decoder_len: usize,
}

impl ForwardOutput {
    /// Output by name, falling back to position when the graph uses
    /// generic output names.
    fn tensor(&self, name: &str, position: usize) -> Result<&ArrayD<f32>> {
        let found = self
            .outputs
            .iter()
            .find(|(n, _)| n == name)
            .or_else(|| self.outputs.get(position))
            .ok_or_else(|| {
                NlpError::InferenceFailure(format!("graph produced no '{}' output", name))
            })?;
        let array = found.1.as_f32().ok_or_else(|| {
            NlpError::InferenceFailure(format!("output '{}' is not a float tensor", found.0))
        })?;
        if array.iter().any(|v| v.is_nan()) {
            return Err(NlpError::InferenceFailure(format!(
                "output '{}' contains NaN",
                found.0
            )));
        }
        Ok(array)
    }

    /// Whether an output with this exact name exists.
    pub fn has(&self, name: &str) -> bool {
        self.outputs.iter().any(|(n, _)| n == name)
    }

    /// Logits of a sequence classification head, `[1, C]`.
    pub fn sequence_logits(&self) -> Result<Vec<f32>> {
        let logits = self.tensor("logits", 0)?;
        match logits.ndim() {
            1 => Ok(logits.iter().copied().collect()),
            2 => Ok(logits.index_axis(Axis(0), 0).iter().copied().collect()),
            n => Err(NlpError::InferenceFailure(format!(
                "expected [1, labels] logits, got rank {}",
                n
            ))),
        }
    }

    /// Per-token logits of a token classification head, `[1, T, C]`, one
    /// row per unpadded encoder position.
    pub fn token_logits(&self) -> Result<Vec<Vec<f32>>> {
        let logits = self.tensor("logits", 0)?;
        let logits = logits
            .view()
            .into_dimensionality::<Ix3>()
            .map_err(|e| NlpError::InferenceFailure(format!("token logits: {}", e)))?;
        let rows = logits.index_axis(Axis(0), 0);
        if rows.nrows() < self.encoder_len {
            return Err(NlpError::InferenceFailure(format!(
                "token logits cover {} positions, input has {}",
                rows.nrows(),
                self.encoder_len
            )));
        }
        Ok(rows
            .outer_iter()
            .take(self.encoder_len)
            .map(|row| row.to_vec())
            .collect())
    }

    /// Start and end logits of an extractive QA head, each `[1, T]`.
    pub fn span_logits(&self) -> Result<(Vec<f32>, Vec<f32>)> {
        let start = self.row("start_logits", 0)?;
        let end = self.row("end_logits", 1)?;
        Ok((start, end))
    }

    fn row(&self, name: &str, position: usize) -> Result<Vec<f32>> {
        let t = self.tensor(name, position)?;
        let flat: Vec<f32> = t.iter().copied().collect();
        if flat.len() < self.encoder_len {
            return Err(NlpError::InferenceFailure(format!(
                "'{}' covers {} positions, input has {}",
                name,
                flat.len(),
                self.encoder_len
            )));
        }
        Ok(flat.into_iter().take(self.encoder_len).collect())
    }

    /// Language-model logits at the last unpadded position, `[1, T, V]`.
    ///
    /// For encoder-decoder graphs this is the last decoder position.
    pub fn next_token_logits(&self) -> Result<Vec<f32>> {
        let logits = self.tensor("logits", 0)?;
        let position = if self.decoder_len > 0 {
            self.decoder_len
        } else {
            self.encoder_len
        };
        let position = position.checked_sub(1).ok_or_else(|| {
            NlpError::InferenceFailure("cannot predict a token from an empty input".to_string())
        })?;

        match logits.ndim() {
            3 => {
                let steps = logits.index_axis(Axis(0), 0);
                if position >= steps.shape()[0] {
                    return Err(NlpError::InferenceFailure(format!(
                        "logits cover {} positions, need {}",
                        steps.shape()[0],
                        position + 1
                    )));
                }
                Ok(steps.index_axis(Axis(0), position).iter().copied().collect())
            }
            2 => {
                let rows = logits
                    .view()
                    .into_dimensionality::<Ix2>()
                    .map_err(|e| NlpError::InferenceFailure(e.to_string()))?;
                Ok(rows.row(rows.nrows() - 1).to_vec())
            }
            n => Err(NlpError::InferenceFailure(format!(
                "expected [1, steps, vocab] logits, got rank {}",
                n
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedBackend;
    use ndarray::IxDyn;
    use pretty_assertions::assert_eq;

    fn logits(shape: &[usize], data: Vec<f32>) -> OutputTensor {
        OutputTensor::Float32(ArrayD::from_shape_vec(IxDyn(shape), data).unwrap())
    }

    #[test]
    fn test_pads_to_fixed_length_and_masks() {
        let backend = ScriptedBackend::new(&["input_ids", "attention_mask", "token_type_ids"], |inputs| {
            for (name, tensor) in inputs {
                assert_eq!(tensor.shape(), &[1, 6], "{}", name);
            }
            let InputTensor::Int64(mask) = &inputs[1].1 else {
                panic!("mask must be int64");
            };
            assert_eq!(mask.iter().copied().collect::<Vec<_>>(), vec![1, 1, 1, 0, 0, 0]);
            let InputTensor::Int64(ids) = &inputs[0].1 else {
                panic!("ids must be int64");
            };
            assert_eq!(ids.iter().copied().collect::<Vec<_>>(), vec![5, 6, 7, 9, 9, 9]);
            Ok(vec![("logits".to_string(), logits(&[1, 2], vec![0.1, 0.9]))])
        })
        .with_fixed_lengths(6, 4);

        let session = Session::new(&backend, 9);
        let out = session
            .run(&EncoderInput::from_ids(vec![5, 6, 7]), None)
            .unwrap();
        assert_eq!(out.sequence_logits().unwrap(), vec![0.1, 0.9]);
    }

    #[test]
    fn test_rejects_input_longer_than_fixed_length() {
        let backend = ScriptedBackend::new(&["input_ids"], |_| Ok(vec![])).with_fixed_lengths(2, 2);
        let session = Session::new(&backend, 0);
        let err = session
            .run(&EncoderInput::from_ids(vec![1, 2, 3]), None)
            .unwrap_err();
        assert!(matches!(err, NlpError::InferenceFailure(_)));
    }

    #[test]
    fn test_next_token_logits_reads_last_unpadded_position() {
        let backend = ScriptedBackend::new(&["input_ids", "decoder_input_ids"], |_| {
            // [1, 4 steps, 2 vocab]; step ix has logits [ix, -ix]
            let data = (0..4).flat_map(|ix| [ix as f32, -(ix as f32)]).collect();
            Ok(vec![("logits".to_string(), logits(&[1, 4, 2], data))])
        })
        .with_fixed_lengths(8, 4);

        let session = Session::new(&backend, 0);
        let out = session
            .run(&EncoderInput::from_ids(vec![1, 2]), Some(&[0, 1]))
            .unwrap();
        assert_eq!(out.next_token_logits().unwrap(), vec![1.0, -1.0]);
    }

    #[test]
    fn test_missing_decoder_ids() {
        let backend = ScriptedBackend::new(&["input_ids", "decoder_input_ids"], |_| Ok(vec![]));
        let session = Session::new(&backend, 0);
        assert!(session.run(&EncoderInput::from_ids(vec![1]), None).is_err());
    }

    #[test]
    fn test_nan_logits_are_an_inference_failure() {
        let backend = ScriptedBackend::new(&["input_ids"], |_| {
            Ok(vec![("logits".to_string(), logits(&[1, 2], vec![f32::NAN, 0.0]))])
        });
        let session = Session::new(&backend, 0);
        let out = session.run(&EncoderInput::from_ids(vec![1]), None).unwrap();
        assert!(matches!(
            out.sequence_logits(),
            Err(NlpError::InferenceFailure(_))
        ));
    }

    #[test]
    fn test_span_logits_by_position() {
        let backend = ScriptedBackend::new(&["input_ids"], |_| {
            Ok(vec![
                ("output_0".to_string(), logits(&[1, 3], vec![1.0, 2.0, 3.0])),
                ("output_1".to_string(), logits(&[1, 3], vec![4.0, 5.0, 6.0])),
            ])
        });
        let session = Session::new(&backend, 0);
        let out = session
            .run(&EncoderInput::from_ids(vec![1, 2, 3]), None)
            .unwrap();
        let (start, end) = out.span_logits().unwrap();
        assert_eq!(start, vec![1.0, 2.0, 3.0]);
        assert_eq!(end, vec![4.0, 5.0, 6.0]);
    }
}

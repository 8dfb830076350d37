//! Общие типы данных.

use candle_core::{Result, Tensor};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::{CellType, DecodeMode, ModelConfig, Normalization};

/// Split of the model input into a source and a target window.
///
/// Input layout: `[batch, input_len + target_len, features]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSpec {
    /// Steps fed to the encoder.
    pub input_len: usize,
    /// Steps to predict.
    pub target_len: usize,
}

impl WindowSpec {
    pub fn new(input_len: usize, target_len: usize) -> Self {
        Self {
            input_len,
            target_len,
        }
    }

    /// Expected length of the sequence axis.
    pub fn total_len(&self) -> usize {
        self.input_len + self.target_len
    }

    /// Split `[batch, time, features]` into `(source, target)`.
    ///
    /// The target is `None` when the input holds only the source window
    /// (inference without ground truth).
    pub fn split(&self, xs: &Tensor) -> Result<(Tensor, Option<Tensor>)> {
        let time = xs.dim(1)?;
        if time < self.input_len {
            candle_core::bail!(
                "sequence axis has {time} steps, source window needs {}",
                self.input_len
            );
        }
        let source = xs.narrow(1, 0, self.input_len)?;
        let target = if time > self.input_len {
            Some(xs.narrow(1, self.input_len, time - self.input_len)?)
        } else {
            None
        };
        Ok((source, target))
    }
}

/// Краткое описание собранной модели.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSummary {
    pub name: String,
    pub cell_type: CellType,
    pub num_rnn_layers: usize,
    pub hidden_dim: usize,
    pub n_features: usize,
    pub normalization: Normalization,
    pub attention_heads: usize,
    pub decode_mode: DecodeMode,
    pub num_parameters: usize,
}

impl ModelSummary {
    pub fn from_config(name: impl Into<String>, config: &ModelConfig) -> Self {
        Self {
            name: name.into(),
            cell_type: config.cell_type,
            num_rnn_layers: config.num_rnn_layers,
            hidden_dim: config.hidden_dim,
            n_features: config.n_features,
            normalization: config.normalization,
            attention_heads: config.narrow_attn_heads,
            decode_mode: config.decode_mode,
            num_parameters: config.num_parameters(),
        }
    }
}

impl fmt::Display for ModelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}x{} {} (features={}, norm={:?}, heads={}, decode={:?}, params={})",
            self.name,
            self.num_rnn_layers,
            self.hidden_dim,
            self.cell_type,
            self.n_features,
            self.normalization,
            self.attention_heads,
            self.decode_mode,
            self.num_parameters
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn test_split_source_and_target() {
        let xs = Tensor::arange(0f32, 24., &Device::Cpu)
            .unwrap()
            .reshape((2, 6, 2))
            .unwrap();
        let window = WindowSpec::new(4, 2);
        let (source, target) = window.split(&xs).unwrap();
        assert_eq!(source.dims(), &[2, 4, 2]);
        let target = target.unwrap();
        assert_eq!(target.dims(), &[2, 2, 2]);

        // первый target-шаг первого батча: элементы 8, 9
        let first: Vec<f32> = target.get(0).unwrap().get(0).unwrap().to_vec1().unwrap();
        assert_eq!(first, vec![8.0, 9.0]);
    }

    #[test]
    fn test_split_without_target() {
        let xs = Tensor::zeros((3, 5, 1), DType::F32, &Device::Cpu).unwrap();
        let (source, target) = WindowSpec::new(5, 5).split(&xs).unwrap();
        assert_eq!(source.dims(), &[3, 5, 1]);
        assert!(target.is_none());
    }

    #[test]
    fn test_split_rejects_short_input() {
        let xs = Tensor::zeros((1, 3, 1), DType::F32, &Device::Cpu).unwrap();
        assert!(WindowSpec::new(4, 4).split(&xs).is_err());
    }

    #[test]
    fn test_summary_display() {
        let config = ModelConfig::default();
        let summary = ModelSummary::from_config("seq2seq", &config);
        let text = summary.to_string();
        assert!(text.starts_with("seq2seq: 1x32 gru"));
        assert_eq!(summary.num_parameters, config.num_parameters());
    }
}

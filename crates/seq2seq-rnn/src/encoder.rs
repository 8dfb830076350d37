//! Рекуррентный энкодер.

use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;
use forecast_core::{CellType, ModelConfig};
use tracing::debug;

use crate::stack::RecurrentStack;

/// Encoder output passed on to the decoder.
#[derive(Debug, Clone)]
pub struct EncoderOutput {
    /// Output of the last layer for every step: [batch, seq, hidden].
    pub hidden_seq: Tensor,
    /// Final cell state [1, batch, hidden]; `None` for GRU.
    pub cell_state: Option<Tensor>,
}

/// Stacked GRU/LSTM encoder over the source window.
///
/// Weights live under `encoder.*`: `basic_rnn`, `rnns.{i}` and the shared
/// normalizers.
#[derive(Debug, Clone)]
pub struct Encoder {
    n_features: usize,
    stack: RecurrentStack,
}

impl Encoder {
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        let stack = RecurrentStack::new(config.n_features, config, vb)?;
        debug!(
            "Encoder: {} x {} {}, features={}",
            stack.num_layers(),
            config.hidden_dim,
            config.cell_type,
            config.n_features
        );
        Ok(Self {
            n_features: config.n_features,
            stack,
        })
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn hidden_dim(&self) -> usize {
        self.stack.hidden_dim()
    }

    pub fn cell_type(&self) -> CellType {
        self.stack.cell_type()
    }

    pub fn stack(&self) -> &RecurrentStack {
        &self.stack
    }

    /// [batch, seq, n_features] → hidden sequence and final cell state.
    pub fn forward_t(&self, xs: &Tensor, train: bool) -> Result<EncoderOutput> {
        let (hidden_seq, state) = self.stack.forward_t(xs, None, train)?;
        Ok(EncoderOutput {
            hidden_seq,
            cell_state: state.cell,
        })
    }

    pub fn forward(&self, xs: &Tensor) -> Result<EncoderOutput> {
        self.forward_t(xs, false)
    }
}

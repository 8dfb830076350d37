//! Рекуррентный декодер с опциональным attention-мостом.
//!
//! Весовые ключи (`decoder.*`):
//! - `basic_rnn`, `rnns.{i}`, `{out,hidden,cell}_normalization` — как у энкодера
//! - `linear_keys`, `linear_values`: [hidden, hidden] — проекции памяти энкодера
//! - `attn.in_proj_weight`, `attn.out_proj` — multi-head attention
//! - `regression`: [n_features, hidden] или [n_features, 2*hidden] с attention

use candle_core::{Result, Tensor, D};
use candle_nn::{linear, Linear, Module, VarBuilder};
use forecast_core::{CellType, ModelConfig};
use tracing::debug;

use crate::attention::{AttentionMemory, MultiHeadAttention};
use crate::rnn::RecurrentState;
use crate::stack::RecurrentStack;

/// Attention bridge: key/value projections plus the attention itself.
#[derive(Debug, Clone)]
struct AttentionBridge {
    linear_keys: Linear,
    linear_values: Linear,
    attn: MultiHeadAttention,
}

impl AttentionBridge {
    fn new(hidden_dim: usize, num_heads: usize, vb: &VarBuilder) -> Result<Self> {
        Ok(Self {
            linear_keys: linear(hidden_dim, hidden_dim, vb.pp("linear_keys"))?,
            linear_values: linear(hidden_dim, hidden_dim, vb.pp("linear_values"))?,
            attn: MultiHeadAttention::new(hidden_dim, num_heads, vb.pp("attn"))?,
        })
    }

    fn memory(&self, hidden_seq: &Tensor) -> Result<AttentionMemory> {
        Ok(AttentionMemory {
            keys: self.linear_keys.forward(hidden_seq)?,
            values: self.linear_values.forward(hidden_seq)?,
        })
    }
}

/// Decoder state seeded by [`Decoder::init_hidden`].
///
/// Carries the recurrent memory between successive `forward_t` calls and the
/// attention keys/values of the current encoder pass.
#[derive(Debug, Clone)]
pub struct DecoderState {
    recurrent: RecurrentState,
    memory: Option<AttentionMemory>,
}

impl DecoderState {
    /// Hidden state [1, batch, hidden].
    pub fn hidden(&self) -> &Tensor {
        &self.recurrent.hidden
    }

    /// Cell state [1, batch, hidden]; `None` for GRU.
    pub fn cell(&self) -> Option<&Tensor> {
        self.recurrent.cell.as_ref()
    }

    pub fn memory(&self) -> Option<&AttentionMemory> {
        self.memory.as_ref()
    }
}

#[derive(Debug, Clone)]
pub struct Decoder {
    n_features: usize,
    hidden_dim: usize,
    stack: RecurrentStack,
    attention: Option<AttentionBridge>,
    regression: Linear,
}

impl Decoder {
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        let hidden_dim = config.hidden_dim;
        let stack = RecurrentStack::new(config.n_features, config, vb.clone())?;

        let attention = if config.attention_enabled() {
            Some(AttentionBridge::new(hidden_dim, config.narrow_attn_heads, &vb)?)
        } else {
            None
        };

        let regression_in = if attention.is_some() { 2 * hidden_dim } else { hidden_dim };
        let regression = linear(regression_in, config.n_features, vb.pp("regression"))?;

        debug!(
            "Decoder: {} x {} {}, attention heads={}",
            stack.num_layers(),
            hidden_dim,
            config.cell_type,
            config.narrow_attn_heads
        );

        Ok(Self {
            n_features: config.n_features,
            hidden_dim,
            stack,
            attention,
            regression,
        })
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn cell_type(&self) -> CellType {
        self.stack.cell_type()
    }

    pub fn has_attention(&self) -> bool {
        self.attention.is_some()
    }

    pub fn stack(&self) -> &RecurrentStack {
        &self.stack
    }

    /// Seed the decoder from the encoder.
    ///
    /// * `hidden_seq` — encoder output [batch, src_len, hidden]; the last step
    ///   becomes the initial hidden state [1, batch, hidden].
    /// * `cell_state` — encoder cell state. LSTM decoders start from zeros
    ///   when it is missing; GRU decoders ignore it.
    pub fn init_hidden(
        &self,
        hidden_seq: &Tensor,
        cell_state: Option<&Tensor>,
    ) -> Result<DecoderState> {
        let (_, src_len, hidden_dim) = hidden_seq.dims3()?;
        if hidden_dim != self.hidden_dim {
            candle_core::bail!(
                "encoder hidden size {hidden_dim} does not match decoder hidden size {}",
                self.hidden_dim
            );
        }
        if src_len == 0 {
            candle_core::bail!("empty encoder hidden sequence");
        }

        // Нужен только последний шаг: [batch, 1, hidden] → [1, batch, hidden]
        let hidden = hidden_seq
            .narrow(1, src_len - 1, 1)?
            .permute((1, 0, 2))?
            .contiguous()?;

        let cell = if self.cell_type().has_cell_state() {
            Some(match cell_state {
                Some(cell) => cell.clone(),
                None => hidden.zeros_like()?,
            })
        } else {
            None
        };

        let memory = self
            .attention
            .as_ref()
            .map(|bridge| bridge.memory(hidden_seq))
            .transpose()?;

        Ok(DecoderState {
            recurrent: RecurrentState { hidden, cell },
            memory,
        })
    }

    /// [batch, seq, n_features] → predictions [batch, seq, n_features].
    ///
    /// Updates `state` with the final recurrent memory.
    pub fn forward_t(&self, xs: &Tensor, state: &mut DecoderState, train: bool) -> Result<Tensor> {
        let (output, recurrent) = self.stack.forward_t(xs, Some(&state.recurrent), train)?;
        state.recurrent = recurrent;

        let features = match (&self.attention, &state.memory) {
            (Some(bridge), Some(memory)) => {
                let context = bridge.attn.forward(&output, &memory.keys, &memory.values)?;
                Tensor::cat(&[&context, &output], D::Minus1)?
            }
            (Some(_), None) => candle_core::bail!("decoder state has no attention memory"),
            (None, _) => output,
        };

        self.regression.forward(&features)
    }

    pub fn forward(&self, xs: &Tensor, state: &mut DecoderState) -> Result<Tensor> {
        self.forward_t(xs, state, false)
    }
}

//! Нормализация выходов и состояний рекуррентного стека.
//!
//! BatchNorm ожидает каналы на оси 1, поэтому тензоры переставляются
//! вокруг неё и после нормализации возвращаются в исходный порядок осей:
//! - последовательность: [batch, seq, hidden] → [batch, hidden, seq]
//! - состояние: [1, batch, hidden] → [batch, hidden, 1]
//!
//! LayerNorm работает по последней оси и перестановок не требует.

use candle_core::{Module, ModuleT, Result, Tensor};
use candle_nn::{BatchNorm, BatchNormConfig, LayerNorm, LayerNormConfig, VarBuilder};
use forecast_core::{CellType, Normalization};

use crate::rnn::RecurrentState;

type Axes = (usize, usize, usize);

/// [batch, seq, hidden] → [batch, hidden, seq]
pub const SEQ_TO_CHANNELS: Axes = (0, 2, 1);
/// [batch, hidden, seq] → [batch, seq, hidden]
pub const SEQ_FROM_CHANNELS: Axes = (0, 2, 1);
/// [1, batch, hidden] → [batch, hidden, 1]
pub const STATE_TO_CHANNELS: Axes = (1, 2, 0);
/// [batch, hidden, 1] → [1, batch, hidden]
pub const STATE_FROM_CHANNELS: Axes = (2, 0, 1);

/// Один слой нормализации.
#[derive(Debug, Clone)]
pub enum Norm {
    Batch(BatchNorm),
    Layer(LayerNorm),
}

impl Norm {
    /// BatchNorm1d: `weight`, `bias`, `running_mean`, `running_var`.
    pub fn batch(size: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        let config = BatchNormConfig {
            eps,
            ..Default::default()
        };
        Ok(Self::Batch(candle_nn::batch_norm(size, config, vb)?))
    }

    /// LayerNorm: `weight`, `bias`.
    pub fn layer(size: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        let config = LayerNormConfig {
            eps,
            ..Default::default()
        };
        Ok(Self::Layer(candle_nn::layer_norm(size, config, vb)?))
    }

    fn normalize(&self, xs: &Tensor, to: Axes, from: Axes, train: bool) -> Result<Tensor> {
        match self {
            Self::Batch(bn) => {
                let xs = xs.permute(to)?.contiguous()?;
                let out = bn.forward_t(&xs, train)?;
                out.permute(from)?.contiguous()
            }
            Self::Layer(ln) => ln.forward(xs),
        }
    }

    /// Normalize a batch-first sequence [batch, seq, hidden].
    pub fn forward_sequence(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        self.normalize(xs, SEQ_TO_CHANNELS, SEQ_FROM_CHANNELS, train)
    }

    /// Normalize a recurrent state [1, batch, hidden].
    pub fn forward_state(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        self.normalize(xs, STATE_TO_CHANNELS, STATE_FROM_CHANNELS, train)
    }
}

/// Normalizers shared by every layer of a recurrent stack.
///
/// Weight names: `out_normalization`, `hidden_normalization` and, for LSTM,
/// `cell_normalization`.
#[derive(Debug, Clone)]
pub struct Normalizers {
    output: Norm,
    hidden: Norm,
    cell: Option<Norm>,
}

impl Normalizers {
    /// `None` when `kind` is [`Normalization::None`].
    pub fn new(
        kind: Normalization,
        cell_type: CellType,
        size: usize,
        eps: f64,
        vb: VarBuilder,
    ) -> Result<Option<Self>> {
        let build: fn(usize, f64, VarBuilder) -> Result<Norm> = match kind {
            Normalization::None => return Ok(None),
            Normalization::Batch => Norm::batch,
            Normalization::Layer => Norm::layer,
        };

        let output = build(size, eps, vb.pp("out_normalization"))?;
        let hidden = build(size, eps, vb.pp("hidden_normalization"))?;
        let cell = if cell_type.has_cell_state() {
            Some(build(size, eps, vb.pp("cell_normalization"))?)
        } else {
            None
        };

        Ok(Some(Self {
            output,
            hidden,
            cell,
        }))
    }

    /// Normalize the layer output and its final state.
    pub fn forward_t(
        &self,
        output: &Tensor,
        state: &RecurrentState,
        train: bool,
    ) -> Result<(Tensor, RecurrentState)> {
        let output = self.output.forward_sequence(output, train)?;
        let hidden = self.hidden.forward_state(&state.hidden, train)?;
        let cell = match (&state.cell, &self.cell) {
            (Some(cell), Some(norm)) => Some(norm.forward_state(cell, train)?),
            (cell, _) => cell.clone(),
        };
        Ok((output, RecurrentState { hidden, cell }))
    }
}

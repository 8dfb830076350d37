//! Стек рекуррентных слоёв, общий для энкодера и декодера.
//!
//! Структура весов:
//! - `basic_rnn`: первый слой, input_dim → hidden_dim
//! - `rnns.{i}`: дополнительные слои, hidden_dim → hidden_dim
//! - `{out,hidden,cell}_normalization`: общие для всех слоёв

use candle_core::{Result, Tensor};
use candle_nn::{Dropout, VarBuilder};
use forecast_core::{CellType, ModelConfig};

use crate::norm::Normalizers;
use crate::rnn::{RecurrentLayer, RecurrentState};

#[derive(Debug, Clone)]
pub struct RecurrentStack {
    cell_type: CellType,
    hidden_dim: usize,
    basic_rnn: RecurrentLayer,
    rnns: Vec<RecurrentLayer>,
    normalizers: Option<Normalizers>,
    dropout: Option<Dropout>,
}

impl RecurrentStack {
    pub fn new(input_dim: usize, config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        let hidden_dim = config.hidden_dim;
        let cell_type = config.cell_type;

        let basic_rnn = RecurrentLayer::new(cell_type, input_dim, hidden_dim, vb.pp("basic_rnn"))?;

        let rnns_vb = vb.pp("rnns");
        let rnns = (0..config.num_rnn_layers.saturating_sub(1))
            .map(|i| RecurrentLayer::new(cell_type, hidden_dim, hidden_dim, rnns_vb.pp(i)))
            .collect::<Result<Vec<_>>>()?;

        let normalizers = Normalizers::new(
            config.normalization,
            cell_type,
            hidden_dim,
            config.norm_eps,
            vb.clone(),
        )?;

        let dropout = config
            .dropout_active()
            .then(|| Dropout::new(config.dropout));

        Ok(Self {
            cell_type,
            hidden_dim,
            basic_rnn,
            rnns,
            normalizers,
            dropout,
        })
    }

    pub fn cell_type(&self) -> CellType {
        self.cell_type
    }

    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    /// Total number of recurrent layers, the first one included.
    pub fn num_layers(&self) -> usize {
        1 + self.rnns.len()
    }

    /// Layers stacked on top of `basic_rnn`.
    pub fn stacked_layers(&self) -> &[RecurrentLayer] {
        &self.rnns
    }

    pub fn has_normalization(&self) -> bool {
        self.normalizers.is_some()
    }

    pub fn has_dropout(&self) -> bool {
        self.dropout.is_some()
    }

    /// Normalization and (train only) dropout after one layer.
    fn post_layer(
        &self,
        output: Tensor,
        state: RecurrentState,
        train: bool,
    ) -> Result<(Tensor, RecurrentState)> {
        let (output, state) = match &self.normalizers {
            Some(norms) => norms.forward_t(&output, &state, train)?,
            None => (output, state),
        };

        match &self.dropout {
            Some(dropout) if train => {
                let output = dropout.forward(&output, train)?;
                let state = state.try_map(|t| dropout.forward(t, train))?;
                Ok((output, state))
            }
            _ => Ok((output, state)),
        }
    }

    /// [batch, seq, input_dim] → ([batch, seq, hidden_dim], final state).
    ///
    /// `init` seeds the first layer; each stacked layer starts from the
    /// state left by the layer below it.
    pub fn forward_t(
        &self,
        xs: &Tensor,
        init: Option<&RecurrentState>,
        train: bool,
    ) -> Result<(Tensor, RecurrentState)> {
        let (output, state) = self.basic_rnn.forward(xs, init)?;
        let (mut output, mut state) = self.post_layer(output, state, train)?;

        for rnn in &self.rnns {
            let (next_output, next_state) = rnn.forward(&output, Some(&state))?;
            (output, state) = self.post_layer(next_output, next_state, train)?;
        }

        Ok((output, state))
    }
}

//! Рекуррентные ячейки GRU и LSTM.
//!
//! Раскладка весов совпадает с однослойными `nn.GRU` / `nn.LSTM`:
//! - `weight_ih_l0`: [gates*hidden, input]
//! - `weight_hh_l0`: [gates*hidden, hidden]
//! - `bias_ih_l0`, `bias_hh_l0`: [gates*hidden]
//!
//! Порядок гейтов: LSTM (i, f, g, o), GRU (r, z, n).
//! Вход всегда batch-first: [batch, seq, features].

use candle_core::{DType, Device, Result, Tensor, D};
use candle_nn::{Init, VarBuilder};
use forecast_core::CellType;

/// Uniform(-1/sqrt(H), 1/sqrt(H)), как у рекуррентных слоёв PyTorch.
fn recurrent_init(hidden_size: usize) -> Init {
    let bound = 1.0 / (hidden_size as f64).sqrt();
    Init::Uniform {
        lo: -bound,
        up: bound,
    }
}

/// Input projection for the whole sequence: [batch, seq, input] → [batch, seq, gates].
fn project_input(xs: &Tensor, weight: &Tensor, bias: &Tensor) -> Result<Tensor> {
    let (batch_size, seq_len, input_size) = xs.dims3()?;
    let gate_size = weight.dim(0)?;
    xs.reshape((batch_size * seq_len, input_size))?
        .matmul(&weight.t()?)?
        .broadcast_add(bias)?
        .reshape((batch_size, seq_len, gate_size))
}

/// Recurrent memory of one layer.
///
/// `hidden` is laid out as [1, batch, hidden]; `cell` is present only for LSTM.
#[derive(Debug, Clone)]
pub struct RecurrentState {
    pub hidden: Tensor,
    pub cell: Option<Tensor>,
}

impl RecurrentState {
    /// Нулевое начальное состояние.
    pub fn zeros(
        cell_type: CellType,
        batch_size: usize,
        hidden_size: usize,
        dtype: DType,
        device: &Device,
    ) -> Result<Self> {
        let hidden = Tensor::zeros((1, batch_size, hidden_size), dtype, device)?;
        let cell = if cell_type.has_cell_state() {
            Some(hidden.zeros_like()?)
        } else {
            None
        };
        Ok(Self { hidden, cell })
    }

    /// Apply the same transform to the hidden and the cell state.
    pub fn try_map<F>(&self, mut f: F) -> Result<Self>
    where
        F: FnMut(&Tensor) -> Result<Tensor>,
    {
        let hidden = f(&self.hidden)?;
        let cell = self.cell.as_ref().map(&mut f).transpose()?;
        Ok(Self { hidden, cell })
    }
}

/// Один слой LSTM.
///
/// gates = x @ W_ih^T + b_ih + h @ W_hh^T + b_hh
/// c = sigmoid(f) * c_prev + sigmoid(i) * tanh(g)
/// h = sigmoid(o) * tanh(c)
#[derive(Debug, Clone)]
pub struct LstmLayer {
    weight_ih: Tensor, // [4*hidden, input_size]
    weight_hh: Tensor, // [4*hidden, hidden_size]
    bias_ih: Tensor,   // [4*hidden]
    bias_hh: Tensor,   // [4*hidden]
    input_size: usize,
    hidden_size: usize,
}

impl LstmLayer {
    pub fn new(input_size: usize, hidden_size: usize, vb: VarBuilder) -> Result<Self> {
        let gate_size = 4 * hidden_size;
        let init = recurrent_init(hidden_size);
        let weight_ih = vb.get_with_hints((gate_size, input_size), "weight_ih_l0", init)?;
        let weight_hh = vb.get_with_hints((gate_size, hidden_size), "weight_hh_l0", init)?;
        let bias_ih = vb.get_with_hints(gate_size, "bias_ih_l0", init)?;
        let bias_hh = vb.get_with_hints(gate_size, "bias_hh_l0", init)?;
        Ok(Self {
            weight_ih,
            weight_hh,
            bias_ih,
            bias_hh,
            input_size,
            hidden_size,
        })
    }

    /// Один шаг: (x_proj [batch, 4*hidden], h [batch, hidden], c [batch, hidden]) → (h, c).
    fn step(&self, x_proj: Tensor, h: &Tensor, c: &Tensor) -> Result<(Tensor, Tensor)> {
        let gates = (x_proj
            + h.matmul(&self.weight_hh.t()?)?
                .broadcast_add(&self.bias_hh)?)?;
        let gates = gates.chunk(4, D::Minus1)?;

        let i_gate = candle_nn::ops::sigmoid(&gates[0])?;
        let f_gate = candle_nn::ops::sigmoid(&gates[1])?;
        let g_gate = gates[2].tanh()?;
        let o_gate = candle_nn::ops::sigmoid(&gates[3])?;

        let c_new = ((f_gate * c)? + (i_gate * g_gate)?)?;
        let h_new = (o_gate * c_new.tanh()?)?;
        Ok((h_new, c_new))
    }

    /// Прогон по всей последовательности.
    ///
    /// Returns the output sequence [batch, seq, hidden] and the final state.
    pub fn forward(
        &self,
        xs: &Tensor,
        init: Option<&RecurrentState>,
    ) -> Result<(Tensor, RecurrentState)> {
        let (batch_size, seq_len, _) = xs.dims3()?;
        let (mut h, mut c) = match init {
            Some(state) => {
                let h = state.hidden.squeeze(0)?;
                let c = match &state.cell {
                    Some(c) => c.squeeze(0)?,
                    None => h.zeros_like()?,
                };
                (h, c)
            }
            None => {
                let h = Tensor::zeros((batch_size, self.hidden_size), xs.dtype(), xs.device())?;
                (h.clone(), h)
            }
        };

        let x_proj = project_input(xs, &self.weight_ih, &self.bias_ih)?;
        let mut outputs = Vec::with_capacity(seq_len);
        for t in 0..seq_len {
            let x_t = x_proj.narrow(1, t, 1)?.squeeze(1)?;
            (h, c) = self.step(x_t, &h, &c)?;
            outputs.push(h.clone());
        }

        let output = Tensor::stack(&outputs, 1)?;
        let state = RecurrentState {
            hidden: h.unsqueeze(0)?,
            cell: Some(c.unsqueeze(0)?),
        };
        Ok((output, state))
    }
}

/// Один слой GRU.
///
/// r = sigmoid(W_ir x + b_ir + W_hr h + b_hr)
/// z = sigmoid(W_iz x + b_iz + W_hz h + b_hz)
/// n = tanh(W_in x + b_in + r * (W_hn h + b_hn))
/// h = (1 - z) * n + z * h_prev
#[derive(Debug, Clone)]
pub struct GruLayer {
    weight_ih: Tensor, // [3*hidden, input_size]
    weight_hh: Tensor, // [3*hidden, hidden_size]
    bias_ih: Tensor,   // [3*hidden]
    bias_hh: Tensor,   // [3*hidden]
    input_size: usize,
    hidden_size: usize,
}

impl GruLayer {
    pub fn new(input_size: usize, hidden_size: usize, vb: VarBuilder) -> Result<Self> {
        let gate_size = 3 * hidden_size;
        let init = recurrent_init(hidden_size);
        let weight_ih = vb.get_with_hints((gate_size, input_size), "weight_ih_l0", init)?;
        let weight_hh = vb.get_with_hints((gate_size, hidden_size), "weight_hh_l0", init)?;
        let bias_ih = vb.get_with_hints(gate_size, "bias_ih_l0", init)?;
        let bias_hh = vb.get_with_hints(gate_size, "bias_hh_l0", init)?;
        Ok(Self {
            weight_ih,
            weight_hh,
            bias_ih,
            bias_hh,
            input_size,
            hidden_size,
        })
    }

    fn step(&self, x_proj: &Tensor, h: &Tensor) -> Result<Tensor> {
        let h_proj = h
            .matmul(&self.weight_hh.t()?)?
            .broadcast_add(&self.bias_hh)?;
        let gi = x_proj.chunk(3, D::Minus1)?;
        let gh = h_proj.chunk(3, D::Minus1)?;

        let r = candle_nn::ops::sigmoid(&(&gi[0] + &gh[0])?)?;
        let z = candle_nn::ops::sigmoid(&(&gi[1] + &gh[1])?)?;
        let n = (&gi[2] + (r * &gh[2])?)?.tanh()?;

        // (1 - z) * n + z * h == n + z * (h - n)
        &n + (z * (h - &n)?)?
    }

    pub fn forward(
        &self,
        xs: &Tensor,
        init: Option<&RecurrentState>,
    ) -> Result<(Tensor, RecurrentState)> {
        let (batch_size, seq_len, _) = xs.dims3()?;
        let mut h = match init {
            Some(state) => state.hidden.squeeze(0)?,
            None => Tensor::zeros((batch_size, self.hidden_size), xs.dtype(), xs.device())?,
        };

        let x_proj = project_input(xs, &self.weight_ih, &self.bias_ih)?;
        let mut outputs = Vec::with_capacity(seq_len);
        for t in 0..seq_len {
            let x_t = x_proj.narrow(1, t, 1)?.squeeze(1)?;
            h = self.step(&x_t, &h)?;
            outputs.push(h.clone());
        }

        let output = Tensor::stack(&outputs, 1)?;
        let state = RecurrentState {
            hidden: h.unsqueeze(0)?,
            cell: None,
        };
        Ok((output, state))
    }
}

/// Рекуррентный слой выбранного типа.
#[derive(Debug, Clone)]
pub enum RecurrentLayer {
    Gru(GruLayer),
    Lstm(LstmLayer),
}

impl RecurrentLayer {
    pub fn new(
        cell_type: CellType,
        input_size: usize,
        hidden_size: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(match cell_type {
            CellType::Gru => Self::Gru(GruLayer::new(input_size, hidden_size, vb)?),
            CellType::Lstm => Self::Lstm(LstmLayer::new(input_size, hidden_size, vb)?),
        })
    }

    pub fn cell_type(&self) -> CellType {
        match self {
            Self::Gru(_) => CellType::Gru,
            Self::Lstm(_) => CellType::Lstm,
        }
    }

    pub fn input_size(&self) -> usize {
        match self {
            Self::Gru(l) => l.input_size,
            Self::Lstm(l) => l.input_size,
        }
    }

    pub fn hidden_size(&self) -> usize {
        match self {
            Self::Gru(l) => l.hidden_size,
            Self::Lstm(l) => l.hidden_size,
        }
    }

    /// [batch, seq, input] → ([batch, seq, hidden], final state).
    ///
    /// Without `init` the layer starts from zeros.
    pub fn forward(
        &self,
        xs: &Tensor,
        init: Option<&RecurrentState>,
    ) -> Result<(Tensor, RecurrentState)> {
        match self {
            Self::Gru(l) => l.forward(xs, init),
            Self::Lstm(l) => l.forward(xs, init),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarMap;

    fn zero_vb() -> VarBuilder<'static> {
        VarBuilder::zeros(DType::F32, &Device::Cpu)
    }

    #[test]
    fn test_gru_zero_weights_halves_hidden() {
        // r = z = 0.5, n = 0 → h' = 0.5 * h
        let layer = GruLayer::new(1, 3, zero_vb()).unwrap();
        let xs = Tensor::zeros((2, 2, 1), DType::F32, &Device::Cpu).unwrap();
        let init = RecurrentState {
            hidden: Tensor::ones((1, 2, 3), DType::F32, &Device::Cpu).unwrap(),
            cell: None,
        };

        let (output, state) = layer.forward(&xs, Some(&init)).unwrap();
        assert_eq!(output.dims(), &[2, 2, 3]);
        assert!(state.cell.is_none());

        let steps: Vec<Vec<f32>> = output.get(0).unwrap().to_vec2().unwrap();
        assert_eq!(steps[0], vec![0.5; 3]);
        assert_eq!(steps[1], vec![0.25; 3]);

        let hidden: Vec<f32> = state.hidden.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(hidden, vec![0.25; 6]);
    }

    #[test]
    fn test_lstm_zero_weights_halves_cell() {
        // i = f = o = 0.5, g = 0 → c' = 0.5 * c, h' = 0.5 * tanh(c')
        let layer = LstmLayer::new(1, 2, zero_vb()).unwrap();
        let xs = Tensor::zeros((1, 1, 1), DType::F32, &Device::Cpu).unwrap();
        let init = RecurrentState {
            hidden: Tensor::zeros((1, 1, 2), DType::F32, &Device::Cpu).unwrap(),
            cell: Some(Tensor::ones((1, 1, 2), DType::F32, &Device::Cpu).unwrap()),
        };

        let (_, state) = layer.forward(&xs, Some(&init)).unwrap();
        let cell: Vec<f32> = state.cell.unwrap().flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(cell, vec![0.5, 0.5]);

        let expected = 0.5 * 0.5f32.tanh();
        let hidden: Vec<f32> = state.hidden.flatten_all().unwrap().to_vec1().unwrap();
        for v in hidden {
            assert!((v - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_recurrent_layer_shapes() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let xs = Tensor::randn(0f32, 1., (4, 6, 3), &Device::Cpu).unwrap();

        for cell_type in [CellType::Gru, CellType::Lstm] {
            let layer = RecurrentLayer::new(cell_type, 3, 5, vb.pp(cell_type.to_string())).unwrap();
            assert_eq!(layer.cell_type(), cell_type);
            assert_eq!(layer.input_size(), 3);

            let (output, state) = layer.forward(&xs, None).unwrap();
            assert_eq!(output.dims(), &[4, 6, 5]);
            assert_eq!(state.hidden.dims(), &[1, 4, 5]);
            assert_eq!(state.cell.is_some(), cell_type.has_cell_state());

            // последний выход совпадает с финальным скрытым состоянием
            let last = output.narrow(1, 5, 1).unwrap().squeeze(1).unwrap();
            let diff = (last - state.hidden.squeeze(0).unwrap())
                .unwrap()
                .abs()
                .unwrap()
                .sum_all()
                .unwrap()
                .to_scalar::<f32>()
                .unwrap();
            assert_eq!(diff, 0.0);
        }
    }

    #[test]
    fn test_zero_state_layout() {
        let state = RecurrentState::zeros(CellType::Lstm, 3, 4, DType::F32, &Device::Cpu).unwrap();
        assert_eq!(state.hidden.dims(), &[1, 3, 4]);
        assert_eq!(state.cell.as_ref().unwrap().dims(), &[1, 3, 4]);

        let gru = RecurrentState::zeros(CellType::Gru, 3, 4, DType::F32, &Device::Cpu).unwrap();
        assert!(gru.cell.is_none());

        let doubled = state.try_map(|t| t.affine(2.0, 1.0)).unwrap();
        let cell: Vec<f32> = doubled.cell.unwrap().flatten_all().unwrap().to_vec1().unwrap();
        assert!(cell.iter().all(|&v| v == 1.0));
    }
}

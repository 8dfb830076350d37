//! Конфигурация encoder–decoder модели.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

use crate::error::{ForecastError, ForecastResult};
use crate::types::WindowSpec;

/// Тип рекуррентной ячейки.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    /// Gated recurrent unit: только скрытое состояние.
    #[default]
    #[serde(alias = "GRU")]
    Gru,
    /// Long short-term memory: скрытое состояние + состояние ячейки.
    #[serde(alias = "LSTM")]
    Lstm,
}

impl CellType {
    /// Number of stacked gates in the packed weight matrices.
    pub fn num_gates(self) -> usize {
        match self {
            CellType::Gru => 3,
            CellType::Lstm => 4,
        }
    }

    /// Whether the cell carries a separate cell state next to the hidden state.
    pub fn has_cell_state(self) -> bool {
        matches!(self, CellType::Lstm)
    }
}

impl fmt::Display for CellType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellType::Gru => write!(f, "gru"),
            CellType::Lstm => write!(f, "lstm"),
        }
    }
}

impl FromStr for CellType {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gru" => Ok(CellType::Gru),
            "lstm" => Ok(CellType::Lstm),
            other => Err(ForecastError::Config(format!(
                "unknown recurrent cell type '{other}' (expected gru or lstm)"
            ))),
        }
    }
}

/// Нормализация, применяемая после каждого рекуррентного слоя.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Normalization {
    #[default]
    None,
    /// Batch normalization over the hidden channel axis.
    #[serde(alias = "BatchNormalization")]
    Batch,
    /// Layer normalization over the last (hidden) axis.
    #[serde(alias = "LayerNormalization")]
    Layer,
}

impl FromStr for Normalization {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Normalization::None),
            "batch" | "batchnormalization" => Ok(Normalization::Batch),
            "layer" | "layernormalization" => Ok(Normalization::Layer),
            other => Err(ForecastError::Config(format!(
                "unknown normalization '{other}' (expected none, batch or layer)"
            ))),
        }
    }
}

/// Как декодер порождает прогноз.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeMode {
    /// The decoder consumes the whole source window in one pass.
    #[default]
    SingleShot,
    /// Step-by-step rollout over the target window with optional teacher forcing.
    Autoregressive,
}

fn default_norm_eps() -> f64 {
    1e-5
}

/// Configuration of the sequence-to-sequence forecaster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Number of features per timestep (input and output).
    pub n_features: usize,

    /// Hidden size shared by encoder, decoder and attention.
    pub hidden_dim: usize,

    /// Recurrent cell type.
    #[serde(default)]
    pub cell_type: CellType,

    /// Number of recurrent layers per stack (>= 1).
    pub num_rnn_layers: usize,

    /// Length of both the source and the target window.
    pub seq_len: usize,

    /// Probability of feeding the ground truth step (autoregressive mode only).
    #[serde(default)]
    pub teacher_forcing_prob: f64,

    /// Dropout probability between layers (0.0 disables).
    #[serde(default)]
    pub dropout: f32,

    /// Normalization after each recurrent layer.
    #[serde(default)]
    pub normalization: Normalization,

    /// Number of attention heads; 0 disables the attention bridge.
    #[serde(default)]
    pub narrow_attn_heads: usize,

    /// Decoding strategy.
    #[serde(default)]
    pub decode_mode: DecodeMode,

    /// Epsilon for batch/layer normalization.
    #[serde(default = "default_norm_eps")]
    pub norm_eps: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            n_features: 1,
            hidden_dim: 32,
            cell_type: CellType::Gru,
            num_rnn_layers: 1,
            seq_len: 10,
            teacher_forcing_prob: 0.5,
            dropout: 0.0,
            normalization: Normalization::None,
            narrow_attn_heads: 0,
            decode_mode: DecodeMode::SingleShot,
            norm_eps: default_norm_eps(),
        }
    }
}

impl ModelConfig {
    /// Load and validate configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> ForecastResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        debug!("Конфиг загружен из {}: {:?}", path.as_ref().display(), config);
        Ok(config)
    }

    /// Whether the decoder has the attention bridge.
    pub fn attention_enabled(&self) -> bool {
        self.narrow_attn_heads > 0
    }

    /// Per-head slice of the hidden dimension (`None` without attention).
    pub fn head_dim(&self) -> Option<usize> {
        self.attention_enabled()
            .then(|| self.hidden_dim / self.narrow_attn_heads)
    }

    /// Source/target split of the model input.
    pub fn window(&self) -> WindowSpec {
        WindowSpec::new(self.seq_len, self.seq_len)
    }

    /// Check option ranges. Construction of a model calls this first.
    pub fn validate(&self) -> ForecastResult<()> {
        if self.attention_enabled() && self.hidden_dim % self.narrow_attn_heads != 0 {
            return Err(ForecastError::Config(format!(
                "hidden_dim ({}) must be a multiple of narrow_attn_heads ({})",
                self.hidden_dim, self.narrow_attn_heads
            )));
        }
        if self.n_features == 0 {
            return Err(ForecastError::Config("n_features must be > 0".into()));
        }
        if self.hidden_dim == 0 {
            return Err(ForecastError::Config("hidden_dim must be > 0".into()));
        }
        if self.num_rnn_layers == 0 {
            return Err(ForecastError::Config("num_rnn_layers must be >= 1".into()));
        }
        if self.seq_len == 0 {
            return Err(ForecastError::Config("seq_len must be > 0".into()));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(ForecastError::Config(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        if !(0.0..=1.0).contains(&self.teacher_forcing_prob) {
            return Err(ForecastError::Config(format!(
                "teacher_forcing_prob must be in [0, 1], got {}",
                self.teacher_forcing_prob
            )));
        }
        Ok(())
    }

    /// Whether dropout modules are created at all.
    ///
    /// Single-layer stacks never drop, whatever `dropout` says.
    pub fn dropout_active(&self) -> bool {
        self.num_rnn_layers > 1 && self.dropout > 0.0
    }

    /// Number of trainable values of one recurrent stack.
    fn stack_parameters(&self) -> usize {
        let h = self.hidden_dim;
        let gates = self.cell_type.num_gates();
        let layer = |input: usize| gates * h * (input + h + 2);
        let rnns = layer(self.n_features) + self.num_rnn_layers.saturating_sub(1) * layer(h);

        let norms = match self.normalization {
            Normalization::None => 0,
            // weight + bias for output, hidden and (LSTM) cell normalizers
            _ => {
                let count = if self.cell_type.has_cell_state() { 3 } else { 2 };
                count * 2 * h
            }
        };
        rnns + norms
    }

    /// Total number of trainable values (running statistics excluded).
    pub fn num_parameters(&self) -> usize {
        let h = self.hidden_dim;
        let encoder = self.stack_parameters();

        let attention = if self.attention_enabled() {
            // linear_keys + linear_values + in_proj + out_proj
            2 * (h * h + h) + (3 * h * h + 3 * h) + (h * h + h)
        } else {
            0
        };
        let regression_in = if self.attention_enabled() { 2 * h } else { h };
        let regression = regression_in * self.n_features + self.n_features;

        encoder + self.stack_parameters() + attention + regression
    }
}

//! Унифицированный trait для прогнозирующих моделей.

use candle_core::Tensor;

use crate::error::ForecastResult;
use crate::types::{ModelSummary, WindowSpec};

/// Common interface of sequence forecasters.
///
/// # Пример
/// ```ignore
/// let mut model = EncoderDecoder::from_safetensors(config, "model.safetensors", &device)?;
/// let prediction = model.forecast(&window)?; // [batch, target_len, features]
/// ```
pub trait Forecaster: Send {
    /// Model name used in logs and summaries.
    fn name(&self) -> &str;

    /// Source/target layout expected by [`Self::forward_t`].
    fn window(&self) -> WindowSpec;

    /// Number of features per timestep.
    fn n_features(&self) -> usize;

    /// Short description of the model.
    fn summary(&self) -> ModelSummary;

    /// Forward pass over `[batch, input_len + target_len, features]`.
    ///
    /// `train` enables dropout, batch statistics and teacher forcing.
    fn forward_t(&mut self, xs: &Tensor, train: bool) -> ForecastResult<Tensor>;

    /// Evaluation-mode forward pass.
    fn forecast(&mut self, xs: &Tensor) -> ForecastResult<Tensor> {
        self.forward_t(xs, false)
    }
}

//! Encoder–decoder модель целиком.

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;
use tracing::{debug, info};

use forecast_core::{
    DecodeMode, ForecastError, ForecastResult, Forecaster, ModelConfig, ModelSummary, WindowSpec,
};

use crate::decoder::{Decoder, DecoderState};
use crate::encoder::Encoder;

const MODEL_NAME: &str = "seq2seq-rnn";

/// Sequence-to-sequence forecaster.
///
/// 1. Split `[batch, input_len + target_len, features]` into source and target
/// 2. Encode the source window
/// 3. Seed the decoder from the encoder and decode
///
/// Single-shot mode (default) feeds the source window to the decoder in one
/// pass. Autoregressive mode rolls the decoder out step by step over the target
/// window, with teacher forcing during training.
#[derive(Debug)]
pub struct EncoderDecoder {
    config: ModelConfig,
    window: WindowSpec,
    encoder: Encoder,
    decoder: Decoder,
    rng: StdRng,
}

impl EncoderDecoder {
    /// Build the model from a VarBuilder (`encoder.*`, `decoder.*`).
    pub fn new(config: ModelConfig, vb: VarBuilder) -> ForecastResult<Self> {
        config.validate()?;

        let encoder = Encoder::new(&config, vb.pp("encoder"))?;
        let decoder = Decoder::new(&config, vb.pp("decoder"))?;

        info!(
            "EncoderDecoder: {} x {} {}, features={}, seq_len={}, norm={:?}, heads={}, decode={:?}",
            config.num_rnn_layers,
            config.hidden_dim,
            config.cell_type,
            config.n_features,
            config.seq_len,
            config.normalization,
            config.narrow_attn_heads,
            config.decode_mode
        );

        Ok(Self {
            window: config.window(),
            config,
            encoder,
            decoder,
            rng: StdRng::from_entropy(),
        })
    }

    /// Fresh trainable parameters registered in `varmap`.
    pub fn from_varmap(
        config: ModelConfig,
        varmap: &VarMap,
        dtype: DType,
        device: &Device,
    ) -> ForecastResult<Self> {
        let vb = VarBuilder::from_varmap(varmap, dtype, device);
        Self::new(config, vb)
    }

    /// Load weights from a safetensors file.
    pub fn from_safetensors(
        config: ModelConfig,
        path: impl AsRef<Path>,
        device: &Device,
    ) -> ForecastResult<Self> {
        let paths = [path.as_ref()];
        Self::from_safetensors_files(config, &paths, device)
    }

    /// Load weights from one or several safetensors files (шарды).
    pub fn from_safetensors_files(
        config: ModelConfig,
        paths: &[&Path],
        device: &Device,
    ) -> ForecastResult<Self> {
        for path in paths {
            if !path.exists() {
                return Err(ForecastError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("weights not found: {}", path.display()),
                )));
            }
        }
        info!("Загрузка весов из {:?}", paths);

        // SAFETY: файлы весов не изменяются, пока модель жива.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(paths, DType::F32, device)? };
        Self::new(config, vb)
    }

    /// Deterministic teacher-forcing draws.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    fn check_input(&self, xs: &Tensor) -> ForecastResult<()> {
        let dims = xs.dims();
        let [_, time, features] = dims else {
            return Err(ForecastError::Shape(format!(
                "expected [batch, time, features], got {dims:?}"
            )));
        };
        if *features != self.config.n_features {
            return Err(ForecastError::Shape(format!(
                "expected {} features, got {features}",
                self.config.n_features
            )));
        }
        if *time < self.window.input_len {
            return Err(ForecastError::Shape(format!(
                "sequence axis has {time} steps, source window needs {}",
                self.window.input_len
            )));
        }
        Ok(())
    }

    /// Forward pass: [batch, input_len + target_len, features] → [batch, L, features].
    pub fn forward_t(&mut self, xs: &Tensor, train: bool) -> ForecastResult<Tensor> {
        self.check_input(xs)?;
        let (source, target) = self.window.split(xs)?;

        let encoded = self.encoder.forward_t(&source, train)?;
        let mut state = self
            .decoder
            .init_hidden(&encoded.hidden_seq, encoded.cell_state.as_ref())?;

        let output = match self.config.decode_mode {
            DecodeMode::SingleShot => self.decoder.forward_t(&source, &mut state, train)?,
            DecodeMode::Autoregressive => {
                self.rollout(&source, target.as_ref(), &mut state, train)?
            }
        };

        if forecast_core::debug::enabled() {
            let mean = forecast_core::debug::mean_f32(&output)?;
            debug!(
                "EncoderDecoder: input={:?}, output={:?}, mean={:.6}",
                xs.dims(),
                output.dims(),
                mean
            );
        }

        Ok(output)
    }

    /// Evaluation-mode forward pass.
    pub fn forward(&mut self, xs: &Tensor) -> ForecastResult<Tensor> {
        self.forward_t(xs, false)
    }

    /// Пошаговая генерация target_len шагов.
    ///
    /// The last source step is the first decoder input. Each next input is the
    /// ground-truth step with probability `teacher_forcing_prob` (training
    /// only), otherwise the previous prediction.
    fn rollout(
        &mut self,
        source: &Tensor,
        target: Option<&Tensor>,
        state: &mut DecoderState,
        train: bool,
    ) -> ForecastResult<Tensor> {
        let target_len = self.window.target_len;
        let prob = if train { self.config.teacher_forcing_prob } else { 0.0 };
        let available = target.map(|t| t.dim(1)).transpose()?.unwrap_or(0);

        let mut dec_input = source.narrow(1, self.window.input_len - 1, 1)?;
        let mut outputs = Vec::with_capacity(target_len);

        for i in 0..target_len {
            // [batch, 1, features]
            let out = self.decoder.forward_t(&dec_input, state, train)?;
            outputs.push(out.clone());

            let teacher_forced = i < available && self.rng.gen::<f64>() < prob;
            dec_input = match target {
                Some(target) if teacher_forced => target.narrow(1, i, 1)?,
                _ => out,
            };
        }

        Ok(Tensor::cat(&outputs, 1)?)
    }
}

impl Forecaster for EncoderDecoder {
    fn name(&self) -> &str {
        MODEL_NAME
    }

    fn window(&self) -> WindowSpec {
        self.window
    }

    fn n_features(&self) -> usize {
        self.config.n_features
    }

    fn summary(&self) -> ModelSummary {
        ModelSummary::from_config(MODEL_NAME, &self.config)
    }

    fn forward_t(&mut self, xs: &Tensor, train: bool) -> ForecastResult<Tensor> {
        EncoderDecoder::forward_t(self, xs, train)
    }
}

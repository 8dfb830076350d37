//!
//! CLI для encoder–decoder прогнозирования временных рядов.

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarMap;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

use forecast_core::{CellType, DecodeMode, Forecaster, ModelConfig, ModelSummary, Normalization};
use seq2seq_rnn::EncoderDecoder;

/// Тип рекуррентной ячейки для CLI.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum CellArg {
    Gru,
    Lstm,
}

impl From<CellArg> for CellType {
    fn from(v: CellArg) -> Self {
        match v {
            CellArg::Gru => CellType::Gru,
            CellArg::Lstm => CellType::Lstm,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum NormArg {
    None,
    Batch,
    Layer,
}

impl From<NormArg> for Normalization {
    fn from(v: NormArg) -> Self {
        match v {
            NormArg::None => Normalization::None,
            NormArg::Batch => Normalization::Batch,
            NormArg::Layer => Normalization::Layer,
        }
    }
}

/// Параметры модели: JSON-конфиг или флаги.
#[derive(Args, Debug)]
struct ModelArgs {
    /// JSON config file; when given, the flags below are ignored
    #[arg(long)]
    config: Option<PathBuf>,

    /// Features per timestep
    #[arg(long, default_value_t = 1)]
    n_features: usize,

    /// Hidden size of the recurrent stacks
    #[arg(long, default_value_t = 32)]
    hidden_dim: usize,

    /// Recurrent cell type
    #[arg(long, value_enum, default_value = "gru")]
    cell: CellArg,

    /// Recurrent layers per stack
    #[arg(long, default_value_t = 1)]
    layers: usize,

    /// Source and target window length
    #[arg(long, default_value_t = 10)]
    seq_len: usize,

    /// Dropout between layers (needs --layers > 1)
    #[arg(long, default_value_t = 0.0)]
    dropout: f32,

    /// Normalization after each layer
    #[arg(long, value_enum, default_value = "none")]
    normalization: NormArg,

    /// Attention heads (0 disables attention)
    #[arg(long, default_value_t = 0)]
    heads: usize,

    /// Step-by-step rollout instead of single-shot decoding
    #[arg(long, default_value_t = false)]
    autoregressive: bool,

    /// Teacher forcing probability (autoregressive training only)
    #[arg(long, default_value_t = 0.5)]
    teacher_forcing: f64,
}

impl ModelArgs {
    fn to_config(&self) -> Result<ModelConfig> {
        if let Some(path) = &self.config {
            return ModelConfig::from_json_file(path)
                .with_context(|| format!("failed to load config {}", path.display()));
        }

        let config = ModelConfig {
            n_features: self.n_features,
            hidden_dim: self.hidden_dim,
            cell_type: self.cell.into(),
            num_rnn_layers: self.layers,
            seq_len: self.seq_len,
            teacher_forcing_prob: self.teacher_forcing,
            dropout: self.dropout,
            normalization: self.normalization.into(),
            narrow_attn_heads: self.heads,
            decode_mode: if self.autoregressive {
                DecodeMode::Autoregressive
            } else {
                DecodeMode::SingleShot
            },
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Parser)]
#[command(name = "rnn-forecast")]
#[command(author, version, about = "Seq2seq RNN forecaster on Candle", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the model and run one forward pass on synthetic input
    Run {
        #[command(flatten)]
        model: ModelArgs,

        /// Safetensors weights; fresh random weights when omitted
        #[arg(long)]
        weights: Option<PathBuf>,

        /// Batch size of the synthetic input
        #[arg(long, default_value_t = 4)]
        batch: usize,

        /// Device to use (cpu, metal, cuda)
        #[arg(long, default_value = "cpu")]
        device: String,

        /// Run in training mode (dropout, batch statistics, teacher forcing)
        #[arg(long, default_value_t = false)]
        train: bool,

        /// Seed for teacher forcing draws
        #[arg(long)]
        seed: Option<u64>,

        /// Save freshly initialised weights to this safetensors file
        #[arg(long)]
        save: Option<PathBuf>,
    },

    /// Print the resolved configuration and parameter count
    Describe {
        #[command(flatten)]
        model: ModelArgs,

        /// Print the configuration as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            model,
            weights,
            batch,
            device,
            train,
            seed,
            save,
        } => {
            let config = model.to_config()?;
            let device = create_device(&device)?;
            run_forward(config, weights, batch, &device, train, seed, save)
        }

        Commands::Describe { model, json } => {
            let config = model.to_config()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                let summary = ModelSummary::from_config("seq2seq-rnn", &config);
                println!("{summary}");
                println!("   window: {:?}", config.window());
                println!("   dropout active: {}", config.dropout_active());
                if let Some(head_dim) = config.head_dim() {
                    println!("   head dim: {head_dim}");
                }
            }
            Ok(())
        }
    }
}

fn run_forward(
    config: ModelConfig,
    weights: Option<PathBuf>,
    batch: usize,
    device: &Device,
    train: bool,
    seed: Option<u64>,
    save: Option<PathBuf>,
) -> Result<()> {
    let start = Instant::now();

    let mut model = match &weights {
        Some(path) => EncoderDecoder::from_safetensors(config.clone(), path, device)?,
        None => {
            let varmap = VarMap::new();
            let model = EncoderDecoder::from_varmap(config.clone(), &varmap, DType::F32, device)?;
            if let Some(path) = &save {
                varmap
                    .save(path)
                    .with_context(|| format!("failed to save weights to {}", path.display()))?;
                info!("Веса сохранены в {}", path.display());
            }
            model
        }
    };
    if let Some(seed) = seed {
        model = model.with_seed(seed);
    }
    info!(elapsed = ?start.elapsed(), "Model ready: {}", model.summary());

    let window = model.window();
    let xs = Tensor::randn(
        0f32,
        1.,
        (batch, window.total_len(), model.n_features()),
        device,
    )?;

    let start = Instant::now();
    let output = model.forward_t(&xs, train)?;
    let elapsed = start.elapsed();

    let flat = output.flatten_all()?.to_dtype(DType::F32)?;
    let mean = flat.mean_all()?;
    let std = flat
        .broadcast_sub(&mean)?
        .sqr()?
        .mean_all()?
        .sqrt()?
        .to_scalar::<f32>()?;

    println!("input:  {:?}", xs.dims());
    println!("output: {:?}", output.dims());
    println!("mean={:.6} std={:.6}", mean.to_scalar::<f32>()?, std);
    println!("forward: {:.2?}", elapsed);
    Ok(())
}

fn create_device(device: &str) -> Result<Device> {
    match device {
        "metal" => {
            // candle может panic при инициализации Metal, если устройство недоступно.
            let prev_hook = std::panic::take_hook();
            std::panic::set_hook(Box::new(|_| {}));
            let res = std::panic::catch_unwind(|| Device::new_metal(0));
            std::panic::set_hook(prev_hook);

            match res {
                Ok(Ok(dev)) => Ok(dev),
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Err(anyhow::anyhow!(
                    "Metal is not available in this environment, try --device cpu"
                )),
            }
        }
        "cuda" => Ok(Device::new_cuda(0)?),
        _ => Ok(Device::Cpu),
    }
}

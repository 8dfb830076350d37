//! Integration tests for the encoder–decoder forward pass.

use candle_core::{DType, Device, Tensor};
use candle_nn::VarMap;
use forecast_core::{CellType, DecodeMode, ForecastError, Forecaster, ModelConfig, Normalization};
use seq2seq_rnn::EncoderDecoder;

fn build(config: ModelConfig) -> (EncoderDecoder, VarMap) {
    let varmap = VarMap::new();
    let model = EncoderDecoder::from_varmap(config, &varmap, DType::F32, &Device::Cpu)
        .expect("Failed to build model");
    (model, varmap)
}

fn input(batch: usize, config: &ModelConfig) -> Tensor {
    Tensor::randn(
        0f32,
        1.,
        (batch, 2 * config.seq_len, config.n_features),
        &Device::Cpu,
    )
    .expect("Failed to create input")
}

fn values(t: &Tensor) -> Vec<f32> {
    t.flatten_all().unwrap().to_vec1().unwrap()
}

#[test]
fn test_end_to_end_small_gru() {
    let config = ModelConfig {
        n_features: 2,
        hidden_dim: 8,
        cell_type: CellType::Gru,
        num_rnn_layers: 1,
        seq_len: 5,
        ..Default::default()
    };
    let (mut model, _varmap) = build(config.clone());

    let xs = input(4, &config);
    let out = model.forward(&xs).expect("Forward pass failed");

    assert_eq!(out.dims(), &[4, 5, 2]);
    assert!(values(&out).iter().all(|v| v.is_finite()));
}

#[test]
fn test_output_shape_for_all_configurations() {
    let mut checked = 0;
    for cell_type in [CellType::Gru, CellType::Lstm] {
        for normalization in [Normalization::None, Normalization::Batch, Normalization::Layer] {
            for narrow_attn_heads in [0, 2] {
                for num_rnn_layers in [1, 3] {
                    for decode_mode in [DecodeMode::SingleShot, DecodeMode::Autoregressive] {
                        let config = ModelConfig {
                            n_features: 3,
                            hidden_dim: 6,
                            cell_type,
                            num_rnn_layers,
                            seq_len: 4,
                            dropout: 0.1,
                            normalization,
                            narrow_attn_heads,
                            decode_mode,
                            ..Default::default()
                        };
                        let (mut model, _varmap) = build(config.clone());
                        let xs = input(2, &config);

                        for train in [false, true] {
                            let out = model.forward_t(&xs, train).unwrap_or_else(|e| {
                                panic!("{config:?} (train={train}) failed: {e}")
                            });
                            assert_eq!(out.dims(), &[2, 4, 3], "{config:?}");
                        }
                        checked += 1;
                    }
                }
            }
        }
    }
    eprintln!("✅ Checked {checked} configurations");
}

#[test]
fn test_plain_model_is_deterministic() {
    let config = ModelConfig {
        n_features: 2,
        hidden_dim: 8,
        num_rnn_layers: 2,
        seq_len: 6,
        ..Default::default()
    };
    let (mut model, _varmap) = build(config.clone());
    let xs = input(3, &config);

    let first = values(&model.forward(&xs).unwrap());
    let second = values(&model.forward(&xs).unwrap());
    assert_eq!(first, second);

    // без dropout/нормализации режим обучения не влияет на результат
    let trained = values(&model.forward_t(&xs, true).unwrap());
    assert_eq!(first, trained);
}

#[test]
fn test_dropout_only_in_training() {
    let config = ModelConfig {
        n_features: 2,
        hidden_dim: 16,
        num_rnn_layers: 2,
        seq_len: 6,
        dropout: 0.5,
        ..Default::default()
    };
    let (mut model, _varmap) = build(config.clone());
    let xs = input(4, &config);

    let eval_a = values(&model.forward(&xs).unwrap());
    let eval_b = values(&model.forward(&xs).unwrap());
    assert_eq!(eval_a, eval_b);

    let train = values(&model.forward_t(&xs, true).unwrap());
    assert_ne!(eval_a, train);
}

#[test]
fn test_attention_requires_divisible_hidden_dim() {
    let varmap = VarMap::new();
    let config = ModelConfig {
        hidden_dim: 10,
        narrow_attn_heads: 3,
        ..Default::default()
    };
    let result = EncoderDecoder::from_varmap(config, &varmap, DType::F32, &Device::Cpu);
    assert!(matches!(result, Err(ForecastError::Config(_))));
    // валидация срабатывает до создания параметров
    assert!(varmap.all_vars().is_empty());
}

#[test]
fn test_lstm_cell_state_flows_end_to_end() {
    let config = ModelConfig {
        n_features: 2,
        hidden_dim: 8,
        cell_type: CellType::Lstm,
        num_rnn_layers: 2,
        seq_len: 5,
        ..Default::default()
    };
    let (model, _varmap) = build(config.clone());
    let xs = input(3, &config);
    let source = xs.narrow(1, 0, config.seq_len).unwrap();

    let encoded = model.encoder().forward(&source).unwrap();
    let cell = encoded.cell_state.as_ref().expect("LSTM encoder must return cell state");
    assert_eq!(cell.dims(), &[1, 3, 8]);

    let mut state = model
        .decoder()
        .init_hidden(&encoded.hidden_seq, encoded.cell_state.as_ref())
        .unwrap();
    assert_eq!(values(state.cell().unwrap()), values(cell));

    model.decoder().forward(&source, &mut state).unwrap();
    assert_eq!(state.cell().unwrap().dims(), &[1, 3, 8]);
}

#[test]
fn test_gru_never_has_cell_state() {
    let config = ModelConfig {
        n_features: 2,
        hidden_dim: 8,
        cell_type: CellType::Gru,
        num_rnn_layers: 2,
        seq_len: 5,
        ..Default::default()
    };
    let (model, _varmap) = build(config.clone());
    let source = input(3, &config).narrow(1, 0, config.seq_len).unwrap();

    let encoded = model.encoder().forward(&source).unwrap();
    assert!(encoded.cell_state.is_none());

    let mut state = model.decoder().init_hidden(&encoded.hidden_seq, None).unwrap();
    model.decoder().forward(&source, &mut state).unwrap();
    assert!(state.cell().is_none());
}

#[test]
fn test_three_layers_stack_two_extra() {
    let config = ModelConfig {
        num_rnn_layers: 3,
        ..Default::default()
    };
    let (model, _varmap) = build(config);
    assert_eq!(model.encoder().stack().stacked_layers().len(), 2);
    assert_eq!(model.decoder().stack().stacked_layers().len(), 2);
}

#[test]
fn test_parameter_count_matches_varmap() {
    for cell_type in [CellType::Gru, CellType::Lstm] {
        for normalization in [Normalization::None, Normalization::Layer] {
            for narrow_attn_heads in [0, 4] {
                let config = ModelConfig {
                    n_features: 3,
                    hidden_dim: 8,
                    cell_type,
                    num_rnn_layers: 2,
                    normalization,
                    narrow_attn_heads,
                    ..Default::default()
                };
                let (_model, varmap) = build(config.clone());
                let created: usize = varmap.all_vars().iter().map(|v| v.elem_count()).sum();
                assert_eq!(created, config.num_parameters(), "{config:?}");
            }
        }
    }
}

#[test]
fn test_autoregressive_eval_is_deterministic() {
    let config = ModelConfig {
        n_features: 2,
        hidden_dim: 8,
        seq_len: 4,
        teacher_forcing_prob: 1.0,
        narrow_attn_heads: 2,
        decode_mode: DecodeMode::Autoregressive,
        ..Default::default()
    };
    let (model, _varmap) = build(config.clone());
    let mut model = model.with_seed(7);
    let xs = input(2, &config);

    let a = values(&model.forecast(&xs).unwrap());
    let b = values(&model.forecast(&xs).unwrap());
    assert_eq!(a, b);

    // с полным teacher forcing обучение видит другие входы декодера
    let forced = values(&model.forward_t(&xs, true).unwrap());
    assert_eq!(forced.len(), a.len());
    assert_eq!(forced[..2], a[..2]);
    assert_ne!(forced, a);
}

#[test]
fn test_safetensors_round_trip() {
    let config = ModelConfig {
        n_features: 2,
        hidden_dim: 8,
        cell_type: CellType::Lstm,
        num_rnn_layers: 2,
        seq_len: 5,
        normalization: Normalization::Batch,
        narrow_attn_heads: 2,
        ..Default::default()
    };
    let (mut model, varmap) = build(config.clone());
    let xs = input(3, &config);
    let expected = values(&model.forward(&xs).unwrap());

    let path = std::env::temp_dir().join(format!(
        "seq2seq-rnn-roundtrip-{}.safetensors",
        std::process::id()
    ));
    varmap.save(&path).expect("Failed to save weights");

    let mut loaded = EncoderDecoder::from_safetensors(config, &path, &Device::Cpu)
        .expect("Failed to load weights");
    let actual = values(&loaded.forward(&xs).unwrap());
    let _ = std::fs::remove_file(&path);

    assert_eq!(expected, actual);
}

#[test]
fn test_missing_weights_file() {
    let result = EncoderDecoder::from_safetensors(
        ModelConfig::default(),
        "/nonexistent/seq2seq.safetensors",
        &Device::Cpu,
    );
    assert!(matches!(result, Err(ForecastError::Io(_))));
}

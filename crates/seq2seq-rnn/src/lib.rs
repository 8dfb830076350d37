//! # seq2seq-rnn
//!
//! Рекуррентная encoder–decoder модель для прогнозирования временных рядов
//! на Candle.
//!
//! Архитектура:
//! - [`Encoder`]: стек GRU/LSTM слоёв поверх source-окна
//! - [`Decoder`]: такой же стек, инициализированный последним состоянием
//!   энкодера, опциональный attention-мост и линейная регрессия в признаки
//! - [`EncoderDecoder`]: разбиение входа на окна и прогон encoder → decoder
//!
//! Имена тензоров совпадают с `state_dict` PyTorch-версии модели, поэтому
//! экспортированные в safetensors веса загружаются без переименования.

pub mod attention;
pub mod decoder;
pub mod encoder;
pub mod model;
pub mod norm;
pub mod rnn;
pub mod stack;

pub use attention::{AttentionMemory, MultiHeadAttention};
pub use decoder::{Decoder, DecoderState};
pub use encoder::{Encoder, EncoderOutput};
pub use model::EncoderDecoder;
pub use norm::{Norm, Normalizers};
pub use rnn::{GruLayer, LstmLayer, RecurrentLayer, RecurrentState};
pub use stack::RecurrentStack;

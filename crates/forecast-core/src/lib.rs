//! # forecast-core
//!
//! Базовые типы, конфигурация и ошибки для rnn-forecast.
//!
//! Этот крейт предоставляет общие абстракции для остальных крейтов
//! workspace:
//!
//! - Конфигурация модели [`ModelConfig`] (тип ячейки, нормализация, attention)
//! - Унифицированная обработка ошибок через [`ForecastError`]
//! - Разбиение входного окна на source/target ([`WindowSpec`])
//! - Trait [`Forecaster`] — единый интерфейс прогнозирующей модели

pub mod config;
pub mod debug;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{CellType, DecodeMode, ModelConfig, Normalization};
pub use error::{ForecastError, ForecastResult};
pub use traits::Forecaster;
pub use types::{ModelSummary, WindowSpec};

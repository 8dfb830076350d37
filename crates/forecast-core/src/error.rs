//! Error types for rnn-forecast.

use thiserror::Error;

/// Main error type for forecasting models.
#[derive(Error, Debug)]
pub enum ForecastError {
    /// Invalid model configuration.
    #[error("Config error: {0}")]
    Config(String),

    /// Input tensor does not match the configured window or feature count.
    #[error("Shape error: {0}")]
    Shape(String),

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Candle tensor errors.
    #[error("Tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    /// JSON parsing errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for forecasting operations.
pub type ForecastResult<T> = Result<T, ForecastError>;

//! Вспомогательные функции для отладочного вывода.

use candle_core::{DType, Result, Tensor};
use std::sync::OnceLock;

/// Возвращает `true`, если включен подробный отладочный вывод.
///
/// Управляется переменной окружения `FORECAST_DEBUG` (любое непустое значение).
pub fn enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| std::env::var_os("FORECAST_DEBUG").is_some_and(|v| !v.is_empty()))
}

/// Среднее по всему тензору как `f32`, независимо от dtype тензора.
pub fn mean_f32(xs: &Tensor) -> Result<f32> {
    xs.mean_all()?.to_dtype(DType::F32)?.to_scalar::<f32>()
}

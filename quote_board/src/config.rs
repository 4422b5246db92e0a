//! Конфигурационный файл Quote Board.

use std::ops::RangeInclusive;

/// Название директории для log-файлов.
pub const LOG_FOLDER: &str = "log";

/// Диапазон разрешённых интервалов обновления, секунд.
///
/// Нижняя граница бережёт суточный лимит бесплатных тарифов провайдеров.
pub const ALLOW_INTERVAL_SECS: RangeInclusive<u64> = RangeInclusive::new(10, 3600);

/// Сколько ждать первого среза в режиме `--once`, секунд.
pub const ONCE_TIMEOUT_SECS: u64 = 60;

/// Ширина колонки sparkline, символов.
pub const SPARKLINE_WIDTH: usize = 16;

/// Ширина колонки имени, символов.
pub const NAME_WIDTH: usize = 20;

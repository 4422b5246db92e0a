//! Quote Feed. Конвейер котировок: периодически опрашивает провайдера
//! (CoinGecko для криптовалют, Financial Modeling Prep для акций), сводит
//! ответы в неизменяемый срез [`Snapshot`] и рассылает состояние
//! подписчикам.
//!
//! Основные части:
//!
//! - [`source`] — источники котировок и HTTP-транспорт
//! - [`reconciler`] — сведение пакета, запасных запросов и истории
//! - [`scheduler`] — циклы обновления по таймеру и вручную
//! - [`credentials`] — хранение ключей API
//! - [`config`] — константы и настройки конвейера

pub mod config;
pub mod credentials;
pub mod reconciler;
pub mod scheduler;
pub mod source;

#[cfg(test)]
mod testing;

pub use commons::models::Snapshot;
pub use config::PipelineConfig;
pub use scheduler::{RefreshScheduler, RefreshState, RefreshStatus};
pub use source::{QuoteSource, SourceKind};

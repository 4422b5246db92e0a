//! Источники котировок.
//!
//! Каждый вариант прячет за трейтом [`QuoteSource`] свой REST API и отдаёт
//! уже нормализованные [`QuoteRecord`]. Все сбои транспорта и разбора
//! превращаются в [`FeedError`] на этой границе.

pub mod coingecko;
pub mod fmp;
pub mod http;

use crate::config::PipelineConfig;
use crate::credentials::{ApiKey, CredentialStore};
use commons::errors::FeedError;
use commons::models::{Horizon, MarketSummary, PricePoint, QuoteRecord};
use http::HttpTransport;
use log::info;
use macros::QuoteEnumDisplay;
use std::sync::Arc;

pub use coingecko::CryptoSource;
pub use fmp::EquitySource;

/// Вариант источника.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, QuoteEnumDisplay)]
pub enum SourceKind {
    #[str("crypto")]
    Crypto,
    #[str("equity")]
    Equity,
}

impl SourceKind {
    /// Имя провайдера, под которым хранится ключ API.
    pub fn provider(&self) -> &'static str {
        match self {
            SourceKind::Crypto => coingecko::PROVIDER,
            SourceKind::Equity => fmp::PROVIDER,
        }
    }
}

/// Источник котировок.
///
/// Все методы блокирующие и ограничены таймаутом транспорта. Реализация
/// должна быть безопасной для вызова из нескольких потоков одновременно:
/// планировщик запрашивает запасные символы параллельно.
pub trait QuoteSource: Send + Sync {
    /// Вариант источника.
    fn kind(&self) -> SourceKind;

    /// Котировки для набора символов одним запросом.
    ///
    /// Символы, которых нет в ответе провайдера, ошибкой не считаются.
    fn fetch_batch(&self, symbols: &[String]) -> Result<Vec<QuoteRecord>, FeedError>;

    /// Котировка одного символа; [`FeedError::NotFound`], если провайдер
    /// его не знает.
    fn fetch_one(&self, symbol: &str) -> Result<QuoteRecord, FeedError>;

    /// Ценовой ряд за `[from, to]` (мс), по возрастанию времени.
    fn fetch_history(&self, _symbol: &str, _from: i64, _to: i64) -> Result<Vec<PricePoint>, FeedError> {
        Ok(Vec::new())
    }

    /// Сводка по рынку.
    fn fetch_summary(&self) -> Result<Option<MarketSummary>, FeedError> {
        Ok(None)
    }

    /// Горизонты, которые вычисляются по истории, а не приходят от провайдера.
    fn derived_horizons(&self) -> Vec<Horizon> {
        Vec::new()
    }
}

/// Создать источник по конфигурации.
///
/// Ключ API читается из `credentials` по имени провайдера перед каждым
/// запросом. Для акций отсутствие ключа не мешает созданию источника: ошибка
/// [`FeedError::Auth`] вернётся из запросов, пока ключ не будет сохранён, и
/// пользователь увидит её в состоянии планировщика.
pub fn build_source(
    config: &PipelineConfig,
    credentials: Arc<dyn CredentialStore>,
    transport: Arc<dyn HttpTransport>,
) -> Result<Arc<dyn QuoteSource>, FeedError> {
    let api_key = ApiKey::new(credentials, config.kind.provider());
    info!(
        "Источник {}: ключ API {}",
        config.kind,
        if api_key.current()?.is_some() { "задан" } else { "не задан" }
    );

    let source: Arc<dyn QuoteSource> = match config.kind {
        SourceKind::Crypto => Arc::new(CryptoSource::new(transport, &config.horizons, api_key)?),
        SourceKind::Equity => Arc::new(EquitySource::new(
            transport,
            &config.horizons,
            config.indices.clone(),
            api_key,
        )?),
    };
    Ok(source)
}

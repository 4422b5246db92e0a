//! Акции и индексы через Financial Modeling Prep API v3.
//!
//! Котировка FMP содержит только дневное изменение. Изменения за 7 и 30
//! дней вычисляются по дневной истории закрытий (см.
//! [`commons::history::derive_changes`]), которую планировщик догружает
//! после публикации основного среза.

use super::http::{HttpResponse, HttpTransport, check_status, endpoint, parse_base};
use super::{QuoteSource, SourceKind};
use crate::config::{FMP_API, NATIVE_EQUITY_HORIZON};
use crate::credentials::ApiKey;
use chrono::{DateTime, NaiveDate};
use commons::errors::FeedError;
use commons::models::{Horizon, IndexQuote, MarketSummary, PricePoint, QuoteRecord, UNRANKED, WatchItem};
use commons::utils::now_millis;
use log::{debug, warn};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

/// Имя провайдера в хранилище ключей.
pub const PROVIDER: &str = "fmp";

/// Поле, в котором FMP сообщает об ошибке при коде 200.
const ERROR_FIELD: &str = "Error Message";

/// Строка ответа `/quote/{symbols}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FmpQuote {
    symbol: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    changes_percentage: Option<f64>,
    #[serde(default)]
    change: Option<f64>,
    #[serde(default)]
    market_cap: Option<f64>,
    #[serde(default)]
    volume: Option<f64>,
}

/// Ответ `/historical-price-full/{symbol}`.
#[derive(Debug, Default, Deserialize)]
struct HistoricalResponse {
    #[serde(default)]
    historical: Vec<HistoricalBar>,
}

#[derive(Debug, Deserialize)]
struct HistoricalBar {
    date: String,
    #[serde(default)]
    close: Option<f64>,
}

/// Источник FMP.
pub struct EquitySource {
    transport: Arc<dyn HttpTransport>,
    base: Url,
    horizons: Vec<Horizon>,
    indices: Vec<WatchItem>,
    api_key: ApiKey,
}

impl EquitySource {
    /// ## Args
    ///
    /// - `horizons` — все горизонты таблицы, `24h` приходит в котировке
    /// - `indices` — индексы для сводки, в порядке отображения
    /// - `api_key` — ключ FMP, читается перед каждым запросом
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        horizons: &[Horizon],
        indices: Vec<WatchItem>,
        api_key: ApiKey,
    ) -> Result<Self, FeedError> {
        Ok(Self {
            transport,
            base: parse_base(FMP_API)?,
            horizons: horizons.to_vec(),
            indices,
            api_key,
        })
    }

    /// Подменить базовый адрес API.
    pub fn with_base_url(mut self, base: &str) -> Result<Self, FeedError> {
        self.base = parse_base(base)?;
        Ok(self)
    }

    fn api_key(&self) -> Result<String, FeedError> {
        self.api_key
            .current()?
            .ok_or_else(|| FeedError::auth_err("ключ FMP не задан"))
    }

    /// GET с ключом в параметрах запроса и разбором ответа.
    ///
    /// Ключ проверяется до обращения к сети.
    fn get<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&str, String)],
        what: &str,
    ) -> Result<T, FeedError> {
        let key = self.api_key()?;
        let mut url = endpoint(&self.base, segments)?;
        {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in query {
                pairs.append_pair(name, value);
            }
            pairs.append_pair("apikey", &key);
        }

        let response = check_status(self.transport.get(&url, &[])?, what)?;
        decode_fmp(&response, what)
    }

    fn fetch_quotes(&self, symbols: &[String], what: &str) -> Result<Vec<FmpQuote>, FeedError> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }
        self.get(&["quote", &symbols.join(",")], &[], what)
    }
}

impl QuoteSource for EquitySource {
    fn kind(&self) -> SourceKind {
        SourceKind::Equity
    }

    fn fetch_batch(&self, symbols: &[String]) -> Result<Vec<QuoteRecord>, FeedError> {
        let quotes = self.fetch_quotes(symbols, "quote")?;
        debug!("FMP: получено {} котировок из {}", quotes.len(), symbols.len());

        let mut records: Vec<QuoteRecord> = quotes.into_iter().map(quote_record).collect();
        assign_ranks_by_cap(&mut records);
        Ok(records)
    }

    fn fetch_one(&self, symbol: &str) -> Result<QuoteRecord, FeedError> {
        let quotes = self.fetch_quotes(&[symbol.to_string()], &format!("quote/{symbol}"))?;
        quotes
            .into_iter()
            .find(|q| q.symbol.eq_ignore_ascii_case(symbol))
            .map(quote_record)
            .ok_or_else(|| FeedError::not_found_err(format!("FMP не знает символ {symbol}")))
    }

    fn fetch_history(&self, symbol: &str, from: i64, to: i64) -> Result<Vec<PricePoint>, FeedError> {
        let (Some(from_date), Some(to_date)) = (to_date(from), to_date(to)) else {
            return Err(FeedError::value_err(format!(
                "некорректное окно истории {from}..{to}"
            )));
        };
        if from_date > to_date {
            return Ok(Vec::new());
        }

        let response: HistoricalResponse = self.get(
            &["historical-price-full", symbol],
            &[
                ("from", from_date.format("%Y-%m-%d").to_string()),
                ("to", to_date.format("%Y-%m-%d").to_string()),
            ],
            &format!("historical/{symbol}"),
        )?;

        let mut series: Vec<PricePoint> = response
            .historical
            .into_iter()
            .filter_map(|bar| {
                let ts = parse_day(&bar.date)?;
                let close = bar.close.filter(|c| c.is_finite())?;
                Some(PricePoint::new(ts, close))
            })
            .collect();
        // FMP отдаёт дни от новых к старым.
        series.sort_by_key(|p| p.timestamp);
        Ok(series)
    }

    fn fetch_summary(&self) -> Result<Option<MarketSummary>, FeedError> {
        if self.indices.is_empty() {
            return Ok(None);
        }
        let symbols: Vec<String> = self.indices.iter().map(|i| i.symbol.clone()).collect();
        let quotes: HashMap<String, FmpQuote> = self
            .fetch_quotes(&symbols, "quote/indices")?
            .into_iter()
            .map(|q| (q.symbol.clone(), q))
            .collect();

        let indices = self
            .indices
            .iter()
            .map(|item| {
                let quote = quotes.get(&item.symbol);
                if quote.is_none() {
                    warn!("FMP: нет котировки индекса {}", item.symbol);
                }
                IndexQuote {
                    symbol: item.symbol.clone(),
                    name: item.display_name(),
                    group: item.group.clone(),
                    level: quote.and_then(|q| q.price),
                    change: quote.and_then(|q| q.change),
                    change_pct: quote.and_then(|q| q.changes_percentage),
                }
            })
            .collect();

        Ok(Some(MarketSummary {
            indices,
            captured_at: now_millis(),
            ..MarketSummary::default()
        }))
    }

    fn derived_horizons(&self) -> Vec<Horizon> {
        self.horizons
            .iter()
            .filter(|h| h.label() != NATIVE_EQUITY_HORIZON)
            .cloned()
            .collect()
    }
}

fn quote_record(quote: FmpQuote) -> QuoteRecord {
    let mut record = QuoteRecord::new(&quote.symbol);
    if let Some(name) = quote.name.filter(|n| !n.is_empty()) {
        record.display_name = name;
    }
    record.price = quote.price;
    record.market_cap = quote.market_cap.filter(|c| *c > 0.0);
    record.volume = quote.volume;
    record
        .changes
        .insert(NATIVE_EQUITY_HORIZON.to_string(), quote.changes_percentage);
    record
}

/// Ранги по убыванию капитализации; строки без капитализации остаются без
/// ранга.
fn assign_ranks_by_cap(records: &mut [QuoteRecord]) {
    let mut order: Vec<usize> = (0..records.len())
        .filter(|i| records[*i].market_cap.is_some())
        .collect();
    order.sort_by(|a, b| {
        let (a, b) = (records[*a].market_cap, records[*b].market_cap);
        b.partial_cmp(&a).unwrap_or(Ordering::Equal)
    });
    for (rank, idx) in order.into_iter().enumerate() {
        records[idx].rank = rank as u32 + 1;
    }
    for record in records.iter_mut().filter(|r| r.market_cap.is_none()) {
        record.rank = UNRANKED;
    }
}

/// Разобрать ответ FMP. Сообщение `"Error Message"` при коде 200 означает
/// отклонённый ключ или исчерпанный лимит.
fn decode_fmp<T: DeserializeOwned>(response: &HttpResponse, what: &str) -> Result<T, FeedError> {
    let value: Value = serde_json::from_str(&response.body)
        .map_err(|e| FeedError::network_err(format!("{what}: некорректный ответ: {e}")))?;

    if let Some(message) = value.get(ERROR_FIELD).and_then(Value::as_str) {
        let lower = message.to_lowercase();
        if lower.contains("api key") || lower.contains("apikey") {
            return Err(FeedError::auth_err(format!("{what}: {message}")));
        }
        if lower.contains("limit") {
            return Err(FeedError::transient_err(format!("{what}: {message}")));
        }
        return Err(FeedError::network_err(format!("{what}: {message}")));
    }

    serde_json::from_value(value)
        .map_err(|e| FeedError::network_err(format!("{what}: некорректный ответ: {e}")))
}

fn to_date(ms: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(ms).map(|dt| dt.date_naive())
}

/// Полночь UTC дня `YYYY-MM-DD` в миллисекундах.
fn parse_day(raw: &str) -> Option<i64> {
    let day = NaiveDate::parse_from_str(raw.get(..10)?, "%Y-%m-%d").ok()?;
    Some(day.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis())
}

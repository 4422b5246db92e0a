//! Криптовалюты через CoinGecko API v3.

use super::http::{HttpTransport, check_status, decode, endpoint, parse_base};
use super::{QuoteSource, SourceKind};
use crate::config::{COINGECKO_API, CRYPTO_HISTORY_WINDOW_DAYS, SPARKLINE_WINDOW_DAYS};
use crate::credentials::ApiKey;
use chrono::DateTime;
use commons::errors::FeedError;
use commons::models::{DAY_MS, Horizon, MarketSummary, PricePoint, QuoteRecord, UNRANKED};
use commons::utils::now_millis;
use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use url::Url;

/// Имя провайдера в хранилище ключей.
pub const PROVIDER: &str = "coingecko";

/// Заголовок демо-ключа CoinGecko.
const API_KEY_HEADER: &str = "x-cg-demo-api-key";

/// Максимум строк на странице `/coins/markets`.
const PER_PAGE: usize = 250;

/// Строка ответа `/coins/markets`.
#[derive(Debug, Deserialize)]
struct MarketItem {
    id: String,
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    current_price: Option<f64>,
    #[serde(default)]
    market_cap: Option<f64>,
    #[serde(default)]
    fully_diluted_valuation: Option<f64>,
    #[serde(default)]
    total_volume: Option<f64>,
    #[serde(default)]
    market_cap_rank: Option<u32>,
    #[serde(default)]
    last_updated: Option<String>,
    #[serde(default)]
    sparkline_in_7d: Option<Sparkline>,
    /// Поля `price_change_percentage_<h>_in_currency`.
    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
struct Sparkline {
    #[serde(default)]
    price: Vec<Option<f64>>,
}

/// Ответ `/coins/{id}`.
#[derive(Debug, Deserialize)]
struct CoinDetail {
    id: String,
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    image: Option<CoinImage>,
    #[serde(default)]
    market_cap_rank: Option<u32>,
    #[serde(default)]
    market_data: Option<CoinMarketData>,
}

#[derive(Debug, Deserialize)]
struct CoinImage {
    #[serde(default)]
    large: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CoinMarketData {
    #[serde(default)]
    current_price: HashMap<String, Option<f64>>,
    #[serde(default)]
    market_cap: HashMap<String, Option<f64>>,
    #[serde(default)]
    fully_diluted_valuation: HashMap<String, Option<f64>>,
    #[serde(default)]
    total_volume: HashMap<String, Option<f64>>,
    #[serde(default)]
    sparkline_7d: Option<Sparkline>,
    #[serde(default)]
    last_updated: Option<String>,
    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

/// Ответ `/coins/{id}/market_chart/range`.
#[derive(Debug, Deserialize)]
struct MarketChart {
    #[serde(default)]
    prices: Vec<(f64, Option<f64>)>,
}

/// Ответ `/global`.
#[derive(Debug, Deserialize)]
struct GlobalResponse {
    data: GlobalData,
}

#[derive(Debug, Deserialize)]
struct GlobalData {
    #[serde(default)]
    total_market_cap: HashMap<String, f64>,
    #[serde(default)]
    total_volume: HashMap<String, f64>,
    #[serde(default)]
    market_cap_percentage: HashMap<String, f64>,
    #[serde(default)]
    market_cap_change_percentage_24h_usd: Option<f64>,
}

/// Источник CoinGecko.
///
/// Пакетный запрос `/coins/markets` сразу отдаёт изменения по всем
/// горизонтам и недельный sparkline, поэтому история для таблицы не нужна.
pub struct CryptoSource {
    transport: Arc<dyn HttpTransport>,
    base: Url,
    horizons: Vec<Horizon>,
    api_key: ApiKey,
}

impl CryptoSource {
    /// Ключ необязателен: без него используется публичный лимит CoinGecko.
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        horizons: &[Horizon],
        api_key: ApiKey,
    ) -> Result<Self, FeedError> {
        Ok(Self {
            transport,
            base: parse_base(COINGECKO_API)?,
            horizons: horizons.to_vec(),
            api_key,
        })
    }

    /// Подменить базовый адрес API (зеркало, локальный прокси).
    pub fn with_base_url(mut self, base: &str) -> Result<Self, FeedError> {
        self.base = parse_base(base)?;
        Ok(self)
    }

    fn headers(&self) -> Result<Vec<(&'static str, String)>, FeedError> {
        Ok(match self.api_key.current()? {
            Some(key) => vec![(API_KEY_HEADER, key)],
            None => Vec::new(),
        })
    }

    fn get<T: serde::de::DeserializeOwned>(&self, url: &Url, what: &str) -> Result<T, FeedError> {
        let headers = self.headers()?;
        let response = check_status(self.transport.get(url, &headers)?, what)?;
        decode(&response, what)
    }

    fn horizon_param(&self) -> String {
        self.horizons
            .iter()
            .map(Horizon::label)
            .collect::<Vec<_>>()
            .join(",")
    }

    fn market_record(&self, item: MarketItem) -> QuoteRecord {
        let mut record = QuoteRecord::new(&item.id);
        if let Some(symbol) = item.symbol.filter(|s| !s.is_empty()) {
            record.ticker = symbol.to_uppercase();
        }
        if let Some(name) = item.name.filter(|s| !s.is_empty()) {
            record.display_name = name;
        }
        record.image = item.image;
        record.price = item.current_price;
        record.market_cap = cap_or_fdv(item.market_cap, item.fully_diluted_valuation);
        record.volume = item.total_volume;
        record.rank = item.market_cap_rank.unwrap_or(UNRANKED);
        record.changes = self.changes_from(&item.extra, |v| v.as_f64());
        record.series = spread_sparkline(
            item.sparkline_in_7d.unwrap_or_default().price,
            item.last_updated.as_deref(),
        );
        record
    }

    /// Изменения по горизонтам из полей `price_change_percentage_<h>_in_currency`.
    fn changes_from(
        &self,
        fields: &HashMap<String, Value>,
        extract: impl Fn(&Value) -> Option<f64>,
    ) -> BTreeMap<String, Option<f64>> {
        self.horizons
            .iter()
            .map(|h| {
                let key = format!("price_change_percentage_{}_in_currency", h.label());
                (h.label().to_string(), fields.get(&key).and_then(&extract))
            })
            .collect()
    }
}

impl QuoteSource for CryptoSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Crypto
    }

    fn fetch_batch(&self, symbols: &[String]) -> Result<Vec<QuoteRecord>, FeedError> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }
        if symbols.len() > PER_PAGE {
            warn!(
                "CoinGecko отдаёт не больше {PER_PAGE} строк, запрошено {}",
                symbols.len()
            );
        }

        let mut url = endpoint(&self.base, &["coins", "markets"])?;
        url.query_pairs_mut()
            .append_pair("vs_currency", "usd")
            .append_pair("ids", &symbols.join(","))
            .append_pair("order", "market_cap_desc")
            .append_pair("per_page", &PER_PAGE.to_string())
            .append_pair("page", "1")
            .append_pair("sparkline", "true")
            .append_pair("price_change_percentage", &self.horizon_param());

        let items: Vec<MarketItem> = self.get(&url, "coins/markets")?;
        debug!("CoinGecko: получено {} строк из {}", items.len(), symbols.len());

        Ok(items.into_iter().map(|item| self.market_record(item)).collect())
    }

    fn fetch_one(&self, symbol: &str) -> Result<QuoteRecord, FeedError> {
        let mut url = endpoint(&self.base, &["coins", symbol])?;
        url.query_pairs_mut()
            .append_pair("localization", "false")
            .append_pair("tickers", "false")
            .append_pair("market_data", "true")
            .append_pair("community_data", "false")
            .append_pair("developer_data", "false")
            .append_pair("sparkline", "true");

        let detail: CoinDetail = self.get(&url, &format!("coins/{symbol}"))?;
        let market = detail
            .market_data
            .ok_or_else(|| FeedError::not_found_err(format!("нет рыночных данных для {symbol}")))?;

        let usd = |map: &HashMap<String, Option<f64>>| map.get("usd").copied().flatten();

        let mut record = QuoteRecord::new(&detail.id);
        if let Some(ticker) = detail.symbol.filter(|s| !s.is_empty()) {
            record.ticker = ticker.to_uppercase();
        }
        if let Some(name) = detail.name.filter(|s| !s.is_empty()) {
            record.display_name = name;
        }
        record.image = detail.image.and_then(|i| i.large);
        record.price = usd(&market.current_price);
        record.market_cap = cap_or_fdv(usd(&market.market_cap), usd(&market.fully_diluted_valuation));
        record.volume = usd(&market.total_volume);
        record.rank = detail.market_cap_rank.unwrap_or(UNRANKED);
        record.changes = self.changes_from(&market.extra, |v| v.get("usd").and_then(Value::as_f64));
        record.series = spread_sparkline(
            market.sparkline_7d.unwrap_or_default().price,
            market.last_updated.as_deref(),
        );
        Ok(record)
    }

    /// Бесплатный тариф отдаёт историю только за последний год: начало окна
    /// обрезается, и возвращается доступная часть ряда.
    fn fetch_history(&self, symbol: &str, from: i64, to: i64) -> Result<Vec<PricePoint>, FeedError> {
        let earliest = now_millis() - CRYPTO_HISTORY_WINDOW_DAYS * DAY_MS;
        let from = from.max(earliest);
        if from >= to {
            return Ok(Vec::new());
        }

        let mut url = endpoint(&self.base, &["coins", symbol, "market_chart", "range"])?;
        url.query_pairs_mut()
            .append_pair("vs_currency", "usd")
            .append_pair("from", &(from / 1000).to_string())
            .append_pair("to", &(to / 1000).to_string());

        let chart: MarketChart = self.get(&url, &format!("market_chart/{symbol}"))?;
        let mut series: Vec<PricePoint> = chart
            .prices
            .into_iter()
            .filter_map(|(ts, price)| Some(PricePoint::new(ts as i64, price?)))
            .collect();
        series.sort_by_key(|p| p.timestamp);
        Ok(series)
    }

    fn fetch_summary(&self) -> Result<Option<MarketSummary>, FeedError> {
        let url = endpoint(&self.base, &["global"])?;
        let global: GlobalResponse = self.get(&url, "global")?;
        let data = global.data;

        let mut dominance: Vec<(String, f64)> = ["btc", "eth"]
            .iter()
            .filter_map(|code| {
                data.market_cap_percentage
                    .get(*code)
                    .map(|share| (code.to_uppercase(), *share))
            })
            .collect();
        dominance.sort_by(|a, b| b.1.total_cmp(&a.1));

        Ok(Some(MarketSummary {
            total_market_cap: data.total_market_cap.get("usd").copied(),
            total_volume: data.total_volume.get("usd").copied(),
            market_cap_change_24h: data.market_cap_change_percentage_24h_usd,
            dominance,
            indices: Vec::new(),
            captured_at: now_millis(),
        }))
    }
}

/// Капитализация, а при нулевой или отсутствующей — полностью разводнённая
/// оценка (FDV).
fn cap_or_fdv(market_cap: Option<f64>, fdv: Option<f64>) -> Option<f64> {
    market_cap.filter(|c| *c > 0.0).or(fdv.filter(|v| *v > 0.0))
}

/// Разложить точки sparkline равномерно по неделе, заканчивающейся в
/// `last_updated` (или сейчас, если дата не разобрана).
fn spread_sparkline(prices: Vec<Option<f64>>, last_updated: Option<&str>) -> Vec<PricePoint> {
    let end = last_updated
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.timestamp_millis())
        .unwrap_or_else(now_millis);

    let n = prices.len() as i64;
    if n == 0 {
        return Vec::new();
    }
    let step = if n > 1 { SPARKLINE_WINDOW_DAYS * DAY_MS / (n - 1) } else { 0 };

    prices
        .into_iter()
        .enumerate()
        .filter_map(|(i, price)| {
            let ts = end - (n - 1 - i as i64) * step;
            price
                .filter(|p| p.is_finite())
                .map(|p| PricePoint::new(ts, p))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticTransport;
    use commons::errors::FeedErrorKind;

    const MARKETS: &str = r#"[
        {
            "id": "bitcoin", "symbol": "btc", "name": "Bitcoin",
            "image": "https://img/btc.png",
            "current_price": 50000.0, "market_cap": 1500000000000.0,
            "fully_diluted_valuation": 1600000000000.0,
            "total_volume": 30000000000.0, "market_cap_rank": 1,
            "last_updated": "2024-03-08T00:00:00.000Z",
            "price_change_percentage_24h_in_currency": -3.456,
            "price_change_percentage_7d_in_currency": 10.0,
            "price_change_percentage_30d_in_currency": null,
            "sparkline_in_7d": {"price": [48000.0, null, 50000.0]}
        },
        {
            "id": "fresh-token", "symbol": "frsh", "name": "Fresh",
            "current_price": 0.5, "market_cap": 0,
            "fully_diluted_valuation": 1000000.0,
            "market_cap_rank": null
        }
    ]"#;

    fn source(transport: Arc<StaticTransport>, key: Option<&str>) -> CryptoSource {
        let horizons = Horizon::parse_list("24h,7d,30d").unwrap();
        CryptoSource::new(transport, &horizons, ApiKey::fixed(PROVIDER, key)).unwrap()
    }

    #[test]
    fn batch_maps_fields_and_horizons() {
        let transport = Arc::new(StaticTransport::new().route("/api/v3/coins/markets", 200, MARKETS));
        let src = source(transport.clone(), None);

        let records = src
            .fetch_batch(&["bitcoin".to_string(), "fresh-token".to_string()])
            .unwrap();
        assert_eq!(records.len(), 2);

        let btc = &records[0];
        assert_eq!(btc.ticker, "BTC");
        assert_eq!(btc.display_name, "Bitcoin");
        assert_eq!(btc.price, Some(50000.0));
        assert_eq!(btc.market_cap, Some(1.5e12));
        assert_eq!(btc.rank, 1);
        assert_eq!(btc.change("24h"), Some(-3.456));
        assert_eq!(btc.change("7d"), Some(10.0));
        assert_eq!(btc.change("30d"), None);
        assert!(btc.changes.contains_key("30d"));

        let fresh = &records[1];
        assert_eq!(fresh.market_cap, Some(1_000_000.0));
        assert_eq!(fresh.rank, UNRANKED);
        assert!(fresh.series.is_empty());

        let requests = transport.requests();
        let query = requests[0].0.query().unwrap_or_default().to_string();
        assert!(query.contains("ids=bitcoin%2Cfresh-token"));
        assert!(query.contains("sparkline=true"));
        assert!(query.contains("price_change_percentage=24h%2C7d%2C30d"));
        assert!(requests[0].1.is_empty());
    }

    #[test]
    fn sparkline_spreads_over_week_ending_at_last_update() {
        let transport = Arc::new(StaticTransport::new().route("/api/v3/coins/markets", 200, MARKETS));
        let records = source(transport, None)
            .fetch_batch(&["bitcoin".to_string()])
            .unwrap();

        let end = DateTime::parse_from_rfc3339("2024-03-08T00:00:00Z")
            .unwrap()
            .timestamp_millis();
        let series = &records[0].series;
        // Пропущенная точка отброшена, остальные сохраняют свои метки.
        assert_eq!(series.len(), 2);
        assert_eq!(series[0], PricePoint::new(end - 7 * DAY_MS, 48000.0));
        assert_eq!(series[1], PricePoint::new(end, 50000.0));
    }

    #[test]
    fn api_key_goes_to_header() {
        let transport = Arc::new(StaticTransport::new().route("/api/v3/coins/markets", 200, "[]"));
        source(transport.clone(), Some("demo-key"))
            .fetch_batch(&["bitcoin".to_string()])
            .unwrap();

        let requests = transport.requests();
        assert_eq!(requests[0].1, vec![(API_KEY_HEADER.to_string(), "demo-key".to_string())]);
        assert!(!requests[0].0.as_str().contains("demo-key"));
    }

    #[test]
    fn rate_limit_and_garbage_map_to_kinds() {
        let limited = Arc::new(StaticTransport::new().route("/api/v3/coins/markets", 429, ""));
        let err = source(limited, None)
            .fetch_batch(&["bitcoin".to_string()])
            .unwrap_err();
        assert_eq!(err.kind(), FeedErrorKind::Transient);

        let garbage = Arc::new(StaticTransport::new().route("/api/v3/coins/markets", 200, "{oops"));
        let err = source(garbage, None)
            .fetch_batch(&["bitcoin".to_string()])
            .unwrap_err();
        assert_eq!(err.kind(), FeedErrorKind::Network);
    }

    #[test]
    fn empty_batch_makes_no_request() {
        let transport = Arc::new(StaticTransport::new());
        assert!(source(transport.clone(), None).fetch_batch(&[]).unwrap().is_empty());
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn fetch_one_reads_usd_fields() {
        let body = r#"{
            "id": "ripple", "symbol": "xrp", "name": "XRP",
            "image": {"large": "https://img/xrp.png"},
            "market_cap_rank": 4,
            "market_data": {
                "current_price": {"usd": 0.6, "eur": 0.55},
                "market_cap": {"usd": 33000000000.0},
                "total_volume": {"usd": 1200000000.0},
                "price_change_percentage_7d_in_currency": {"usd": -2.5},
                "sparkline_7d": {"price": [0.58, 0.6]},
                "last_updated": "2024-03-08T00:00:00Z"
            }
        }"#;
        let transport = Arc::new(StaticTransport::new().route("/api/v3/coins/ripple", 200, body));
        let record = source(transport, None).fetch_one("ripple").unwrap();

        assert_eq!(record.symbol, "ripple");
        assert_eq!(record.ticker, "XRP");
        assert_eq!(record.price, Some(0.6));
        assert_eq!(record.market_cap, Some(3.3e10));
        assert_eq!(record.change("7d"), Some(-2.5));
        assert_eq!(record.change("24h"), None);
        assert_eq!(record.image.as_deref(), Some("https://img/xrp.png"));
        assert_eq!(record.series.len(), 2);
    }

    #[test]
    fn fetch_one_unknown_is_not_found() {
        let transport = Arc::new(StaticTransport::new());
        let err = source(transport, None).fetch_one("no-such-coin").unwrap_err();
        assert_eq!(err.kind(), FeedErrorKind::NotFound);
    }

    #[test]
    fn history_clamps_to_free_window() {
        let body = r#"{"prices": [[2000.0, 2.0], [1000.0, 1.0], [3000.0, null]]}"#;
        let transport = Arc::new(
            StaticTransport::new().route("/api/v3/coins/bitcoin/market_chart/range", 200, body),
        );
        let src = source(transport.clone(), None);
        let now = now_millis();

        let series = src.fetch_history("bitcoin", 0, now).unwrap();
        assert_eq!(series, vec![PricePoint::new(1000, 1.0), PricePoint::new(2000, 2.0)]);

        let requests = transport.requests();
        let from: i64 = requests[0]
            .0
            .query_pairs()
            .find(|(k, _)| k == "from")
            .map(|(_, v)| v.parse().unwrap())
            .unwrap();
        let earliest = (now - CRYPTO_HISTORY_WINDOW_DAYS * DAY_MS) / 1000;
        assert!(from >= earliest - 5);

        // Окно целиком за пределами года: запроса нет.
        assert!(src.fetch_history("bitcoin", 0, 1000).unwrap().is_empty());
        assert_eq!(transport.requests().len(), 1);
    }

    #[test]
    fn summary_reads_global() {
        let body = r#"{"data": {
            "total_market_cap": {"usd": 2500000000000.0},
            "total_volume": {"usd": 90000000000.0},
            "market_cap_percentage": {"eth": 17.2, "btc": 52.1, "usdt": 4.0},
            "market_cap_change_percentage_24h_usd": 1.25
        }}"#;
        let transport = Arc::new(StaticTransport::new().route("/api/v3/global", 200, body));
        let summary = source(transport, None).fetch_summary().unwrap().unwrap();

        assert_eq!(summary.total_market_cap, Some(2.5e12));
        assert_eq!(summary.market_cap_change_24h, Some(1.25));
        assert_eq!(
            summary.dominance,
            vec![("BTC".to_string(), 52.1), ("ETH".to_string(), 17.2)]
        );
    }

    #[test]
    fn cap_falls_back_to_fdv() {
        assert_eq!(cap_or_fdv(Some(10.0), Some(20.0)), Some(10.0));
        assert_eq!(cap_or_fdv(Some(0.0), Some(20.0)), Some(20.0));
        assert_eq!(cap_or_fdv(None, Some(20.0)), Some(20.0));
        assert_eq!(cap_or_fdv(None, None), None);
    }
}

//! Конфигурация конвейера: адреса API, интервалы, списки наблюдения.

use crate::scheduler::SchedulerOptions;
use crate::source::SourceKind;
use commons::errors::FeedError;
use commons::get_ticker_data;
use commons::models::{Horizon, WatchItem};
use log::warn;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Базовый адрес CoinGecko API.
pub const COINGECKO_API: &str = "https://api.coingecko.com/api/v3";

/// Базовый адрес Financial Modeling Prep API.
pub const FMP_API: &str = "https://financialmodelingprep.com/api/v3";

/// Интервал автообновления криптовалют, секунд.
pub const CRYPTO_REFRESH_SECS: u64 = 60;

/// Интервал автообновления акций, секунд (бесплатный тариф FMP — 250 запросов
/// в сутки).
pub const EQUITY_REFRESH_SECS: u64 = 120;

/// Таймаут одного HTTP-запроса, секунд.
pub const REQUEST_TIMEOUT_SECS: u64 = 20;

/// Горизонты изменений по умолчанию для криптовалют.
pub const CRYPTO_HORIZONS: &str = "24h,7d,30d,90d";

/// Горизонты изменений по умолчанию для акций.
pub const EQUITY_HORIZONS: &str = "24h,7d,30d";

/// Горизонт, который FMP отдаёт в котировке напрямую.
pub const NATIVE_EQUITY_HORIZON: &str = "24h";

/// Глубина истории, доступная на бесплатном тарифе CoinGecko, дней.
pub const CRYPTO_HISTORY_WINDOW_DAYS: i64 = 365;

/// Запас к окну истории на выходные и праздники, дней.
pub const HISTORY_PADDING_DAYS: i64 = 5;

/// Окно встроенного sparkline CoinGecko, дней.
pub const SPARKLINE_WINDOW_DAYS: i64 = 7;

/// Название каталога для хранения данных проекта.
pub const DATA_FOLDER: &str = "data";

/// Название каталога с ключами API внутри [`DATA_FOLDER`].
pub const CREDENTIALS_FOLDER: &str = "credentials";

/// Заглушка ключа из шаблона конфигурации, равносильна отсутствию ключа.
pub const PLACEHOLDER_API_KEY: &str = "YOUR_FMP_API_KEY";

/// Полная конфигурация одного конвейера.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Вариант источника.
    pub kind: SourceKind,
    /// Список наблюдения: строки таблицы.
    pub watchlist: Vec<WatchItem>,
    /// Индексы для сводки (только акции).
    pub indices: Vec<WatchItem>,
    /// Горизонты изменений.
    pub horizons: Vec<Horizon>,
    /// Интервал автообновления.
    pub interval: Duration,
    /// Включено ли автообновление.
    pub auto_refresh: bool,
    /// Запустить цикл сразу при старте.
    pub fetch_on_start: bool,
}

impl PipelineConfig {
    /// Конфигурация по умолчанию для выбранного варианта.
    pub fn for_kind(kind: SourceKind) -> Self {
        match kind {
            SourceKind::Crypto => Self::crypto(),
            SourceKind::Equity => Self::equity(),
        }
    }

    /// Криптовалюты CoinGecko.
    pub fn crypto() -> Self {
        Self {
            kind: SourceKind::Crypto,
            watchlist: default_coins(),
            indices: Vec::new(),
            horizons: default_horizons(CRYPTO_HORIZONS),
            interval: Duration::from_secs(CRYPTO_REFRESH_SECS),
            auto_refresh: true,
            fetch_on_start: true,
        }
    }

    /// Акции и индексы FMP.
    pub fn equity() -> Self {
        Self {
            kind: SourceKind::Equity,
            watchlist: default_stocks(),
            indices: default_indices(),
            horizons: default_horizons(EQUITY_HORIZONS),
            interval: Duration::from_secs(EQUITY_REFRESH_SECS),
            auto_refresh: true,
            fetch_on_start: true,
        }
    }

    /// Заменить список наблюдения.
    pub fn with_watchlist(mut self, watchlist: Vec<WatchItem>) -> Self {
        self.watchlist = watchlist;
        self
    }

    /// Заменить горизонты.
    pub fn with_horizons(mut self, horizons: Vec<Horizon>) -> Self {
        self.horizons = horizons;
        self
    }

    /// Заменить интервал обновления.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Проверить согласованность конфигурации.
    ///
    /// ## Ошибки
    ///
    /// [`FeedError::ValueError`] при пустом списке наблюдения, повторяющихся
    /// символах, пустом наборе горизонтов или нулевом интервале.
    pub fn validate(&self) -> Result<(), FeedError> {
        if self.watchlist.is_empty() {
            return Err(FeedError::value_err("список наблюдения пуст"));
        }
        let mut seen = HashSet::new();
        for item in &self.watchlist {
            if item.symbol.trim().is_empty() {
                return Err(FeedError::value_err("пустой символ в списке наблюдения"));
            }
            if !seen.insert(item.symbol.as_str()) {
                return Err(FeedError::value_err(format!(
                    "символ {} повторяется в списке наблюдения",
                    item.symbol
                )));
            }
        }
        if self.horizons.is_empty() {
            return Err(FeedError::value_err("не задано ни одного горизонта"));
        }
        if self.interval.is_zero() {
            return Err(FeedError::value_err("интервал обновления должен быть больше нуля"));
        }
        Ok(())
    }

    /// Параметры планировщика.
    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            interval: self.interval,
            auto_refresh: self.auto_refresh,
            fetch_on_start: self.fetch_on_start,
        }
    }
}

fn default_horizons(list: &str) -> Vec<Horizon> {
    Horizon::parse_list(list).unwrap_or_default()
}

/// Монеты по умолчанию с ценой при TGE.
pub fn default_coins() -> Vec<WatchItem> {
    vec![
        WatchItem::named("bitcoin", "BTC", "Bitcoin").with_baseline(0.0008, "2009-01"),
        WatchItem::named("ethereum", "ETH", "Ethereum").with_baseline(0.311, "2015-07"),
        WatchItem::named("ripple", "XRP", "XRP").with_baseline(0.006, "2013-08"),
    ]
}

/// Крупнейшие компании мира по капитализации.
pub fn default_stocks() -> Vec<WatchItem> {
    [
        ("NVDA", "NVIDIA"),
        ("AAPL", "Apple"),
        ("GOOGL", "Alphabet"),
        ("MSFT", "Microsoft"),
        ("AMZN", "Amazon"),
        ("META", "Meta Platforms"),
        ("TSLA", "Tesla"),
        ("TSM", "TSMC"),
        ("BRK-B", "Berkshire Hathaway"),
        ("AVGO", "Broadcom"),
        ("LLY", "Eli Lilly"),
        ("WMT", "Walmart"),
        ("JPM", "JPMorgan Chase"),
        ("V", "Visa"),
        ("MA", "Mastercard"),
        ("UNH", "UnitedHealth"),
        ("XOM", "Exxon Mobil"),
        ("COST", "Costco"),
        ("JNJ", "Johnson & Johnson"),
        ("ASML", "ASML Holdings"),
    ]
    .into_iter()
    .map(|(symbol, name)| WatchItem::named(symbol, symbol, name))
    .collect()
}

/// Индексы и фьючерсы для баннера сводки.
pub fn default_indices() -> Vec<WatchItem> {
    [
        ("^DJI", "Dow Jones", "US"),
        ("^GSPC", "S&P 500", "US"),
        ("^IXIC", "Nasdaq", "US"),
        ("YM=F", "Dow Futures", "US Futures"),
        ("ES=F", "S&P Futures", "US Futures"),
        ("NQ=F", "Nasdaq Futures", "US Futures"),
        ("399001.SZ", "Shenzhen", "China"),
        ("^HSI", "Hang Seng", "China"),
        ("^KS11", "KOSPI", "Korea"),
        ("^KQ11", "KOSDAQ", "Korea"),
    ]
    .into_iter()
    .map(|(symbol, name, group)| WatchItem::named(symbol, symbol, name).in_group(group))
    .collect()
}

/// Загрузить список наблюдения из файла.
///
/// Файл `*.json` — массив объектов [`WatchItem`]; любой другой — текст,
/// один символ на строку (см. [`get_ticker_data`]). Повторы символов
/// отбрасываются с предупреждением в логе.
pub fn load_watchlist(path: &Path) -> Result<Vec<WatchItem>, FeedError> {
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    let items: Vec<WatchItem> = if is_json {
        let raw = fs::read_to_string(path)
            .map_err(|e| FeedError::io_err(format!("не удалось прочитать {}: {e}", path.display())))?;
        serde_json::from_str(&raw).map_err(|e| {
            FeedError::value_err(format!("некорректный список {}: {e}", path.display()))
        })?
    } else {
        get_ticker_data(path)?
            .unwrap_or_default()
            .into_iter()
            .map(WatchItem::symbol)
            .collect()
    };

    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(items.len());
    for item in items {
        if seen.insert(item.symbol.clone()) {
            unique.push(item);
        } else {
            warn!("Символ {} повторяется в {}, пропущен", item.symbol, path.display());
        }
    }

    if unique.is_empty() {
        return Err(FeedError::value_err(format!(
            "список наблюдения {} пуст",
            path.display()
        )));
    }
    Ok(unique)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        assert!(PipelineConfig::crypto().validate().is_ok());
        assert!(PipelineConfig::equity().validate().is_ok());
        assert_eq!(PipelineConfig::equity().watchlist.len(), 20);
        assert_eq!(PipelineConfig::equity().indices.len(), 10);
        assert_eq!(
            PipelineConfig::crypto().interval,
            Duration::from_secs(CRYPTO_REFRESH_SECS)
        );
    }

    #[test]
    fn validate_rejects_duplicates_and_empty() {
        let dup = PipelineConfig::crypto()
            .with_watchlist(vec![WatchItem::symbol("bitcoin"), WatchItem::symbol("bitcoin")]);
        assert!(dup.validate().is_err());

        let empty = PipelineConfig::crypto().with_watchlist(Vec::new());
        assert!(empty.validate().is_err());

        let zero = PipelineConfig::crypto().with_interval(Duration::ZERO);
        assert!(zero.validate().is_err());

        let no_horizons = PipelineConfig::crypto().with_horizons(Vec::new());
        assert!(no_horizons.validate().is_err());
    }

    #[test]
    fn load_json_watchlist() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"[{{"symbol": "solana", "ticker": "SOL", "baseline": 0.22}}, {{"symbol": "solana"}}, {{"symbol": "dogecoin"}}]"#
        )
        .unwrap();

        let items = load_watchlist(file.path()).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].ticker.as_deref(), Some("SOL"));
        assert_eq!(items[0].baseline, Some(0.22));
        assert_eq!(items[1].symbol, "dogecoin");
    }

    #[test]
    fn load_text_watchlist() {
        let mut file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        writeln!(file, "AAPL\nMSFT\n# comment\nAAPL").unwrap();

        let items = load_watchlist(file.path()).unwrap();
        let symbols: Vec<&str> = items.iter().map(|i| i.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["AAPL", "MSFT"]);
    }

    #[test]
    fn load_rejects_empty_and_broken() {
        let empty = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        assert!(load_watchlist(empty.path()).is_err());

        let mut broken = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(broken, "{{not json").unwrap();
        assert!(matches!(
            load_watchlist(broken.path()),
            Err(FeedError::ValueError(_))
        ));
    }
}

//! Модели данных конвейера котировок.

use crate::errors::FeedError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Ранг-заглушка: строка без ранга сортируется после всех ранжированных.
pub const UNRANKED: u32 = u32::MAX;

/// Миллисекунд в часе.
const HOUR_MS: i64 = 60 * 60 * 1000;

/// Миллисекунд в сутках.
pub const DAY_MS: i64 = 24 * HOUR_MS;

/// Точка ценового ряда.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Временная метка в миллисекундах от начала эпохи UNIX.
    pub timestamp: i64,
    /// Цена в этот момент.
    pub price: f64,
}

impl PricePoint {
    pub fn new(timestamp: i64, price: f64) -> Self {
        Self { timestamp, price }
    }
}

/// Горизонт изменения цены: `24h`, `7d`, `1y` и т.п.
///
/// ## Пример
///
/// ```
/// use commons::models::{Horizon, DAY_MS};
///
/// let h: Horizon = "7d".parse().unwrap();
/// assert_eq!(h.label(), "7d");
/// assert_eq!(h.span_ms(), 7 * DAY_MS);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Horizon {
    label: String,
    span_ms: i64,
}

impl Horizon {
    /// Метка горизонта в нормализованном виде (`"30d"`).
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Длительность горизонта в миллисекундах.
    pub fn span_ms(&self) -> i64 {
        self.span_ms
    }

    /// Разобрать список горизонтов через запятую: `"24h,7d,30d"`.
    pub fn parse_list(s: &str) -> Result<Vec<Horizon>, FeedError> {
        s.split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(Horizon::from_str)
            .collect()
    }
}

impl FromStr for Horizon {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let label = s.trim().to_lowercase();
        let split = label.char_indices().last().map(|(i, _)| i).unwrap_or(0);
        let (count, unit) = label.split_at(split);

        let count: i64 = count
            .parse()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| FeedError::value_err(format!("некорректный горизонт: {s}")))?;

        let unit_ms = match unit {
            "h" => HOUR_MS,
            "d" => DAY_MS,
            "y" => 365 * DAY_MS,
            _ => return Err(FeedError::value_err(format!("неизвестная единица горизонта: {s}"))),
        };

        let span_ms = count
            .checked_mul(unit_ms)
            .ok_or_else(|| FeedError::value_err(format!("слишком длинный горизонт: {s}")))?;

        Ok(Self { span_ms, label })
    }
}

impl TryFrom<String> for Horizon {
    type Error = FeedError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Horizon> for String {
    fn from(value: Horizon) -> Self {
        value.label
    }
}

impl Display for Horizon {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label)
    }
}

/// Элемент списка наблюдения: символ и его статическое описание.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchItem {
    /// Идентификатор у провайдера (`bitcoin`, `AAPL`, `^GSPC`).
    pub symbol: String,
    /// Короткий код для отображения (`BTC`).
    #[serde(default)]
    pub ticker: Option<String>,
    /// Отображаемое имя.
    #[serde(default)]
    pub name: Option<String>,
    /// Базовая цена (например, цена при TGE) для расчёта отношения.
    #[serde(default)]
    pub baseline: Option<f64>,
    /// Справочная дата базовой цены, только для отображения.
    #[serde(default)]
    pub baseline_date: Option<String>,
    /// Группа в баннере индексов (`US`, `Korea`).
    #[serde(default)]
    pub group: Option<String>,
}

impl WatchItem {
    /// Элемент только с символом.
    pub fn symbol(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            ticker: None,
            name: None,
            baseline: None,
            baseline_date: None,
            group: None,
        }
    }

    /// Элемент с кодом и именем.
    pub fn named(symbol: &str, ticker: &str, name: &str) -> Self {
        Self {
            ticker: Some(ticker.to_string()),
            name: Some(name.to_string()),
            ..Self::symbol(symbol)
        }
    }

    /// Добавить базовую цену.
    pub fn with_baseline(mut self, price: f64, date: &str) -> Self {
        self.baseline = Some(price);
        self.baseline_date = Some(date.to_string());
        self
    }

    /// Указать группу.
    pub fn in_group(mut self, group: &str) -> Self {
        self.group = Some(group.to_string());
        self
    }

    /// Код для отображения: явный или символ в верхнем регистре.
    pub fn display_ticker(&self) -> String {
        self.ticker
            .clone()
            .unwrap_or_else(|| self.symbol.to_uppercase())
    }

    /// Имя для отображения: явное или символ.
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.symbol.clone())
    }
}

/// Строка итоговой таблицы.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteRecord {
    /// Идентификатор у провайдера, уникален в пределах [`Snapshot`].
    pub symbol: String,
    /// Отображаемое имя.
    pub display_name: String,
    /// Короткий код.
    pub ticker: String,
    /// Ссылка на логотип.
    pub image: Option<String>,
    /// Текущая цена. `None` — данных нет (никогда не ноль вместо отсутствия).
    pub price: Option<f64>,
    /// Рыночная капитализация.
    pub market_cap: Option<f64>,
    /// Объём торгов за 24 часа.
    pub volume: Option<f64>,
    /// Процентные изменения по меткам горизонтов.
    pub changes: BTreeMap<String, Option<f64>>,
    /// Ранг для сортировки, [`UNRANKED`] если неизвестен.
    pub rank: u32,
    /// Недавний ценовой ряд (для sparkline и расчёта изменений).
    pub series: Vec<PricePoint>,
    /// Отношение цены к базовой цене из конфигурации.
    pub reference_ratio: Option<f64>,
}

impl QuoteRecord {
    /// Пустая запись: без цены, без ранга.
    pub fn new(symbol: impl Into<String>) -> Self {
        let symbol = symbol.into();
        Self {
            display_name: symbol.clone(),
            ticker: symbol.to_uppercase(),
            symbol,
            image: None,
            price: None,
            market_cap: None,
            volume: None,
            changes: BTreeMap::new(),
            rank: UNRANKED,
            series: Vec::new(),
            reference_ratio: None,
        }
    }

    /// Изменение по горизонту, если оно известно.
    pub fn change(&self, label: &str) -> Option<f64> {
        self.changes.get(label).copied().flatten()
    }

    /// Есть ли у строки ранг.
    pub fn is_ranked(&self) -> bool {
        self.rank != UNRANKED
    }

    /// Цены ряда без временных меток (для sparkline).
    pub fn series_prices(&self) -> Vec<f64> {
        self.series.iter().map(|p| p.price).collect()
    }
}

/// Котировка индекса для баннера.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexQuote {
    pub symbol: String,
    pub name: String,
    pub group: Option<String>,
    pub level: Option<f64>,
    pub change: Option<f64>,
    pub change_pct: Option<f64>,
}

/// Сводка по рынку, не привязанная к одному символу.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketSummary {
    /// Суммарная капитализация рынка.
    pub total_market_cap: Option<f64>,
    /// Суммарный объём торгов за 24 часа.
    pub total_volume: Option<f64>,
    /// Изменение капитализации за 24 часа, %.
    pub market_cap_change_24h: Option<f64>,
    /// Доли рынка: (код, %).
    pub dominance: Vec<(String, f64)>,
    /// Котировки индексов.
    pub indices: Vec<IndexQuote>,
    /// Время получения, мс.
    pub captured_at: i64,
}

/// Опубликованный срез данных.
///
/// Неизменяем после публикации: любое обновление порождает новый срез.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Строки, уже отсортированные по рангу.
    pub records: Vec<QuoteRecord>,
    /// Время формирования, мс.
    pub captured_at: i64,
    /// Сводка по рынку.
    pub summary: Option<MarketSummary>,
}

impl Snapshot {
    /// Найти строку по символу.
    pub fn get(&self, symbol: &str) -> Option<&QuoteRecord> {
        self.records.iter().find(|r| r.symbol == symbol)
    }

    /// Символы в порядке сортировки.
    pub fn symbols(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.symbol.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Новый срез с заменённой сводкой.
    pub fn with_summary(&self, summary: Option<MarketSummary>) -> Snapshot {
        Snapshot {
            summary,
            ..self.clone()
        }
    }
}

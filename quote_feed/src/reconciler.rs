//! Сведение пакетного ответа, запасных запросов и предыдущего среза в новый
//! [`Snapshot`].
//!
//! Все функции модуля чистые: они не обращаются к сети и не меняют
//! переданные срезы.

use crate::config::PipelineConfig;
use commons::errors::FeedError;
use commons::models::{Horizon, QuoteRecord, Snapshot, UNRANKED, WatchItem};
use log::{debug, warn};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Изменения по горизонтам для одного символа, вычисленные по истории.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryPatch {
    pub symbol: String,
    pub changes: BTreeMap<String, Option<f64>>,
}

/// Правила сведения для одного списка наблюдения.
#[derive(Debug, Clone)]
pub struct Reconciler {
    watchlist: Vec<WatchItem>,
    horizons: Vec<Horizon>,
    derived: Vec<Horizon>,
}

impl Reconciler {
    /// ## Args
    ///
    /// - `watchlist` — настроенные символы
    /// - `horizons` — все горизонты таблицы
    /// - `derived` — горизонты, вычисляемые по истории (значения для них
    ///   переносятся из предыдущего среза, пока история не догружена)
    pub fn new(watchlist: Vec<WatchItem>, horizons: Vec<Horizon>, derived: Vec<Horizon>) -> Self {
        Self {
            watchlist,
            horizons,
            derived,
        }
    }

    pub fn from_config(config: &PipelineConfig, derived: Vec<Horizon>) -> Self {
        Self::new(config.watchlist.clone(), config.horizons.clone(), derived)
    }

    /// Настроенные символы в порядке списка.
    pub fn symbols(&self) -> Vec<String> {
        self.watchlist.iter().map(|i| i.symbol.clone()).collect()
    }

    pub fn derived(&self) -> &[Horizon] {
        &self.derived
    }

    /// Настроенные символы, которых нет в пакетном ответе.
    pub fn gaps(&self, batch: &[QuoteRecord]) -> Vec<String> {
        let present: HashSet<String> = batch.iter().map(|r| r.symbol.to_lowercase()).collect();
        self.watchlist
            .iter()
            .filter(|i| !present.contains(&i.symbol.to_lowercase()))
            .map(|i| i.symbol.clone())
            .collect()
    }

    /// Собрать новый срез.
    ///
    /// 1. Строки пакета для настроенных символов (повторы и чужие символы
    ///    отбрасываются, первая строка выигрывает).
    /// 2. Пропущенные символы из `fallbacks` с рангом [`UNRANKED`]; неудачный
    ///    или отсутствующий запасной запрос убирает символ из этого цикла.
    /// 3. Вычисляемые горизонты и сводка переносятся из `prior`.
    /// 4. Отношение к базовой цене.
    /// 5. Устойчивая сортировка по рангу.
    pub fn reconcile(
        &self,
        batch: Vec<QuoteRecord>,
        fallbacks: &HashMap<String, Result<QuoteRecord, FeedError>>,
        prior: Option<&Snapshot>,
        captured_at: i64,
    ) -> Snapshot {
        let configured: HashMap<String, &WatchItem> = self
            .watchlist
            .iter()
            .map(|i| (i.symbol.to_lowercase(), i))
            .collect();

        let mut seen: HashSet<String> = HashSet::new();
        let mut records = Vec::with_capacity(self.watchlist.len());

        for record in batch {
            let key = record.symbol.to_lowercase();
            let Some(item) = configured.get(&key) else {
                debug!("Символ {} не настроен, пропущен", record.symbol);
                continue;
            };
            if !seen.insert(key) {
                debug!("Повтор символа {} в пакете, пропущен", record.symbol);
                continue;
            }
            records.push(self.finish(record, item, prior));
        }

        for item in &self.watchlist {
            if seen.contains(&item.symbol.to_lowercase()) {
                continue;
            }
            match fallbacks.get(&item.symbol) {
                Some(Ok(record)) => {
                    let mut record = record.clone();
                    record.rank = UNRANKED;
                    seen.insert(item.symbol.to_lowercase());
                    records.push(self.finish(record, item, prior));
                }
                Some(Err(err)) => warn!("Символ {} пропущен в этом цикле: {err}", item.symbol),
                None => warn!("Нет данных для символа {}", item.symbol),
            }
        }

        records.sort_by_key(|r| r.rank);

        Snapshot {
            records,
            captured_at,
            summary: prior.and_then(|p| p.summary.clone()),
        }
    }

    /// Дополнить строку данными списка наблюдения и предыдущего среза.
    fn finish(&self, mut record: QuoteRecord, item: &WatchItem, prior: Option<&Snapshot>) -> QuoteRecord {
        record.symbol = item.symbol.clone();
        if let Some(ticker) = &item.ticker {
            record.ticker = ticker.clone();
        }
        if record.display_name.trim().is_empty() || record.display_name == record.symbol {
            record.display_name = item.display_name();
        }

        for horizon in &self.horizons {
            record.changes.entry(horizon.label().to_string()).or_insert(None);
        }

        if let Some(previous) = prior.and_then(|p| p.get(&record.symbol)) {
            for horizon in &self.derived {
                let label = horizon.label();
                if record.change(label).is_none()
                    && let Some(value) = previous.change(label)
                {
                    record.changes.insert(label.to_string(), Some(value));
                }
            }
        }

        record.reference_ratio = match (item.baseline, record.price) {
            (Some(base), Some(price)) if base > 0.0 && price.is_finite() => Some(price / base),
            _ => None,
        };
        record
    }

    /// Новый срез, в котором обновлены только изменения по горизонтам.
    ///
    /// Символы, которых уже нет в срезе, молча пропускаются. Отсутствующие в
    /// заплатке значения (`None`) не затирают уже известные.
    pub fn patch_changes(latest: &Snapshot, patches: &[HistoryPatch]) -> Snapshot {
        let mut next = latest.clone();
        for patch in patches {
            let Some(record) = next.records.iter_mut().find(|r| r.symbol == patch.symbol) else {
                continue;
            };
            for (label, value) in &patch.changes {
                if value.is_some() {
                    record.changes.insert(label.clone(), *value);
                } else {
                    record.changes.entry(label.clone()).or_insert(None);
                }
            }
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commons::format::{format_magnitude, format_percent};
    use commons::models::MarketSummary;

    fn record(symbol: &str, price: f64, rank: u32) -> QuoteRecord {
        let mut r = QuoteRecord::new(symbol);
        r.price = Some(price);
        r.rank = rank;
        r
    }

    fn reconciler(symbols: &[&str]) -> Reconciler {
        Reconciler::new(
            symbols.iter().map(|s| WatchItem::symbol(*s)).collect(),
            Horizon::parse_list("24h,7d").unwrap(),
            Horizon::parse_list("7d").unwrap(),
        )
    }

    #[test]
    fn fallback_fills_gap_unranked_last() {
        let rec = reconciler(&["A", "B", "C"]);
        let batch = vec![record("B", 2.0, 2), record("A", 1.0, 1)];
        assert_eq!(rec.gaps(&batch), vec!["C".to_string()]);

        let fallbacks = HashMap::from([("C".to_string(), Ok(record("C", 3.0, 7)))]);
        let snap = rec.reconcile(batch, &fallbacks, None, 10);

        assert_eq!(snap.symbols(), vec!["A", "B", "C"]);
        assert_eq!(snap.get("C").unwrap().rank, UNRANKED);
        assert_eq!(snap.captured_at, 10);
    }

    #[test]
    fn failed_fallback_drops_symbol_only() {
        let rec = reconciler(&["A", "B", "C"]);
        let batch = vec![record("A", 1.0, 1), record("B", 2.0, 2)];
        let fallbacks = HashMap::from([(
            "C".to_string(),
            Err(FeedError::not_found_err("C")),
        )]);

        let snap = rec.reconcile(batch, &fallbacks, None, 0);
        assert_eq!(snap.symbols(), vec!["A", "B"]);
    }

    #[test]
    fn end_to_end_crypto_table() {
        let rec = Reconciler::new(
            vec![
                WatchItem::named("bitcoin", "BTC", "Bitcoin"),
                WatchItem::named("ethereum", "ETH", "Ethereum"),
                WatchItem::named("ripple", "XRP", "XRP"),
            ],
            Horizon::parse_list("24h").unwrap(),
            Vec::new(),
        );
        let mut btc = record("bitcoin", 50000.0, 1);
        btc.market_cap = Some(1.5e12);
        btc.changes.insert("24h".to_string(), Some(-3.456));
        let eth = record("ethereum", 3000.0, 2);

        let snap = rec.reconcile(vec![btc, eth], &HashMap::new(), None, 0);
        assert_eq!(snap.symbols(), vec!["bitcoin", "ethereum"]);
        assert_eq!(snap.records[0].ticker, "BTC");
        assert_eq!(snap.records[1].display_name, "Ethereum");
        assert_eq!(format_magnitude(snap.records[0].market_cap), "$1.50T");
        assert_eq!(format_percent(snap.records[0].change("24h")), "-3.46%");
    }

    #[test]
    fn duplicates_and_unknown_symbols_ignored() {
        let rec = reconciler(&["A"]);
        let batch = vec![record("A", 1.0, 1), record("A", 9.0, 1), record("Z", 5.0, 1)];
        let snap = rec.reconcile(batch, &HashMap::new(), None, 0);
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.records[0].price, Some(1.0));
    }

    #[test]
    fn symbols_match_case_insensitively() {
        let rec = reconciler(&["aapl"]);
        let snap = rec.reconcile(vec![record("AAPL", 1.0, 1)], &HashMap::new(), None, 0);
        assert_eq!(snap.symbols(), vec!["aapl"]);
    }

    #[test]
    fn stable_sort_keeps_batch_order_on_equal_rank() {
        let rec = reconciler(&["A", "B", "C"]);
        let batch = vec![
            record("C", 3.0, UNRANKED),
            record("B", 2.0, 5),
            record("A", 1.0, UNRANKED),
        ];
        let snap = rec.reconcile(batch, &HashMap::new(), None, 0);
        assert_eq!(snap.symbols(), vec!["B", "C", "A"]);
    }

    #[test]
    fn derived_horizons_and_summary_carry_forward() {
        let rec = reconciler(&["A"]);
        let mut old = record("A", 1.0, 1);
        old.changes.insert("7d".to_string(), Some(4.0));
        old.changes.insert("24h".to_string(), Some(1.0));
        let prior = Snapshot {
            records: vec![old],
            captured_at: 1,
            summary: Some(MarketSummary {
                total_market_cap: Some(5.0),
                ..MarketSummary::default()
            }),
        };

        let snap = rec.reconcile(vec![record("A", 2.0, 1)], &HashMap::new(), Some(&prior), 2);
        let a = snap.get("A").unwrap();
        assert_eq!(a.change("7d"), Some(4.0));
        // Горизонт от провайдера не переносится.
        assert_eq!(a.change("24h"), None);
        assert!(a.changes.contains_key("24h"));
        assert_eq!(snap.summary.unwrap().total_market_cap, Some(5.0));
    }

    #[test]
    fn reference_ratio_needs_positive_baseline() {
        let rec = Reconciler::new(
            vec![
                WatchItem::symbol("btc").with_baseline(0.0008, "2009-01"),
                WatchItem::symbol("zero").with_baseline(0.0, "2020-01"),
                WatchItem::symbol("none"),
            ],
            Vec::new(),
            Vec::new(),
        );
        let batch = vec![
            record("btc", 50000.0, 1),
            record("zero", 1.0, 2),
            record("none", 1.0, 3),
        ];
        let snap = rec.reconcile(batch, &HashMap::new(), None, 0);
        let ratio = snap.get("btc").unwrap().reference_ratio.unwrap();
        assert!((ratio - 62_500_000.0).abs() < 1e-3);
        assert_eq!(snap.get("zero").unwrap().reference_ratio, None);
        assert_eq!(snap.get("none").unwrap().reference_ratio, None);
    }

    #[test]
    fn patch_touches_only_changes_of_present_symbols() {
        let rec = reconciler(&["A", "B"]);
        let mut a = record("A", 1.0, 1);
        a.changes.insert("7d".to_string(), Some(1.0));
        let latest = rec.reconcile(vec![a, record("B", 2.0, 2)], &HashMap::new(), None, 5);

        let patches = vec![
            HistoryPatch {
                symbol: "A".to_string(),
                changes: BTreeMap::from([("7d".to_string(), None)]),
            },
            HistoryPatch {
                symbol: "B".to_string(),
                changes: BTreeMap::from([("7d".to_string(), Some(-2.0))]),
            },
            HistoryPatch {
                symbol: "GONE".to_string(),
                changes: BTreeMap::from([("7d".to_string(), Some(9.0))]),
            },
        ];
        let patched = Reconciler::patch_changes(&latest, &patches);

        assert_eq!(patched.get("A").unwrap().change("7d"), Some(1.0));
        assert_eq!(patched.get("B").unwrap().change("7d"), Some(-2.0));
        assert_eq!(patched.get("B").unwrap().price, Some(2.0));
        assert_eq!(patched.captured_at, 5);
        assert_eq!(patched.len(), 2);
        // Исходный срез не изменился.
        assert_eq!(latest.get("B").unwrap().change("7d"), None);
    }
}

//! Отрисовка среза в текст для терминала.
//!
//! Панель только читает [`Snapshot`]: все значения проходят через
//! форматтеры из [`commons::format`].

use crate::config::{NAME_WIDTH, SPARKLINE_WIDTH};
use chrono::{DateTime, Local};
use commons::errors::{FeedError, FeedErrorKind};
use commons::format::{
    NO_DATA, format_index_level, format_magnitude, format_percent, format_price, format_ratio,
    format_signed,
};
use commons::models::{Horizon, MarketSummary, QuoteRecord, Snapshot};
use quote_feed::{RefreshState, SourceKind};

const SPARK_LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Панель целиком: сводка, таблица, строка состояния.
pub fn render_board(state: &RefreshState, kind: SourceKind, horizons: &[Horizon]) -> String {
    let mut lines = Vec::new();
    lines.push(title(kind));

    if let Some(snapshot) = &state.last_snapshot {
        if let Some(summary) = &snapshot.summary {
            lines.extend(render_summary(summary));
            lines.push(String::new());
        }
        lines.extend(render_table(snapshot, horizons));
    } else {
        lines.push("Данных пока нет".to_string());
    }

    lines.push(String::new());
    lines.push(render_status(state));
    lines.join("\n")
}

fn title(kind: SourceKind) -> String {
    match kind {
        SourceKind::Crypto => "Crypto Market · CoinGecko".to_string(),
        SourceKind::Equity => "Stock Market · Financial Modeling Prep".to_string(),
    }
}

/// Сводка: рынок криптовалют и (или) баннер индексов по группам.
pub fn render_summary(summary: &MarketSummary) -> Vec<String> {
    let mut lines = Vec::new();

    if summary.total_market_cap.is_some() || summary.total_volume.is_some() {
        let dominance = summary
            .dominance
            .iter()
            .map(|(code, share)| format!("{code} {share:.1}%"))
            .collect::<Vec<_>>()
            .join(" ");
        lines.push(format!(
            "Market Cap {} ({}) | Volume 24h {} | {}",
            format_magnitude(summary.total_market_cap),
            format_percent(summary.market_cap_change_24h),
            format_magnitude(summary.total_volume),
            if dominance.is_empty() { NO_DATA.to_string() } else { dominance }
        ));
    }

    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    for index in &summary.indices {
        let group = index.group.clone().unwrap_or_default();
        let cell = format!(
            "{} {} {} ({})",
            index.name,
            format_index_level(index.level),
            format_signed(index.change),
            format_percent(index.change_pct)
        );
        match groups.iter_mut().find(|(name, _)| *name == group) {
            Some((_, cells)) => cells.push(cell),
            None => groups.push((group, vec![cell])),
        }
    }
    for (group, cells) in groups {
        if group.is_empty() {
            lines.push(cells.join(" | "));
        } else {
            lines.push(format!("{group}: {}", cells.join(" | ")));
        }
    }
    lines
}

/// Таблица котировок в порядке среза.
pub fn render_table(snapshot: &Snapshot, horizons: &[Horizon]) -> Vec<String> {
    let with_ratio = snapshot.records.iter().any(|r| r.reference_ratio.is_some());
    let with_spark = snapshot.records.iter().any(|r| r.series.len() > 1);

    let mut header = format!("{:>4}  {:<w$} {:<6} {:>14}", "#", "Name", "Ticker", "Price", w = NAME_WIDTH);
    for h in horizons {
        header.push_str(&format!(" {:>9}", h.label()));
    }
    header.push_str(&format!(" {:>10} {:>10}", "MCap", "Volume"));
    if with_ratio {
        header.push_str(&format!(" {:>10}", "x Base"));
    }
    if with_spark {
        header.push_str(&format!("  {}", "Trend"));
    }

    let mut lines = vec![header];
    for (pos, record) in snapshot.records.iter().enumerate() {
        lines.push(render_row(pos, record, horizons, with_ratio, with_spark));
    }
    lines
}

fn render_row(
    pos: usize,
    record: &QuoteRecord,
    horizons: &[Horizon],
    with_ratio: bool,
    with_spark: bool,
) -> String {
    let rank = if record.is_ranked() {
        record.rank.to_string()
    } else {
        format!("{}", pos + 1)
    };
    let mut row = format!(
        "{:>4}  {:<w$} {:<6} {:>14}",
        rank,
        truncate(&record.display_name, NAME_WIDTH),
        truncate(&record.ticker, 6),
        format_price(record.price),
        w = NAME_WIDTH
    );
    for h in horizons {
        row.push_str(&format!(" {:>9}", format_percent(record.change(h.label()))));
    }
    row.push_str(&format!(
        " {:>10} {:>10}",
        format_magnitude(record.market_cap),
        format_magnitude(record.volume)
    ));
    if with_ratio {
        row.push_str(&format!(" {:>10}", format_ratio(record.reference_ratio)));
    }
    if with_spark {
        row.push_str(&format!("  {}", sparkline(&record.series_prices(), SPARKLINE_WIDTH)));
    }
    row
}

/// Строка состояния конвейера.
pub fn render_status(state: &RefreshState) -> String {
    let updated = state
        .last_success_at
        .and_then(DateTime::from_timestamp_millis)
        .map(|dt| dt.with_timezone(&Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| NO_DATA.to_string());
    let auto = if state.auto_refresh { "вкл" } else { "выкл" };

    let mut line = format!(
        "[{}] обновлено {} | автообновление {} | r: обновить, a: авто, q: выход",
        state.status, updated, auto
    );
    if let Some(err) = &state.last_error {
        line.push_str(&format!("\n{}", error_hint(err)));
    }
    line
}

/// Понятное пользователю описание ошибки цикла.
pub fn error_hint(err: &FeedError) -> String {
    match err.kind() {
        FeedErrorKind::Auth => format!(
            "Ключ API не задан или отклонён ({err}). Сохраните ключ: qboard key set <crypto|equity> <KEY>"
        ),
        FeedErrorKind::Transient => {
            format!("Провайдер ограничил частоту запросов, повтор при следующем обновлении ({err})")
        }
        FeedErrorKind::Network => format!("Провайдер недоступен, повтор при следующем обновлении ({err})"),
        _ => format!("Ошибка обновления: {err}"),
    }
}

/// Мини-график из блочных символов, не длиннее `width`.
///
/// ## Пример
///
/// ```ignore
/// assert_eq!(sparkline(&[1.0, 2.0, 3.0], 8), "▁▅█");
/// ```
pub fn sparkline(prices: &[f64], width: usize) -> String {
    let values: Vec<f64> = prices.iter().copied().filter(|p| p.is_finite()).collect();
    if values.len() < 2 || width == 0 {
        return String::new();
    }

    // Прореживание до ширины колонки.
    let sampled: Vec<f64> = if values.len() > width {
        (0..width)
            .map(|i| values[i * (values.len() - 1) / (width - 1).max(1)])
            .collect()
    } else {
        values
    };

    let min = sampled.iter().copied().fold(f64::INFINITY, f64::min);
    let max = sampled.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    let top = (SPARK_LEVELS.len() - 1) as f64;

    sampled
        .iter()
        .map(|v| {
            let level = if range > 0.0 {
                ((v - min) / range * top).round() as usize
            } else {
                SPARK_LEVELS.len() / 2
            };
            SPARK_LEVELS[level.min(SPARK_LEVELS.len() - 1)]
        })
        .collect()
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        return s.to_string();
    }
    let mut out: String = s.chars().take(width.saturating_sub(1)).collect();
    out.push('…');
    out
}

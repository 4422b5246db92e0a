//! Поиск по историческому ценовому ряду.
//!
//! Провайдер акций не отдаёт готовых изменений за 7 и 30 дней, поэтому цена
//! «N дней назад» берётся как ближайшая по времени точка ряда. Ряд может
//! быть неупорядоченным и содержать пропуски (выходные, праздники).

use crate::models::{Horizon, PricePoint};
use std::collections::BTreeMap;

/// Цена точки, ближайшей по времени к `target`.
///
/// При равном расстоянии выбирается точка, встретившаяся первой. Для пустого
/// ряда возвращает `None`.
///
/// ## Пример
///
/// ```
/// use commons::history::closest_sample;
/// use commons::models::PricePoint;
///
/// let series = [PricePoint::new(10, 1.0), PricePoint::new(20, 2.0)];
/// assert_eq!(closest_sample(&series, 18), Some(2.0));
/// assert_eq!(closest_sample(&[], 18), None);
/// ```
pub fn closest_sample(series: &[PricePoint], target: i64) -> Option<f64> {
    let mut best: Option<(u64, f64)> = None;
    for point in series {
        let distance = point.timestamp.abs_diff(target);
        match best {
            Some((min, _)) if distance >= min => {}
            _ => best = Some((distance, point.price)),
        }
    }
    best.map(|(_, price)| price)
}

/// Изменение в процентах от `past` к `current`.
///
/// `None`, если одно из значений отсутствует, или `past` равен нулю.
pub fn pct_change(current: Option<f64>, past: Option<f64>) -> Option<f64> {
    let (current, past) = (current?, past?);
    if past == 0.0 || !past.is_finite() || !current.is_finite() {
        return None;
    }
    Some((current - past) / past * 100.0)
}

/// Изменения по каждому горизонту относительно момента `now`.
///
/// Для пустого ряда все значения `None`.
pub fn derive_changes(
    current: Option<f64>,
    series: &[PricePoint],
    now: i64,
    horizons: &[Horizon],
) -> BTreeMap<String, Option<f64>> {
    horizons
        .iter()
        .map(|h| {
            let past = closest_sample(series, now.saturating_sub(h.span_ms()));
            (h.label().to_string(), pct_change(current, past))
        })
        .collect()
}

//! Форматирование числовых величин для отображения.
//!
//! Все функции тотальны: принимают `Option<f64>`, никогда не паникуют и для
//! отсутствующих или нечисловых (`NaN`, `inf`) значений возвращают
//! [`NO_DATA`].

/// Заглушка «нет данных».
pub const NO_DATA: &str = "\u{2014}";

/// Цена с точностью, зависящей от порядка величины.
///
/// - `≥ 1000` — разделители тысяч и 2 знака (`$50,000.00`)
/// - `≥ 1` — 2 знака (`$3.14`)
/// - `≥ 0.01` — 4 знака (`$0.0123`)
/// - меньше — 6 знаков (`$0.000800`)
///
/// ## Пример
///
/// ```
/// use commons::format::format_price;
///
/// assert_eq!(format_price(Some(50_000.0)), "$50,000.00");
/// assert_eq!(format_price(Some(0.0008)), "$0.000800");
/// assert_eq!(format_price(None), "\u{2014}");
/// ```
pub fn format_price(value: Option<f64>) -> String {
    let Some(p) = finite(value) else {
        return NO_DATA.to_string();
    };
    let abs = p.abs();
    let body = if abs >= 1000.0 {
        group_fixed(abs, 2)
    } else if abs >= 1.0 {
        format!("{:.2}", abs)
    } else if abs >= 0.01 {
        format!("{:.4}", abs)
    } else {
        format!("{:.6}", abs)
    };
    with_sign(p, format!("${body}"))
}

/// Денежная величина большого порядка (капитализация, объём торгов).
///
/// Ступени: `T` (1e12), `B` (1e9), `M` (1e6, один знак), иначе целое
/// с разделителями тысяч.
pub fn format_magnitude(value: Option<f64>) -> String {
    let Some(m) = finite(value) else {
        return NO_DATA.to_string();
    };
    let abs = m.abs();
    let body = if abs >= 1e12 {
        format!("{:.2}T", abs / 1e12)
    } else if abs >= 1e9 {
        format!("{:.2}B", abs / 1e9)
    } else if abs >= 1e6 {
        format!("{:.1}M", abs / 1e6)
    } else {
        group_fixed(abs, 0)
    };
    with_sign(m, format!("${body}"))
}

/// Процентное изменение со знаком и двумя знаками после запятой.
///
/// Для экстремальных значений (неликвидные активы) используется сжатая
/// запись: `≥ 1e6` — `M%`, `≥ 1e4` — `K%`.
///
/// ## Пример
///
/// ```
/// use commons::format::format_percent;
///
/// assert_eq!(format_percent(Some(-3.456)), "-3.46%");
/// assert_eq!(format_percent(Some(12_345.0)), "+12K%");
/// ```
pub fn format_percent(value: Option<f64>) -> String {
    let Some(v) = finite(value) else {
        return NO_DATA.to_string();
    };
    let sign = if v >= 0.0 { "+" } else { "" };
    format!("{sign}{}%", compact(v))
}

/// Отношение текущей цены к базовой, с единицей `x`.
///
/// Ступени те же, что у [`format_percent`], но без знака `+`.
pub fn format_ratio(value: Option<f64>) -> String {
    let Some(r) = finite(value) else {
        return NO_DATA.to_string();
    };
    format!("{}x", compact(r))
}

/// Уровень индекса: разделители тысяч, 2 знака, без валюты.
pub fn format_index_level(value: Option<f64>) -> String {
    let Some(v) = finite(value) else {
        return NO_DATA.to_string();
    };
    with_sign(v, group_fixed(v.abs(), 2))
}

/// Абсолютное изменение со знаком (пункты индекса).
pub fn format_signed(value: Option<f64>) -> String {
    let Some(v) = finite(value) else {
        return NO_DATA.to_string();
    };
    if v >= 0.0 {
        format!("+{:.2}", v)
    } else {
        format!("{:.2}", v)
    }
}

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

fn with_sign(value: f64, body: String) -> String {
    if value < 0.0 { format!("-{body}") } else { body }
}

/// Сжатая запись для процентов и отношений (без единицы измерения).
fn compact(v: f64) -> String {
    let abs = v.abs();
    if abs >= 1e6 {
        format!("{:.1}M", v / 1e6)
    } else if abs >= 1e4 {
        format!("{:.0}K", v / 1e3)
    } else {
        format!("{:.2}", v)
    }
}

/// Неотрицательное число с фиксированным количеством знаков и разделителями
/// тысяч: `1234567.891` → `1,234,567.89`.
fn group_fixed(abs: f64, decimals: usize) -> String {
    let fixed = format!("{:.*}", decimals, abs);
    let (int_part, frac_part) = match fixed.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (fixed.as_str(), None),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    match frac_part {
        Some(f) => format!("{grouped}.{f}"),
        None => grouped,
    }
}

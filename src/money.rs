//! Amounts are stored as integer cents.

pub fn format_money(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

/// Parses `"12"`, `"12.5"`, `"12,50"` into cents. Negative values and more
/// than two fractional digits are rejected.
pub fn parse_amount_to_cents(input: &str) -> Option<i64> {
    let s = input.trim().replace(',', ".");
    if s.is_empty() || s.starts_with('-') {
        return None;
    }
    let (whole_str, frac_str) = match s.split_once('.') {
        Some((whole, frac)) => (whole, Some(frac)),
        None => (s.as_str(), None),
    };
    let whole: i64 = whole_str.parse().ok()?;
    let frac = match frac_str {
        None => 0,
        Some(frac) if frac.is_empty() || frac.len() > 2 => return None,
        Some(frac) if !frac.bytes().all(|b| b.is_ascii_digit()) => return None,
        Some(frac) => format!("{frac:0<2}").parse::<i64>().ok()?,
    };
    whole.checked_mul(100)?.checked_add(frac)
}

pub fn cents_to_f64(cents: i64) -> f64 {
    cents as f64 / 100.0
}

/// Renders a float total the way report consumers expect it: whole values keep
/// one decimal place (`8000.0`), others use the shortest exact form (`12.34`).
pub fn format_total(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

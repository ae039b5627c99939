pub fn format_money(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.abs();
    let whole = abs / 100;
    let frac = abs % 100;
    format!("{sign}{whole}.{frac:02}")
}

pub fn cents_to_major(cents: i64) -> f64 {
    cents as f64 / 100.0
}

/// Largest amount accepted in either direction, in cents (10 billion in major units).
/// Keeps any realistic number of rows summable by SQLite without overflow.
pub const MAX_AMOUNT_CENTS: i64 = 1_000_000_000_000;

/// Parses a decimal amount in major units and rounds it to the nearest cent.
///
/// Accepts a comma as decimal separator. Returns `None` for anything that is not
/// a finite number or whose magnitude exceeds [`MAX_AMOUNT_CENTS`]; the sign is
/// left for the caller to judge.
pub fn parse_amount_to_cents(input: &str) -> Option<i64> {
    let s = input.trim().replace(',', ".");
    if s.is_empty() {
        return None;
    }
    let amount: f64 = s.parse().ok()?;
    if !amount.is_finite() {
        return None;
    }
    let cents = (amount * 100.0).round();
    if cents.abs() > MAX_AMOUNT_CENTS as f64 {
        return None;
    }
    Some(cents as i64)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

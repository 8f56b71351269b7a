//! Tolerant signed-decimal grammar used by both wire formats.
//!
//! Accepted: `[-+]?\d*\.?\d+`, matched against the whole (trimmed) text.
//! Exponents, `inf`, `nan`, trailing dots and embedded spaces are refused.

/// Parse a decimal field, returning `None` unless it matches the grammar
/// and yields a finite value.
pub fn parse_decimal(text: &str) -> Option<f64> {
    let text = text.trim();
    let negative = text.starts_with('-');
    let body = text.strip_prefix(|c| c == '-' || c == '+').unwrap_or(text);

    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    let valid = match body.split_once('.') {
        None => !body.is_empty() && all_digits(body),
        Some((int, frac)) => !frac.is_empty() && all_digits(int) && all_digits(frac),
    };
    if !valid {
        return None;
    }

    let magnitude: f64 = body.parse().ok()?;
    let value = if negative { -magnitude } else { magnitude };
    value.is_finite().then_some(value)
}

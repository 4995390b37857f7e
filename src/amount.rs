/// Fixed-point BRC-20 amounts.
///
/// Balances and supplies are exact integers scaled by the token's decimals
/// (0..=18). A u128 holds the full range: u64::MAX whole tokens at scale
/// 10^18 stays under 2^128. Binary floating point never touches an amount.

pub const MAX_DECIMALS: u8 = 18;

fn scale_factor(decimals: u8) -> u128 {
    10u128.pow(decimals as u32)
}

/// Parse a decimal string into a scaled integer.
///
/// Accepts `digits` or `digits.digits` with at most `decimals` fractional
/// digits. Signs, exponents, empty parts and overflow all return None; the
/// interpreter treats that as a protocol-level rejection.
pub fn parse_amount(s: &str, decimals: u8) -> Option<u128> {
    if decimals > MAX_DECIMALS {
        return None;
    }
    let (int_part, frac_part) = match s.split_once('.') {
        Some((_, f)) if f.is_empty() => return None,
        Some((i, f)) => (i, f),
        None => (s, ""),
    };
    if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if frac_part.len() > decimals as usize || !frac_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let whole: u128 = int_part.parse().ok()?;
    let mut frac: u128 = 0;
    if !frac_part.is_empty() {
        frac = frac_part.parse().ok()?;
        frac = frac.checked_mul(scale_factor(decimals - frac_part.len() as u8))?;
    }
    whole.checked_mul(scale_factor(decimals))?.checked_add(frac)
}

/// Render a scaled integer back to its decimal string, trimming trailing
/// fractional zeros.
pub fn render_amount(value: u128, decimals: u8) -> String {
    let scale = scale_factor(decimals);
    let whole = value / scale;
    let frac = value % scale;
    if frac == 0 {
        return whole.to_string();
    }
    let mut frac_str = format!("{:0width$}", frac, width = decimals as usize);
    while frac_str.ends_with('0') {
        frac_str.pop();
    }
    format!("{}.{}", whole, frac_str)
}

//! Decimal-string conversion between human amounts and raw token units.
//!
//! Upstream callers hand us free-form numeric strings ("1.5", "0.1,000",
//! "2e-3"). Parsing truncates excess fractional digits to the token's
//! precision instead of erroring, matching the behaviour wallets expect from
//! a "send 0.123456789 USDC" request against a 6-decimal token.

use ethers::types::U256;
use eyre::{bail, eyre, Result};
use rust_decimal::Decimal;
use std::str::FromStr;

/// Parse a decimal string into raw base units for a token with `decimals`
/// precision. Excess fractional digits are truncated, never rounded up.
pub fn sf_parse_units(value: &str, decimals: u8) -> Result<U256> {
    let cleaned = value.trim().replace(',', "");
    if cleaned.is_empty() {
        bail!("empty amount");
    }

    let parsed = if cleaned.contains('e') || cleaned.contains('E') {
        Decimal::from_scientific(&cleaned).map_err(|e| eyre!("invalid amount {value}: {e}"))?
    } else {
        Decimal::from_str(&cleaned).map_err(|e| eyre!("invalid amount {value}: {e}"))?
    };
    if parsed.is_sign_negative() {
        bail!("negative amount {value}");
    }

    let truncated = parsed.trunc_with_scale(decimals as u32);
    let rendered = truncated.to_string();
    let (int_part, frac_part) = match rendered.split_once('.') {
        Some((i, f)) => (i, f),
        None => (rendered.as_str(), ""),
    };

    let scale = U256::from(10u8).pow(U256::from(decimals));
    let int_units = U256::from_dec_str(int_part)
        .map_err(|e| eyre!("invalid amount {value}: {e}"))?
        .checked_mul(scale)
        .ok_or_else(|| eyre!("amount {value} overflows at {decimals} decimals"))?;

    let frac_units = if frac_part.is_empty() {
        U256::zero()
    } else {
        let mut padded = frac_part.to_string();
        while padded.len() < decimals as usize {
            padded.push('0');
        }
        U256::from_dec_str(&padded).map_err(|e| eyre!("invalid amount {value}: {e}"))?
    };

    int_units
        .checked_add(frac_units)
        .ok_or_else(|| eyre!("amount {value} overflows at {decimals} decimals"))
}

/// Format raw base units as a decimal string with trailing zeros trimmed.
pub fn format_units_trimmed(raw: U256, decimals: u8) -> String {
    let mut digits = raw.to_string();
    let decimals = decimals as usize;
    if digits.len() <= decimals {
        let pad = decimals - digits.len() + 1;
        digits = format!("{}{}", "0".repeat(pad), digits);
    }
    let split = digits.len() - decimals;
    let int_part = &digits[..split];
    let frac_part = digits[split..].trim_end_matches('0');
    if frac_part.is_empty() {
        int_part.to_string()
    } else {
        format!("{int_part}.{frac_part}")
    }
}

/// Convert a human percentage (e.g. `12.5`) to basis points (`1250`).
/// Returns `None` for non-finite input or values that round below zero.
pub fn percent_to_bps(percent: f64) -> Option<u32> {
    if !percent.is_finite() {
        return None;
    }
    let bps = (percent * 100.0).round();
    if bps < 0.0 || bps > u32::MAX as f64 {
        return None;
    }
    Some(bps as u32)
}

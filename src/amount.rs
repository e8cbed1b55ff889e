//! # Amount Resolver
//!
//! Turns a symbolic amount expression into an absolute token quantity against
//! the balances the simulator sees *right now*: "all" after a swap means the
//! post-swap balance, not the pre-plan snapshot. Unit-denominated literals
//! ("50 usd worth of eth") convert through the price oracle before parsing.

use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::trace;

use crate::balance::{with_retry, BalanceReader};
use crate::config::RetryPolicy;
use crate::errors::ResolveError;
use crate::price_oracle::PriceOracle;
use crate::simulator::SimState;
use crate::types::{AmountExpr, TokenAmount, TokenInfo};
use crate::units::{percent_to_bps, sf_parse_units};

/// Resolve `expr` to an absolute amount of `token`.
///
/// `prev_origin` is the causal slot a `StepOutput` placeholder binds to; the
/// caller guarantees it references a strictly earlier, already-simulated step.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn resolve_amount(
    expr: &AmountExpr,
    token: &TokenInfo,
    units: Option<&str>,
    prev_origin: Option<usize>,
    sim: &mut SimState,
    reader: &dyn BalanceReader,
    oracle: &dyn PriceOracle,
    retry: &RetryPolicy,
) -> Result<TokenAmount, ResolveError> {
    let resolved = match expr {
        AmountExpr::Exact(literal) => {
            resolve_exact(literal, token, units, oracle, retry).await?
        }
        AmountExpr::All => sim.balance_of(token, reader, retry).await?,
        AmountExpr::Half => sim.balance_of(token, reader, retry).await?.halved(),
        AmountExpr::Percent(pct) => {
            if !(*pct > 0.0 && *pct <= 100.0) {
                return Err(ResolveError::InvalidAmount { amount: format!("{pct}%") });
            }
            let bps = percent_to_bps(*pct)
                .ok_or(ResolveError::InvalidAmount { amount: format!("{pct}%") })?;
            sim.balance_of(token, reader, retry).await?.apply_bps(bps)?
        }
        AmountExpr::StepOutput => {
            let origin = prev_origin.ok_or_else(|| ResolveError::Internal {
                detail: "step output reference with no prior step".into(),
            })?;
            let aggregate = sim.aggregate_output(origin).ok_or_else(|| {
                ResolveError::Internal {
                    detail: format!("no realized output recorded for step {origin}"),
                }
            })?;
            if aggregate.token.decimals != token.decimals {
                return Err(ResolveError::Internal {
                    detail: format!(
                        "output of step {origin} is {}, expected {}",
                        aggregate.token.symbol, token.symbol
                    ),
                });
            }
            aggregate.amount
        }
    };

    if resolved.is_zero() {
        return Err(ResolveError::ZeroAmount);
    }
    trace!(token = %token.symbol, amount = %resolved, "amount resolved");
    Ok(resolved)
}

/// Parse a literal, converting through the oracle first when it is
/// denominated in something other than the spend token.
async fn resolve_exact(
    literal: &str,
    token: &TokenInfo,
    units: Option<&str>,
    oracle: &dyn PriceOracle,
    retry: &RetryPolicy,
) -> Result<TokenAmount, ResolveError> {
    let invalid = || ResolveError::InvalidAmount { amount: literal.to_string() };

    let needs_conversion = units
        .map(|u| !u.eq_ignore_ascii_case(&token.symbol) && !u.trim().is_empty())
        .unwrap_or(false);

    if !needs_conversion {
        let raw = sf_parse_units(literal, token.decimals).map_err(|_| invalid())?;
        return Ok(TokenAmount::new(raw, token.decimals));
    }

    let units = units.expect("checked above");
    let value = Decimal::from_str(literal.trim()).map_err(|_| invalid())?;
    if value.is_sign_negative() {
        return Err(invalid());
    }

    let unit_price_usd = if units.eq_ignore_ascii_case("usd") {
        1.0
    } else {
        with_retry("unit_price", retry, || {
            oracle.usd_price_of_symbol(token.chain_id, units)
        })
        .await?
    };
    let token_price_usd =
        with_retry("token_price", retry, || oracle.usd_price(token)).await?;
    if token_price_usd <= 0.0 || unit_price_usd <= 0.0 {
        return Err(ResolveError::Transport {
            detail: format!("no usable price for {} or {units}", token.symbol),
        });
    }

    let unit_price = Decimal::try_from(unit_price_usd).map_err(|_| invalid())?;
    let token_price = Decimal::try_from(token_price_usd).map_err(|_| invalid())?;
    let converted = value
        .checked_mul(unit_price)
        .and_then(|v| v.checked_div(token_price))
        .ok_or_else(invalid)?;

    let raw = sf_parse_units(&converted.to_string(), token.decimals).map_err(|_| invalid())?;
    Ok(TokenAmount::new(raw, token.decimals))
}

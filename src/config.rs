// src/config.rs

//! # Configuration
//!
//! Serde-driven settings for the planner: the chain table (ids, native assets,
//! token listings, per-chain bridge quirks) and the planner bounds (dust
//! tolerance, transaction cap, retry policy). Loaded from a JSON file in
//! deployments; tests construct it directly.

use ethers::types::Address;
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub chains: Vec<ChainEntry>,
    #[serde(default)]
    pub settings: PlannerSettings,
}

impl Config {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .wrap_err_with(|| format!("reading config from {}", path.as_ref().display()))?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).wrap_err("parsing planner configuration")
    }
}

/// One supported chain and its token listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainEntry {
    pub name: String,
    pub chain_id: u64,
    pub native_symbol: String,
    #[serde(default = "default_native_decimals")]
    pub native_decimals: u8,
    /// Some chains only admit their gas asset as a bridge input; everything
    /// else would fail downstream in a way indistinguishable from a balance
    /// shortfall, so the restriction is checked at resolution time.
    #[serde(default)]
    pub bridge_accepts_native_only: bool,
    /// Chains we cannot snapshot after a bridge credit (no state access for
    /// the planner). Plans must not continue past a bridge into them.
    #[serde(default = "default_true")]
    pub supports_post_bridge_simulation: bool,
    #[serde(default)]
    pub tokens: Vec<TokenEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenEntry {
    pub symbol: String,
    pub address: Address,
    pub decimals: u8,
}

/// Planner-wide bounds and tolerances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerSettings {
    /// Residual-balance threshold (relative, in bps) under which a
    /// full-balance spend is considered to have left nothing behind.
    #[serde(default = "default_dust_tolerance_bps")]
    pub dust_tolerance_bps: u32,
    /// Hard cap on underlying transactions per plan; the circuit breaker
    /// against runaway plans.
    #[serde(default = "default_max_transactions")]
    pub max_transactions_per_plan: usize,
    #[serde(default = "default_slippage_bps")]
    pub default_slippage_bps: u32,
    /// Holdings below this USD value are ignored when expanding the
    /// portfolio selector ("swap all my tokens ...").
    #[serde(default = "default_min_portfolio_usd")]
    pub min_portfolio_balance_usd: f64,
    /// Venue leverage ceiling applied when the venue itself does not declare
    /// a tighter bound.
    #[serde(default = "default_max_leverage")]
    pub default_max_leverage: f64,
    /// Flat gas estimate for plain transfers.
    #[serde(default = "default_transfer_gas")]
    pub transfer_gas: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            dust_tolerance_bps: default_dust_tolerance_bps(),
            max_transactions_per_plan: default_max_transactions(),
            default_slippage_bps: default_slippage_bps(),
            min_portfolio_balance_usd: default_min_portfolio_usd(),
            default_max_leverage: default_max_leverage(),
            transfer_gas: default_transfer_gas(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Bounded exponential backoff for external calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_native_decimals() -> u8 {
    18
}
fn default_true() -> bool {
    true
}
fn default_dust_tolerance_bps() -> u32 {
    100
}
fn default_max_transactions() -> usize {
    16
}
fn default_slippage_bps() -> u32 {
    50
}
fn default_min_portfolio_usd() -> f64 {
    1.0
}
fn default_max_leverage() -> f64 {
    50.0
}
fn default_transfer_gas() -> u64 {
    65_000
}
fn default_max_attempts() -> u32 {
    4
}
fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    8_000
}

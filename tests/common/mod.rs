//! Shared harness for the integration tests: a planner wired with an
//! in-memory chain/token table, a settable balance reader, a fixed-price
//! oracle and a handful of deterministic mock venues.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ethers::types::{Address, U256};

use wayfinder::balance::BalanceReader;
use wayfinder::config::{ChainEntry, Config, PlannerSettings, RetryPolicy, TokenEntry};
use wayfinder::errors::{BalanceError, PriceError, ResolveError, VenueError};
use wayfinder::price_oracle::PriceOracle;
use wayfinder::registry::InMemoryTokenCatalog;
use wayfinder::types::{
    ActionKind, ChainSelector, PlanOutcome, PlanRequest, Quote, TokenAmount, TokenInfo,
};
use wayfinder::units::{format_units_trimmed, sf_parse_units};
use wayfinder::venues::{QuoteRequest, TxRequest, VenueAdapter, VenueSpec};
use wayfinder::Planner;

pub const ETHEREUM: u64 = 1;
pub const ARBITRUM: u64 = 42161;
pub const BASE: u64 = 8453;
pub const LINEA: u64 = 59144;
pub const MANTLE: u64 = 5000;

pub fn wallet() -> Address {
    Address::repeat_byte(0xAB)
}

pub fn usdc_eth() -> Address {
    Address::repeat_byte(0x01)
}
pub fn usdt_eth() -> Address {
    Address::repeat_byte(0x02)
}
pub fn dai_eth() -> Address {
    Address::repeat_byte(0x03)
}
pub fn weth_eth() -> Address {
    Address::repeat_byte(0x04)
}
pub fn usdc_arb() -> Address {
    Address::repeat_byte(0x11)
}
pub fn usdt_arb() -> Address {
    Address::repeat_byte(0x12)
}
pub fn weth_arb() -> Address {
    Address::repeat_byte(0x14)
}
pub fn usdc_base() -> Address {
    Address::repeat_byte(0x21)
}

fn test_config() -> Config {
    let token = |symbol: &str, address: Address, decimals: u8| TokenEntry {
        symbol: symbol.into(),
        address,
        decimals,
    };
    Config {
        chains: vec![
            ChainEntry {
                name: "ethereum".into(),
                chain_id: ETHEREUM,
                native_symbol: "eth".into(),
                native_decimals: 18,
                bridge_accepts_native_only: false,
                supports_post_bridge_simulation: true,
                tokens: vec![
                    token("usdc", usdc_eth(), 6),
                    token("usdt", usdt_eth(), 6),
                    token("dai", dai_eth(), 18),
                    token("weth", weth_eth(), 18),
                ],
            },
            ChainEntry {
                name: "arbitrum".into(),
                chain_id: ARBITRUM,
                native_symbol: "eth".into(),
                native_decimals: 18,
                bridge_accepts_native_only: false,
                supports_post_bridge_simulation: true,
                tokens: vec![
                    token("usdc", usdc_arb(), 6),
                    token("usdt", usdt_arb(), 6),
                    token("weth", weth_arb(), 18),
                ],
            },
            ChainEntry {
                name: "base".into(),
                chain_id: BASE,
                native_symbol: "eth".into(),
                native_decimals: 18,
                bridge_accepts_native_only: false,
                supports_post_bridge_simulation: true,
                tokens: vec![
                    token("usdc", usdc_base(), 6),
                    token("dai", Address::repeat_byte(0x23), 18),
                ],
            },
            ChainEntry {
                name: "linea".into(),
                chain_id: LINEA,
                native_symbol: "eth".into(),
                native_decimals: 18,
                bridge_accepts_native_only: true,
                supports_post_bridge_simulation: true,
                tokens: vec![token("usdc", Address::repeat_byte(0x31), 6)],
            },
            ChainEntry {
                name: "mantle".into(),
                chain_id: MANTLE,
                native_symbol: "eth".into(),
                native_decimals: 18,
                bridge_accepts_native_only: false,
                supports_post_bridge_simulation: false,
                tokens: vec![],
            },
        ],
        settings: PlannerSettings {
            retry: RetryPolicy { max_attempts: 2, base_delay_ms: 1, max_delay_ms: 2 },
            ..Default::default()
        },
    }
}

//================================================================================================//
//                                         MOCK SEAMS                                             //
//================================================================================================//

/// Balance reader with settable balances; records the block each chain was
/// last read at so pinning can be asserted.
#[derive(Debug, Default)]
pub struct MockReader {
    balances: Mutex<HashMap<(u64, Address), U256>>,
    pub seen_blocks: Mutex<HashMap<u64, Option<u64>>>,
}

impl MockReader {
    pub fn set(&self, chain_id: u64, token: Address, amount: &str, decimals: u8) {
        let raw = sf_parse_units(amount, decimals).expect("test balance");
        self.balances.lock().unwrap().insert((chain_id, token), raw);
    }
}

#[async_trait]
impl BalanceReader for MockReader {
    async fn balance_of(
        &self,
        chain_id: u64,
        _wallet: Address,
        token: &TokenInfo,
        block: Option<u64>,
    ) -> Result<U256, BalanceError> {
        self.seen_blocks.lock().unwrap().insert(chain_id, block);
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(&(chain_id, token.address))
            .copied()
            .unwrap_or_default())
    }
}

/// Fixed USD prices by symbol; market depth overridable per (chain, symbol)
/// for disambiguation tests.
#[derive(Debug, Default)]
pub struct MockOracle {
    pub depth_overrides: Mutex<HashMap<(u64, String), f64>>,
}

impl MockOracle {
    fn price_of(symbol: &str) -> Option<f64> {
        match symbol.to_lowercase().as_str() {
            "eth" | "weth" => Some(2_000.0),
            "usdc" | "usdt" | "dai" | "usd" => Some(1.0),
            _ => None,
        }
    }

    pub fn set_depth(&self, chain_id: u64, symbol: &str, depth: f64) {
        self.depth_overrides
            .lock()
            .unwrap()
            .insert((chain_id, symbol.to_lowercase()), depth);
    }
}

#[async_trait]
impl PriceOracle for MockOracle {
    async fn usd_price(&self, token: &TokenInfo) -> Result<f64, PriceError> {
        Self::price_of(&token.symbol).ok_or_else(|| PriceError::Unavailable {
            symbol: token.symbol.clone(),
            chain_id: token.chain_id,
        })
    }

    async fn usd_price_of_symbol(&self, chain_id: u64, symbol: &str) -> Result<f64, PriceError> {
        Self::price_of(symbol).ok_or_else(|| PriceError::Unavailable {
            symbol: symbol.to_string(),
            chain_id,
        })
    }

    async fn market_depth_usd(&self, token: &TokenInfo) -> Result<f64, PriceError> {
        let overrides = self.depth_overrides.lock().unwrap();
        Ok(overrides
            .get(&(token.chain_id, token.symbol.to_lowercase()))
            .copied()
            .unwrap_or(1_000_000.0))
    }
}

fn human(amount: &TokenAmount) -> f64 {
    format_units_trimmed(amount.raw, amount.decimals)
        .parse()
        .unwrap_or(0.0)
}

fn to_raw(amount: f64, decimals: u8) -> TokenAmount {
    let raw = sf_parse_units(&format!("{amount:.12}"), decimals).unwrap_or_default();
    TokenAmount::new(raw, decimals)
}

/// Swap venue quoting straight off the oracle's prices, with a configurable
/// output multiplier so tests can make one venue strictly better.
#[derive(Debug)]
pub struct MockSwapVenue {
    pub name: String,
    pub multiplier: f64,
}

#[async_trait]
impl VenueAdapter for MockSwapVenue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn quote(&self, request: &QuoteRequest) -> Result<Quote, VenueError> {
        let input = request.input_token.as_ref().unwrap();
        let output = request.output_token.as_ref().unwrap();
        let amount = request.amount.as_ref().unwrap();
        let p_in = MockOracle::price_of(&input.symbol)
            .ok_or_else(|| VenueError::QuoteFailed(format!("no market for {}", input.symbol)))?;
        let p_out = MockOracle::price_of(&output.symbol)
            .ok_or_else(|| VenueError::QuoteFailed(format!("no market for {}", output.symbol)))?;
        let out_human = human(amount) * p_in / p_out * self.multiplier;
        Ok(Quote {
            venue: self.name.clone(),
            output_token: output.clone(),
            output_chain_id: output.chain_id,
            amount_out: to_raw(out_human, output.decimals),
            fee: TokenAmount::zero(output.decimals),
            slippage_bps: request.slippage_bps,
            gas_estimate: U256::from(180_000u64),
            tx_count: 2,
        })
    }

    async fn build(
        &self,
        _request: &QuoteRequest,
        _quote: &Quote,
    ) -> Result<Vec<TxRequest>, VenueError> {
        Ok(vec![])
    }
}

/// Bridge venue taking a flat fee in bps; credits the same asset on the
/// destination chain.
#[derive(Debug)]
pub struct MockBridgeVenue {
    pub name: String,
    pub fee_bps: u32,
}

#[async_trait]
impl VenueAdapter for MockBridgeVenue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn quote(&self, request: &QuoteRequest) -> Result<Quote, VenueError> {
        let output = request.output_token.as_ref().unwrap();
        let amount = request.amount.as_ref().unwrap();
        let gross = human(amount);
        let fee = gross * self.fee_bps as f64 / 10_000.0;
        Ok(Quote {
            venue: self.name.clone(),
            output_token: output.clone(),
            output_chain_id: output.chain_id,
            amount_out: to_raw(gross - fee, output.decimals),
            fee: to_raw(fee, output.decimals),
            slippage_bps: request.slippage_bps,
            gas_estimate: U256::from(250_000u64),
            tx_count: 1,
        })
    }

    async fn build(
        &self,
        _request: &QuoteRequest,
        _quote: &Quote,
    ) -> Result<Vec<TxRequest>, VenueError> {
        Ok(vec![])
    }
}

/// Perp venue: opens positions (no wallet credit) and closes a configured
/// USDC position.
#[derive(Debug)]
pub struct MockPerpVenue {
    pub name: String,
    /// Collateral+pnl available to a close, in USDC.
    pub open_position_usdc: f64,
    pub usdc: TokenInfo,
}

#[async_trait]
impl VenueAdapter for MockPerpVenue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn quote(&self, request: &QuoteRequest) -> Result<Quote, VenueError> {
        match request.kind {
            ActionKind::Close => {
                if self.open_position_usdc <= 0.0 {
                    return Err(VenueError::QuoteFailed("No position to close".into()));
                }
                let percent = request.percent_reduction.unwrap_or(100.0);
                let credited = self.open_position_usdc * percent / 100.0;
                Ok(Quote {
                    venue: self.name.clone(),
                    output_token: self.usdc.clone(),
                    output_chain_id: self.usdc.chain_id,
                    amount_out: to_raw(credited, self.usdc.decimals),
                    fee: TokenAmount::zero(self.usdc.decimals),
                    slippage_bps: 0,
                    gas_estimate: U256::from(300_000u64),
                    tx_count: 1,
                })
            }
            _ => {
                let output = request.output_token.as_ref().unwrap();
                Ok(Quote {
                    venue: self.name.clone(),
                    output_token: output.clone(),
                    output_chain_id: output.chain_id,
                    amount_out: TokenAmount::zero(output.decimals),
                    fee: TokenAmount::zero(output.decimals),
                    slippage_bps: request.slippage_bps,
                    gas_estimate: U256::from(300_000u64),
                    tx_count: 1,
                })
            }
        }
    }

    async fn build(
        &self,
        _request: &QuoteRequest,
        _quote: &Quote,
    ) -> Result<Vec<TxRequest>, VenueError> {
        Ok(vec![])
    }
}

/// Lending-style venue; deposits consume, withdrawals credit back the
/// requested amount.
#[derive(Debug)]
pub struct MockLendingVenue {
    pub name: String,
}

#[async_trait]
impl VenueAdapter for MockLendingVenue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn quote(&self, request: &QuoteRequest) -> Result<Quote, VenueError> {
        let token = request.input_token.as_ref().unwrap();
        let credited = match request.kind {
            ActionKind::Withdraw | ActionKind::Borrow | ActionKind::Unstake => request
                .amount
                .unwrap_or_else(|| TokenAmount::zero(token.decimals)),
            _ => TokenAmount::zero(token.decimals),
        };
        Ok(Quote {
            venue: self.name.clone(),
            output_token: token.clone(),
            output_chain_id: token.chain_id,
            amount_out: credited,
            fee: TokenAmount::zero(token.decimals),
            slippage_bps: 0,
            gas_estimate: U256::from(220_000u64),
            tx_count: 2,
        })
    }

    async fn build(
        &self,
        _request: &QuoteRequest,
        _quote: &Quote,
    ) -> Result<Vec<TxRequest>, VenueError> {
        Ok(vec![])
    }
}

//================================================================================================//
//                                          HARNESS                                               //
//================================================================================================//

pub struct Harness {
    pub reader: Arc<MockReader>,
    pub oracle: Arc<MockOracle>,
    pub planner: Planner,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(|_| {})
    }

    /// Build a harness, letting the caller tweak settings before wiring.
    pub fn with_settings(adjust: impl FnOnce(&mut PlannerSettings)) -> Self {
        let mut config = test_config();
        adjust(&mut config.settings);

        let reader = Arc::new(MockReader::default());
        let oracle = Arc::new(MockOracle::default());
        let catalog = Arc::new(InMemoryTokenCatalog::from_config(&config));
        let mut planner =
            Planner::new(config, catalog, reader.clone(), oracle.clone());

        let all_chains = vec![ETHEREUM, ARBITRUM, BASE, LINEA, MANTLE];
        let swap_spec = VenueSpec {
            kinds: vec![ActionKind::Swap],
            chains: all_chains.clone(),
            ..Default::default()
        };
        planner.register_venue(
            Arc::new(MockSwapVenue { name: "uniswap".into(), multiplier: 1.0 }),
            swap_spec.clone(),
        );
        planner.register_venue(
            Arc::new(MockSwapVenue { name: "sushiswap".into(), multiplier: 0.98 }),
            swap_spec.clone(),
        );
        planner.register_venue(
            Arc::new(MockSwapVenue { name: "cowswap".into(), multiplier: 0.999 }),
            swap_spec,
        );
        planner.register_venue(
            Arc::new(MockBridgeVenue { name: "across".into(), fee_bps: 30 }),
            VenueSpec {
                kinds: vec![ActionKind::Bridge],
                chains: all_chains.clone(),
                supports_all_amount: true,
                ..Default::default()
            },
        );
        planner.register_venue(
            Arc::new(MockBridgeVenue { name: "stargate".into(), fee_bps: 60 }),
            VenueSpec {
                kinds: vec![ActionKind::Bridge],
                chains: all_chains.clone(),
                supports_all_amount: false,
                ..Default::default()
            },
        );
        planner.register_venue(
            Arc::new(MockPerpVenue {
                name: "gmx".into(),
                open_position_usdc: 1_500.0,
                usdc: TokenInfo {
                    address: usdc_arb(),
                    symbol: "usdc".into(),
                    decimals: 6,
                    chain_id: ARBITRUM,
                    is_native: false,
                },
            }),
            VenueSpec {
                kinds: vec![ActionKind::Long, ActionKind::Short, ActionKind::Close],
                chains: vec![ARBITRUM],
                max_leverage: Some(50.0),
                ..Default::default()
            },
        );
        planner.register_venue(
            Arc::new(MockLendingVenue { name: "aave".into() }),
            VenueSpec {
                kinds: vec![
                    ActionKind::Deposit,
                    ActionKind::Withdraw,
                    ActionKind::Lend,
                    ActionKind::Borrow,
                    ActionKind::Repay,
                ],
                chains: all_chains,
                pools: HashMap::from([
                    (ETHEREUM, vec!["usdc".to_string(), "weth".to_string()]),
                    (ARBITRUM, vec!["usdc".to_string()]),
                ]),
                ..Default::default()
            },
        );

        Self { reader, oracle, planner }
    }

    /// Run a plan from wire-shaped JSON actions over the named chains.
    pub async fn plan(
        &self,
        actions: serde_json::Value,
        chains: &[&str],
    ) -> Result<PlanOutcome, ResolveError> {
        self.plan_pinned(actions, &chains.iter().map(|c| (*c, None)).collect::<Vec<_>>())
            .await
    }

    pub async fn plan_pinned(
        &self,
        actions: serde_json::Value,
        chains: &[(&str, Option<u64>)],
    ) -> Result<PlanOutcome, ResolveError> {
        let actions = serde_json::from_value(actions).expect("test actions parse");
        let request = PlanRequest {
            wallet: wallet(),
            actions,
            chains: chains
                .iter()
                .map(|(name, block)| ChainSelector {
                    name: name.to_string(),
                    pinned_block: *block,
                })
                .collect(),
        };
        self.planner.plan(request).await
    }
}

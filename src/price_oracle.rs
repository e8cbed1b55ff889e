//! # Price Oracle Interface
//!
//! Market-data seam for the planner. The oracle answers two questions: what a
//! token is worth in USD (unit conversion, exact-output sizing) and how deep
//! its market is (the liquidity signal behind chain/token disambiguation).
//! The cached wrapper is the only cross-request shared state in the crate and
//! is safe to clone freely.

use async_trait::async_trait;
use ethers::types::Address;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::errors::PriceError;
use crate::types::TokenInfo;

/// TTL for cached prices; stale prices are worse than a refetch.
const PRICE_CACHE_TTL: Duration = Duration::from_secs(60);
/// Depth signals move slowly; cache them longer.
const DEPTH_CACHE_TTL: Duration = Duration::from_secs(300);

#[async_trait]
pub trait PriceOracle: Send + Sync + std::fmt::Debug {
    /// USD price of a concrete token.
    async fn usd_price(&self, token: &TokenInfo) -> Result<f64, PriceError>;

    /// USD price looked up by bare symbol, for amount units that never
    /// resolve to a contract ("pay 50 usd worth", "2 eth worth of dai").
    async fn usd_price_of_symbol(&self, chain_id: u64, symbol: &str) -> Result<f64, PriceError>;

    /// Liquidity/market-cap signal used to rank duplicate listings and
    /// candidate chains. Bigger is more liquid.
    async fn market_depth_usd(&self, token: &TokenInfo) -> Result<f64, PriceError>;

    /// Exchange rate token_a → token_b through their USD prices.
    async fn pair_price_ratio(
        &self,
        token_a: &TokenInfo,
        token_b: &TokenInfo,
    ) -> Result<f64, PriceError> {
        let a = self.usd_price(token_a).await?;
        let b = self.usd_price(token_b).await?;
        if b <= 0.0 {
            return Err(PriceError::Unavailable {
                symbol: token_b.symbol.clone(),
                chain_id: token_b.chain_id,
            });
        }
        Ok(a / b)
    }

    /// Whether the token has any detectable market. Used as the existence
    /// probe for raw contract addresses.
    async fn has_market(&self, token: &TokenInfo) -> bool {
        matches!(self.usd_price(token).await, Ok(p) if p > 0.0)
    }
}

/// Read-through TTL cache in front of any oracle. Shared across requests;
/// per-request memoization on top of this is unnecessary.
#[derive(Clone)]
pub struct CachedPriceOracle {
    inner: Arc<dyn PriceOracle>,
    prices: Cache<(u64, Address), f64>,
    symbol_prices: Cache<(u64, String), f64>,
    depths: Cache<(u64, Address), f64>,
}

impl std::fmt::Debug for CachedPriceOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedPriceOracle").field("inner", &self.inner).finish()
    }
}

impl CachedPriceOracle {
    pub fn new(inner: Arc<dyn PriceOracle>) -> Self {
        Self {
            inner,
            prices: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(PRICE_CACHE_TTL)
                .build(),
            symbol_prices: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(PRICE_CACHE_TTL)
                .build(),
            depths: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(DEPTH_CACHE_TTL)
                .build(),
        }
    }
}

#[async_trait]
impl PriceOracle for CachedPriceOracle {
    async fn usd_price(&self, token: &TokenInfo) -> Result<f64, PriceError> {
        let key = (token.chain_id, token.address);
        if let Some(price) = self.prices.get(&key).await {
            return Ok(price);
        }
        let price = self.inner.usd_price(token).await?;
        debug!(symbol = %token.symbol, chain_id = token.chain_id, price, "price cached");
        self.prices.insert(key, price).await;
        Ok(price)
    }

    async fn usd_price_of_symbol(&self, chain_id: u64, symbol: &str) -> Result<f64, PriceError> {
        let key = (chain_id, symbol.to_lowercase());
        if let Some(price) = self.symbol_prices.get(&key).await {
            return Ok(price);
        }
        let price = self.inner.usd_price_of_symbol(chain_id, symbol).await?;
        self.symbol_prices.insert(key, price).await;
        Ok(price)
    }

    async fn market_depth_usd(&self, token: &TokenInfo) -> Result<f64, PriceError> {
        let key = (token.chain_id, token.address);
        if let Some(depth) = self.depths.get(&key).await {
            return Ok(depth);
        }
        let depth = self.inner.market_depth_usd(token).await?;
        self.depths.insert(key, depth).await;
        Ok(depth)
    }
}

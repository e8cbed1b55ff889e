//! Chain and token registries.
//!
//! The chain table is small, static per deployment, and built straight from
//! config. Token lookups go through the [`TokenCatalog`] trait so deployments
//! can back them with an indexer; the in-memory implementation here serves the
//! config-listed tokens plus a cross-request cache of contracts discovered by
//! address.

use std::str::FromStr;
use std::sync::Arc;

use ahash::AHashMap;
use async_trait::async_trait;
use dashmap::DashMap;
use ethers::types::Address;
use eyre::Result;
use once_cell::sync::Lazy;

use crate::config::Config;
use crate::types::TokenInfo;

/// A global map of universally known token contracts to their decimals,
/// used when a caller references an address the catalog has never seen.
static KNOWN_TOKEN_DECIMALS: Lazy<AHashMap<Address, u8>> = Lazy::new(|| {
    let mut m = AHashMap::new();
    let mut put = |addr: &str, decimals: u8| {
        m.insert(Address::from_str(addr).expect("static address"), decimals);
    };
    // Wrapped natives are always 18
    put("0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2", 18); // WETH (Ethereum)
    put("0x82aF49447D8a07e3bd95BD0d56f35241523fBab1", 18); // WETH (Arbitrum)
    put("0x4200000000000000000000000000000000000006", 18); // WETH (Base, Optimism)
    put("0x0d500B1d8E8eF31E21C99d1Db9A6444d3ADf1270", 18); // WMATIC (Polygon)
    // Common stables
    put("0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48", 6); // USDC (Ethereum)
    put("0xaf88d065e77c8cC2239327C5EDb3A432268e5831", 6); // USDC (Arbitrum)
    put("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913", 6); // USDC (Base)
    put("0xdac17f958d2ee523a2206206994597c13d831ec7", 6); // USDT (Ethereum)
    put("0xFd086bC7CD5C481DCC9C85ebE478A1C0b69FCbb9", 6); // USDT (Arbitrum)
    put("0x6b175474e89094c44da98b954eedeac495271d0f", 18); // DAI (Ethereum)
    put("0x2260fac5e5542a773aa44fbcfedf7c193bc2c599", 8); // WBTC (Ethereum)
    m
});

pub fn known_decimals(address: Address) -> Option<u8> {
    KNOWN_TOKEN_DECIMALS.get(&address).copied()
}

/// Static metadata for one supported chain.
#[derive(Debug, Clone)]
pub struct ChainMeta {
    pub name: String,
    pub chain_id: u64,
    pub native_symbol: String,
    pub native_decimals: u8,
    pub bridge_accepts_native_only: bool,
    pub supports_post_bridge_simulation: bool,
}

/// Chain-name ↔ id mapping plus per-chain native-asset identity.
#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
    by_name: AHashMap<String, u64>,
    by_id: AHashMap<u64, ChainMeta>,
}

impl ChainRegistry {
    pub fn from_config(config: &Config) -> Self {
        let mut by_name = AHashMap::new();
        let mut by_id = AHashMap::new();
        for entry in &config.chains {
            let name = entry.name.to_lowercase();
            by_name.insert(name.clone(), entry.chain_id);
            by_id.insert(
                entry.chain_id,
                ChainMeta {
                    name,
                    chain_id: entry.chain_id,
                    native_symbol: entry.native_symbol.to_lowercase(),
                    native_decimals: entry.native_decimals,
                    bridge_accepts_native_only: entry.bridge_accepts_native_only,
                    supports_post_bridge_simulation: entry.supports_post_bridge_simulation,
                },
            );
        }
        Self { by_name, by_id }
    }

    pub fn id_from_name(&self, name: &str) -> Option<u64> {
        self.by_name.get(&name.to_lowercase()).copied()
    }

    pub fn meta(&self, chain_id: u64) -> Option<&ChainMeta> {
        self.by_id.get(&chain_id)
    }

    pub fn name_from_id(&self, chain_id: u64) -> Option<&str> {
        self.by_id.get(&chain_id).map(|m| m.name.as_str())
    }

    /// Display name for error messages; falls back to the numeric id for
    /// chains touched outside the registry (bridge destinations).
    pub fn display_name(&self, chain_id: u64) -> String {
        self.name_from_id(chain_id)
            .map(str::to_string)
            .unwrap_or_else(|| format!("chain {chain_id}"))
    }

    pub fn native_token(&self, chain_id: u64) -> Option<TokenInfo> {
        self.by_id
            .get(&chain_id)
            .map(|m| TokenInfo::native(&m.native_symbol, m.native_decimals, chain_id))
    }

    pub fn chain_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.by_id.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Comma-joined list of supported chain names, for the unsupported-chain
    /// error message.
    pub fn supported_names(&self) -> String {
        let mut names: Vec<&str> = self.by_id.values().map(|m| m.name.as_str()).collect();
        names.sort_unstable();
        names.join(", ")
    }
}

/// Token lookup seam. Implementations must be cheap to query repeatedly; the
/// resolver fans out lookups across candidate chains concurrently.
#[async_trait]
pub trait TokenCatalog: Send + Sync + std::fmt::Debug {
    /// Every contract listed under `symbol` on `chain_id`. More than one entry
    /// means duplicate/synthetic listings that need liquidity ranking.
    async fn listings(&self, chain_id: u64, symbol: &str) -> Result<Vec<TokenInfo>>;

    /// Lookup by raw contract address.
    async fn by_address(&self, chain_id: u64, address: Address) -> Result<Option<TokenInfo>>;

    /// All listed tokens on a chain, used to expand the portfolio selector.
    async fn tokens_on_chain(&self, chain_id: u64) -> Result<Vec<TokenInfo>>;
}

/// In-memory catalog backed by the config token tables, with a shared
/// read-through cache for contracts discovered by address at runtime.
#[derive(Debug, Default)]
pub struct InMemoryTokenCatalog {
    by_symbol: AHashMap<(u64, String), Vec<TokenInfo>>,
    by_address: AHashMap<(u64, Address), TokenInfo>,
    per_chain: AHashMap<u64, Vec<TokenInfo>>,
    discovered: DashMap<(u64, Address), TokenInfo>,
}

impl InMemoryTokenCatalog {
    pub fn from_config(config: &Config) -> Self {
        let mut catalog = Self::default();
        for chain in &config.chains {
            for token in &chain.tokens {
                catalog.insert(TokenInfo {
                    address: token.address,
                    symbol: token.symbol.to_lowercase(),
                    decimals: token.decimals,
                    chain_id: chain.chain_id,
                    is_native: false,
                });
            }
        }
        catalog
    }

    pub fn insert(&mut self, token: TokenInfo) {
        self.by_symbol
            .entry((token.chain_id, token.symbol.to_lowercase()))
            .or_default()
            .push(token.clone());
        self.by_address
            .insert((token.chain_id, token.address), token.clone());
        self.per_chain.entry(token.chain_id).or_default().push(token);
    }

    /// Remember a contract resolved outside the static tables so later
    /// requests skip the probe.
    pub fn remember_discovered(&self, token: TokenInfo) {
        self.discovered
            .insert((token.chain_id, token.address), token);
    }
}

#[async_trait]
impl TokenCatalog for InMemoryTokenCatalog {
    async fn listings(&self, chain_id: u64, symbol: &str) -> Result<Vec<TokenInfo>> {
        Ok(self
            .by_symbol
            .get(&(chain_id, symbol.to_lowercase()))
            .cloned()
            .unwrap_or_default())
    }

    async fn by_address(&self, chain_id: u64, address: Address) -> Result<Option<TokenInfo>> {
        if let Some(token) = self.by_address.get(&(chain_id, address)) {
            return Ok(Some(token.clone()));
        }
        Ok(self
            .discovered
            .get(&(chain_id, address))
            .map(|entry| entry.value().clone()))
    }

    async fn tokens_on_chain(&self, chain_id: u64) -> Result<Vec<TokenInfo>> {
        Ok(self.per_chain.get(&chain_id).cloned().unwrap_or_default())
    }
}

/// Helper shared by tests and deployments wiring a catalog from a config.
pub fn catalog_from_config(config: &Config) -> Arc<InMemoryTokenCatalog> {
    Arc::new(InMemoryTokenCatalog::from_config(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChainEntry, TokenEntry};

    fn test_config() -> Config {
        Config {
            chains: vec![ChainEntry {
                name: "Ethereum".into(),
                chain_id: 1,
                native_symbol: "ETH".into(),
                native_decimals: 18,
                bridge_accepts_native_only: false,
                supports_post_bridge_simulation: true,
                tokens: vec![TokenEntry {
                    symbol: "USDC".into(),
                    address: Address::from_str("0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48")
                        .unwrap(),
                    decimals: 6,
                }],
            }],
            settings: Default::default(),
        }
    }

    #[test]
    fn chain_lookup_is_case_insensitive() {
        let registry = ChainRegistry::from_config(&test_config());
        assert_eq!(registry.id_from_name("ethereum"), Some(1));
        assert_eq!(registry.id_from_name("Ethereum"), Some(1));
        assert_eq!(registry.id_from_name("base"), None);
        assert_eq!(registry.supported_names(), "ethereum");
    }

    #[tokio::test]
    async fn catalog_serves_config_tokens_and_discovered_contracts() {
        let catalog = InMemoryTokenCatalog::from_config(&test_config());
        let listings = catalog.listings(1, "USDC").await.unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].decimals, 6);

        let stray = Address::from_str("0x2260fac5e5542a773aa44fbcfedf7c193bc2c599").unwrap();
        assert!(catalog.by_address(1, stray).await.unwrap().is_none());
        catalog.remember_discovered(TokenInfo {
            address: stray,
            symbol: "wbtc".into(),
            decimals: 8,
            chain_id: 1,
            is_native: false,
        });
        assert!(catalog.by_address(1, stray).await.unwrap().is_some());
    }

    #[test]
    fn known_decimals_covers_the_majors() {
        let usdc = Address::from_str("0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48").unwrap();
        assert_eq!(known_decimals(usdc), Some(6));
    }
}

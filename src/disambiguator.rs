//! # Chain & Token Disambiguation
//!
//! When the caller names a token but no chain, the wallet's balances decide:
//! prefer a chain where the wallet actually holds the token, break ties with
//! the market-depth signal. When a symbol maps to several contracts on one
//! chain the same signal ranks the duplicates. The ranking function is a
//! pluggable policy; it is heuristic by nature and known to mispick for
//! thinly traded listings.

use async_trait::async_trait;
use futures::future::join_all;
use tracing::debug;

use crate::balance::BalanceReader;
use crate::config::RetryPolicy;
use crate::errors::ResolveError;
use crate::price_oracle::PriceOracle;
use crate::registry::{known_decimals, ChainRegistry, TokenCatalog};
use crate::simulator::SimState;
use crate::types::{ChainRef, TokenInfo, TokenRef};

/// Orders candidate listings/chains for an ambiguous token. Higher wins.
#[async_trait]
pub trait RankingPolicy: Send + Sync + std::fmt::Debug {
    async fn score(&self, token: &TokenInfo, oracle: &dyn PriceOracle) -> f64;
}

/// Default policy: rank by the oracle's market-depth signal.
#[derive(Debug, Default)]
pub struct MarketCapRanking;

#[async_trait]
impl RankingPolicy for MarketCapRanking {
    async fn score(&self, token: &TokenInfo, oracle: &dyn PriceOracle) -> f64 {
        oracle.market_depth_usd(token).await.unwrap_or(0.0)
    }
}

pub(crate) struct Disambiguator<'a> {
    pub chains: &'a ChainRegistry,
    pub catalog: &'a dyn TokenCatalog,
    pub oracle: &'a dyn PriceOracle,
    pub ranking: &'a dyn RankingPolicy,
    pub reader: &'a dyn BalanceReader,
    pub retry: &'a RetryPolicy,
}

impl<'a> Disambiguator<'a> {
    /// Map an explicit chain reference to an id. `None` means "infer later";
    /// `All` never reaches this point (the resolver expands it).
    pub fn resolve_chain_ref(&self, chain: Option<&ChainRef>) -> Result<Option<u64>, ResolveError> {
        match chain {
            None => Ok(None),
            Some(ChainRef::All) => Err(ResolveError::Internal {
                detail: "unexpanded all-chains reference".into(),
            }),
            Some(ChainRef::Named(name)) => self
                .chains
                .id_from_name(name)
                .map(Some)
                .ok_or_else(|| ResolveError::UnsupportedChain {
                    chain: name.clone(),
                    supported: self.chains.supported_names(),
                }),
        }
    }

    /// Resolve a token reference to a concrete contract, inferring the chain
    /// from wallet balances when the caller omitted it.
    pub async fn resolve_token(
        &self,
        token_ref: &TokenRef,
        explicit_chain: Option<u64>,
        scopes: &[u64],
        sim: &mut SimState,
    ) -> Result<TokenInfo, ResolveError> {
        match token_ref {
            TokenRef::Symbol(symbol) => {
                self.resolve_symbol(symbol, explicit_chain, scopes, sim).await
            }
            TokenRef::Address(address) => {
                self.resolve_address(*address, explicit_chain, scopes).await
            }
            TokenRef::StepOutput | TokenRef::All => Err(ResolveError::Internal {
                detail: "placeholder token reached the disambiguator unresolved".into(),
            }),
        }
    }

    async fn resolve_symbol(
        &self,
        symbol: &str,
        explicit_chain: Option<u64>,
        scopes: &[u64],
        sim: &mut SimState,
    ) -> Result<TokenInfo, ResolveError> {
        if let Some(chain_id) = explicit_chain {
            return match self.listings_on_chain(symbol, chain_id).await? {
                candidates if candidates.is_empty() => Err(ResolveError::TokenNotFound {
                    token: symbol.to_string(),
                    chain: self.chains.display_name(chain_id),
                }),
                candidates => Ok(self.pick_ranked(candidates).await),
            };
        }

        // Inference: gather the best listing per in-scope chain.
        let mut candidates = Vec::new();
        for chain_id in scopes {
            let listings = self.listings_on_chain(symbol, *chain_id).await?;
            if !listings.is_empty() {
                candidates.push(self.pick_ranked(listings).await);
            }
        }
        if candidates.is_empty() {
            let chain = scopes
                .first()
                .map(|id| self.chains.display_name(*id))
                .unwrap_or_else(|| "any chain".to_string());
            return Err(ResolveError::TokenNotFound { token: symbol.to_string(), chain });
        }
        if candidates.len() == 1 {
            return Ok(candidates.pop().expect("len checked"));
        }

        // Prefer chains where the wallet holds the token; the balance reads
        // go through the simulation snapshots so post-step state counts.
        let mut funded = Vec::new();
        for candidate in &candidates {
            let balance = sim.balance_of(candidate, self.reader, self.retry).await?;
            if !balance.is_zero() {
                funded.push(candidate.clone());
            }
        }
        let pool = if funded.is_empty() { candidates } else { funded };
        let chosen = self.pick_ranked(pool).await;
        debug!(symbol, chain_id = chosen.chain_id, "inferred chain for token");
        Ok(chosen)
    }

    async fn resolve_address(
        &self,
        address: ethers::types::Address,
        explicit_chain: Option<u64>,
        scopes: &[u64],
    ) -> Result<TokenInfo, ResolveError> {
        let chain_id = match explicit_chain {
            Some(id) => id,
            None => {
                // First in-scope chain that knows the contract, else the
                // first chain in scope.
                let mut inferred = None;
                for candidate in scopes {
                    if let Ok(Some(_)) = self.catalog.by_address(*candidate, address).await {
                        inferred = Some(*candidate);
                        break;
                    }
                }
                inferred.or_else(|| scopes.first().copied()).ok_or_else(|| {
                    ResolveError::Internal { detail: "no chains in scope".into() }
                })?
            }
        };

        if let Ok(Some(token)) = self.catalog.by_address(chain_id, address).await {
            return Ok(token);
        }

        // Unknown contract: admit it as-is, but only if it has a detectable
        // market on this chain.
        let token = TokenInfo {
            address,
            symbol: format!("{address:#x}"),
            decimals: known_decimals(address).unwrap_or(18),
            chain_id,
            is_native: false,
        };
        if self.oracle.has_market(&token).await {
            Ok(token)
        } else {
            Err(ResolveError::TokenNotFound {
                token: format!("{address:#x}"),
                chain: self.chains.display_name(chain_id),
            })
        }
    }

    /// Every wallet holding on `chain_id` worth keeping: the expansion of the
    /// portfolio selector ("swap all my tokens for ..."). Dust positions
    /// below the configured USD floor are skipped.
    pub async fn portfolio_tokens(
        &self,
        chain_id: u64,
        min_usd: f64,
        sim: &mut SimState,
    ) -> Result<Vec<TokenInfo>, ResolveError> {
        let mut universe = Vec::new();
        if let Some(native) = self.chains.native_token(chain_id) {
            universe.push(native);
        }
        universe.extend(
            self.catalog
                .tokens_on_chain(chain_id)
                .await
                .map_err(|e| ResolveError::Transport { detail: e.to_string() })?,
        );

        let mut held = Vec::new();
        for token in universe {
            let balance = sim.balance_of(&token, self.reader, self.retry).await?;
            if balance.is_zero() {
                continue;
            }
            let price = self.oracle.usd_price(&token).await.unwrap_or(0.0);
            let value = balance.to_string().parse::<f64>().unwrap_or(0.0) * price;
            if value >= min_usd {
                held.push(token);
            }
        }
        Ok(held)
    }

    async fn listings_on_chain(
        &self,
        symbol: &str,
        chain_id: u64,
    ) -> Result<Vec<TokenInfo>, ResolveError> {
        if let Some(meta) = self.chains.meta(chain_id) {
            if meta.native_symbol.eq_ignore_ascii_case(symbol) {
                return Ok(vec![self.chains.native_token(chain_id).expect("meta exists")]);
            }
        }
        self.catalog
            .listings(chain_id, symbol)
            .await
            .map_err(|e| ResolveError::Transport { detail: e.to_string() })
    }

    /// Rank candidates by the policy score, concurrently, and keep the best.
    async fn pick_ranked(&self, mut candidates: Vec<TokenInfo>) -> TokenInfo {
        if candidates.len() == 1 {
            return candidates.pop().expect("len checked");
        }
        let scores = join_all(
            candidates
                .iter()
                .map(|token| self.ranking.score(token, self.oracle)),
        )
        .await;
        let best = scores
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i)
            .unwrap_or(0);
        candidates.swap_remove(best)
    }
}

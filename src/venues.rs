//! # Venue Adapter Interface
//!
//! One adapter per protocol integration. Adapters expose exactly two
//! operations, quote a step and build transactions from a quote, and declare
//! everything else (supported kinds, chains, pools, leverage ceiling) as
//! static capabilities in the [`VenueBook`]. Selection logic only ever reads
//! the book; it never reflects on adapter internals.

use async_trait::async_trait;
use ethers::types::{Address, Bytes, U256};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::errors::VenueError;
use crate::types::{ActionKind, Quote, TokenAmount, TokenInfo};

/// Everything an adapter needs to price one step.
#[derive(Clone, Debug)]
pub struct QuoteRequest {
    pub kind: ActionKind,
    pub wallet: Address,
    pub chain_id: u64,
    pub dest_chain_id: Option<u64>,
    pub input_token: Option<TokenInfo>,
    pub output_token: Option<TokenInfo>,
    /// Resolved input amount. `None` for position-sized steps (close, claim,
    /// withdraw-all) where the venue itself knows the size.
    pub amount: Option<TokenAmount>,
    pub pool: Option<String>,
    pub leverage: Option<f64>,
    pub percent_reduction: Option<f64>,
    pub slippage_bps: u32,
    /// The caller asked for the full balance. Venues that cannot express a
    /// full-balance order reject this.
    pub is_all_amount: bool,
}

/// A raw transaction request produced by an adapter.
#[derive(Clone, Debug)]
pub struct TxRequest {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
}

/// The standardized venue integration point: quote, then build.
#[async_trait]
pub trait VenueAdapter: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    /// Price the step: expected output, fee, slippage bound, gas.
    async fn quote(&self, request: &QuoteRequest) -> Result<Quote, VenueError>;

    /// Materialize the transactions for a previously obtained quote.
    async fn build(
        &self,
        request: &QuoteRequest,
        quote: &Quote,
    ) -> Result<Vec<TxRequest>, VenueError>;
}

/// Static capabilities an adapter registers with.
#[derive(Clone, Debug)]
pub struct VenueSpec {
    pub kinds: Vec<ActionKind>,
    pub chains: Vec<u64>,
    /// Venue-enforced leverage ceiling for perp kinds.
    pub max_leverage: Option<f64>,
    /// Whether the venue can express a full-balance order.
    pub supports_all_amount: bool,
    /// Named pools per chain, when the venue is pool-scoped. Empty map means
    /// the venue takes no pool argument.
    pub pools: HashMap<u64, Vec<String>>,
}

impl Default for VenueSpec {
    fn default() -> Self {
        Self {
            kinds: Vec::new(),
            chains: Vec::new(),
            max_leverage: None,
            supports_all_amount: true,
            pools: HashMap::new(),
        }
    }
}

impl VenueSpec {
    pub fn supports_kind(&self, kind: ActionKind) -> bool {
        self.kinds.contains(&kind)
    }

    pub fn supports_chain(&self, chain_id: u64) -> bool {
        self.chains.contains(&chain_id)
    }

    pub fn supports_pool(&self, chain_id: u64, pool: &str) -> bool {
        match self.pools.get(&chain_id) {
            Some(pools) => pools.iter().any(|p| p.eq_ignore_ascii_case(pool)),
            // A venue with no pool table accepts any pool name it is asked
            // about; pool scoping is the venue's own business then.
            None => self.pools.is_empty(),
        }
    }
}

pub struct VenueEntry {
    pub adapter: Arc<dyn VenueAdapter>,
    pub spec: VenueSpec,
    /// Registration order; the fixed tiebreaker for equally good quotes.
    pub priority: usize,
}

impl std::fmt::Debug for VenueEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VenueEntry")
            .field("name", &self.adapter.name())
            .field("priority", &self.priority)
            .finish()
    }
}

/// Capability table over all registered adapters, keyed by
/// (action kind, chain, protocol name).
#[derive(Debug, Default)]
pub struct VenueBook {
    entries: Vec<VenueEntry>,
}

impl VenueBook {
    pub fn register(&mut self, adapter: Arc<dyn VenueAdapter>, spec: VenueSpec) {
        let priority = self.entries.len();
        self.entries.push(VenueEntry { adapter, spec, priority });
    }

    pub fn by_name(&self, name: &str) -> Option<&VenueEntry> {
        self.entries
            .iter()
            .find(|e| e.adapter.name().eq_ignore_ascii_case(name))
    }

    /// Adapters able to serve (kind, chain), in priority order.
    pub fn eligible(&self, kind: ActionKind, chain_id: u64) -> Vec<&VenueEntry> {
        self.entries
            .iter()
            .filter(|e| e.spec.supports_kind(kind) && e.spec.supports_chain(chain_id))
            .collect()
    }

    /// Comma-joined protocol names supporting `kind`, for error messages.
    pub fn supported_protocols_for(&self, kind: ActionKind) -> String {
        let mut names: Vec<&str> = self
            .entries
            .iter()
            .filter(|e| e.spec.supports_kind(kind))
            .map(|e| e.adapter.name())
            .collect();
        names.sort_unstable();
        names.join(", ")
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Fan out a quote request to every entry and keep the winner.
///
/// Swaps rank by realized output; bridges by lowest fee, then output. Ties
/// keep the earlier-registered adapter. Individual quote failures are logged
/// and skipped; only a fully dry fan-out is an error for the caller.
pub async fn best_quote(
    entries: &[&VenueEntry],
    request: &QuoteRequest,
) -> Option<(String, Quote)> {
    let quotes = join_all(entries.iter().map(|entry| async move {
        match entry.adapter.quote(request).await {
            Ok(quote) => Some((entry.priority, entry.adapter.name().to_string(), quote)),
            Err(err) => {
                debug!(venue = entry.adapter.name(), error = %err, "quote failed");
                None
            }
        }
    }))
    .await;

    let mut best: Option<(usize, String, Quote)> = None;
    for candidate in quotes.into_iter().flatten() {
        best = match best {
            None => Some(candidate),
            Some(current) => {
                if quote_beats(request.kind, &candidate.2, &current.2) {
                    Some(candidate)
                } else {
                    Some(current)
                }
            }
        };
    }
    best.map(|(_, name, quote)| (name, quote))
}

fn quote_beats(kind: ActionKind, challenger: &Quote, incumbent: &Quote) -> bool {
    match kind {
        ActionKind::Bridge => {
            if challenger.fee.raw != incumbent.fee.raw {
                return challenger.fee.raw < incumbent.fee.raw;
            }
            challenger.amount_out.raw > incumbent.amount_out.raw
        }
        _ => challenger.amount_out.raw > incumbent.amount_out.raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct FixedQuote {
        name: String,
        amount_out: u64,
        fee: u64,
    }

    #[async_trait]
    impl VenueAdapter for FixedQuote {
        fn name(&self) -> &str {
            &self.name
        }

        async fn quote(&self, request: &QuoteRequest) -> Result<Quote, VenueError> {
            let out = request.output_token.clone().unwrap();
            Ok(Quote {
                venue: self.name.clone(),
                output_chain_id: out.chain_id,
                amount_out: TokenAmount::new(U256::from(self.amount_out), out.decimals),
                fee: TokenAmount::new(U256::from(self.fee), out.decimals),
                output_token: out,
                slippage_bps: 30,
                gas_estimate: U256::from(150_000u64),
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

    fn request(kind: ActionKind) -> QuoteRequest {
        let usdc = TokenInfo {
            address: Address::repeat_byte(0x11),
            symbol: "usdc".into(),
            decimals: 6,
            chain_id: 1,
            is_native: false,
        };
        QuoteRequest {
            kind,
            wallet: Address::repeat_byte(0xaa),
            chain_id: 1,
            dest_chain_id: None,
            input_token: Some(TokenInfo::native("eth", 18, 1)),
            output_token: Some(usdc),
            amount: Some(TokenAmount::new(U256::exp10(18), 18)),
            pool: None,
            leverage: None,
            percent_reduction: None,
            slippage_bps: 50,
            is_all_amount: false,
        }
    }

    fn book() -> VenueBook {
        let mut book = VenueBook::default();
        let spec = VenueSpec {
            kinds: vec![ActionKind::Swap, ActionKind::Bridge],
            chains: vec![1],
            ..Default::default()
        };
        book.register(
            Arc::new(FixedQuote { name: "alpha".into(), amount_out: 900, fee: 5 }),
            spec.clone(),
        );
        book.register(
            Arc::new(FixedQuote { name: "beta".into(), amount_out: 1000, fee: 10 }),
            spec,
        );
        book
    }

    #[tokio::test]
    async fn swaps_pick_highest_output() {
        let book = book();
        let entries = book.eligible(ActionKind::Swap, 1);
        let (winner, quote) = best_quote(&entries, &request(ActionKind::Swap)).await.unwrap();
        assert_eq!(winner, "beta");
        assert_eq!(quote.amount_out.raw, U256::from(1000u64));
    }

    #[tokio::test]
    async fn bridges_pick_lowest_fee() {
        let book = book();
        let entries = book.eligible(ActionKind::Bridge, 1);
        let (winner, _) = best_quote(&entries, &request(ActionKind::Bridge)).await.unwrap();
        assert_eq!(winner, "alpha");
    }

    #[tokio::test]
    async fn ties_keep_registration_order() {
        let mut book = VenueBook::default();
        let spec = VenueSpec {
            kinds: vec![ActionKind::Swap],
            chains: vec![1],
            ..Default::default()
        };
        book.register(
            Arc::new(FixedQuote { name: "first".into(), amount_out: 500, fee: 0 }),
            spec.clone(),
        );
        book.register(
            Arc::new(FixedQuote { name: "second".into(), amount_out: 500, fee: 0 }),
            spec,
        );
        let entries = book.eligible(ActionKind::Swap, 1);
        let (winner, _) = best_quote(&entries, &request(ActionKind::Swap)).await.unwrap();
        assert_eq!(winner, "first");
    }
}

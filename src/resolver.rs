//! # Action Chain Resolver
//!
//! Walks the action list left to right in a single pass, no backtracking.
//! Each action is disambiguated, sized against the simulator's current
//! snapshots, priced by a venue, and executed against those snapshots before
//! the next action is touched. Later steps may reference the realized output
//! of earlier ones, so resolution and simulation have to interleave.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::amount::resolve_amount;
use crate::balance::{with_retry, BalanceReader};
use crate::config::{Config, PlannerSettings};
use crate::disambiguator::{Disambiguator, MarketCapRanking, RankingPolicy};
use crate::errors::{ResolveError, VenueError};
use crate::price_oracle::PriceOracle;
use crate::registry::{ChainRegistry, TokenCatalog};
use crate::simulator::SimState;
use crate::types::{
    Action, ActionKind, AmountExpr, BridgeArgs, ChainRef, ClaimArgs, CloseArgs, ExecutionPlan,
    ExecutionStep, OneOrMany, PerpArgs, PlanOutcome, PlanRequest, ProtocolArgs, Quote,
    RealizedOutput, SwapArgs, TokenAmount, TokenInfo, TokenRef, TransferArgs,
};
use crate::units::{percent_to_bps, sf_parse_units};
use crate::venues::{best_quote, QuoteRequest, VenueAdapter, VenueBook, VenueEntry, VenueSpec};

/// A fully resolved leg, ready to execute against the snapshots.
struct PreparedLeg {
    kind: ActionKind,
    chain_id: u64,
    dest_chain_id: Option<u64>,
    input_token: TokenInfo,
    output_token: Option<TokenInfo>,
    /// `None` for position-sized steps where the venue knows the size.
    amount: Option<TokenAmount>,
    is_all: bool,
    venue: String,
    quote: Quote,
}

/// The planning façade: owns the registries, the venue book and the external
/// seams, and turns one [`PlanRequest`] into one [`PlanOutcome`].
pub struct Planner {
    config: Config,
    chains: ChainRegistry,
    catalog: Arc<dyn TokenCatalog>,
    reader: Arc<dyn BalanceReader>,
    oracle: Arc<dyn PriceOracle>,
    ranking: Arc<dyn RankingPolicy>,
    venues: VenueBook,
}

impl Planner {
    pub fn new(
        config: Config,
        catalog: Arc<dyn TokenCatalog>,
        reader: Arc<dyn BalanceReader>,
        oracle: Arc<dyn PriceOracle>,
    ) -> Self {
        let chains = ChainRegistry::from_config(&config);
        Self {
            config,
            chains,
            catalog,
            reader,
            oracle,
            ranking: Arc::new(MarketCapRanking),
            venues: VenueBook::default(),
        }
    }

    /// Swap in a different liquidity-ranking policy.
    pub fn with_ranking(mut self, ranking: Arc<dyn RankingPolicy>) -> Self {
        self.ranking = ranking;
        self
    }

    pub fn register_venue(&mut self, adapter: Arc<dyn VenueAdapter>, spec: VenueSpec) {
        self.venues.register(adapter, spec);
    }

    pub fn settings(&self) -> &PlannerSettings {
        &self.config.settings
    }

    /// Resolve and dry-run the whole action list. All-or-nothing: the first
    /// failing step aborts and no partial deltas are reported.
    #[instrument(skip_all, fields(wallet = %request.wallet, actions = request.actions.len()))]
    pub async fn plan(&self, request: PlanRequest) -> Result<PlanOutcome, ResolveError> {
        if request.actions.is_empty() {
            return Err(ResolveError::EmptyPlan);
        }

        // Chains in scope for inference; an unknown name fails the request
        // before any action is looked at.
        let mut scope_ids = Vec::new();
        let mut pins = Vec::new();
        if request.chains.is_empty() {
            for id in self.chains.chain_ids() {
                scope_ids.push(id);
                pins.push((id, None));
            }
        } else {
            for selector in &request.chains {
                let id = self.chains.id_from_name(&selector.name).ok_or_else(|| {
                    ResolveError::UnsupportedChain {
                        chain: selector.name.clone(),
                        supported: self.chains.supported_names(),
                    }
                })?;
                scope_ids.push(id);
                pins.push((id, selector.pinned_block));
            }
        }

        let groups = self.expand_all_chains(&request.actions, &scope_ids)?;
        let total_origins = groups.len();

        let mut sim = SimState::new(request.wallet, pins);
        let d = Disambiguator {
            chains: &self.chains,
            catalog: self.catalog.as_ref(),
            oracle: self.oracle.as_ref(),
            ranking: self.ranking.as_ref(),
            reader: self.reader.as_ref(),
            retry: &self.config.settings.retry,
        };

        let mut plan = ExecutionPlan::default();
        let mut truncated = false;
        let max_tx = self.config.settings.max_transactions_per_plan;

        'origins: for (origin, group) in groups.iter().enumerate() {
            let prev_origin = origin.checked_sub(1);
            for action in group {
                let legs = self
                    .resolve_action(action, request.wallet, prev_origin, &scope_ids, &d, &mut sim)
                    .await?;
                for leg in legs {
                    if sim.tx_count() + leg.quote.tx_count > max_tx {
                        warn!(
                            executed = plan.len(),
                            cap = max_tx,
                            "plan exceeds the transaction cap; truncating remaining steps"
                        );
                        truncated = true;
                        break 'origins;
                    }
                    let step = self.execute_leg(leg, origin, plan.len(), &mut sim).await?;

                    // A bridge into a chain we cannot snapshot ends the plan
                    // here; continuing would silently fabricate state.
                    if step.kind == ActionKind::Bridge {
                        if let Some(dest) = step.dest_chain_id {
                            let simulable = self
                                .chains
                                .meta(dest)
                                .map(|m| m.supports_post_bridge_simulation)
                                .unwrap_or(true);
                            if !simulable && origin + 1 < total_origins {
                                return Err(ResolveError::PostBridgeSimulationUnsupported {
                                    chain: self.chains.display_name(dest),
                                });
                            }
                        }
                    }
                    plan.steps.push(step);
                }
            }
        }

        if plan.is_empty() {
            return Err(ResolveError::EmptyPlan);
        }

        Ok(PlanOutcome {
            deltas: sim.deltas(),
            gas_by_chain: sim.gas_map(),
            plan,
            truncated,
        })
    }

    //============================================================================================//
    //                                   all-chains expansion                                     //
    //============================================================================================//

    /// Expand `"all"` chain selectors into sibling actions sharing one causal
    /// origin. `"all" → "all"` bridges have no well-defined destination and
    /// are rejected outright.
    fn expand_all_chains(
        &self,
        actions: &[Action],
        scope_ids: &[u64],
    ) -> Result<Vec<Vec<Action>>, ResolveError> {
        let mut groups = Vec::with_capacity(actions.len());
        for action in actions {
            let group = match action {
                Action::Bridge(args) => {
                    match (&args.source_chain_name, &args.destination_chain_name) {
                        (ChainRef::All, ChainRef::All) => {
                            return Err(ResolveError::AmbiguousAllChains)
                        }
                        (ChainRef::All, ChainRef::Named(dest)) => {
                            let dest_id = self.require_chain(dest)?;
                            scope_ids
                                .iter()
                                .filter(|id| **id != dest_id)
                                .filter_map(|id| self.chains.name_from_id(*id))
                                .map(|source| {
                                    let mut cloned = args.clone();
                                    cloned.source_chain_name = ChainRef::Named(source.to_string());
                                    Action::Bridge(cloned)
                                })
                                .collect()
                        }
                        (ChainRef::Named(source), ChainRef::All) => {
                            let source_id = self.require_chain(source)?;
                            scope_ids
                                .iter()
                                .filter(|id| **id != source_id)
                                .filter_map(|id| self.chains.name_from_id(*id))
                                .map(|dest| {
                                    let mut cloned = args.clone();
                                    cloned.destination_chain_name =
                                        ChainRef::Named(dest.to_string());
                                    Action::Bridge(cloned)
                                })
                                .collect()
                        }
                        _ => vec![action.clone()],
                    }
                }
                other if chain_ref_of(other) == Some(&ChainRef::All) => scope_ids
                    .iter()
                    .filter_map(|id| self.chains.name_from_id(*id))
                    .map(|name| with_chain(other, name))
                    .collect(),
                other => vec![other.clone()],
            };
            groups.push(group);
        }
        Ok(groups)
    }

    fn require_chain(&self, name: &str) -> Result<u64, ResolveError> {
        self.chains
            .id_from_name(name)
            .ok_or_else(|| ResolveError::UnsupportedChain {
                chain: name.to_string(),
                supported: self.chains.supported_names(),
            })
    }

    //============================================================================================//
    //                                  per-action resolution                                     //
    //============================================================================================//

    async fn resolve_action(
        &self,
        action: &Action,
        wallet: ethers::types::Address,
        prev_origin: Option<usize>,
        scopes: &[u64],
        d: &Disambiguator<'_>,
        sim: &mut SimState,
    ) -> Result<Vec<PreparedLeg>, ResolveError> {
        match action {
            Action::Swap(args) => {
                self.resolve_swap(args, wallet, prev_origin, scopes, d, sim).await
            }
            Action::Bridge(args) => {
                self.resolve_bridge(args, wallet, prev_origin, scopes, d, sim).await
            }
            Action::Transfer(args) => {
                self.resolve_transfer(args, wallet, prev_origin, scopes, d, sim).await
            }
            Action::Deposit(args)
            | Action::Withdraw(args)
            | Action::Lend(args)
            | Action::Borrow(args)
            | Action::Repay(args)
            | Action::Stake(args)
            | Action::Unstake(args) => {
                self.resolve_protocol(action.kind(), args, wallet, prev_origin, scopes, d, sim)
                    .await
            }
            Action::Claim(args) => self.resolve_claim(args, wallet, scopes, d).await,
            Action::Long(args) | Action::Short(args) => {
                self.resolve_perp(action.kind(), args, wallet, prev_origin, scopes, d, sim)
                    .await
            }
            Action::Close(args) => self.resolve_close(args, wallet, scopes, d).await,
        }
    }

    async fn resolve_swap(
        &self,
        args: &SwapArgs,
        wallet: ethers::types::Address,
        prev_origin: Option<usize>,
        scopes: &[u64],
        d: &Disambiguator<'_>,
        sim: &mut SimState,
    ) -> Result<Vec<PreparedLeg>, ResolveError> {
        let explicit_chain = d.resolve_chain_ref(args.chain_name.as_ref())?;
        let slippage_bps = self.slippage_bps(args.slippage.map(|s| s.0));

        // Expand the input side into concrete (token, amount) legs first.
        let input_refs = args.input_token.clone().into_vec();
        let mut inputs: Vec<(TokenInfo, AmountExpr)> = Vec::new();
        let amounts = self.amount_list(args.input_amount.as_ref(), input_refs.len())?;

        for (token_ref, amount) in input_refs.iter().zip(amounts) {
            match token_ref {
                TokenRef::StepOutput => {
                    let out = self.prior_output(prev_origin, sim)?;
                    inputs.push((out.token, amount));
                }
                TokenRef::All => {
                    let chain_id =
                        explicit_chain.or_else(|| scopes.first().copied()).ok_or_else(|| {
                            ResolveError::Internal { detail: "no chains in scope".into() }
                        })?;
                    let held = d
                        .portfolio_tokens(
                            chain_id,
                            self.config.settings.min_portfolio_balance_usd,
                            sim,
                        )
                        .await?;
                    for token in held {
                        inputs.push((token, AmountExpr::All));
                    }
                }
                other => {
                    let token = d.resolve_token(other, explicit_chain, scopes, sim).await?;
                    inputs.push((token, amount));
                }
            }
        }

        let mut legs = Vec::new();
        for (input, amount_expr) in inputs {
            let chain_id = input.chain_id;
            let output = match &args.output_token {
                TokenRef::StepOutput => self.prior_output(prev_origin, sim)?.token,
                other => d.resolve_token(other, Some(chain_id), scopes, sim).await?,
            };

            // The portfolio selector naturally includes the destination
            // asset; spending it on itself is skipped, not an error.
            if input.address == output.address && input.chain_id == output.chain_id {
                if matches!(args.input_token, OneOrMany::One(TokenRef::All)) {
                    continue;
                }
                return Err(ResolveError::SameTokenSwap {
                    token: input.symbol.clone(),
                    chain: self.chains.display_name(chain_id),
                });
            }

            let amount = match (&args.output_amount, &amount_expr) {
                (Some(target), expr) if args.input_amount.is_none() => {
                    debug_assert!(matches!(*expr, AmountExpr::All));
                    self.input_for_exact_output(target, &input, &output).await?
                }
                (_, expr) => {
                    resolve_amount(
                        expr,
                        &input,
                        args.input_amount_units.as_deref(),
                        prev_origin,
                        sim,
                        self.reader.as_ref(),
                        self.oracle.as_ref(),
                        &self.config.settings.retry,
                    )
                    .await?
                }
            };
            let is_all = matches!(amount_expr, AmountExpr::All);

            let request = QuoteRequest {
                kind: ActionKind::Swap,
                wallet,
                chain_id,
                dest_chain_id: None,
                input_token: Some(input.clone()),
                output_token: Some(output.clone()),
                amount: Some(amount),
                pool: None,
                leverage: None,
                percent_reduction: None,
                slippage_bps,
                is_all_amount: is_all,
            };
            let (venue, quote) = self
                .pick_venue(args.protocol_name.as_deref(), &request, || {
                    ResolveError::NoSwapRoute {
                        input: input.symbol.clone(),
                        output: output.symbol.clone(),
                        chain: self.chains.display_name(chain_id),
                    }
                })
                .await?;

            legs.push(PreparedLeg {
                kind: ActionKind::Swap,
                chain_id,
                dest_chain_id: None,
                input_token: input,
                output_token: Some(output),
                amount: Some(amount),
                is_all,
                venue,
                quote,
            });
        }

        if legs.is_empty() {
            return Err(ResolveError::ZeroAmount);
        }
        Ok(legs)
    }

    async fn resolve_bridge(
        &self,
        args: &BridgeArgs,
        wallet: ethers::types::Address,
        prev_origin: Option<usize>,
        scopes: &[u64],
        d: &Disambiguator<'_>,
        sim: &mut SimState,
    ) -> Result<Vec<PreparedLeg>, ResolveError> {
        let source_id = match &args.source_chain_name {
            ChainRef::Named(name) => self.require_chain(name)?,
            ChainRef::All => {
                return Err(ResolveError::Internal {
                    detail: "unexpanded all-chains bridge source".into(),
                })
            }
        };
        let dest_id = match &args.destination_chain_name {
            ChainRef::Named(name) => self.require_chain(name)?,
            ChainRef::All => {
                return Err(ResolveError::Internal {
                    detail: "unexpanded all-chains bridge destination".into(),
                })
            }
        };

        let mut input_tokens = Vec::new();
        for token_ref in args.token.clone().into_vec() {
            match token_ref {
                TokenRef::StepOutput => {
                    input_tokens.push(self.prior_output(prev_origin, sim)?.token)
                }
                TokenRef::All => {
                    let held = d
                        .portfolio_tokens(
                            source_id,
                            self.config.settings.min_portfolio_balance_usd,
                            sim,
                        )
                        .await?;
                    input_tokens.extend(held);
                }
                other => {
                    input_tokens
                        .push(d.resolve_token(&other, Some(source_id), scopes, sim).await?)
                }
            }
        }

        let source_meta = self.chains.meta(source_id);
        let mut legs = Vec::new();
        for input in input_tokens {
            if let Some(meta) = source_meta {
                if meta.bridge_accepts_native_only && !input.is_native {
                    return Err(ResolveError::NativeOnlyBridgeInput {
                        chain: meta.name.clone(),
                        native: meta.native_symbol.to_uppercase(),
                        token: input.symbol.to_uppercase(),
                    });
                }
            }

            // The credited asset is the same token's listing on the
            // destination chain (or its native form).
            let output = self.bridged_counterpart(&input, dest_id, scopes, d, sim).await?;

            let amount = resolve_amount(
                &args.amount,
                &input,
                args.amount_units.as_deref(),
                prev_origin,
                sim,
                self.reader.as_ref(),
                self.oracle.as_ref(),
                &self.config.settings.retry,
            )
            .await?;
            let is_all = matches!(args.amount, AmountExpr::All);

            let request = QuoteRequest {
                kind: ActionKind::Bridge,
                wallet,
                chain_id: source_id,
                dest_chain_id: Some(dest_id),
                input_token: Some(input.clone()),
                output_token: Some(output.clone()),
                amount: Some(amount),
                pool: None,
                leverage: None,
                percent_reduction: None,
                slippage_bps: self.config.settings.default_slippage_bps,
                is_all_amount: is_all,
            };
            let (venue, quote) = self
                .pick_venue(args.protocol_name.as_deref(), &request, || {
                    ResolveError::NoBridgeRoute {
                        token: input.symbol.clone(),
                        src: self.chains.display_name(source_id),
                        destination: self.chains.display_name(dest_id),
                    }
                })
                .await?;

            legs.push(PreparedLeg {
                kind: ActionKind::Bridge,
                chain_id: source_id,
                dest_chain_id: Some(dest_id),
                input_token: input,
                output_token: Some(output),
                amount: Some(amount),
                is_all,
                venue,
                quote,
            });
        }

        if legs.is_empty() {
            return Err(ResolveError::ZeroAmount);
        }
        Ok(legs)
    }

    async fn resolve_transfer(
        &self,
        args: &TransferArgs,
        _wallet: ethers::types::Address,
        prev_origin: Option<usize>,
        scopes: &[u64],
        d: &Disambiguator<'_>,
        sim: &mut SimState,
    ) -> Result<Vec<PreparedLeg>, ResolveError> {
        let explicit_chain = d.resolve_chain_ref(args.chain_name.as_ref())?;
        let input = match &args.token {
            TokenRef::StepOutput => self.prior_output(prev_origin, sim)?.token,
            other => d.resolve_token(other, explicit_chain, scopes, sim).await?,
        };
        let chain_id = input.chain_id;

        let amount = resolve_amount(
            &args.amount,
            &input,
            args.amount_units.as_deref(),
            prev_origin,
            sim,
            self.reader.as_ref(),
            self.oracle.as_ref(),
            &self.config.settings.retry,
        )
        .await?;

        // Plain transfers need no venue: one transaction, funds leave the
        // wallet, nothing comes back.
        let quote = Quote {
            venue: "wallet".into(),
            output_token: input.clone(),
            output_chain_id: chain_id,
            amount_out: TokenAmount::zero(input.decimals),
            fee: TokenAmount::zero(input.decimals),
            slippage_bps: 0,
            gas_estimate: self.config.settings.transfer_gas.into(),
            tx_count: 1,
        };

        Ok(vec![PreparedLeg {
            kind: ActionKind::Transfer,
            chain_id,
            dest_chain_id: None,
            input_token: input,
            output_token: None,
            amount: Some(amount),
            is_all: matches!(args.amount, AmountExpr::All),
            venue: "wallet".into(),
            quote,
        }])
    }

    #[allow(clippy::too_many_arguments)]
    async fn resolve_protocol(
        &self,
        kind: ActionKind,
        args: &ProtocolArgs,
        wallet: ethers::types::Address,
        prev_origin: Option<usize>,
        scopes: &[u64],
        d: &Disambiguator<'_>,
        sim: &mut SimState,
    ) -> Result<Vec<PreparedLeg>, ResolveError> {
        let explicit_chain = d.resolve_chain_ref(args.chain_name.as_ref())?;
        let token = match &args.token {
            TokenRef::StepOutput => self.prior_output(prev_origin, sim)?.token,
            other => d.resolve_token(other, explicit_chain, scopes, sim).await?,
        };
        let chain_id = token.chain_id;

        let entry = self.named_entry(
            kind,
            &args.protocol_name,
            chain_id,
            args.pool_name.as_deref(),
        )?;

        // Wallet-funded kinds size against the snapshot; position-funded
        // kinds let the venue size symbolic amounts.
        let (amount, percent, is_all) = if kind.spends_wallet_funds() {
            let amount = resolve_amount(
                &args.amount,
                &token,
                args.amount_units.as_deref(),
                prev_origin,
                sim,
                self.reader.as_ref(),
                self.oracle.as_ref(),
                &self.config.settings.retry,
            )
            .await?;
            (Some(amount), None, matches!(args.amount, AmountExpr::All))
        } else {
            match &args.amount {
                AmountExpr::Exact(literal) => {
                    let raw = sf_parse_units(literal, token.decimals).map_err(|_| {
                        ResolveError::InvalidAmount { amount: literal.clone() }
                    })?;
                    (Some(TokenAmount::new(raw, token.decimals)), None, false)
                }
                AmountExpr::All => (None, None, true),
                AmountExpr::Half => (None, Some(50.0), false),
                AmountExpr::Percent(pct) => {
                    if !(*pct > 0.0 && *pct <= 100.0) {
                        return Err(ResolveError::InvalidAmount {
                            amount: format!("{pct}%"),
                        });
                    }
                    (None, Some(*pct), false)
                }
                AmountExpr::StepOutput => {
                    let out = self.prior_output(prev_origin, sim)?;
                    (Some(out.amount), None, false)
                }
            }
        };

        let request = QuoteRequest {
            kind,
            wallet,
            chain_id,
            dest_chain_id: None,
            input_token: Some(token.clone()),
            output_token: None,
            amount,
            pool: args.pool_name.clone(),
            leverage: None,
            percent_reduction: percent,
            slippage_bps: self.config.settings.default_slippage_bps,
            is_all_amount: is_all,
        };
        let (venue, quote) = self.quote_entry(entry, &request).await?;

        Ok(vec![PreparedLeg {
            kind,
            chain_id,
            dest_chain_id: None,
            input_token: token,
            output_token: if quote.amount_out.is_zero() {
                None
            } else {
                Some(quote.output_token.clone())
            },
            amount,
            is_all,
            venue,
            quote,
        }])
    }

    async fn resolve_claim(
        &self,
        args: &ClaimArgs,
        wallet: ethers::types::Address,
        scopes: &[u64],
        d: &Disambiguator<'_>,
    ) -> Result<Vec<PreparedLeg>, ResolveError> {
        let chain_id = d
            .resolve_chain_ref(args.chain_name.as_ref())?
            .or_else(|| scopes.first().copied())
            .ok_or_else(|| ResolveError::Internal { detail: "no chains in scope".into() })?;

        let entry = self.named_entry(
            ActionKind::Claim,
            &args.protocol_name,
            chain_id,
            args.pool_name.as_deref(),
        )?;

        let request = QuoteRequest {
            kind: ActionKind::Claim,
            wallet,
            chain_id,
            dest_chain_id: None,
            input_token: None,
            output_token: None,
            amount: None,
            pool: args.pool_name.clone(),
            leverage: None,
            percent_reduction: None,
            slippage_bps: 0,
            is_all_amount: false,
        };
        let (venue, quote) = self.quote_entry(entry, &request).await?;

        Ok(vec![PreparedLeg {
            kind: ActionKind::Claim,
            chain_id,
            dest_chain_id: None,
            input_token: quote.output_token.clone(),
            output_token: Some(quote.output_token.clone()),
            amount: None,
            is_all: false,
            venue,
            quote,
        }])
    }

    #[allow(clippy::too_many_arguments)]
    async fn resolve_perp(
        &self,
        kind: ActionKind,
        args: &PerpArgs,
        wallet: ethers::types::Address,
        prev_origin: Option<usize>,
        scopes: &[u64],
        d: &Disambiguator<'_>,
        sim: &mut SimState,
    ) -> Result<Vec<PreparedLeg>, ResolveError> {
        let explicit_chain = d.resolve_chain_ref(args.chain_name.as_ref())?;
        let input = match &args.input_token {
            TokenRef::StepOutput => self.prior_output(prev_origin, sim)?.token,
            other => d.resolve_token(other, explicit_chain, scopes, sim).await?,
        };
        let chain_id = input.chain_id;

        let entry = self.named_entry(kind, &args.protocol_name, chain_id, None)?;

        let leverage = match args.leverage_multiplier {
            Some(lev) if lev.0 <= 0.0 => return Err(ResolveError::LeverageNotPositive),
            Some(lev) => {
                let max = entry
                    .spec
                    .max_leverage
                    .unwrap_or(self.config.settings.default_max_leverage);
                if lev.0 > max {
                    return Err(ResolveError::LeverageOutOfRange { max });
                }
                Some(lev.0)
            }
            None => None,
        };

        let output = d.resolve_token(&args.output_token, Some(chain_id), scopes, sim).await?;
        let amount = resolve_amount(
            &args.input_amount,
            &input,
            args.input_amount_units.as_deref(),
            prev_origin,
            sim,
            self.reader.as_ref(),
            self.oracle.as_ref(),
            &self.config.settings.retry,
        )
        .await?;

        let request = QuoteRequest {
            kind,
            wallet,
            chain_id,
            dest_chain_id: None,
            input_token: Some(input.clone()),
            output_token: Some(output.clone()),
            amount: Some(amount),
            pool: None,
            leverage,
            percent_reduction: None,
            slippage_bps: self.config.settings.default_slippage_bps,
            is_all_amount: matches!(args.input_amount, AmountExpr::All),
        };
        let (venue, quote) = self.quote_entry(entry, &request).await?;

        Ok(vec![PreparedLeg {
            kind,
            chain_id,
            dest_chain_id: None,
            input_token: input,
            output_token: Some(output),
            amount: Some(amount),
            is_all: matches!(args.input_amount, AmountExpr::All),
            venue,
            quote,
        }])
    }

    async fn resolve_close(
        &self,
        args: &CloseArgs,
        wallet: ethers::types::Address,
        scopes: &[u64],
        d: &Disambiguator<'_>,
    ) -> Result<Vec<PreparedLeg>, ResolveError> {
        let chain_id = d
            .resolve_chain_ref(args.chain_name.as_ref())?
            .or_else(|| scopes.first().copied())
            .ok_or_else(|| ResolveError::Internal { detail: "no chains in scope".into() })?;

        let entry = self.named_entry(ActionKind::Close, &args.protocol_name, chain_id, None)?;

        let percent = match args.percent_reduction {
            Some(p) if !(p.0 > 0.0 && p.0 <= 100.0) => {
                return Err(ResolveError::PercentOutOfRange)
            }
            Some(p) => p.0,
            None => 100.0,
        };

        let request = QuoteRequest {
            kind: ActionKind::Close,
            wallet,
            chain_id,
            dest_chain_id: None,
            input_token: None,
            output_token: None,
            amount: None,
            pool: Some(args.output_token.display_name()),
            leverage: None,
            percent_reduction: Some(percent),
            slippage_bps: self.config.settings.default_slippage_bps,
            is_all_amount: false,
        };
        let (venue, quote) = self.quote_entry(entry, &request).await?;

        Ok(vec![PreparedLeg {
            kind: ActionKind::Close,
            chain_id,
            dest_chain_id: None,
            input_token: quote.output_token.clone(),
            output_token: Some(quote.output_token.clone()),
            amount: None,
            is_all: false,
            venue,
            quote,
        }])
    }

    //============================================================================================//
    //                                     shared helpers                                         //
    //============================================================================================//

    /// Execute one prepared leg against the snapshots and record its
    /// realized output for later placeholder substitution.
    async fn execute_leg(
        &self,
        leg: PreparedLeg,
        origin: usize,
        index: usize,
        sim: &mut SimState,
    ) -> Result<ExecutionStep, ResolveError> {
        let retry = &self.config.settings.retry;

        if leg.kind.spends_wallet_funds() {
            if let Some(amount) = &leg.amount {
                sim.debit(
                    &leg.input_token,
                    amount,
                    &self.chains.display_name(leg.chain_id),
                    leg.is_all,
                    self.config.settings.dust_tolerance_bps,
                    self.reader.as_ref(),
                    retry,
                )
                .await?;
            }
        }

        let mut realized = None;
        if !leg.quote.amount_out.is_zero() {
            sim.credit(&leg.quote.output_token, &leg.quote.amount_out, self.reader.as_ref(), retry)
                .await?;
            let output = RealizedOutput {
                chain_id: leg.quote.output_chain_id,
                token: leg.quote.output_token.clone(),
                amount: leg.quote.amount_out,
            };
            sim.record_output(origin, output.clone());
            realized = Some(output);
        }

        sim.note_gas(leg.chain_id, leg.quote.gas_estimate);
        sim.add_transactions(leg.quote.tx_count);
        debug!(
            step = index,
            kind = %leg.kind,
            venue = %leg.venue,
            amount = ?leg.amount.map(|a| a.to_string()),
            "step simulated"
        );

        Ok(ExecutionStep {
            index,
            origin,
            kind: leg.kind,
            chain_id: leg.chain_id,
            dest_chain_id: leg.dest_chain_id,
            input_token: leg.input_token,
            output_token: leg.output_token,
            amount: leg.amount.unwrap_or_else(|| TokenAmount::zero(18)),
            venue: leg.venue,
            quote: leg.quote,
            realized,
        })
    }

    /// Resolve the venue for a step: a named protocol is looked up and
    /// guarded, an open selection fans out to every eligible adapter.
    async fn pick_venue(
        &self,
        named: Option<&str>,
        request: &QuoteRequest,
        no_route: impl FnOnce() -> ResolveError,
    ) -> Result<(String, Quote), ResolveError> {
        if let Some(name) = named {
            let entry =
                self.named_entry(request.kind, name, request.chain_id, request.pool.as_deref())?;
            if request.is_all_amount && !entry.spec.supports_all_amount {
                return Err(ResolveError::AllAmountUnsupported {
                    venue: entry.adapter.name().to_string(),
                    token: request
                        .input_token
                        .as_ref()
                        .map(|t| t.symbol.to_uppercase())
                        .unwrap_or_default(),
                });
            }
            return self.quote_entry(entry, request).await;
        }

        let entries: Vec<&VenueEntry> = self
            .venues
            .eligible(request.kind, request.chain_id)
            .into_iter()
            .filter(|e| !request.is_all_amount || e.spec.supports_all_amount)
            .collect();
        if entries.is_empty() {
            return Err(no_route());
        }
        best_quote(&entries, request).await.ok_or_else(no_route)
    }

    /// Look up an explicitly named venue and enforce its declared
    /// capabilities for (kind, chain, pool).
    fn named_entry(
        &self,
        kind: ActionKind,
        name: &str,
        chain_id: u64,
        pool: Option<&str>,
    ) -> Result<&VenueEntry, ResolveError> {
        let unsupported = || ResolveError::UnsupportedProtocolForAction {
            protocol: name.to_lowercase(),
            action: kind.to_string(),
            supported: self.venues.supported_protocols_for(kind),
        };
        let entry = self.venues.by_name(name).ok_or_else(unsupported)?;
        if !entry.spec.supports_kind(kind) || !entry.spec.supports_chain(chain_id) {
            return Err(unsupported());
        }
        if let Some(pool) = pool {
            if !entry.spec.supports_pool(chain_id, pool) {
                return Err(ResolveError::UnsupportedPoolForProtocol {
                    pool: pool.to_string(),
                    protocol: name.to_lowercase(),
                    chain: self.chains.display_name(chain_id),
                });
            }
        }
        Ok(entry)
    }

    async fn quote_entry(
        &self,
        entry: &VenueEntry,
        request: &QuoteRequest,
    ) -> Result<(String, Quote), ResolveError> {
        let quote = entry.adapter.quote(request).await.map_err(|err| match err {
            VenueError::AllAmountUnsupported { venue, token } => {
                ResolveError::AllAmountUnsupported { venue, token }
            }
            VenueError::QuoteFailed(message) | VenueError::BuildFailed(message) => {
                ResolveError::Internal { detail: message }
            }
        })?;
        Ok((entry.adapter.name().to_string(), quote))
    }

    /// Aggregated realized output of the previous origin; a placeholder with
    /// no prior step is a contract violation, not a user error.
    fn prior_output(
        &self,
        prev_origin: Option<usize>,
        sim: &SimState,
    ) -> Result<RealizedOutput, ResolveError> {
        let origin = prev_origin.ok_or_else(|| ResolveError::Internal {
            detail: "step output reference with no prior step".into(),
        })?;
        sim.aggregate_output(origin).ok_or_else(|| ResolveError::Internal {
            detail: format!("no realized output recorded for step {origin}"),
        })
    }

    fn slippage_bps(&self, slippage: Option<f64>) -> u32 {
        slippage
            .and_then(percent_to_bps)
            .unwrap_or(self.config.settings.default_slippage_bps)
    }

    /// Normalize the input-amount list against the number of input tokens.
    fn amount_list(
        &self,
        amounts: Option<&OneOrMany<AmountExpr>>,
        legs: usize,
    ) -> Result<Vec<AmountExpr>, ResolveError> {
        let list = match amounts {
            None => vec![AmountExpr::All; legs],
            Some(OneOrMany::One(expr)) => vec![expr.clone(); legs],
            Some(OneOrMany::Many(list)) if list.len() == legs => list.clone(),
            Some(OneOrMany::Many(list)) => {
                return Err(ResolveError::InvalidAmount {
                    amount: format!("{} amounts for {legs} input tokens", list.len()),
                })
            }
        };
        Ok(list)
    }

    /// Input amount implied by an exact-output swap, sized through the
    /// oracle's pair ratio.
    async fn input_for_exact_output(
        &self,
        target: &AmountExpr,
        input: &TokenInfo,
        output: &TokenInfo,
    ) -> Result<TokenAmount, ResolveError> {
        let AmountExpr::Exact(literal) = target else {
            return Err(ResolveError::InvalidAmount {
                amount: "outputAmount".to_string(),
            });
        };
        let invalid = || ResolveError::InvalidAmount { amount: literal.clone() };

        let value =
            rust_decimal::Decimal::from_str_radix(literal.trim(), 10).map_err(|_| invalid())?;
        let ratio = with_retry("pair_ratio", &self.config.settings.retry, || {
            self.oracle.pair_price_ratio(output, input)
        })
        .await?;
        let ratio = rust_decimal::Decimal::try_from(ratio).map_err(|_| invalid())?;
        let required = value.checked_mul(ratio).ok_or_else(invalid)?;
        let raw = sf_parse_units(&required.to_string(), input.decimals).map_err(|_| invalid())?;
        if raw.is_zero() {
            return Err(ResolveError::ZeroAmount);
        }
        Ok(TokenAmount::new(raw, input.decimals))
    }

    /// The asset credited on the destination side of a bridge: the same
    /// token's listing over there, or the destination's native asset when
    /// bridging the gas token itself.
    async fn bridged_counterpart(
        &self,
        input: &TokenInfo,
        dest_id: u64,
        scopes: &[u64],
        d: &Disambiguator<'_>,
        sim: &mut SimState,
    ) -> Result<TokenInfo, ResolveError> {
        if let Some(meta) = self.chains.meta(dest_id) {
            if meta.native_symbol.eq_ignore_ascii_case(&input.symbol) {
                return Ok(self.chains.native_token(dest_id).expect("meta exists"));
            }
        }
        d.resolve_token(
            &TokenRef::Symbol(input.symbol.clone()),
            Some(dest_id),
            scopes,
            sim,
        )
        .await
    }
}

/// The chain field carried by a non-bridge action, if any.
fn chain_ref_of(action: &Action) -> Option<&ChainRef> {
    match action {
        Action::Swap(args) => args.chain_name.as_ref(),
        Action::Transfer(args) => args.chain_name.as_ref(),
        Action::Deposit(args)
        | Action::Withdraw(args)
        | Action::Lend(args)
        | Action::Borrow(args)
        | Action::Repay(args)
        | Action::Stake(args)
        | Action::Unstake(args) => args.chain_name.as_ref(),
        Action::Claim(args) => args.chain_name.as_ref(),
        Action::Long(args) | Action::Short(args) => args.chain_name.as_ref(),
        Action::Close(args) => args.chain_name.as_ref(),
        Action::Bridge(_) => None,
    }
}

/// Clone an action with its chain pinned to `name`.
fn with_chain(action: &Action, name: &str) -> Action {
    let chain = Some(ChainRef::Named(name.to_string()));
    match action.clone() {
        Action::Swap(mut args) => {
            args.chain_name = chain;
            Action::Swap(args)
        }
        Action::Transfer(mut args) => {
            args.chain_name = chain;
            Action::Transfer(args)
        }
        Action::Deposit(mut args) => {
            args.chain_name = chain;
            Action::Deposit(args)
        }
        Action::Withdraw(mut args) => {
            args.chain_name = chain;
            Action::Withdraw(args)
        }
        Action::Lend(mut args) => {
            args.chain_name = chain;
            Action::Lend(args)
        }
        Action::Borrow(mut args) => {
            args.chain_name = chain;
            Action::Borrow(args)
        }
        Action::Repay(mut args) => {
            args.chain_name = chain;
            Action::Repay(args)
        }
        Action::Stake(mut args) => {
            args.chain_name = chain;
            Action::Stake(args)
        }
        Action::Unstake(mut args) => {
            args.chain_name = chain;
            Action::Unstake(args)
        }
        Action::Claim(mut args) => {
            args.chain_name = chain;
            Action::Claim(args)
        }
        Action::Long(mut args) => {
            args.chain_name = chain;
            Action::Long(args)
        }
        Action::Short(mut args) => {
            args.chain_name = chain;
            Action::Short(args)
        }
        Action::Close(mut args) => {
            args.chain_name = chain;
            Action::Close(args)
        }
        bridge @ Action::Bridge(_) => bridge,
    }
}

//! # Dry-Run Simulator
//!
//! One mutable balance snapshot per touched chain, seeded lazily from the
//! balance reader at the block pinned for the request. Steps execute strictly
//! in plan order against these snapshots; the realized output of each step is
//! recorded for the next step's placeholder substitution, which is why
//! resolution and simulation interleave instead of running as two phases.

use ahash::AHashMap;
use ethers::types::{Address, Sign, U256, I256};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::balance::{with_retry, BalanceReader};
use crate::config::RetryPolicy;
use crate::errors::ResolveError;
use crate::types::{BalanceDelta, DeltaReport, RealizedOutput, TokenAmount, TokenInfo};

/// Mutable balance state of one chain during simulation.
#[derive(Debug)]
struct ChainSnapshot {
    chain_id: u64,
    pinned_block: Option<u64>,
    tokens: AHashMap<Address, TokenInfo>,
    initial: AHashMap<Address, U256>,
    current: AHashMap<Address, U256>,
}

impl ChainSnapshot {
    fn new(chain_id: u64, pinned_block: Option<u64>) -> Self {
        Self {
            chain_id,
            pinned_block,
            tokens: AHashMap::new(),
            initial: AHashMap::new(),
            current: AHashMap::new(),
        }
    }
}

/// Simulation state for one plan: snapshots, gas tally, transaction budget
/// and the realized outputs later placeholders bind to.
#[derive(Debug)]
pub struct SimState {
    wallet: Address,
    pins: AHashMap<u64, Option<u64>>,
    snapshots: AHashMap<u64, ChainSnapshot>,
    gas_by_chain: AHashMap<u64, U256>,
    tx_count: usize,
    realized: Vec<(usize, RealizedOutput)>,
}

impl SimState {
    pub fn new(wallet: Address, pins: impl IntoIterator<Item = (u64, Option<u64>)>) -> Self {
        Self {
            wallet,
            pins: pins.into_iter().collect(),
            snapshots: AHashMap::new(),
            gas_by_chain: AHashMap::new(),
            tx_count: 0,
            realized: Vec::new(),
        }
    }

    /// Simulated balance of `token` as of this point in the plan, seeding the
    /// snapshot from the live chain on first touch.
    pub async fn balance_of(
        &mut self,
        token: &TokenInfo,
        reader: &dyn BalanceReader,
        retry: &RetryPolicy,
    ) -> Result<TokenAmount, ResolveError> {
        self.ensure_seeded(token, reader, retry).await?;
        let snapshot = self.snapshots.get(&token.chain_id).expect("seeded above");
        let raw = snapshot.current.get(&token.address).copied().unwrap_or_default();
        Ok(TokenAmount::new(raw, token.decimals))
    }

    /// Debit a spend from the wallet, failing with the user-facing
    /// insufficient-balance diagnosis when the simulated balance cannot
    /// cover it. Full-balance spends clamp sub-dust residue to zero so that
    /// router rounding does not read as leftover funds.
    pub async fn debit(
        &mut self,
        token: &TokenInfo,
        amount: &TokenAmount,
        chain_name: &str,
        is_all_amount: bool,
        dust_tolerance_bps: u32,
        reader: &dyn BalanceReader,
        retry: &RetryPolicy,
    ) -> Result<(), ResolveError> {
        self.ensure_seeded(token, reader, retry).await?;
        let snapshot = self
            .snapshots
            .get_mut(&token.chain_id)
            .expect("seeded above");
        let held = snapshot.current.get(&token.address).copied().unwrap_or_default();

        if amount.raw > held {
            let have = TokenAmount::new(held, token.decimals);
            let deficit = TokenAmount::new(amount.raw - held, token.decimals);
            return Err(ResolveError::InsufficientBalance {
                token: token.symbol.to_uppercase(),
                chain: chain_name.to_string(),
                have: have.to_string(),
                need: amount.to_string(),
                deficit: deficit.to_string(),
            });
        }

        let mut remaining = held - amount.raw;
        if is_all_amount && !remaining.is_zero() {
            let within_dust = remaining
                .checked_mul(U256::from(10_000u32))
                .map(|scaled| scaled <= held * U256::from(dust_tolerance_bps))
                .unwrap_or(false);
            if within_dust {
                debug!(
                    token = %token.symbol,
                    chain_id = token.chain_id,
                    residue = %remaining,
                    "clamping sub-dust residue after full-balance spend"
                );
                remaining = U256::zero();
            }
        }
        snapshot.current.insert(token.address, remaining);
        Ok(())
    }

    /// Credit an inflow, seeding the destination snapshot first so the final
    /// delta is measured against the real pre-plan balance.
    pub async fn credit(
        &mut self,
        token: &TokenInfo,
        amount: &TokenAmount,
        reader: &dyn BalanceReader,
        retry: &RetryPolicy,
    ) -> Result<(), ResolveError> {
        self.ensure_seeded(token, reader, retry).await?;
        let snapshot = self
            .snapshots
            .get_mut(&token.chain_id)
            .expect("seeded above");
        let held = snapshot.current.get(&token.address).copied().unwrap_or_default();
        let updated = held.checked_add(amount.raw).unwrap_or_else(|| {
            warn!(token = %token.symbol, "credit overflow, clamping");
            U256::MAX
        });
        snapshot.current.insert(token.address, updated);
        Ok(())
    }

    async fn ensure_seeded(
        &mut self,
        token: &TokenInfo,
        reader: &dyn BalanceReader,
        retry: &RetryPolicy,
    ) -> Result<(), ResolveError> {
        let pinned = self.pins.get(&token.chain_id).copied().flatten();
        let snapshot = self
            .snapshots
            .entry(token.chain_id)
            .or_insert_with(|| ChainSnapshot::new(token.chain_id, pinned));
        if snapshot.initial.contains_key(&token.address) {
            return Ok(());
        }
        let wallet = self.wallet;
        let block = snapshot.pinned_block;
        let live = with_retry("balance_of", retry, || {
            reader.balance_of(token.chain_id, wallet, token, block)
        })
        .await?;
        snapshot.tokens.insert(token.address, token.clone());
        snapshot.initial.insert(token.address, live);
        snapshot.current.insert(token.address, live);
        Ok(())
    }

    pub fn note_gas(&mut self, chain_id: u64, gas: U256) {
        let entry = self.gas_by_chain.entry(chain_id).or_default();
        *entry = entry.saturating_add(gas);
    }

    pub fn add_transactions(&mut self, count: usize) {
        self.tx_count += count;
    }

    pub fn tx_count(&self) -> usize {
        self.tx_count
    }

    pub fn record_output(&mut self, origin: usize, output: RealizedOutput) {
        self.realized.push((origin, output));
    }

    /// Combined realized output of every sibling leg at `origin`. Legs share
    /// a destination token by construction; amounts sum.
    pub fn aggregate_output(&self, origin: usize) -> Option<RealizedOutput> {
        let mut result: Option<RealizedOutput> = None;
        for (o, out) in &self.realized {
            if *o != origin {
                continue;
            }
            match &mut result {
                None => result = Some(out.clone()),
                Some(agg) if agg.token == out.token && agg.chain_id == out.chain_id => {
                    agg.amount = agg
                        .amount
                        .checked_add(&out.amount)
                        .unwrap_or_else(|_| out.amount);
                }
                Some(_) => {}
            }
        }
        result
    }

    /// Per-chain, per-token signed changes from plan start to now. Zero
    /// deltas are omitted.
    pub fn deltas(&self) -> DeltaReport {
        let mut entries = Vec::new();
        for snapshot in self.snapshots.values() {
            for (address, token) in &snapshot.tokens {
                let initial = snapshot.initial.get(address).copied().unwrap_or_default();
                let current = snapshot.current.get(address).copied().unwrap_or_default();
                if initial == current {
                    continue;
                }
                let (sign, abs) = if current >= initial {
                    (Sign::Positive, current - initial)
                } else {
                    (Sign::Negative, initial - current)
                };
                let raw = I256::checked_from_sign_and_abs(sign, abs)
                    .unwrap_or(if sign == Sign::Negative { I256::MIN } else { I256::MAX });
                entries.push(BalanceDelta {
                    chain_id: snapshot.chain_id,
                    token: token.clone(),
                    raw,
                });
            }
        }
        entries.sort_by(|a, b| {
            (a.chain_id, a.token.symbol.clone()).cmp(&(b.chain_id, b.token.symbol.clone()))
        });
        DeltaReport { entries }
    }

    pub fn gas_map(&self) -> HashMap<u64, U256> {
        self.gas_by_chain.iter().map(|(k, v)| (*k, *v)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::errors::BalanceError;

    #[derive(Debug)]
    struct StaticReader {
        balances: Vec<(u64, Address, U256)>,
    }

    #[async_trait]
    impl BalanceReader for StaticReader {
        async fn balance_of(
            &self,
            chain_id: u64,
            _wallet: Address,
            token: &TokenInfo,
            _block: Option<u64>,
        ) -> Result<U256, BalanceError> {
            Ok(self
                .balances
                .iter()
                .find(|(c, a, _)| *c == chain_id && *a == token.address)
                .map(|(_, _, b)| *b)
                .unwrap_or_default())
        }
    }

    fn eth() -> TokenInfo {
        TokenInfo::native("eth", 18, 1)
    }

    #[tokio::test]
    async fn debit_checks_simulated_not_live_balance() {
        let reader = StaticReader {
            balances: vec![(1, Address::zero(), U256::exp10(18) * 2u64)],
        };
        let retry = RetryPolicy::default();
        let mut sim = SimState::new(Address::repeat_byte(0xaa), [(1u64, None)]);

        let one_eth = TokenAmount::new(U256::exp10(18), 18);
        sim.debit(&eth(), &one_eth, "ethereum", false, 100, &reader, &retry)
            .await
            .unwrap();
        // Second spend sees the post-debit balance of 1 ETH, so 1.5 fails.
        let one_and_half = TokenAmount::new(U256::exp10(18) * 3u64 / 2u64, 18);
        let err = sim
            .debit(&eth(), &one_and_half, "ethereum", false, 100, &reader, &retry)
            .await
            .unwrap_err();
        match err {
            ResolveError::InsufficientBalance { have, need, deficit, .. } => {
                assert_eq!(have, "1");
                assert_eq!(need, "1.5");
                assert_eq!(deficit, "0.5");
            }
            other => panic!("expected insufficient balance, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dust_residue_clamps_to_zero_on_all_spends() {
        let full = U256::exp10(18);
        let reader = StaticReader { balances: vec![(1, Address::zero(), full)] };
        let retry = RetryPolicy::default();
        let mut sim = SimState::new(Address::repeat_byte(0xaa), [(1u64, None)]);

        // Venue consumed 99.5% of the balance; the 0.5% residue is dust.
        let spent = TokenAmount::new(full * 995u64 / 1000u64, 18);
        sim.debit(&eth(), &spent, "ethereum", true, 100, &reader, &retry)
            .await
            .unwrap();
        let remaining = sim.balance_of(&eth(), &reader, &retry).await.unwrap();
        assert!(remaining.is_zero());

        let deltas = sim.deltas();
        assert_eq!(deltas.of(1, "eth"), Some(-1.0));
    }

    #[tokio::test]
    async fn deltas_measure_against_pre_plan_balances() {
        let usdc_addr = Address::repeat_byte(0x22);
        let usdc = TokenInfo {
            address: usdc_addr,
            symbol: "usdc".into(),
            decimals: 6,
            chain_id: 1,
            is_native: false,
        };
        // Wallet already holds 5 USDC before the plan runs.
        let reader = StaticReader {
            balances: vec![(1, usdc_addr, U256::from(5_000_000u64))],
        };
        let retry = RetryPolicy::default();
        let mut sim = SimState::new(Address::repeat_byte(0xaa), [(1u64, None)]);

        let bought = TokenAmount::new(U256::from(10_000_000u64), 6);
        sim.credit(&usdc, &bought, &reader, &retry).await.unwrap();

        let deltas = sim.deltas();
        assert_eq!(deltas.of(1, "usdc"), Some(10.0));
    }

    #[tokio::test]
    async fn aggregate_output_sums_sibling_legs() {
        let usdc = TokenInfo {
            address: Address::repeat_byte(0x22),
            symbol: "usdc".into(),
            decimals: 6,
            chain_id: 1,
            is_native: false,
        };
        let mut sim = SimState::new(Address::repeat_byte(0xaa), [(1u64, None)]);
        sim.record_output(0, RealizedOutput {
            chain_id: 1,
            token: usdc.clone(),
            amount: TokenAmount::new(U256::from(1_000_000u64), 6),
        });
        sim.record_output(0, RealizedOutput {
            chain_id: 1,
            token: usdc.clone(),
            amount: TokenAmount::new(U256::from(2_500_000u64), 6),
        });
        let agg = sim.aggregate_output(0).expect("aggregate");
        assert_eq!(agg.amount.raw, U256::from(3_500_000u64));
        assert!(sim.aggregate_output(1).is_none());
    }
}

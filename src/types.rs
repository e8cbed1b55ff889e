//! # Core Type Definitions
//!
//! Single source of truth for the data model shared by the resolver, the
//! disambiguator and the simulator: wallet intents as they arrive on the wire,
//! the symbolic expressions they carry, and the fully materialized execution
//! plan that comes out the other end.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use ethers::types::{Address, I256, U256};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use smallvec::SmallVec;

use crate::errors::NumericError;

//================================================================================================//
//                                  CANONICAL NUMERIC TYPES                                       //
//================================================================================================//

/// Token amount with decimal-aware arithmetic and overflow protection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TokenAmount {
    /// Raw amount in base units (no decimals).
    pub raw: U256,
    /// Decimal places for this token.
    pub decimals: u8,
}

impl TokenAmount {
    pub fn new(raw: U256, decimals: u8) -> Self {
        Self { raw, decimals }
    }

    pub fn zero(decimals: u8) -> Self {
        Self { raw: U256::zero(), decimals }
    }

    pub fn is_zero(&self) -> bool {
        self.raw.is_zero()
    }

    pub fn checked_add(&self, other: &TokenAmount) -> Result<TokenAmount, NumericError> {
        if self.decimals != other.decimals {
            return Err(NumericError::DecimalsMismatch(self.decimals, other.decimals));
        }
        let raw = self
            .raw
            .checked_add(other.raw)
            .ok_or_else(|| NumericError::Overflow("amount addition".into()))?;
        Ok(TokenAmount::new(raw, self.decimals))
    }

    pub fn checked_sub(&self, other: &TokenAmount) -> Result<TokenAmount, NumericError> {
        if self.decimals != other.decimals {
            return Err(NumericError::DecimalsMismatch(self.decimals, other.decimals));
        }
        let raw = self
            .raw
            .checked_sub(other.raw)
            .ok_or_else(|| NumericError::Underflow("amount subtraction".into()))?;
        Ok(TokenAmount::new(raw, self.decimals))
    }

    /// Integer half of the raw amount.
    pub fn halved(&self) -> TokenAmount {
        TokenAmount::new(self.raw / U256::from(2u8), self.decimals)
    }

    /// Scale by basis points (`10_000` bps = the full amount).
    pub fn apply_bps(&self, bps: u32) -> Result<TokenAmount, NumericError> {
        let raw = self
            .raw
            .checked_mul(U256::from(bps))
            .ok_or_else(|| NumericError::Overflow("bps scaling".into()))?
            / U256::from(10_000u32);
        Ok(TokenAmount::new(raw, self.decimals))
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", crate::units::format_units_trimmed(self.raw, self.decimals))
    }
}

/// Concrete token identity on one chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
    pub chain_id: u64,
    /// The chain's gas asset; `address` is the zero sentinel in that case.
    pub is_native: bool,
}

impl TokenInfo {
    pub fn native(symbol: &str, decimals: u8, chain_id: u64) -> Self {
        Self {
            address: Address::zero(),
            symbol: symbol.to_string(),
            decimals,
            chain_id,
            is_native: true,
        }
    }
}

//================================================================================================//
//                                      WIRE-LEVEL INTENTS                                        //
//================================================================================================//

/// The closed set of intent kinds understood by the resolver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Swap,
    Bridge,
    Transfer,
    Deposit,
    Withdraw,
    Lend,
    Borrow,
    Repay,
    Stake,
    Unstake,
    Claim,
    Long,
    Short,
    Close,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Swap => "swap",
            ActionKind::Bridge => "bridge",
            ActionKind::Transfer => "transfer",
            ActionKind::Deposit => "deposit",
            ActionKind::Withdraw => "withdraw",
            ActionKind::Lend => "lend",
            ActionKind::Borrow => "borrow",
            ActionKind::Repay => "repay",
            ActionKind::Stake => "stake",
            ActionKind::Unstake => "unstake",
            ActionKind::Claim => "claim",
            ActionKind::Long => "long",
            ActionKind::Short => "short",
            ActionKind::Close => "close",
        }
    }

    /// Kinds whose funds leave the wallet and must pass the balance check.
    pub fn spends_wallet_funds(&self) -> bool {
        matches!(
            self,
            ActionKind::Swap
                | ActionKind::Bridge
                | ActionKind::Transfer
                | ActionKind::Deposit
                | ActionKind::Lend
                | ActionKind::Repay
                | ActionKind::Stake
                | ActionKind::Long
                | ActionKind::Short
        )
    }

    /// Kinds that pull funds out of a protocol position rather than the wallet.
    pub fn draws_from_position(&self) -> bool {
        matches!(
            self,
            ActionKind::Withdraw
                | ActionKind::Borrow
                | ActionKind::Unstake
                | ActionKind::Claim
                | ActionKind::Close
        )
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A symbolic amount expression as written by the upstream language layer.
///
/// `StepOutput` is the typed form of the `"outputAmount"` placeholder: it binds
/// to the realized output of the causally previous step, which does not exist
/// until that step has been simulated.
#[derive(Clone, Debug, PartialEq)]
pub enum AmountExpr {
    /// Literal decimal string, denominated in the carried units (or the spend
    /// token itself when no units are given).
    Exact(String),
    All,
    Half,
    /// `N%` of the balance at the time the step executes.
    Percent(f64),
    StepOutput,
}

impl AmountExpr {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "all" | "max" => return AmountExpr::All,
            "half" => return AmountExpr::Half,
            "outputamount" => return AmountExpr::StepOutput,
            _ => {}
        }
        if let Some(stripped) = trimmed.strip_suffix('%') {
            if let Ok(pct) = stripped.trim().parse::<f64>() {
                return AmountExpr::Percent(pct);
            }
        }
        AmountExpr::Exact(trimmed.to_string())
    }
}

impl<'de> Deserialize<'de> for AmountExpr {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ExprVisitor;
        impl<'de> Visitor<'de> for ExprVisitor {
            type Value = AmountExpr;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an amount expression (number, \"all\", \"half\", \"N%\" or \"outputAmount\")")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<AmountExpr, E> {
                Ok(AmountExpr::parse(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<AmountExpr, E> {
                Ok(AmountExpr::Exact(v.to_string()))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<AmountExpr, E> {
                Ok(AmountExpr::Exact(v.to_string()))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<AmountExpr, E> {
                Ok(AmountExpr::Exact(v.to_string()))
            }
        }
        deserializer.deserialize_any(ExprVisitor)
    }
}

/// A token as referenced by the caller: symbol, raw contract address, the
/// typed `"outputToken"` placeholder, or the portfolio selector `"all"`.
#[derive(Clone, Debug, PartialEq)]
pub enum TokenRef {
    Symbol(String),
    Address(Address),
    StepOutput,
    All,
}

impl TokenRef {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "outputtoken" => return TokenRef::StepOutput,
            "all" => return TokenRef::All,
            _ => {}
        }
        if trimmed.len() == 42 && trimmed.starts_with("0x") {
            if let Ok(addr) = Address::from_str(trimmed) {
                return TokenRef::Address(addr);
            }
        }
        TokenRef::Symbol(trimmed.to_string())
    }

    /// Caller-facing spelling, used in error messages.
    pub fn display_name(&self) -> String {
        match self {
            TokenRef::Symbol(s) => s.clone(),
            TokenRef::Address(a) => format!("{a:#x}"),
            TokenRef::StepOutput => "outputToken".to_string(),
            TokenRef::All => "all".to_string(),
        }
    }
}

impl<'de> Deserialize<'de> for TokenRef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(TokenRef::parse(&raw))
    }
}

/// Chain selector; bridges carry independent source and destination refs.
#[derive(Clone, Debug, PartialEq)]
pub enum ChainRef {
    Named(String),
    All,
}

impl ChainRef {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("all") {
            ChainRef::All
        } else {
            ChainRef::Named(trimmed.to_string())
        }
    }
}

impl<'de> Deserialize<'de> for ChainRef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(ChainRef::parse(&raw))
    }
}

/// Accepts a bare value or a list of values (multi-leg actions name several
/// source tokens/amounts in one step).
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T: Clone> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(v) => vec![v],
            OneOrMany::Many(v) => v,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            OneOrMany::One(_) => 1,
            OneOrMany::Many(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Loosely typed numeric argument: a JSON number, or a string that may carry a
/// `%` / `x` suffix (`"50%"`, `"4x"`).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FlexNum(pub f64);

impl<'de> Deserialize<'de> for FlexNum {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct NumVisitor;
        impl<'de> Visitor<'de> for NumVisitor {
            type Value = FlexNum;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a number, or a numeric string with an optional '%' or 'x' suffix")
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<FlexNum, E> {
                Ok(FlexNum(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<FlexNum, E> {
                Ok(FlexNum(v as f64))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<FlexNum, E> {
                Ok(FlexNum(v as f64))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<FlexNum, E> {
                let cleaned = v
                    .trim()
                    .trim_end_matches(|c| c == '%' || c == 'x' || c == 'X')
                    .trim();
                cleaned
                    .parse::<f64>()
                    .map(FlexNum)
                    .map_err(|_| E::custom(format!("invalid numeric argument: {v}")))
            }
        }
        deserializer.deserialize_any(NumVisitor)
    }
}

//================================================================================================//
//                                  PER-KIND ARGUMENT RECORDS                                     //
//================================================================================================//

#[derive(Clone, Debug, Deserialize)]
pub struct SwapArgs {
    #[serde(rename = "inputToken")]
    pub input_token: OneOrMany<TokenRef>,
    #[serde(rename = "outputToken")]
    pub output_token: TokenRef,
    #[serde(rename = "inputAmount", default)]
    pub input_amount: Option<OneOrMany<AmountExpr>>,
    #[serde(rename = "outputAmount", default)]
    pub output_amount: Option<AmountExpr>,
    #[serde(rename = "inputAmountUnits", default)]
    pub input_amount_units: Option<String>,
    #[serde(default)]
    pub slippage: Option<FlexNum>,
    #[serde(rename = "protocolName", default)]
    pub protocol_name: Option<String>,
    #[serde(rename = "chainName", default)]
    pub chain_name: Option<ChainRef>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct BridgeArgs {
    pub token: OneOrMany<TokenRef>,
    pub amount: AmountExpr,
    #[serde(rename = "amount_units", default)]
    pub amount_units: Option<String>,
    #[serde(rename = "sourceChainName")]
    pub source_chain_name: ChainRef,
    #[serde(rename = "destinationChainName")]
    pub destination_chain_name: ChainRef,
    #[serde(rename = "protocolName", default)]
    pub protocol_name: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TransferArgs {
    pub token: TokenRef,
    pub amount: AmountExpr,
    pub recipient: String,
    #[serde(rename = "amount_units", default)]
    pub amount_units: Option<String>,
    #[serde(rename = "chainName", default)]
    pub chain_name: Option<ChainRef>,
}

/// Shared shape for deposit / withdraw / lend / borrow / repay / stake / unstake.
#[derive(Clone, Debug, Deserialize)]
pub struct ProtocolArgs {
    #[serde(rename = "protocolName")]
    pub protocol_name: String,
    pub token: TokenRef,
    pub amount: AmountExpr,
    #[serde(rename = "amount_units", default)]
    pub amount_units: Option<String>,
    #[serde(rename = "poolName", default)]
    pub pool_name: Option<String>,
    #[serde(rename = "chainName", default)]
    pub chain_name: Option<ChainRef>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ClaimArgs {
    #[serde(rename = "protocolName")]
    pub protocol_name: String,
    #[serde(rename = "poolName", default)]
    pub pool_name: Option<String>,
    #[serde(rename = "chainName", default)]
    pub chain_name: Option<ChainRef>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PerpArgs {
    #[serde(rename = "protocolName")]
    pub protocol_name: String,
    #[serde(rename = "inputToken")]
    pub input_token: TokenRef,
    #[serde(rename = "inputAmount")]
    pub input_amount: AmountExpr,
    #[serde(rename = "inputAmountUnits", default)]
    pub input_amount_units: Option<String>,
    #[serde(rename = "outputToken")]
    pub output_token: TokenRef,
    #[serde(rename = "leverageMultiplier", default)]
    pub leverage_multiplier: Option<FlexNum>,
    #[serde(rename = "chainName", default)]
    pub chain_name: Option<ChainRef>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CloseArgs {
    #[serde(rename = "protocolName")]
    pub protocol_name: String,
    #[serde(rename = "outputToken")]
    pub output_token: TokenRef,
    #[serde(rename = "percentReduction", default)]
    pub percent_reduction: Option<FlexNum>,
    #[serde(rename = "chainName", default)]
    pub chain_name: Option<ChainRef>,
}

/// One abstract intent. Required fields are enforced at deserialization time;
/// an action with a missing required argument never constructs.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "name", content = "args", rename_all = "lowercase")]
pub enum Action {
    Swap(SwapArgs),
    Bridge(BridgeArgs),
    Transfer(TransferArgs),
    Deposit(ProtocolArgs),
    Withdraw(ProtocolArgs),
    Lend(ProtocolArgs),
    Borrow(ProtocolArgs),
    Repay(ProtocolArgs),
    Stake(ProtocolArgs),
    Unstake(ProtocolArgs),
    Claim(ClaimArgs),
    Long(PerpArgs),
    Short(PerpArgs),
    Close(CloseArgs),
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Swap(_) => ActionKind::Swap,
            Action::Bridge(_) => ActionKind::Bridge,
            Action::Transfer(_) => ActionKind::Transfer,
            Action::Deposit(_) => ActionKind::Deposit,
            Action::Withdraw(_) => ActionKind::Withdraw,
            Action::Lend(_) => ActionKind::Lend,
            Action::Borrow(_) => ActionKind::Borrow,
            Action::Repay(_) => ActionKind::Repay,
            Action::Stake(_) => ActionKind::Stake,
            Action::Unstake(_) => ActionKind::Unstake,
            Action::Claim(_) => ActionKind::Claim,
            Action::Long(_) => ActionKind::Long,
            Action::Short(_) => ActionKind::Short,
            Action::Close(_) => ActionKind::Close,
        }
    }
}

//================================================================================================//
//                                     RESOLVED PLAN TYPES                                        //
//================================================================================================//

/// A venue's answer for one step.
#[derive(Clone, Debug, Serialize)]
pub struct Quote {
    pub venue: String,
    pub output_token: TokenInfo,
    pub output_chain_id: u64,
    /// Net amount credited to the wallet, fees already deducted.
    pub amount_out: TokenAmount,
    /// Venue fee, denominated in the output token. Informational for ranking.
    pub fee: TokenAmount,
    pub slippage_bps: u32,
    pub gas_estimate: U256,
    /// Underlying transactions this step will broadcast (approvals included).
    pub tx_count: usize,
}

/// Realized result of a simulated step, available to later placeholders.
#[derive(Clone, Debug, Serialize)]
pub struct RealizedOutput {
    pub chain_id: u64,
    pub token: TokenInfo,
    pub amount: TokenAmount,
}

/// The materialized result of resolving one action (or one expanded leg).
#[derive(Clone, Debug, Serialize)]
pub struct ExecutionStep {
    pub index: usize,
    /// Causal position in the plan. Sibling legs expanded from one action
    /// share an origin; placeholders bind to the previous origin's aggregate.
    pub origin: usize,
    pub kind: ActionKind,
    pub chain_id: u64,
    pub dest_chain_id: Option<u64>,
    pub input_token: TokenInfo,
    pub output_token: Option<TokenInfo>,
    pub amount: TokenAmount,
    pub venue: String,
    pub quote: Quote,
    /// Filled in by the simulator once the step has executed.
    pub realized: Option<RealizedOutput>,
}

/// Ordered, causally consistent sequence of execution steps.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ExecutionPlan {
    pub steps: Vec<ExecutionStep>,
}

impl ExecutionPlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Realized outputs of every sibling leg at `origin`.
    pub fn realized_at_origin(&self, origin: usize) -> SmallVec<[&RealizedOutput; 4]> {
        self.steps
            .iter()
            .filter(|s| s.origin == origin)
            .filter_map(|s| s.realized.as_ref())
            .collect()
    }
}

//================================================================================================//
//                                    REQUEST / OUTCOME                                           //
//================================================================================================//

/// One chain placed in scope for a request, optionally pinned to a block.
#[derive(Clone, Debug, Deserialize)]
pub struct ChainSelector {
    pub name: String,
    #[serde(rename = "blockNumber", default)]
    pub pinned_block: Option<u64>,
}

impl ChainSelector {
    pub fn latest(name: &str) -> Self {
        Self { name: name.to_string(), pinned_block: None }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct PlanRequest {
    #[serde(rename = "accountAddress")]
    pub wallet: Address,
    pub actions: Vec<Action>,
    pub chains: Vec<ChainSelector>,
}

/// Signed balance change of one token on one chain, start to end of plan.
#[derive(Clone, Debug, Serialize)]
pub struct BalanceDelta {
    pub chain_id: u64,
    pub token: TokenInfo,
    pub raw: I256,
}

impl BalanceDelta {
    /// Decimal-adjusted signed change, for display and test assertions.
    pub fn amount(&self) -> f64 {
        let negative = self.raw.is_negative();
        let abs = self.raw.unsigned_abs();
        let formatted = crate::units::format_units_trimmed(abs, self.token.decimals);
        let value = formatted.parse::<f64>().unwrap_or(0.0);
        if negative {
            -value
        } else {
            value
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct DeltaReport {
    pub entries: Vec<BalanceDelta>,
}

impl DeltaReport {
    pub fn of(&self, chain_id: u64, symbol: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|d| d.chain_id == chain_id && d.token.symbol.eq_ignore_ascii_case(symbol))
            .map(|d| d.amount())
    }
}

/// Successful planning result: the plan plus what simulation observed.
#[derive(Clone, Debug, Serialize)]
pub struct PlanOutcome {
    pub plan: ExecutionPlan,
    pub deltas: DeltaReport,
    pub gas_by_chain: HashMap<u64, U256>,
    /// Set when the plan hit the transaction cap and later steps were dropped.
    pub truncated: bool,
}

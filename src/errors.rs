//! # Centralized Error Handling
//!
//! A closed, typed error taxonomy for the whole planning pipeline. Every
//! resolution or simulation failure is mapped into exactly one
//! [`ResolveError`] variant before it reaches the caller, and the variant's
//! message is the literal user-facing diagnosis; several downstream surfaces
//! match on these strings, so they are part of the contract.

use thiserror::Error;

/// The top-level error type for crate consumers that wire their own
/// infrastructure (config loading, venue registration).
#[derive(Error, Debug)]
pub enum PlannerError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

/// The closed taxonomy of user-facing planning failures.
///
/// Message strings are contractual: exact wording is asserted by tests and
/// relied on by the conversational layer upstream.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    #[error("Not enough {token} on {chain}. You have {have} and need {need}. Please onboard {deficit} more {token} and try again.")]
    InsufficientBalance {
        token: String,
        chain: String,
        have: String,
        need: String,
        deficit: String,
    },

    #[error("Token {token} not found on {chain}.")]
    TokenNotFound { token: String, chain: String },

    #[error("Chain {chain} is not supported. Supported chains are {supported}.")]
    UnsupportedChain { chain: String, supported: String },

    #[error("Protocol {protocol} is not supported for {action}. Supported protocols are {supported}.")]
    UnsupportedProtocolForAction {
        protocol: String,
        action: String,
        supported: String,
    },

    #[error("Pool {pool} is not supported for protocol {protocol} on {chain}.")]
    UnsupportedPoolForProtocol {
        pool: String,
        protocol: String,
        chain: String,
    },

    #[error("Cannot swap {token} for itself on {chain}. Pick a different output token.")]
    SameTokenSwap { token: String, chain: String },

    #[error("You cannot bridge from all chains to all chains. Please specify correct arguments in your next prompt!")]
    AmbiguousAllChains,

    #[error("Leverage multiplier out of range. Max leverage allowed is {max}.")]
    LeverageOutOfRange { max: f64 },

    #[error("Leverage multiplier must be greater than zero")]
    LeverageNotPositive,

    #[error("Percent reduction must be greater than 0% and at most 100%.")]
    PercentOutOfRange,

    #[error("Cannot simulate actions after bridging to {chain}.")]
    PostBridgeSimulationUnsupported { chain: String },

    #[error("No swap route found for {input} to {output} on {chain}. Try again in a few minutes.")]
    NoSwapRoute {
        input: String,
        output: String,
        chain: String,
    },

    #[error("No bridge route found for {token} from {src} to {destination}.")]
    NoBridgeRoute {
        token: String,
        src: String,
        destination: String,
    },

    #[error("{venue} cannot bridge your full {token} balance. Please specify an exact amount and try again.")]
    AllAmountUnsupported { venue: String, token: String },

    #[error("{chain} only accepts its native asset as a bridge input. Bridge {native} instead of {token}.")]
    NativeOnlyBridgeInput {
        chain: String,
        native: String,
        token: String,
    },

    #[error("{amount} is an invalid amount. Please specify an amount correctly and try again.")]
    InvalidAmount { amount: String },

    #[error("The amount being used is zero, ensure you have funds in your account")]
    ZeroAmount,

    #[error("No actions to resolve. Please provide at least one action.")]
    EmptyPlan,

    #[error("Could not fetch token info. This was a temporary issue, please try again.")]
    Transport { detail: String },

    #[error("Something went wrong while preparing your transactions. Please try again.")]
    Internal { detail: String },
}

/// Arithmetic failures inside amount math. Never user-facing on their own.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NumericError {
    #[error("Overflow during {0}")]
    Overflow(String),
    #[error("Underflow during {0}")]
    Underflow(String),
    #[error("Division by zero during {0}")]
    DivisionByZero(String),
    #[error("Decimal mismatch: {0} vs {1}")]
    DecimalsMismatch(u8, u8),
}

/// Failures while reading balances from a chain.
#[derive(Error, Debug, Clone)]
pub enum BalanceError {
    #[error("Provider error: {0}")]
    Provider(String),
    #[error("Retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

/// Failures while fetching market data.
#[derive(Error, Debug, Clone)]
pub enum PriceError {
    #[error("No price available for {symbol} on chain {chain_id}")]
    Unavailable { symbol: String, chain_id: u64 },
    #[error("Price provider error: {0}")]
    Provider(String),
}

/// Failures reported by a venue adapter.
#[derive(Error, Debug, Clone)]
pub enum VenueError {
    #[error("Quote failed: {0}")]
    QuoteFailed(String),
    #[error("Venue {venue} cannot quote a full-balance amount for {token}")]
    AllAmountUnsupported { venue: String, token: String },
    #[error("Transaction build failed: {0}")]
    BuildFailed(String),
}

impl From<NumericError> for ResolveError {
    fn from(err: NumericError) -> Self {
        ResolveError::Internal { detail: err.to_string() }
    }
}

impl From<BalanceError> for ResolveError {
    fn from(err: BalanceError) -> Self {
        ResolveError::Transport { detail: err.to_string() }
    }
}

impl From<PriceError> for ResolveError {
    fn from(err: PriceError) -> Self {
        ResolveError::Transport { detail: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_balance_message_contract() {
        let err = ResolveError::InsufficientBalance {
            token: "WETH".into(),
            chain: "ethereum".into(),
            have: "0.01".into(),
            need: "0.1".into(),
            deficit: "0.09".into(),
        };
        assert_eq!(
            err.to_string(),
            "Not enough WETH on ethereum. You have 0.01 and need 0.1. Please onboard 0.09 more WETH and try again."
        );
    }

    #[test]
    fn leverage_message_matches_venue_wording() {
        let err = ResolveError::LeverageOutOfRange { max: 50.0 };
        assert_eq!(
            err.to_string(),
            "Leverage multiplier out of range. Max leverage allowed is 50."
        );
    }

    #[test]
    fn all_chains_message_is_verbatim() {
        assert_eq!(
            ResolveError::AmbiguousAllChains.to_string(),
            "You cannot bridge from all chains to all chains. Please specify correct arguments in your next prompt!"
        );
    }
}

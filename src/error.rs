//! Error types for the coordinator

use ethers::types::{Address, H256, U256};
use thiserror::Error;

/// Typed failures crossing the chain gateway boundary.
///
/// The gateway never panics or leaks provider errors upward; every chain
/// interaction resolves to one of these.
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("chain {chain_id} unreachable: {message}")]
    ChainUnreachable { chain_id: u64, message: String },

    #[error("chain {chain_id} not configured")]
    UnknownChain { chain_id: u64 },

    #[error("transfer not authorized for {owner} on chain {chain_id}")]
    NotAuthorized { chain_id: u64, owner: Address },

    #[error("allowance {have} below required {need} on chain {chain_id}")]
    InsufficientAllowance {
        chain_id: u64,
        have: U256,
        need: U256,
    },

    #[error("submission rejected on chain {chain_id}: {reason}")]
    Rejected { chain_id: u64, reason: String },

    #[error("transaction {tx_hash} not found on chain {chain_id}")]
    TxNotFound { chain_id: u64, tx_hash: H256 },

    #[error("transaction {tx_hash} reverted on chain {chain_id}")]
    TxReverted { chain_id: u64, tx_hash: H256 },

    #[error("timed out waiting for {operation} on chain {chain_id}")]
    Timeout { chain_id: u64, operation: String },

    #[error("escrow {escrow} already claimed on chain {chain_id}")]
    AlreadyClaimed { chain_id: u64, escrow: Address },

    #[error("escrow {escrow} deadline passed on chain {chain_id}")]
    DeadlinePassed { chain_id: u64, escrow: Address },

    #[error("preimage does not match escrow hashlock on chain {chain_id}")]
    HashMismatch { chain_id: u64 },

    #[error("no revealed secret found in {tx_hash} on chain {chain_id}")]
    SecretNotFound { chain_id: u64, tx_hash: H256 },
}

impl ChainError {
    /// Transient failures are worth another attempt; the rest are verdicts.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChainError::ChainUnreachable { .. } | ChainError::Timeout { .. }
        )
    }
}

/// Main error type for the coordinator
#[derive(Error, Debug)]
pub enum CoordinatorError {
    // -- validation: surfaced to caller, state unchanged --
    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("signature does not recover to maker {maker}")]
    BadSignature { maker: Address },

    #[error("preimage hash does not match order hashlock")]
    HashMismatch,

    #[error("maker allowance {have} below src amount {need}")]
    AllowanceTooLow { have: U256, need: U256 },

    #[error("market price {market} below minimum acceptable {min}")]
    MarketBelowMinimum { market: U256, min: U256 },

    #[error("order {order_id} already exists")]
    DuplicateOrder { order_id: H256 },

    #[error("quoted price {quoted} outside auction band (floor {floor}, current {current})")]
    PriceOutOfBand {
        quoted: U256,
        floor: U256,
        current: U256,
    },

    // -- state: wrong status or wrong resolver --
    #[error("order {order_id} not found")]
    OrderNotFound { order_id: H256 },

    #[error("order {order_id} is {status}, operation requires {required}")]
    WrongStatus {
        order_id: H256,
        status: String,
        required: String,
    },

    #[error("resolver {resolver} does not hold the commitment on order {order_id}")]
    NotCommittedResolver { order_id: H256, resolver: Address },

    #[error("secret for order {order_id} not yet revealed")]
    SecretNotRevealed { order_id: H256 },

    // -- fund verification: order stays put pending correction --
    #[error("escrow {escrow} holds {have}, expected at least {need}")]
    EscrowUnderfunded {
        escrow: Address,
        have: U256,
        need: U256,
    },

    // -- transient / infrastructure --
    #[error("chain gateway: {0}")]
    Chain(#[from] ChainError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("bus publish failed: {0}")]
    Bus(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("price oracle has no quote for pair {src_token}/{dst_token}")]
    NoMarketPrice {
        src_token: Address,
        dst_token: Address,
    },

    #[error("arithmetic overflow computing {operation}")]
    Overflow { operation: &'static str },

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoordinatorError {
    /// Check if the supervising task should retry with back-off.
    pub fn is_retryable(&self) -> bool {
        match self {
            CoordinatorError::Chain(c) => c.is_transient(),
            CoordinatorError::Database(_) | CoordinatorError::Bus(_) => true,
            _ => false,
        }
    }

    /// Reveal outcomes that end the order even though the call failed.
    pub fn is_settlement_verdict(&self) -> bool {
        matches!(
            self,
            CoordinatorError::Chain(
                ChainError::AlreadyClaimed { .. } | ChainError::DeadlinePassed { .. }
            )
        )
    }
}

/// Result type for coordinator operations
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_chain_errors_are_retryable() {
        let err = CoordinatorError::Chain(ChainError::ChainUnreachable {
            chain_id: 84532,
            message: "connection refused".into(),
        });
        assert!(err.is_retryable());

        let err = CoordinatorError::Chain(ChainError::TxReverted {
            chain_id: 84532,
            tx_hash: H256::zero(),
        });
        assert!(!err.is_retryable());
    }

    #[test]
    fn already_claimed_is_a_verdict_not_a_retry() {
        let err = CoordinatorError::Chain(ChainError::AlreadyClaimed {
            chain_id: 421614,
            escrow: Address::zero(),
        });
        assert!(err.is_settlement_verdict());
        assert!(!err.is_retryable());
    }
}

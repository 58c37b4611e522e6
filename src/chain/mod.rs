//! Chain module - the only component that talks to the chains
//!
//! This module provides:
//! - The [`ChainGateway`] vocabulary every other component goes through
//! - Multi-RPC provider management with automatic failover
//! - Serialized same-signer submissions per chain (no nonce races)
//! - Receipt polling with per-chain confirmation depth

pub mod abi;
pub mod gateway;
pub mod provider;

pub use gateway::EvmGateway;
pub use provider::ChainProvider;

use crate::error::ChainError;
use crate::model::Secret;

use async_trait::async_trait;
use ethers::types::{Address, TransactionReceipt, H256, U256};

/// Abstract driver for per-chain reads and submissions.
///
/// Every operation returns a typed failure; nothing panics or leaks
/// provider errors across this boundary.
#[async_trait]
pub trait ChainGateway: Send + Sync {
    /// ERC-20 allowance granted by `owner` to `spender`, base units.
    async fn allowance(
        &self,
        chain_id: u64,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, ChainError>;

    /// Balance held by an escrow: the token's base units, or native wei
    /// when `token` is `None` (safety deposits).
    async fn escrow_balance(
        &self,
        chain_id: u64,
        escrow: Address,
        token: Option<Address>,
    ) -> Result<U256, ChainError>;

    /// `decimals()` of a token contract; 18 when the token does not answer.
    async fn token_decimals(&self, chain_id: u64, token: Address) -> Result<u8, ChainError>;

    /// Instruct the escrow factory to pull pre-approved maker funds into
    /// the source escrow.
    async fn transfer_user_funds(
        &self,
        chain_id: u64,
        order_id: H256,
        from: Address,
        token: Address,
        amount: U256,
    ) -> Result<H256, ChainError>;

    /// Block until `tx_hash` has `n` confirmations, re-verifying inclusion.
    async fn await_confirmations(
        &self,
        chain_id: u64,
        tx_hash: H256,
        n: u64,
    ) -> Result<TransactionReceipt, ChainError>;

    /// Unlock the destination escrow with the preimage.
    async fn reveal_on_destination(
        &self,
        chain_id: u64,
        escrow: Address,
        preimage: &Secret,
    ) -> Result<H256, ChainError>;

    /// Recover a preimage some other party revealed on-chain.
    async fn extract_revealed_secret(
        &self,
        chain_id: u64,
        tx_hash: H256,
        escrow: Address,
    ) -> Result<Secret, ChainError>;

    /// Liveness probe per configured chain.
    async fn health_check(&self) -> Vec<(u64, bool)>;

    /// All configured chain ids.
    fn connected_chains(&self) -> Vec<u64>;
}

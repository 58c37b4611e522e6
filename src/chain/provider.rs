//! Chain provider with multi-RPC support and automatic failover

use crate::config::ChainConfig;
use crate::error::ChainError;

use ethers::prelude::*;
use ethers::providers::{Http, Provider, RpcError};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    /// Chain configuration
    config: ChainConfig,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
}

impl ChainProvider {
    /// Create a new chain provider
    pub fn new(config: ChainConfig) -> Result<Self, ChainError> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(100));
                    http_providers.push(provider);
                    debug!("Added HTTP provider for chain {}: {}", config.chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(ChainError::ChainUnreachable {
                chain_id: config.chain_id,
                message: "No valid RPC providers".to_string(),
            });
        }

        Ok(Self {
            config,
            http_providers,
            current_provider: AtomicUsize::new(0),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!(
            "Chain {} failover to provider {}",
            self.config.chain_id, next
        );
    }

    fn unreachable(&self, message: impl Into<String>) -> ChainError {
        ChainError::ChainUnreachable {
            chain_id: self.config.chain_id,
            message: message.into(),
        }
    }

    /// Get current block number with failover
    pub async fn get_block_number(&self) -> Result<u64, ChainError> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_block_number().await {
                Ok(block) => return Ok(block.as_u64()),
                Err(e) => {
                    warn!(
                        "Failed to get block number from chain {}: {}",
                        self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(self.unreachable("All providers failed"))
    }

    /// Read-only contract call with failover
    pub async fn call(&self, tx: &TypedTransaction) -> Result<Bytes, ChainError> {
        let mut last_error = None;
        for _ in 0..self.http_providers.len() {
            match self.http().call(tx, None).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    // Reverts are verdicts, not connectivity problems; stop
                    // rotating and hand the message to the caller.
                    if RpcError::as_error_response(&e).is_some() {
                        return Err(ChainError::Rejected {
                            chain_id: self.config.chain_id,
                            reason: e.to_string(),
                        });
                    }
                    warn!("Call failed on chain {}: {}", self.config.chain_id, e);
                    last_error = Some(e);
                    self.failover();
                }
            }
        }

        Err(self.unreachable(
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "All providers failed".to_string()),
        ))
    }

    /// Get transaction receipt
    pub async fn get_transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> Result<Option<TransactionReceipt>, ChainError> {
        self.http()
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| self.unreachable(e.to_string()))
    }

    /// Native-currency balance of an account
    pub async fn get_balance(&self, account: Address) -> Result<U256, ChainError> {
        self.http()
            .get_balance(account, None)
            .await
            .map_err(|e| self.unreachable(e.to_string()))
    }

    /// Pending-inclusive nonce for an account
    pub async fn get_pending_nonce(&self, account: Address) -> Result<U256, ChainError> {
        self.http()
            .get_transaction_count(account, Some(BlockNumber::Pending.into()))
            .await
            .map_err(|e| self.unreachable(e.to_string()))
    }

    /// Current gas price
    pub async fn get_gas_price(&self) -> Result<U256, ChainError> {
        self.http()
            .get_gas_price()
            .await
            .map_err(|e| self.unreachable(e.to_string()))
    }

    /// Estimate gas for a transaction
    pub async fn estimate_gas(&self, tx: &TypedTransaction) -> Result<U256, ChainError> {
        self.http()
            .estimate_gas(tx, None)
            .await
            .map_err(|e| ChainError::Rejected {
                chain_id: self.config.chain_id,
                reason: e.to_string(),
            })
    }

    /// Broadcast a signed transaction
    pub async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, ChainError> {
        match self.http().send_raw_transaction(raw).await {
            Ok(pending) => Ok(pending.tx_hash()),
            Err(e) => Err(ChainError::Rejected {
                chain_id: self.config.chain_id,
                reason: e.to_string(),
            }),
        }
    }

    /// Health check
    pub async fn health_check(&self) -> bool {
        match self.get_block_number().await {
            Ok(_) => true,
            Err(e) => {
                error!(
                    "Health check failed for chain {}: {}",
                    self.config.chain_id, e
                );
                false
            }
        }
    }

    /// Get chain ID
    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    /// Escrow factory address on this chain
    pub fn escrow_factory(&self) -> Address {
        self.config.escrow_factory
    }

    /// Minimum safety deposit per escrow on this chain, wei
    pub fn min_safety_deposit(&self) -> U256 {
        self.config.min_safety_deposit_wei
    }
}
